use anyhow::Result;
use statmon_agent::config::{AgentConfig, TransportKind};
use statmon_agent::pipeline::{spawn_pipeline, PipelineConfig};
use statmon_agent::poller::Collector;
use statmon_agent::transport::{detect_real_ip, GrpcTransport, HttpTransport, Transport};
use statmon_common::crypto::PayloadEncryptor;
use statmon_common::sign::Signer;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("statmon=info".parse()?))
        .init();

    let config_path = std::env::args().nth(1);
    let config = AgentConfig::load(config_path.as_deref())?;

    let signer = Signer::new(&config.key);
    if !signer.is_enabled() {
        tracing::warn!("No signing key configured, metrics will be sent unsigned");
    }
    let encryptor = match &config.crypto_key {
        Some(path) => Some(PayloadEncryptor::from_pem_file(path)?),
        None => None,
    };
    let real_ip = detect_real_ip(config.agent_ip.as_deref());
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let (transport, server): (Arc<dyn Transport>, String) = match config.transport {
        TransportKind::Http => {
            let t = HttpTransport::new(&config.address, real_ip.clone(), encryptor, timeout)?;
            let url = t.url().to_string();
            (Arc::new(t), url)
        }
        TransportKind::Grpc => {
            let t = GrpcTransport::new(&config.address, real_ip.clone(), timeout)?;
            let endpoint = t.endpoint().to_string();
            (Arc::new(t), endpoint)
        }
    };
    tracing::info!(
        server = %server,
        transport = ?config.transport,
        real_ip = real_ip.as_deref().unwrap_or("-"),
        signed = signer.is_enabled(),
        encrypted = config.crypto_key.is_some(),
        "statmon-agent starting"
    );

    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    let error_log = tokio::spawn(async move {
        while let Some(e) = errors_rx.recv().await {
            tracing::warn!(error = %e, "Pipeline error");
        }
    });

    let pipeline_config = PipelineConfig {
        channel_capacity: config.channel_capacity,
        report_interval: config.report_interval(),
        restart: config.restart.clone(),
    };
    let (inputs, mut pipeline) = spawn_pipeline(&pipeline_config, signer, transport, errors_tx.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector = Collector::new(
        statmon_collector::default_samplers(),
        config.poll_interval(),
        config.report_interval(),
    );
    let mut collector = tokio::spawn(collector.run(inputs, errors_tx, shutdown_rx));

    let mut collector_done = false;
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutting down gracefully");
        }
        result = &mut pipeline => {
            // The pipeline only finishes on its own when a stage gave up.
            collector.abort();
            error_log.abort();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(e.into()),
            };
        }
        _ = &mut collector => {
            collector_done = true;
            tracing::warn!("Collector stopped unexpectedly");
        }
    }

    let _ = shutdown_tx.send(true);
    let deadline = Duration::from_secs(config.shutdown_timeout_secs);
    let drained = tokio::time::timeout(deadline, async {
        if !collector_done {
            let _ = collector.await;
        }
        pipeline.await
    })
    .await;
    match drained {
        Ok(Ok(Ok(()))) => tracing::info!("Final report flushed"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Pipeline failed during shutdown"),
        Ok(Err(e)) => tracing::error!(error = %e, "Pipeline task failed during shutdown"),
        Err(_) => tracing::warn!(timeout_secs = config.shutdown_timeout_secs, "Shutdown deadline passed, exiting"),
    }
    error_log.abort();
    tracing::info!("Agent stopped");
    Ok(())
}
