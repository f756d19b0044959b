use anyhow::Result;
use statmon_common::crypto::{generate_key_pair, PayloadDecryptor};
use statmon_common::sign::Signer;
use statmon_server::config::ServerConfig;
use statmon_server::server::{serve_with_shutdown, Listeners, ServeOptions};
use statmon_server::state::AppState;
use statmon_storage::backend::Durability;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  statmon-server [config.toml]              Start the server");
    eprintln!("  statmon-server gen-keys <dir> [bits]      Write private.pem / public.pem for payload encryption");
}

#[tokio::main]
async fn main() -> Result<()> {
    statmon_common::id::init(1, 1)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("statmon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("gen-keys") => {
            let dir = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("gen-keys requires a <dir> argument")
            })?;
            let bits = match args.get(3) {
                Some(b) => b.parse()?,
                None => 4096,
            };
            let (private, public) = generate_key_pair(dir, bits)?;
            tracing::info!(private = %private.display(), public = %public.display(), "Keys written");
            Ok(())
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        other => run_server(other).await,
    }
}

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

async fn run_server(config_path: Option<&str>) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store_file = config.store_file();

    let durability = Arc::new(Durability::open(
        config.database_dsn.as_deref(),
        store_file.as_deref(),
    )?);
    if config.restore {
        durability.restore()?;
    }

    let signer = Signer::new(&config.key);
    if !signer.is_enabled() {
        tracing::warn!("No signing key configured, accepting unsigned metrics");
    }
    let mut state = AppState::new(durability.store(), signer, config.access_guard()?);
    if let Some(path) = &config.crypto_key {
        state = state.with_decryptor(PayloadDecryptor::from_pem_file(path)?);
    }

    let http_addr: SocketAddr = config.address.parse()?;
    let grpc = match &config.grpc_address {
        Some(addr) => {
            let addr: SocketAddr = addr.parse()?;
            Some(TcpListener::bind(addr).await?)
        }
        None => None,
    };
    let listeners = Listeners {
        http: TcpListener::bind(http_addr).await?,
        grpc,
    };
    tracing::info!(
        trusted_subnet = config.trusted_subnet.as_deref().unwrap_or("-"),
        "Listeners bound"
    );

    serve_with_shutdown(
        state,
        durability,
        listeners,
        ServeOptions::from_config(&config),
        shutdown_signal(),
    )
    .await
}
