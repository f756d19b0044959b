//! Runs the HTTP (and optionally gRPC) listeners next to the periodic
//! snapshot task, and performs the final save on shutdown.

use crate::app;
use crate::config::ServerConfig;
use crate::grpc;
use crate::state::AppState;
use anyhow::{anyhow, Result};
use statmon_storage::backend::Durability;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tonic::transport::server::TcpIncoming;

/// Sockets the server accepts on. gRPC is only served when a listener is
/// given for it.
pub struct Listeners {
    pub http: TcpListener,
    pub grpc: Option<TcpListener>,
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Period of snapshot writes. `None` writes only at shutdown.
    pub snapshot_interval: Option<Duration>,
    /// How long in-flight requests get to finish once shutdown starts.
    pub shutdown_timeout: Duration,
}

impl ServeOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            snapshot_interval: (config.store_interval_secs > 0)
                .then(|| Duration::from_secs(config.store_interval_secs)),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Writes a snapshot every `every` until shutdown. A failed write ends the
/// task with an error, which takes the server down.
async fn snapshot_loop(
    durability: Arc<Durability>,
    every: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;
    let stop = wait_for_shutdown(shutdown);
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => return Ok(()),
            _ = tick.tick() => {
                let written = durability.persist()?;
                tracing::debug!(records = ?written, "Periodic snapshot written");
            }
        }
    }
}

type TaskExit = (&'static str, Result<()>);

/// Turns a finished task into the error that should end the server, if any.
fn exit_error(joined: Result<TaskExit, JoinError>, stopping: bool) -> Option<anyhow::Error> {
    match joined {
        Ok((task, Ok(()))) => {
            if !stopping {
                tracing::warn!(task, "Server task exited");
            }
            None
        }
        Ok((task, Err(e))) => {
            tracing::error!(task, error = %e, "Server task failed");
            Some(e)
        }
        Err(e) => Some(e.into()),
    }
}

/// Serves until `shutdown` resolves or a server task fails, then drains
/// in-flight requests within the shutdown timeout and writes the final
/// snapshot.
///
/// # Errors
///
/// The first failure among the listeners and the snapshot task, or the
/// final snapshot failure when nothing else failed first.
pub async fn serve_with_shutdown<F>(
    state: AppState,
    durability: Arc<Durability>,
    listeners: Listeners,
    options: ServeOptions,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let Listeners {
        http,
        grpc: grpc_listener,
    } = listeners;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<TaskExit> = JoinSet::new();

    let http_addr = http.local_addr()?;
    let http_app = app::build_http_app(state.clone());
    let http_stop = wait_for_shutdown(shutdown_rx.clone());
    tasks.spawn(async move {
        let served = axum::serve(http, http_app)
            .with_graceful_shutdown(http_stop)
            .await;
        ("http", served.map_err(anyhow::Error::from))
    });

    let grpc_addr = match grpc_listener {
        Some(listener) => {
            let addr = listener.local_addr()?;
            let incoming = TcpIncoming::from_listener(listener, true, None)
                .map_err(|e| anyhow!("cannot accept gRPC connections: {e}"))?;
            let service = grpc::metrics_service(state.clone());
            let grpc_stop = wait_for_shutdown(shutdown_rx.clone());
            tasks.spawn(async move {
                let served = tonic::transport::Server::builder()
                    .add_service(service)
                    .serve_with_incoming_shutdown(incoming, grpc_stop)
                    .await;
                ("grpc", served.map_err(anyhow::Error::from))
            });
            Some(addr)
        }
        None => None,
    };

    if let (Some(every), true) = (options.snapshot_interval, durability.has_snapshot()) {
        let durability = durability.clone();
        let stop = shutdown_rx.clone();
        tasks.spawn(async move { ("snapshot", snapshot_loop(durability, every, stop).await) });
    }

    tracing::info!(
        http = %http_addr,
        grpc = %grpc_addr.map_or_else(|| "-".to_string(), |a| a.to_string()),
        backend = state.store.backend_name(),
        snapshot_interval = ?options.snapshot_interval,
        encrypted = state.decryptor.is_some(),
        "Server started"
    );

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        _ = shutdown => {
            tracing::info!("Shutting down gracefully");
        }
        Some(joined) = tasks.join_next() => {
            fatal = exit_error(joined, false);
        }
    }

    let _ = shutdown_tx.send(true);
    let drain = async {
        let mut first = None;
        while let Some(joined) = tasks.join_next().await {
            if let Some(e) = exit_error(joined, true) {
                first.get_or_insert(e);
            }
        }
        first
    };
    let drained = tokio::time::timeout(options.shutdown_timeout, drain).await;
    match drained {
        Ok(Some(e)) => {
            fatal.get_or_insert(e);
        }
        Ok(None) => {}
        Err(_) => {
            tracing::warn!(
                timeout_ms = options.shutdown_timeout.as_millis() as u64,
                "In-flight requests did not finish before the deadline"
            );
            tasks.abort_all();
        }
    }

    match durability.persist() {
        Ok(Some(records)) => tracing::info!(records, "Final snapshot written"),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "Final snapshot failed");
            fatal.get_or_insert(e.into());
        }
    }

    tracing::info!("Server stopped");
    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
