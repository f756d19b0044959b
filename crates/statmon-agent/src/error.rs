use statmon_common::crypto::CryptoError;
use tokio::sync::mpsc;

/// Where pipeline stages report problems they recover from.
pub type ErrorSink = mpsc::UnboundedSender<PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("gRPC call failed: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("invalid gRPC endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("payload encryption failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A batch could not be delivered and was dropped.
    #[error("delivery of {count} metrics failed: {source}")]
    Delivery {
        count: usize,
        #[source]
        source: TransportError,
    },

    /// A sample that cannot be represented on the wire was skipped.
    #[error("skipped metric '{name}': {reason}")]
    InvalidSample { name: String, reason: String },

    /// The poll count could not be handed to the pipeline; it is kept and
    /// retried on the next report tick.
    #[error("poll count {pending} not handed off: {reason}")]
    PollCountHandoff { pending: i64, reason: &'static str },

    /// A stage's downstream channel closed while it still had work.
    #[error("stage '{0}' lost its output channel")]
    OutputClosed(&'static str),

    #[error("task '{task}' panicked: {message}")]
    Panicked { task: &'static str, message: String },

    #[error("task '{task}' was cancelled")]
    Cancelled { task: &'static str },

    #[error("task '{task}' gave up after {restarts} restarts")]
    RestartBudgetExhausted { task: &'static str, restarts: u32 },
}

/// Sends `err` to the sink, logging instead if nobody is listening.
pub fn report(errors: &ErrorSink, err: PipelineError) {
    if let Err(mpsc::error::SendError(err)) = errors.send(err) {
        tracing::warn!(error = %err, "Pipeline error (no observer)");
    }
}
