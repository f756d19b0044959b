use crate::access::Denied;
use crate::api::error_response;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use statmon_common::crypto::CryptoError;
use statmon_common::types::{MetricError, MetricKind};
use statmon_storage::error::StorageError;

/// Every way a request can fail, mapped 1:1 to an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Forbidden(#[from] Denied),

    #[error("{0}")]
    BadRequest(String),

    #[error("signature mismatch for metric '{0}'")]
    SignatureMismatch(String),

    #[error("{kind} metric '{name}' not found")]
    NotFound { kind: MetricKind, name: String },

    #[error("unsupported metric kind: {0}")]
    UnsupportedKind(String),

    #[error("{0}")]
    Storage(#[from] StorageError),
}

impl From<MetricError> for AppError {
    fn from(e: MetricError) -> Self {
        match e {
            MetricError::UnknownKind(kind) => AppError::UnsupportedKind(kind),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<CryptoError> for AppError {
    fn from(e: CryptoError) -> Self {
        AppError::BadRequest(format!("cannot decrypt payload: {e}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::BadRequest(format!("malformed JSON: {e}"))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) | AppError::SignatureMismatch(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::UnsupportedKind(_) => StatusCode::NOT_IMPLEMENTED,
            // Overflow is a property of the request, not of the backing.
            AppError::Storage(StorageError::CounterOverflow { .. }) => StatusCode::BAD_REQUEST,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Forbidden(_) => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::SignatureMismatch(_) => "signature_mismatch",
            AppError::NotFound { .. } => "not_found",
            AppError::UnsupportedKind(_) => "unsupported_kind",
            AppError::Storage(StorageError::CounterOverflow { .. }) => "bad_request",
            AppError::Storage(_) => "storage_error",
        }
    }

    pub fn into_response_with(self, trace_id: &str) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(trace_id = %trace_id, error = %self, "Request failed");
        }
        error_response(status, trace_id, self.code(), &self.to_string())
    }
}

impl From<AppError> for tonic::Status {
    fn from(e: AppError) -> Self {
        let message = e.to_string();
        match e.status() {
            StatusCode::FORBIDDEN => tonic::Status::permission_denied(message),
            StatusCode::BAD_REQUEST => tonic::Status::invalid_argument(message),
            StatusCode::NOT_FOUND => tonic::Status::not_found(message),
            StatusCode::NOT_IMPLEMENTED => tonic::Status::unimplemented(message),
            _ => tonic::Status::internal(message),
        }
    }
}

/// Unwraps a handler result into a response, rendering errors in the
/// standard envelope with the request's trace ID.
pub fn respond<T: IntoResponse>(trace_id: &str, result: Result<T, AppError>) -> Response {
    match result {
        Ok(r) => r.into_response(),
        Err(e) => e.into_response_with(trace_id),
    }
}
