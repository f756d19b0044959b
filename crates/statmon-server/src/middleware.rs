use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AppError;
use crate::logging::TraceId;
use crate::state::AppState;

/// Header the agent uses to advertise its address.
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// The caller's advertised address: `X-Real-IP`, else the first
/// `X-Forwarded-For` entry.
pub fn advertised_ip(headers: &HeaderMap) -> Option<&str> {
    if let Some(ip) = headers.get(REAL_IP_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(ip);
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
}

/// Middleware enforcing the trusted subnet on ingestion routes.
///
/// Runs before the body is parsed, so rejected requests never reach
/// signature checks or the store.
pub async fn trusted_subnet_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Err(denied) = state.guard.check(advertised_ip(req.headers())) {
        let trace_id = req
            .extensions()
            .get::<TraceId>()
            .map(|t| t.0.clone())
            .unwrap_or_default();
        tracing::warn!(
            trace_id = %trace_id,
            reason = %denied,
            "Request rejected by trusted subnet"
        );
        return AppError::from(denied).into_response_with(&trace_id);
    }
    next.run(req).await
}
