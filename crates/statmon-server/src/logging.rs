use crate::api::error_response;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, FromRequest, Request},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Per-request trace id, stored as a request extension and echoed in the
/// `X-Trace-Id` response header.
#[derive(Clone)]
pub struct TraceId(pub String);

impl TraceId {
    /// 16 lowercase hex characters from 8 random bytes.
    pub fn generate() -> Self {
        let bytes: [u8; 8] = rand::thread_rng().gen();
        let mut id = String::with_capacity(16);
        for b in bytes {
            let _ = write!(id, "{b:02x}");
        }
        TraceId(id)
    }
}

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// Characters of a body that make it into the log line.
const MAX_BODY_LOG_CHARS: usize = 200;

/// First [`MAX_BODY_LOG_CHARS`] characters of a UTF-8 body.
fn snippet(bytes: &[u8]) -> String {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return "<non-utf8 body>".to_string();
    };
    match text.char_indices().nth(MAX_BODY_LOG_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"))
}

/// Buffers a JSON POST body so it can be logged and still reach the
/// handler. Anything else, notably encrypted `octet-stream` batches,
/// passes through untouched.
///
/// The body is read through the same `Bytes` extractor the handlers use,
/// so it is held to the same size limit. A body that is too large or that
/// cannot be read is rejected here rather than handed on empty.
async fn capture_json_body(mut req: Request) -> Result<(Request, Option<Bytes>), BytesRejection> {
    if req.method() != Method::POST || !is_json(req.headers()) {
        return Ok((req, None));
    }
    let body = std::mem::take(req.body_mut());
    let bytes = Bytes::from_request(Request::new(body), &()).await?;
    *req.body_mut() = Body::from(bytes.clone());
    Ok((req, Some(bytes)))
}

fn rejection_response(rejection: BytesRejection, trace_id: &str) -> Response {
    let status = rejection.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "bad_request"
    };
    error_response(status, trace_id, code, &rejection.body_text())
}

fn tag(mut response: Response, trace_id: &TraceId) -> Response {
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Request/response logging middleware.
///
/// Logs method, path, advertised agent address and (for JSON) a body
/// snippet on the way in; status, latency and error bodies on the way out.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = TraceId::generate();
    req.extensions_mut().insert(trace_id.clone());

    let method = req.method().clone();
    let target = req
        .uri()
        .path_and_query()
        .map_or_else(|| req.uri().path().to_string(), |pq| pq.to_string());
    let agent = crate::middleware::advertised_ip(req.headers())
        .unwrap_or("-")
        .to_string();

    let (req, body) = match capture_json_body(req).await {
        Ok(captured) => captured,
        Err(rejection) => {
            tracing::warn!(
                trace_id = %*trace_id,
                method = %method,
                path = %target,
                agent = %agent,
                status = rejection.status().as_u16(),
                error = %rejection.body_text(),
                "--> request body rejected"
            );
            return tag(rejection_response(rejection, &trace_id), &trace_id);
        }
    };
    tracing::info!(
        trace_id = %*trace_id,
        method = %method,
        path = %target,
        agent = %agent,
        body = %body.as_deref().map(snippet).unwrap_or_default(),
        "--> request"
    );

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let status = response.status().as_u16();

    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let detail = if is_json(&parts.headers) {
        snippet(&bytes)
    } else {
        String::new()
    };
    match status {
        s if s >= 500 => tracing::error!(trace_id = %*trace_id, status, elapsed_ms, body = %detail, "<-- response"),
        s if s >= 400 => tracing::warn!(trace_id = %*trace_id, status, elapsed_ms, body = %detail, "<-- response"),
        _ => tracing::info!(trace_id = %*trace_id, status, elapsed_ms, "<-- response"),
    }

    tag(Response::from_parts(parts, Body::from(bytes)), &trace_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_shape() {
        let id = TraceId::generate();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(TraceId::generate().0, id.0);
    }

    #[test]
    fn test_snippet_counts_characters() {
        let long = "é".repeat(MAX_BODY_LOG_CHARS + 5);
        let cut = snippet(long.as_bytes());
        assert_eq!(cut.chars().count(), MAX_BODY_LOG_CHARS + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(snippet(b"[]"), "[]");
        assert_eq!(snippet(&[0xff, 0xfe]), "<non-utf8 body>");
    }
}
