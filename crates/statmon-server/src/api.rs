use crate::error::{respond, AppError};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use statmon_common::types::{fold_batch, Metric, MetricKind, MetricQuery, MetricValue, RawMetric};
use std::fmt::Write;

/// Envelope wrapping every JSON response.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// `0` on success, otherwise a numeric error code.
    pub err_code: i32,
    /// Human-readable message, `success` when nothing failed.
    pub err_msg: String,
    pub trace_id: String,
    /// Payload, `null` when there is none.
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn success_empty_response(status: StatusCode, trace_id: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: 0,
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "signature_mismatch" => 1010,
        "forbidden" => 1011,
        "unsupported_kind" => 1012,
        "payload_too_large" => 1013,
        "storage_error" => 1501,
        "internal_error" => 1500,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

fn parse_kind(raw: &str) -> Result<MetricKind, AppError> {
    raw.parse::<MetricKind>().map_err(AppError::from)
}

fn check_signature(state: &AppState, metric: &Metric) -> Result<(), AppError> {
    if state.signer.verify_metric(metric) {
        Ok(())
    } else {
        Err(AppError::SignatureMismatch(metric.id.clone()))
    }
}

/// Reads back the current value of a metric as a signed record.
fn current(state: &AppState, kind: MetricKind, name: &str) -> Result<Metric, AppError> {
    let value = state
        .store
        .get(kind, name)?
        .ok_or_else(|| AppError::NotFound {
            kind,
            name: name.to_string(),
        })?;
    Ok(state.signer.sign_metric(Metric {
        id: name.to_string(),
        value,
        hash: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HashQuery {
    pub hash: Option<String>,
}

/// `POST /update/:kind/:name/:value`
pub async fn update_from_path(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    Path((kind, name, raw)): Path<(String, String, String)>,
    Query(query): Query<HashQuery>,
) -> Response {
    let result = (|| -> Result<Response, AppError> {
        let kind = parse_kind(&kind)?;
        let metric = Metric {
            value: MetricValue::parse(kind, &raw)?,
            id: name,
            hash: query.hash.filter(|h| !h.is_empty()),
        };
        check_signature(&state, &metric)?;
        state.store.apply(&metric)?;
        Ok(success_empty_response(StatusCode::OK, &trace_id, "success"))
    })();
    respond(&trace_id, result)
}

/// `POST /update/` with one JSON metric. Responds with the stored value.
pub async fn update_from_json(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let result = (|| -> Result<Json<Metric>, AppError> {
        let raw: RawMetric = serde_json::from_slice(&body)?;
        let metric = Metric::try_from(raw)?;
        check_signature(&state, &metric)?;
        state.store.apply(&metric)?;
        current(&state, metric.kind(), &metric.id).map(Json)
    })();
    respond(&trace_id, result)
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub gauges: usize,
    pub counters: usize,
}

fn is_encrypted(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/octet-stream"))
        .unwrap_or(false)
}

/// Decrypt and decode, then hand the records to [`apply_batch`]. Any
/// failure leaves the store untouched.
fn ingest_batch(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<BatchSummary, AppError> {
    let decrypted;
    let payload = if is_encrypted(headers) {
        let decryptor = state.decryptor.as_ref().ok_or_else(|| {
            AppError::BadRequest("encrypted payload received but no private key is configured".to_string())
        })?;
        decrypted = decryptor.decrypt(body)?;
        decrypted.as_slice()
    } else {
        body
    };

    let raw: Vec<RawMetric> = serde_json::from_slice(payload)?;
    let metrics = raw
        .into_iter()
        .map(Metric::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    apply_batch(state, &metrics)
}

/// Verifies every record, then folds and applies the batch as one unit.
/// Shared by the HTTP and gRPC bulk endpoints.
pub fn apply_batch(state: &AppState, metrics: &[Metric]) -> Result<BatchSummary, AppError> {
    for metric in metrics {
        check_signature(state, metric)?;
    }
    let (gauges, counters) = fold_batch(metrics)?;
    state.store.update_all(&gauges, &counters)?;
    Ok(BatchSummary {
        gauges: gauges.len(),
        counters: counters.len(),
    })
}

/// `POST /updates/` with a JSON array, optionally RSA-encrypted.
pub async fn update_batch(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = ingest_batch(&state, &headers, &body);
    if let Ok(summary) = &result {
        tracing::debug!(
            trace_id = %trace_id.0,
            gauges = summary.gauges,
            counters = summary.counters,
            "Batch applied"
        );
    }
    respond(
        &trace_id,
        result.map(|summary| success_response(StatusCode::OK, &trace_id, summary)),
    )
}

/// `GET /value/:kind/:name` as plain text.
pub async fn value_text(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let result = parse_kind(&kind)
        .and_then(|kind| current(&state, kind, &name))
        .map(|metric| metric.value.to_string());
    respond(&trace_id, result)
}

/// `POST /value/` with `{"id", "type"}`; responds with the signed metric.
pub async fn value_json(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let result = (|| -> Result<Json<Metric>, AppError> {
        let query: MetricQuery = serde_json::from_slice(&body)?;
        if query.id.is_empty() {
            return Err(AppError::BadRequest("metric id must not be empty".to_string()));
        }
        let kind = parse_kind(&query.kind)?;
        current(&state, kind, &query.id).map(Json)
    })();
    respond(&trace_id, result)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// `GET /` lists every gauge and counter.
pub async fn index(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
) -> Response {
    let result = state.store.get_all().map_err(AppError::from).map(|all| {
        let mut page = String::from("<!DOCTYPE html>\n<html><head><title>statmon</title></head><body>\n");
        for (title, rows) in [
            (
                "Gauges",
                all.gauges
                    .iter()
                    .map(|(k, v)| (k.as_str(), MetricValue::Gauge(*v)))
                    .collect::<Vec<_>>(),
            ),
            (
                "Counters",
                all.counters
                    .iter()
                    .map(|(k, d)| (k.as_str(), MetricValue::Counter(*d)))
                    .collect(),
            ),
        ] {
            let _ = writeln!(page, "<h2>{title}</h2>\n<ul>");
            for (name, value) in rows {
                let _ = writeln!(page, "<li>{}: {value}</li>", escape_html(name));
            }
            page.push_str("</ul>\n");
        }
        page.push_str("</body></html>\n");
        Html(page)
    });
    respond(&trace_id, result)
}

#[derive(Serialize)]
struct PingResponse {
    backend: &'static str,
    uptime_secs: i64,
}

/// `GET /ping` checks the backing store is reachable.
pub async fn ping(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
) -> Response {
    let result = state.store.ping().map_err(AppError::from).map(|()| {
        success_response(
            StatusCode::OK,
            &trace_id,
            PingResponse {
                backend: state.store.backend_name(),
                uptime_secs: (Utc::now() - state.start_time).num_seconds(),
            },
        )
    });
    respond(&trace_id, result)
}
