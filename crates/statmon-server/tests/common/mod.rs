#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use statmon_agent::error::PipelineError;
use statmon_agent::pipeline::{spawn_pipeline, PipelineConfig};
use statmon_agent::supervisor::RestartPolicy;
use statmon_agent::transport::Transport;
use statmon_common::sign::Signer;
use statmon_common::types::{CounterSet, GaugeSet, POLL_COUNT};
use statmon_server::access::AccessGuard;
use statmon_server::app;
use statmon_server::state::AppState;
use statmon_storage::memory::MemoryStore;
use statmon_storage::MetricStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with("", None)
}

/// In-memory store, optional signing key and trusted subnet.
pub fn build_test_context_with(key: &str, trusted_subnet: Option<&str>) -> Result<TestContext> {
    let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
    build_test_context_on(store, key, trusted_subnet)
}

pub fn build_test_context_on(
    store: Arc<dyn MetricStore>,
    key: &str,
    trusted_subnet: Option<&str>,
) -> Result<TestContext> {
    statmon_common::id::init(1, 1)?;
    let temp_dir = tempfile::tempdir()?;
    let state = AppState::new(store, Signer::new(key), AccessGuard::new(trusted_subnet)?);
    let app = app::build_http_app(state.clone());
    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

fn decode(bytes: &Bytes) -> Value {
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).to_string()))
    }
}

/// Sends a request and returns status, body (JSON, or a JSON string for
/// non-JSON bodies) and the `X-Trace-Id` header.
pub async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Body,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(body).expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    (status, decode(&bytes), trace_id)
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    real_ip: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let mut headers = vec![("Content-Type", "application/json")];
    if let Some(ip) = real_ip {
        headers.push(("X-Real-IP", ip));
    }
    let body = Body::from(body.unwrap_or(Value::Null).to_string());
    send(app, method, uri, &headers, body).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
    real_ip: Option<&str>,
) -> (StatusCode, Value, Option<String>) {
    let headers: Vec<(&str, &str)> = real_ip.map(|ip| ("X-Real-IP", ip)).into_iter().collect();
    send(app, method, uri, &headers, Body::empty()).await
}

pub fn assert_ok_envelope(json: &Value) {
    assert_eq!(json["err_code"], 0);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
}

pub fn assert_err_envelope(json: &Value, err_code: i32) {
    assert_eq!(json["err_code"], err_code);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
    assert!(json.get("data").is_some());
    assert!(json["data"].is_null());
}

/// Serves the HTTP app on an ephemeral loopback port.
pub async fn serve_http(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr");
    let app = app::build_http_app(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Serves the gRPC service on an ephemeral loopback port.
pub async fn serve_grpc(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr");
    let incoming = tonic::transport::server::TcpIncoming::from_listener(listener, true, None)
        .expect("incoming should build");
    let service = statmon_server::grpc::metrics_service(state);
    tokio::spawn(async move {
        let _ = tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming(incoming)
            .await;
    });
    addr
}

pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        channel_capacity: 16,
        // Only the final flush on close delivers.
        report_interval: Duration::from_secs(3600),
        restart: RestartPolicy::default(),
    }
}

/// Runs one report cycle: feeds the samples, closes the inputs and waits for
/// the drain. Returns whatever the pipeline reported.
pub async fn report_cycle(
    transport: Arc<dyn Transport>,
    key: &str,
    gauges: &[(&str, f64)],
    poll_count: i64,
) -> Vec<PipelineError> {
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    let (inputs, handle) = spawn_pipeline(&pipeline_config(), Signer::new(key), transport, err_tx);

    let gauges: GaugeSet = gauges.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    let counters: CounterSet = [(POLL_COUNT.to_string(), poll_count)].into_iter().collect();
    inputs.gauges.send(gauges).await.expect("gauges accepted");
    inputs.counters.send(counters).await.expect("counters accepted");
    drop(inputs);

    handle
        .await
        .expect("pipeline task should not panic")
        .expect("pipeline should drain cleanly");

    let mut reported = Vec::new();
    while let Ok(err) = err_rx.try_recv() {
        reported.push(err);
    }
    reported
}
