//! Agent pipeline delivering to a live server over HTTP.

mod common;

use common::{build_test_context_with, report_cycle, serve_http};
use statmon_agent::error::{PipelineError, TransportError};
use statmon_agent::transport::{HttpTransport, Transport};
use statmon_common::crypto::{generate_key_pair, PayloadDecryptor, PayloadEncryptor};
use statmon_common::types::{MetricKind, MetricValue, POLL_COUNT};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn transport(addr: SocketAddr, real_ip: Option<&str>, enc: Option<PayloadEncryptor>) -> Arc<dyn Transport> {
    Arc::new(
        HttpTransport::new(
            &addr.to_string(),
            real_ip.map(str::to_string),
            enc,
            Duration::from_secs(5),
        )
        .expect("transport should build"),
    )
}

#[tokio::test]
async fn two_report_cycles_accumulate_on_the_server() {
    let ctx = build_test_context_with("shared-secret", Some("127.0.0.0/8"))
        .expect("test context should build");
    let addr = serve_http(ctx.state.clone()).await;
    let transport = transport(addr, Some("127.0.0.1"), None);

    let errors = report_cycle(transport.clone(), "shared-secret", &[("Alloc", 120.5)], 3).await;
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    let store = &ctx.state.store;
    assert_eq!(
        store.get(MetricKind::Gauge, "Alloc").unwrap(),
        Some(MetricValue::Gauge(120.5))
    );
    assert_eq!(
        store.get(MetricKind::Counter, POLL_COUNT).unwrap(),
        Some(MetricValue::Counter(3))
    );

    let errors = report_cycle(transport, "shared-secret", &[("Alloc", 130.0)], 2).await;
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(
        store.get(MetricKind::Gauge, "Alloc").unwrap(),
        Some(MetricValue::Gauge(130.0))
    );
    assert_eq!(
        store.get(MetricKind::Counter, POLL_COUNT).unwrap(),
        Some(MetricValue::Counter(5))
    );
}

#[tokio::test]
async fn encrypted_reports_are_accepted() {
    let ctx = build_test_context_with("", None).expect("test context should build");
    let (private, public) =
        generate_key_pair(ctx.temp_dir.path(), 1024).expect("keys should generate");
    let state = ctx
        .state
        .clone()
        .with_decryptor(PayloadDecryptor::from_pem_file(&private).unwrap());
    let addr = serve_http(state.clone()).await;
    let encryptor = PayloadEncryptor::from_pem_file(&public).unwrap();
    let transport = transport(addr, None, Some(encryptor));

    let many: Vec<(String, f64)> = (0..40).map(|i| (format!("Gauge{i}"), i as f64)).collect();
    let many: Vec<(&str, f64)> = many.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    let errors = report_cycle(transport, "", &many, 7).await;
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    let all = state.store.get_all().unwrap();
    assert_eq!(all.gauges.len(), 40);
    assert_eq!(all.gauges.get("Gauge39"), Some(&39.0));
    assert_eq!(all.counters.get(POLL_COUNT), Some(&7));
}

#[tokio::test]
async fn rejected_batches_are_reported_and_dropped() {
    let ctx = build_test_context_with("server-key", Some("10.0.0.0/24"))
        .expect("test context should build");
    let addr = serve_http(ctx.state.clone()).await;

    let outside = report_cycle(
        transport(addr, Some("10.0.1.5"), None),
        "server-key",
        &[("Alloc", 1.0)],
        1,
    )
    .await;
    assert!(matches!(
        outside.as_slice(),
        [PipelineError::Delivery {
            source: TransportError::Rejected { status: 403, .. },
            ..
        }]
    ));

    let wrong_key = report_cycle(
        transport(addr, Some("10.0.0.5"), None),
        "agent-key",
        &[("Alloc", 1.0)],
        1,
    )
    .await;
    assert!(matches!(
        wrong_key.as_slice(),
        [PipelineError::Delivery {
            source: TransportError::Rejected { status: 400, .. },
            count: 2,
        }]
    ));

    assert!(ctx.state.store.get_all().unwrap().is_empty());
}
