//! Prepare and Send stages.
//!
//! Prepare runs one worker per input stream. Each worker signs what it
//! receives and forwards it to a shared merged channel; the merged channel
//! closes once *both* workers have seen their input close and dropped their
//! sender. Order is kept within a stream, not across streams.
//!
//! Send accumulates the merged stream into a batch and delivers it on every
//! report tick, plus once more when the merged stream closes. A failed
//! delivery is reported and the batch dropped; the next batch carries
//! fresher samples.
//!
//! Input receivers sit behind `Arc<Mutex<_>>` so a restarted worker resumes
//! on the same channel.

use crate::error::{report, ErrorSink, PipelineError};
use crate::supervisor::{supervise, RestartPolicy};
use crate::transport::Transport;
use statmon_common::sign::Signer;
use statmon_common::types::{CounterSet, GaugeSet, Metric};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};

type Shared<T> = Arc<Mutex<mpsc::Receiver<T>>>;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub report_interval: Duration,
    pub restart: RestartPolicy,
}

/// The producer side of a running pipeline. Dropping both senders is what
/// shuts the pipeline down.
pub struct PipelineInputs {
    pub gauges: mpsc::Sender<GaugeSet>,
    pub counters: mpsc::Sender<CounterSet>,
}

async fn forward(out: &mpsc::Sender<Metric>, metric: Metric) -> Result<(), PipelineError> {
    out.send(metric)
        .await
        .map_err(|_| PipelineError::OutputClosed("prepare"))
}

async fn prepare_gauges(
    input: Shared<GaugeSet>,
    signer: Signer,
    out: mpsc::Sender<Metric>,
    errors: ErrorSink,
) -> Result<(), PipelineError> {
    let mut input = input.lock().await;
    while let Some(set) = input.recv().await {
        for (name, value) in set {
            if !value.is_finite() {
                report(
                    &errors,
                    PipelineError::InvalidSample {
                        name,
                        reason: format!("non-finite gauge value {value}"),
                    },
                );
                continue;
            }
            forward(&out, signer.sign_metric(Metric::gauge(name, value))).await?;
        }
    }
    Ok(())
}

async fn prepare_counters(
    input: Shared<CounterSet>,
    signer: Signer,
    out: mpsc::Sender<Metric>,
) -> Result<(), PipelineError> {
    let mut input = input.lock().await;
    while let Some(set) = input.recv().await {
        for (name, delta) in set {
            forward(&out, signer.sign_metric(Metric::counter(name, delta))).await?;
        }
    }
    Ok(())
}

/// Runs both Prepare workers under supervision and returns once both have
/// drained their inputs. `out` is moved in so that the merged channel
/// closes exactly when this returns.
pub async fn run_prepare(
    gauges: Shared<GaugeSet>,
    counters: Shared<CounterSet>,
    signer: Signer,
    out: mpsc::Sender<Metric>,
    policy: &RestartPolicy,
    errors: &ErrorSink,
) -> Result<(), PipelineError> {
    let gauge_worker = {
        let (signer, out, sink) = (signer.clone(), out.clone(), errors.clone());
        supervise("prepare-gauges", policy, errors, move || {
            prepare_gauges(gauges.clone(), signer.clone(), out.clone(), sink.clone())
        })
    };
    let counter_worker = supervise("prepare-counters", policy, errors, move || {
        prepare_counters(counters.clone(), signer.clone(), out.clone())
    });
    let (g, c) = tokio::join!(gauge_worker, counter_worker);
    g.and(c)
}

async fn flush(batch: &mut Vec<Metric>, transport: &dyn Transport, errors: &ErrorSink) {
    if batch.is_empty() {
        return;
    }
    let count = batch.len();
    if let Err(source) = transport.deliver(batch).await {
        report(errors, PipelineError::Delivery { count, source });
    } else {
        tracing::debug!(count, "Report flushed");
    }
    batch.clear();
}

/// The Send stage. Returns after the merged stream closes and the final
/// batch has been flushed.
pub async fn run_send(
    input: Shared<Metric>,
    transport: Arc<dyn Transport>,
    report_interval: Duration,
    errors: ErrorSink,
) -> Result<(), PipelineError> {
    let mut input = input.lock().await;
    let mut batch: Vec<Metric> = Vec::new();
    let mut tick = interval_at(Instant::now() + report_interval, report_interval);

    loop {
        tokio::select! {
            _ = tick.tick() => flush(&mut batch, transport.as_ref(), &errors).await,
            item = input.recv() => match item {
                Some(metric) => batch.push(metric),
                None => {
                    flush(&mut batch, transport.as_ref(), &errors).await;
                    return Ok(());
                }
            },
        }
    }
}

/// Spawns Prepare and Send and returns the input senders plus a handle that
/// resolves once the pipeline has fully drained.
pub fn spawn_pipeline(
    config: &PipelineConfig,
    signer: Signer,
    transport: Arc<dyn Transport>,
    errors: ErrorSink,
) -> (PipelineInputs, JoinHandle<Result<(), PipelineError>>) {
    let (gauges_tx, gauges_rx) = mpsc::channel(config.channel_capacity);
    let (counters_tx, counters_rx) = mpsc::channel(config.channel_capacity);
    let (merged_tx, merged_rx) = mpsc::channel(config.channel_capacity);

    let policy = config.restart.clone();
    let report_interval = config.report_interval;
    let handle = tokio::spawn(async move {
        let gauges_rx = Arc::new(Mutex::new(gauges_rx));
        let counters_rx = Arc::new(Mutex::new(counters_rx));
        let merged_rx = Arc::new(Mutex::new(merged_rx));

        let prepare = run_prepare(gauges_rx, counters_rx, signer, merged_tx, &policy, &errors);
        // The closure owns the only handle on the merged receiver, so if Send
        // gives up the receiver drops and Prepare sees its output close.
        let sink = errors.clone();
        let send = supervise("send", &policy, &errors, move || {
            run_send(merged_rx.clone(), transport.clone(), report_interval, sink.clone())
        });
        let (p, s) = tokio::join!(prepare, send);
        tracing::info!("Pipeline drained");
        p.and(s)
    });

    (
        PipelineInputs {
            gauges: gauges_tx,
            counters: counters_tx,
        },
        handle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use statmon_common::types::MetricValue;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        batches: StdMutex<Vec<Vec<Metric>>>,
        fail_first: StdMutex<bool>,
    }

    impl Recorder {
        fn failing_once() -> Self {
            Self {
                batches: StdMutex::default(),
                fail_first: StdMutex::new(true),
            }
        }

        fn batches(&self) -> Vec<Vec<Metric>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn deliver(&self, batch: &[Metric]) -> Result<(), TransportError> {
            let mut fail = self.fail_first.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(TransportError::Other("connection refused".to_string()));
            }
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    fn config(report_secs: u64) -> PipelineConfig {
        PipelineConfig {
            channel_capacity: 16,
            report_interval: Duration::from_secs(report_secs),
            restart: RestartPolicy::default(),
        }
    }

    fn gauges(pairs: &[(&str, f64)]) -> GaugeSet {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_close_drains_everything_in_one_final_flush() {
        let recorder = Arc::new(Recorder::default());
        let (errors, mut errors_rx) = mpsc::unbounded_channel();
        let (inputs, handle) = spawn_pipeline(&config(3600), Signer::default(), recorder.clone(), errors);

        for i in 0..5 {
            inputs.gauges.send(gauges(&[("Seq", i as f64)])).await.unwrap();
        }
        inputs
            .counters
            .send(CounterSet::from([("PollCount".to_string(), 5)]))
            .await
            .unwrap();
        drop(inputs);

        handle.await.unwrap().unwrap();
        let batches = recorder.batches();
        assert_eq!(batches.len(), 1, "exactly one final flush");
        let batch = &batches[0];
        assert_eq!(batch.len(), 6);

        let seq: Vec<f64> = batch
            .iter()
            .filter_map(|m| match m.value {
                MetricValue::Gauge(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(seq, [0.0, 1.0, 2.0, 3.0, 4.0], "per-stream order kept");
        assert!(batch.contains(&Metric::counter("PollCount", 5)));
        assert!(errors_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_with_nothing_pending_delivers_nothing() {
        let recorder = Arc::new(Recorder::default());
        let (errors, _errors_rx) = mpsc::unbounded_channel();
        let (inputs, handle) = spawn_pipeline(&config(3600), Signer::default(), recorder.clone(), errors);
        drop(inputs);
        handle.await.unwrap().unwrap();
        assert!(recorder.batches().is_empty());
    }

    #[tokio::test]
    async fn test_merged_stays_open_until_both_inputs_close() {
        let recorder = Arc::new(Recorder::default());
        let (errors, _errors_rx) = mpsc::unbounded_channel();
        let (inputs, mut handle) =
            spawn_pipeline(&config(3600), Signer::default(), recorder.clone(), errors);
        let PipelineInputs { gauges: g, counters } = inputs;
        drop(g);

        let early = tokio::time::timeout(Duration::from_millis(100), &mut handle).await;
        assert!(early.is_err(), "pipeline must wait for the counter stream");

        counters
            .send(CounterSet::from([("PollCount".to_string(), 1)]))
            .await
            .unwrap();
        drop(counters);
        handle.await.unwrap().unwrap();
        assert_eq!(recorder.batches(), vec![vec![Metric::counter("PollCount", 1)]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_tick_flushes_and_failed_batch_is_dropped() {
        let recorder = Arc::new(Recorder::failing_once());
        let (errors, mut errors_rx) = mpsc::unbounded_channel();
        let (inputs, handle) = spawn_pipeline(&config(10), Signer::default(), recorder.clone(), errors);

        inputs.gauges.send(gauges(&[("Alloc", 1.0)])).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;

        match errors_rx.try_recv() {
            Ok(PipelineError::Delivery { count, .. }) => assert_eq!(count, 1),
            other => panic!("expected delivery error, got {other:?}"),
        }
        assert!(recorder.batches().is_empty());

        inputs.gauges.send(gauges(&[("Alloc", 2.0)])).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.batches(), vec![vec![Metric::gauge("Alloc", 2.0)]]);

        drop(inputs);
        handle.await.unwrap().unwrap();
        assert_eq!(recorder.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_items_are_signed_and_bad_samples_skipped() {
        let recorder = Arc::new(Recorder::default());
        let signer = Signer::new("secret");
        let (errors, mut errors_rx) = mpsc::unbounded_channel();
        let (inputs, handle) = spawn_pipeline(&config(3600), signer.clone(), recorder.clone(), errors);

        inputs
            .gauges
            .send(gauges(&[("Alloc", 120.5), ("Broken", f64::NAN)]))
            .await
            .unwrap();
        inputs
            .counters
            .send(CounterSet::from([("PollCount".to_string(), 3)]))
            .await
            .unwrap();
        drop(inputs);
        handle.await.unwrap().unwrap();

        let batch = recorder.batches().concat();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|m| signer.verify_metric(m)));
        assert!(matches!(
            errors_rx.try_recv(),
            Ok(PipelineError::InvalidSample { ref name, .. }) if name == "Broken"
        ));
    }
}
