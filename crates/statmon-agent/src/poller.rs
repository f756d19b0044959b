use crate::error::{report, ErrorSink, PipelineError};
use crate::pipeline::PipelineInputs;
use statmon_collector::{sample_all, Sampler};
use statmon_common::types::{CounterSet, GaugeSet, POLL_COUNT};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Drives sampling and poll counting.
///
/// Every poll tick runs the samplers and hands the merged readings to the
/// gauge stream. Every report tick hands the accumulated poll count to the
/// counter stream; the count is reset only once the hand-off succeeded.
pub struct Collector {
    samplers: Vec<Box<dyn Sampler>>,
    poll_interval: Duration,
    report_interval: Duration,
    poll_count: i64,
}

/// Why the collector loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    PipelineClosed,
}

impl Collector {
    pub fn new(
        samplers: Vec<Box<dyn Sampler>>,
        poll_interval: Duration,
        report_interval: Duration,
    ) -> Self {
        Self {
            samplers,
            poll_interval,
            report_interval,
            poll_count: 0,
        }
    }

    pub fn pending_poll_count(&self) -> i64 {
        self.poll_count
    }

    /// One poll: sample, count, forward. A full gauge channel drops this
    /// reading; the next poll supersedes it.
    fn poll_once(
        &mut self,
        gauges: &mpsc::Sender<GaugeSet>,
    ) -> Result<(), StopReason> {
        let readings = sample_all(&mut self.samplers);
        self.poll_count = self.poll_count.saturating_add(1);
        match gauges.try_send(readings) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(dropped)) => {
                tracing::debug!(count = dropped.len(), "Gauge channel full, dropping sample");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(StopReason::PipelineClosed),
        }
    }

    /// Hands the pending poll count to the counter stream.
    ///
    /// On failure the count is kept for the next attempt and the failure is
    /// reported.
    pub fn hand_off_poll_count(
        &mut self,
        counters: &mpsc::Sender<CounterSet>,
        errors: &ErrorSink,
    ) -> Result<(), StopReason> {
        if self.poll_count == 0 {
            return Ok(());
        }
        let pending = self.poll_count;
        let set = CounterSet::from([(POLL_COUNT.to_string(), pending)]);
        match counters.try_send(set) {
            Ok(()) => {
                self.poll_count = 0;
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                report(
                    errors,
                    PipelineError::PollCountHandoff {
                        pending,
                        reason: "counter channel full",
                    },
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                report(
                    errors,
                    PipelineError::PollCountHandoff {
                        pending,
                        reason: "counter channel closed",
                    },
                );
                Err(StopReason::PipelineClosed)
            }
        }
    }

    /// Last hand-off before the inputs close. Waits for room in the
    /// counter channel instead of giving up when it is full; the caller's
    /// shutdown deadline bounds the wait.
    pub async fn flush_poll_count(
        &mut self,
        counters: &mpsc::Sender<CounterSet>,
        errors: &ErrorSink,
    ) {
        if self.poll_count == 0 {
            return;
        }
        let pending = self.poll_count;
        let set = CounterSet::from([(POLL_COUNT.to_string(), pending)]);
        match counters.send(set).await {
            Ok(()) => self.poll_count = 0,
            Err(_) => report(
                errors,
                PipelineError::PollCountHandoff {
                    pending,
                    reason: "counter channel closed",
                },
            ),
        }
    }

    /// Runs until `shutdown` flips to `true` or the pipeline stops
    /// accepting input. The pending poll count gets one last hand-off
    /// before the inputs are dropped, which is what closes the pipeline.
    pub async fn run(
        mut self,
        inputs: PipelineInputs,
        errors: ErrorSink,
        mut shutdown: watch::Receiver<bool>,
    ) -> StopReason {
        let mut poll = interval(self.poll_interval);
        let mut report_tick = interval(self.report_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        report_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Both intervals fire immediately; skip the first report so it
        // follows at least one poll.
        report_tick.tick().await;

        tracing::info!(
            poll_secs = self.poll_interval.as_secs_f64(),
            report_secs = self.report_interval.as_secs_f64(),
            samplers = self.samplers.len(),
            "Starting collection loop"
        );

        let reason = loop {
            if *shutdown.borrow() {
                break StopReason::Shutdown;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break StopReason::Shutdown;
                    }
                }
                _ = poll.tick() => {
                    if let Err(reason) = self.poll_once(&inputs.gauges) {
                        break reason;
                    }
                }
                _ = report_tick.tick() => {
                    if let Err(reason) = self.hand_off_poll_count(&inputs.counters, &errors) {
                        break reason;
                    }
                }
            }
        };

        if reason == StopReason::Shutdown {
            self.flush_poll_count(&inputs.counters, &errors).await;
        }
        tracing::info!(?reason, "Collection loop stopped");
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    struct Fixed;

    impl Sampler for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn sample(&mut self) -> Result<GaugeSet> {
            Ok(GaugeSet::from([("Alloc".to_string(), 120.5)]))
        }
    }

    fn collector() -> Collector {
        Collector::new(
            vec![Box::new(Fixed)],
            Duration::from_secs(2),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_poll_count_kept_until_hand_off_succeeds() {
        let mut c = collector();
        let (gauges_tx, _gauges_rx) = mpsc::channel(8);
        let (counters_tx, mut counters_rx) = mpsc::channel(1);
        let (errors, mut errors_rx) = mpsc::unbounded_channel();

        for _ in 0..3 {
            c.poll_once(&gauges_tx).unwrap();
        }
        c.hand_off_poll_count(&counters_tx, &errors).unwrap();
        assert_eq!(c.pending_poll_count(), 0);

        // Channel now full: the count must survive the failed hand-off.
        c.poll_once(&gauges_tx).unwrap();
        c.poll_once(&gauges_tx).unwrap();
        c.hand_off_poll_count(&counters_tx, &errors).unwrap();
        assert_eq!(c.pending_poll_count(), 2);
        assert!(matches!(
            errors_rx.try_recv(),
            Ok(PipelineError::PollCountHandoff { pending: 2, .. })
        ));

        assert_eq!(counters_rx.try_recv().unwrap()[POLL_COUNT], 3);
        c.hand_off_poll_count(&counters_tx, &errors).unwrap();
        assert_eq!(c.pending_poll_count(), 0);
        assert_eq!(counters_rx.try_recv().unwrap()[POLL_COUNT], 2);
    }

    #[test]
    fn test_closed_pipeline_stops_poller() {
        let mut c = collector();
        let (gauges_tx, gauges_rx) = mpsc::channel(8);
        drop(gauges_rx);
        assert_eq!(c.poll_once(&gauges_tx), Err(StopReason::PipelineClosed));
    }

    #[tokio::test]
    async fn test_final_flush_waits_for_room() {
        let mut c = collector();
        let (gauges_tx, _gauges_rx) = mpsc::channel(8);
        let (counters_tx, mut counters_rx) = mpsc::channel(1);
        let (errors, mut errors_rx) = mpsc::unbounded_channel();

        c.poll_once(&gauges_tx).unwrap();
        c.hand_off_poll_count(&counters_tx, &errors).unwrap();
        c.poll_once(&gauges_tx).unwrap();
        c.poll_once(&gauges_tx).unwrap();

        // The channel is full; the flush completes once the reader drains it.
        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(set) = counters_rx.recv().await {
                seen.push(set[POLL_COUNT]);
            }
            seen
        });
        c.flush_poll_count(&counters_tx, &errors).await;
        assert_eq!(c.pending_poll_count(), 0);
        drop(counters_tx);
        assert_eq!(reader.await.unwrap(), vec![1, 2]);
        assert!(errors_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_final_flush_keeps_count_when_closed() {
        let mut c = collector();
        let (gauges_tx, _gauges_rx) = mpsc::channel(8);
        let (counters_tx, counters_rx) = mpsc::channel(1);
        let (errors, mut errors_rx) = mpsc::unbounded_channel();
        drop(counters_rx);

        c.poll_once(&gauges_tx).unwrap();
        c.flush_poll_count(&counters_tx, &errors).await;
        assert_eq!(c.pending_poll_count(), 1);
        assert!(matches!(
            errors_rx.try_recv(),
            Ok(PipelineError::PollCountHandoff { pending: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_every_poll_exactly_once() {
        let (gauges_tx, mut gauges_rx) = mpsc::channel(64);
        let (counters_tx, mut counters_rx) = mpsc::channel(64);
        let (errors, _errors_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(collector().run(
            PipelineInputs {
                gauges: gauges_tx,
                counters: counters_tx,
            },
            errors,
            shutdown_rx,
        ));
        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown_tx.send(true).unwrap();
        assert_eq!(task.await.unwrap(), StopReason::Shutdown);

        let mut polls = 0;
        while gauges_rx.recv().await.is_some() {
            polls += 1;
        }
        let mut reported = 0;
        while let Some(set) = counters_rx.recv().await {
            reported += set[POLL_COUNT];
        }
        assert!(polls >= 12, "polls = {polls}");
        assert_eq!(reported, polls);
    }
}
