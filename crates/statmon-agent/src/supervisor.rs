//! Restart-on-fault supervision for long-running pipeline tasks.
//!
//! A task is a factory producing a fresh future per attempt. Each attempt
//! runs on its own tokio task so a panic is contained and observed through
//! the `JoinError`. Consecutive faults back off exponentially up to
//! `max_backoff_ms`; an attempt that stays up for `healthy_after_secs` resets
//! the count. After `max_restarts` consecutive faults the supervisor gives
//! up and returns [`PipelineError::RestartBudgetExhausted`].

use crate::error::{report, ErrorSink, PipelineError};
use serde::Deserialize;
use std::any::Any;
use std::future::Future;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize)]
pub struct RestartPolicy {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_healthy_after_secs")]
    pub healthy_after_secs: u64,
}

fn default_max_restarts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_healthy_after_secs() -> u64 {
    60
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            healthy_after_secs: default_healthy_after_secs(),
        }
    }
}

impl RestartPolicy {
    /// Delay before restart number `fault` (1-based): 100ms, 200ms, 400ms...
    pub fn backoff(&self, fault: u32) -> Duration {
        let shift = fault.saturating_sub(1).min(32);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs `make()` until an attempt finishes with `Ok(())`, restarting it
/// after errors and panics according to `policy`.
pub async fn supervise<F, Fut>(
    task: &'static str,
    policy: &RestartPolicy,
    errors: &ErrorSink,
    mut make: F,
) -> Result<(), PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    let healthy_after = Duration::from_secs(policy.healthy_after_secs);
    let mut faults: u32 = 0;

    loop {
        let started = Instant::now();
        let fault = match tokio::spawn(make()).await {
            Ok(Ok(())) => {
                tracing::debug!(task, "Task finished");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(join) if join.is_panic() => PipelineError::Panicked {
                task,
                message: panic_message(join.into_panic()),
            },
            Err(_) => return Err(PipelineError::Cancelled { task }),
        };

        if started.elapsed() >= healthy_after {
            faults = 0;
        }
        faults += 1;
        report(errors, fault);

        if faults > policy.max_restarts {
            tracing::error!(task, restarts = policy.max_restarts, "Restart budget exhausted");
            return Err(PipelineError::RestartBudgetExhausted {
                task,
                restarts: policy.max_restarts,
            });
        }

        let delay = policy.backoff(faults);
        tracing::warn!(
            task,
            attempt = faults,
            delay_ms = delay.as_millis() as u64,
            "Task faulted, restarting"
        );
        tokio::time::sleep(delay).await;
    }
}
