//! Step retry: policy, per-(run, step) context, and listeners.
//!
//! Failures retry only when their [`ErrorKind`](crate::error::ErrorKind) is
//! retryable; the delay grows as `delay × multiplier^(attempt-1)` up to a
//! cap. The retry context is persisted through the
//! [`RetryStateStore`](super::repository::RetryStateStore) so attempts
//! survive restarts; listeners observe the retry lifecycle and can never
//! block it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// Retry policy of one step: base delay, attempt cap, backoff multiplier.
///
/// `max_attempts` counts total invocations including the first; a policy of
/// 3 means at most two retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRetryPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
    pub multiplier: f64,
    /// Upper bound for the computed delay.
    pub max_delay: Duration,
}

impl StepRetryPolicy {
    /// Fixed-interval policy (multiplier 1).
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            delay,
            max_attempts,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Exponential backoff capped at `max_delay`.
    pub fn exponential(
        max_attempts: u32,
        delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            delay,
            max_attempts,
            multiplier,
            max_delay,
        }
    }

    /// Whether another attempt is allowed after `completed_attempts`.
    pub fn should_retry(&self, completed_attempts: u32) -> bool {
        completed_attempts < self.max_attempts
    }

    /// Delay before attempt `attempt_number + 1`, i.e. after
    /// `attempt_number` completed attempts: `delay × multiplier^(n-1)`,
    /// capped.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1) as i32;
        let scaled = self.delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

impl Default for StepRetryPolicy {
    fn default() -> Self {
        Self::exponential(
            3,
            Duration::from_millis(500),
            2.0,
            Duration::from_secs(30),
        )
    }
}

/// Persisted retry progress of one (run, step) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryContext {
    pub run_id: String,
    pub step_id: String,
    /// Invocations performed so far (first attempt included).
    pub attempt_number: u32,
    pub last_error: Option<WorkflowError>,
    pub next_delay_ms: u64,
    pub first_attempt_at: DateTime<Utc>,
}

impl RetryContext {
    pub fn new(run_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
            attempt_number: 0,
            last_error: None,
            next_delay_ms: 0,
            first_attempt_at: Utc::now(),
        }
    }
}

/// Observes the retry lifecycle of step executions.
///
/// Callbacks run inline in the retry path; implementations must be quick,
/// and any panic is caught and logged rather than disturbing retry logic.
pub trait RetryListener: Send + Sync {
    /// A retry has been scheduled; fires before the re-execution.
    fn before_retry(&self, _ctx: &RetryContext) {}
    /// A retried attempt failed again.
    fn on_retry_failure(&self, _ctx: &RetryContext) {}
    /// Retries are exhausted; the run will fail.
    fn on_retry_exhausted(&self, _ctx: &RetryContext) {}
}

/// Listener that logs each event with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRetryListener;

impl RetryListener for LoggingRetryListener {
    fn before_retry(&self, ctx: &RetryContext) {
        tracing::debug!(
            run_id = %ctx.run_id,
            step_id = %ctx.step_id,
            attempt = ctx.attempt_number,
            delay_ms = ctx.next_delay_ms,
            "retrying step"
        );
    }

    fn on_retry_failure(&self, ctx: &RetryContext) {
        tracing::debug!(
            run_id = %ctx.run_id,
            step_id = %ctx.step_id,
            attempt = ctx.attempt_number,
            "retried attempt failed"
        );
    }

    fn on_retry_exhausted(&self, ctx: &RetryContext) {
        tracing::warn!(
            run_id = %ctx.run_id,
            step_id = %ctx.step_id,
            attempts = ctx.attempt_number,
            "step retries exhausted"
        );
    }
}

/// Invokes a listener callback, logging a panic instead of propagating it.
pub(crate) fn notify(listener: &dyn RetryListener, event: ListenerEvent, ctx: &RetryContext) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match event {
        ListenerEvent::BeforeRetry => listener.before_retry(ctx),
        ListenerEvent::RetryFailure => listener.on_retry_failure(ctx),
        ListenerEvent::RetryExhausted => listener.on_retry_exhausted(ctx),
    }));
    if outcome.is_err() {
        tracing::warn!(
            run_id = %ctx.run_id,
            step_id = %ctx.step_id,
            "retry listener panicked; ignored"
        );
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ListenerEvent {
    BeforeRetry,
    RetryFailure,
    RetryExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: `max_attempts` counts total invocations; a policy of 3
    /// permits retries after attempts 1 and 2 only.
    #[test]
    fn should_retry_counts_total_attempts() {
        let policy = StepRetryPolicy::fixed(3, Duration::from_millis(10));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    /// **Scenario**: Exponential delays scale per attempt and honor the cap.
    #[test]
    fn exponential_delay_scales_and_caps() {
        let policy = StepRetryPolicy::exponential(
            5,
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(350),
        );
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350), "capped");
    }

    /// **Scenario**: A panicking listener is contained.
    #[test]
    fn panicking_listener_is_contained() {
        struct Bomb;
        impl RetryListener for Bomb {
            fn before_retry(&self, _ctx: &RetryContext) {
                panic!("listener bug");
            }
        }
        let ctx = RetryContext::new("r", "s");
        notify(&Bomb, ListenerEvent::BeforeRetry, &ctx); // must not propagate
    }

    /// **Scenario**: The retry context round-trips through serde for the
    /// state store.
    #[test]
    fn retry_context_serde_roundtrip() {
        let mut ctx = RetryContext::new("run-1", "step-2");
        ctx.attempt_number = 2;
        ctx.last_error = Some(WorkflowError::retryable("flaky"));
        ctx.next_delay_ms = 250;
        let json = serde_json::to_string(&ctx).unwrap();
        let back: RetryContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.attempt_number, 2);
        assert_eq!(back.next_delay_ms, 250);
        assert!(back.last_error.is_some());
    }
}
