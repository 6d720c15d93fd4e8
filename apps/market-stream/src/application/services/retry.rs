//! Retry Policy
//!
//! A provider declares its retry behaviour as a fixed schedule of delays;
//! [`retry`] drives any fallible async operation through that schedule.
//! The number of attempts is one more than the number of delays.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::application::ports::ProviderError;

/// Fixed retry schedule with optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
    jitter_factor: f64,
}

impl RetryPolicy {
    /// Retry after each of `delays` in turn, without jitter.
    #[must_use]
    pub const fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            jitter_factor: 0.0,
        }
    }

    /// A single attempt, no retries.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Randomize each delay by up to `±factor` of its length.
    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Total attempts including the first.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Configured delays.
    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Delay to wait after failed attempt `attempt` (1-based), or `None` once exhausted.
    #[must_use]
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        let base = *self.delays.get(attempt.checked_sub(1)?)?;
        Some(self.apply_jitter(base))
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

/// Run `op` under `policy`.
///
/// `op` receives the 1-based attempt number. Non-retryable errors return
/// immediately. Cancellation during a backoff wait returns the last error
/// without further attempts.
///
/// # Errors
///
/// Returns the last error once the schedule is exhausted, a non-retryable
/// error, or cancellation interrupts a backoff.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 1;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        let Some(delay) = policy.delay_after(attempt) else {
            tracing::debug!(label, attempts = attempt, error = %err, "Retries exhausted");
            return Err(err);
        };

        tracing::debug!(
            label,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Attempt failed, retrying"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(err),
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
