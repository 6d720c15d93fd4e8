//! Update Scheduler
//!
//! The refresh loop and the status task share one cancellation token:
//!
//! - **Data refresh** on an adaptive delay: a successful tick shrinks the
//!   next delay (×0.8, never below the floor), a failed one grows it (×1.5,
//!   never above the ceiling).
//! - **Status recomputation** on its own fixed timer, in a separate task so a
//!   refresh pass longer than the status period never delays it.
//! - **On-demand refresh** when a [`RefreshTrigger`] fires, without
//!   disturbing the adaptive schedule.
//!
//! Every refresh uses [`RefreshMode::IfStale`]: a market whose cached list is
//! still within its TTL is not fetched again.
//!
//! Cancellation is only observed between iterations; a tick already
//! running finishes its current symbol first (the aggregator sees the same
//! token and resolves the rest offline).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::UpdatePublisher;
use crate::application::services::aggregator::{Aggregator, RefreshMode, RefreshReport};
use crate::application::services::status::MarketStatusService;
use crate::domain::quote::Market;
use crate::domain::rate_limit::RateLimiter;
use crate::infrastructure::metrics;

const SHRINK_FACTOR: f64 = 0.8;
const GROW_FACTOR: f64 = 1.5;

// =============================================================================
// Adaptive Interval
// =============================================================================

/// Refresh delay bounded by a floor and a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveInterval {
    current: Duration,
    floor: Duration,
    ceiling: Duration,
}

impl AdaptiveInterval {
    /// Start at `initial`, clamped into `[floor, ceiling]`.
    #[must_use]
    pub fn new(initial: Duration, floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            current: initial.clamp(floor, ceiling),
            floor,
            ceiling,
        }
    }

    /// Current delay.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Shrink toward the floor.
    pub fn on_success(&mut self) -> Duration {
        self.current = self.current.mul_f64(SHRINK_FACTOR).max(self.floor);
        self.current
    }

    /// Grow toward the ceiling.
    pub fn on_failure(&mut self) -> Duration {
        self.current = self.current.mul_f64(GROW_FACTOR).min(self.ceiling);
        self.current
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// First adaptive delay.
    pub initial_interval: Duration,
    /// Shortest adaptive delay.
    pub floor: Duration,
    /// Longest adaptive delay.
    pub ceiling: Duration,
    /// Fixed status recomputation period.
    pub status_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(60),
            floor: Duration::from_secs(60),
            ceiling: Duration::from_secs(300),
            status_interval: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Refresh Trigger
// =============================================================================

/// Handle for requesting an immediate refresh, gated by the API limiter.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    notify: Arc<Notify>,
    limiter: Arc<RateLimiter>,
}

impl RefreshTrigger {
    /// Request a refresh. Returns `false` if the limiter denied it.
    pub fn request(&self) -> bool {
        if !self.limiter.try_acquire() {
            metrics::record_rate_limited(self.limiter.name());
            return false;
        }
        self.notify.notify_one();
        true
    }
}

// =============================================================================
// Tick Outcome
// =============================================================================

/// Result of refreshing every market once.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    /// Per-market reports, in [`Market::ALL`] order.
    pub reports: Vec<(Market, RefreshReport)>,
}

impl TickOutcome {
    /// A tick fails when live fetches were attempted and none succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        let attempted: usize = self.reports.iter().map(|(_, r)| r.attempted()).sum();
        let live: usize = self.reports.iter().map(|(_, r)| r.live).sum();
        attempted == 0 || live > 0
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Drives refreshes and status updates until cancelled.
pub struct UpdateScheduler {
    aggregator: Arc<Aggregator>,
    status: Arc<MarketStatusService>,
    publisher: Arc<dyn UpdatePublisher>,
    config: SchedulerConfig,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UpdateScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        aggregator: Arc<Aggregator>,
        status: Arc<MarketStatusService>,
        publisher: Arc<dyn UpdatePublisher>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            aggregator,
            status,
            publisher,
            config,
            wake: Arc::new(Notify::new()),
            cancel,
        }
    }

    /// Trigger handle for on-demand refreshes, gated by `limiter`.
    #[must_use]
    pub fn trigger(&self, limiter: Arc<RateLimiter>) -> RefreshTrigger {
        RefreshTrigger {
            notify: Arc::clone(&self.wake),
            limiter,
        }
    }

    /// Recompute and publish the status pair.
    pub async fn update_status(&self) {
        publish_status(&self.status, self.publisher.as_ref()).await;
    }

    /// Refresh every stale market once and publish the results.
    pub async fn tick(&self) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        for market in Market::ALL {
            let report = self
                .aggregator
                .refresh_market(market, RefreshMode::IfStale)
                .await;
            if !report.skipped {
                self.publisher.publish_market(market, &report.quotes);
            }
            outcome.reports.push((market, report));
        }
        outcome
    }

    /// Run until cancelled.
    pub async fn run(self) {
        let mut interval = AdaptiveInterval::new(
            self.config.initial_interval,
            self.config.floor,
            self.config.ceiling,
        );

        // Status is computed once up front so the first refresh sees real session state.
        self.update_status().await;
        let status_task = tokio::spawn(status_loop(
            Arc::clone(&self.status),
            Arc::clone(&self.publisher),
            self.config.status_interval,
            self.cancel.clone(),
        ));

        let mut next_refresh = Instant::now();
        metrics::set_refresh_interval(interval.current());

        tracing::info!(
            initial_secs = interval.current().as_secs(),
            status_secs = self.config.status_interval.as_secs(),
            "Update scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep_until(next_refresh) => {
                    let outcome = self.tick().await;
                    let delay = if outcome.is_success() {
                        interval.on_success()
                    } else {
                        tracing::warn!(
                            next_secs = interval.current().as_secs(),
                            "Refresh tick failed, backing off"
                        );
                        interval.on_failure()
                    };
                    metrics::set_refresh_interval(delay);
                    next_refresh = Instant::now() + delay;
                }
                () = self.wake.notified() => {
                    tracing::debug!("On-demand refresh");
                    self.tick().await;
                }
            }
        }

        if let Err(e) = status_task.await {
            tracing::warn!(error = %e, "Status task ended abnormally");
        }
        tracing::info!("Update scheduler stopped");
    }
}

/// Recompute the status pair every `period` until cancelled.
async fn status_loop(
    status: Arc<MarketStatusService>,
    publisher: Arc<dyn UpdatePublisher>,
    period: Duration,
    cancel: CancellationToken,
) {
    let period = period.max(Duration::from_secs(1));
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = timer.tick() => publish_status(&status, publisher.as_ref()).await,
        }
    }
}

async fn publish_status(status: &MarketStatusService, publisher: &dyn UpdatePublisher) {
    let pair = status.refresh().await;
    tracing::debug!(
        us = %pair.us.status,
        india = %pair.india.status,
        "Market status updated"
    );
    publisher.publish_status(&pair);
}
