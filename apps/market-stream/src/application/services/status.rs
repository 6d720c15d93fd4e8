//! Market Status Service
//!
//! Computes the status pair from the market clock, reconciles it with any
//! live provider probes under the configured [`StatusOverride`] policy, and
//! remembers the last result for the aggregator, the status endpoint and
//! new subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::MarketStatusProbe;
use crate::domain::market_clock::{
    MarketStatus, MarketStatusPair, StatusOverride, TradingHours, compute_status,
};
use crate::domain::quote::Market;
use crate::domain::rate_limit::RateLimiter;
use crate::infrastructure::metrics;

struct GatedProbe {
    probe: Arc<dyn MarketStatusProbe>,
    limiter: Arc<RateLimiter>,
}

/// Owner of the current market-status pair.
pub struct MarketStatusService {
    us_hours: TradingHours,
    in_hours: TradingHours,
    policy: StatusOverride,
    probes: Vec<GatedProbe>,
    latest: RwLock<Option<MarketStatusPair>>,
}

impl std::fmt::Debug for MarketStatusService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketStatusService")
            .field("policy", &self.policy)
            .field("probes", &self.probes.len())
            .finish_non_exhaustive()
    }
}

impl MarketStatusService {
    /// Create a service for the two markets' trading hours.
    #[must_use]
    pub fn new(us_hours: TradingHours, in_hours: TradingHours, policy: StatusOverride) -> Self {
        Self {
            us_hours,
            in_hours,
            policy,
            probes: Vec::new(),
            latest: RwLock::new(None),
        }
    }

    /// Register a live probe, gated by the limiter of its provider.
    #[must_use]
    pub fn with_probe(
        mut self,
        probe: Arc<dyn MarketStatusProbe>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        self.probes.push(GatedProbe { probe, limiter });
        self
    }

    /// Trading hours of `market`.
    #[must_use]
    pub const fn hours(&self, market: Market) -> &TradingHours {
        match market {
            Market::Us => &self.us_hours,
            Market::In => &self.in_hours,
        }
    }

    /// Clock-only status pair at `now`.
    #[must_use]
    pub fn compute_at(&self, now: DateTime<Utc>) -> MarketStatusPair {
        MarketStatusPair {
            us: compute_status(&self.us_hours, now),
            india: compute_status(&self.in_hours, now),
        }
    }

    /// Recompute now, apply live probes, and store the result.
    pub async fn refresh(&self) -> MarketStatusPair {
        let mut pair = self.compute_at(Utc::now());

        for gated in &self.probes {
            let market = gated.probe.market();
            if !gated.limiter.try_acquire() {
                metrics::record_rate_limited(gated.limiter.name());
                continue;
            }
            match gated.probe.is_open().await {
                Ok(live_open) => {
                    let computed = pair.get(market).clone();
                    if computed.is_open != live_open {
                        tracing::info!(
                            market = %market,
                            computed = computed.is_open,
                            live = live_open,
                            policy = self.policy.as_str(),
                            "Live market status disagrees with clock"
                        );
                    }
                    *pair.get_mut(market) = self.policy.apply(computed, live_open);
                }
                Err(e) => {
                    tracing::debug!(market = %market, error = %e, "Live status probe failed");
                }
            }
        }

        *self.latest.write() = Some(pair.clone());
        pair
    }

    /// Last stored pair, if any refresh has completed.
    #[must_use]
    pub fn latest(&self) -> Option<MarketStatusPair> {
        self.latest.read().clone()
    }

    /// Current status of `market`: the stored one, or the clock's if none is stored.
    #[must_use]
    pub fn current(&self, market: Market) -> MarketStatus {
        self.latest.read().as_ref().map_or_else(
            || compute_status(self.hours(market), Utc::now()),
            |pair| pair.get(market).clone(),
        )
    }

    /// Whether `market` is currently considered open.
    #[must_use]
    pub fn is_open(&self, market: Market) -> bool {
        self.current(market).is_open
    }
}
