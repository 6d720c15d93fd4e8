//! Market Aggregator
//!
//! One refresh pass resolves every company of a market's universe to
//! exactly one quote, in universe order:
//!
//! ```text
//! market open, listed ──► limiter ──► provider (with retries) ──► enrich ──► live
//!        │                   │ denied             │ exhausted
//!        ▼                   ▼                    ▼
//! closed / unlisted ───────────────────► last-known-good quote ──► cached
//!                                                 │ none
//!                                                 ▼
//!                                           placeholder
//! ```
//!
//! Upstream calls are made sequentially with a fixed spacing between them.
//! A per-market in-flight flag (atomic compare-and-set) keeps two passes
//! for the same market from overlapping; the losing caller gets the cached
//! list back without touching upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ProviderError, QuoteProvider};
use crate::application::services::cache::QuoteCache;
use crate::application::services::enrichment::Enricher;
use crate::application::services::retry::{RetryPolicy, retry};
use crate::application::services::status::MarketStatusService;
use crate::domain::quote::{Company, Market, Quote};
use crate::domain::rate_limit::RateLimiter;
use crate::infrastructure::metrics::{self, QuoteOrigin, UpstreamOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Everything needed to refresh one market.
pub struct MarketSource {
    /// Market served.
    pub market: Market,
    /// Universe, in publication order.
    pub companies: Vec<Company>,
    /// Upstream quote provider.
    pub provider: Arc<dyn QuoteProvider>,
    /// Provider call budget.
    pub limiter: Arc<RateLimiter>,
    /// Per-symbol retry schedule.
    pub retry: RetryPolicy,
    /// Minimum gap between consecutive upstream symbol fetches.
    pub call_spacing: Duration,
}

impl std::fmt::Debug for MarketSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketSource")
            .field("market", &self.market)
            .field("companies", &self.companies.len())
            .field("provider", &self.provider.name())
            .field("call_spacing", &self.call_spacing)
            .finish_non_exhaustive()
    }
}

/// Whether a fresh cached list short-circuits the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Return the cached list while it is fresh.
    IfStale,
    /// Always run a pass.
    Force,
}

// =============================================================================
// Refresh Report
// =============================================================================

/// Outcome of one `refresh_market` call.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// One quote per company, in universe order.
    pub quotes: Vec<Quote>,
    /// Quotes fetched live in this pass.
    pub live: usize,
    /// Quotes served from the per-symbol cache.
    pub cached: usize,
    /// Placeholders synthesized.
    pub placeholders: usize,
    /// Symbols whose live fetch was attempted but failed.
    pub failed: usize,
    /// Whether the market was open for this pass.
    pub market_open: bool,
    /// Whether the pass was skipped (fresh cache or another pass in flight).
    pub skipped: bool,
}

impl RefreshReport {
    /// Symbols for which a live fetch was attempted.
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.live + self.failed
    }

    fn skipped_with(quotes: Vec<Quote>, market_open: bool) -> Self {
        Self {
            quotes,
            market_open,
            skipped: true,
            ..Self::default()
        }
    }
}

// =============================================================================
// In-flight guard
// =============================================================================

/// Clears the in-flight flag when the pass ends, even on early return.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Refreshes markets from their providers with cache and placeholder fallback.
#[derive(Debug)]
pub struct Aggregator {
    sources: HashMap<Market, MarketSource>,
    in_flight: HashMap<Market, AtomicBool>,
    cache: Arc<QuoteCache>,
    status: Arc<MarketStatusService>,
    enricher: Arc<Enricher>,
    cancel: CancellationToken,
}

impl Aggregator {
    /// Create an aggregator over `sources`.
    #[must_use]
    pub fn new(
        sources: Vec<MarketSource>,
        cache: Arc<QuoteCache>,
        status: Arc<MarketStatusService>,
        enricher: Arc<Enricher>,
        cancel: CancellationToken,
    ) -> Self {
        let in_flight = Market::ALL
            .iter()
            .map(|market| (*market, AtomicBool::new(false)))
            .collect();
        let sources = sources
            .into_iter()
            .map(|source| (source.market, source))
            .collect();
        Self {
            sources,
            in_flight,
            cache,
            status,
            enricher,
            cancel,
        }
    }

    /// Shared quote cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<QuoteCache> {
        &self.cache
    }

    /// Configured universe of `market`.
    #[must_use]
    pub fn companies(&self, market: Market) -> &[Company] {
        self.sources
            .get(&market)
            .map(|source| source.companies.as_slice())
            .unwrap_or_default()
    }

    /// Cached list of `market`, or placeholders for its universe if nothing is cached.
    #[must_use]
    pub fn snapshot(&self, market: Market) -> Vec<Quote> {
        self.cache.get(market).map_or_else(
            || {
                let now = Utc::now().timestamp_millis();
                self.companies(market)
                    .iter()
                    .map(|company| Quote::placeholder(company, market, now))
                    .collect()
            },
            |cached| cached.quotes,
        )
    }

    /// Run one refresh pass for `market`.
    pub async fn refresh_market(&self, market: Market, mode: RefreshMode) -> RefreshReport {
        let market_open = self.status.is_open(market);

        let Some(source) = self.sources.get(&market) else {
            tracing::warn!(market = %market, "No provider configured for market");
            return RefreshReport::skipped_with(Vec::new(), market_open);
        };

        if mode == RefreshMode::IfStale {
            if let Some(cached) = self.cache.get(market).filter(|c| c.is_fresh) {
                tracing::debug!(market = %market, "Cached quotes still fresh");
                return RefreshReport::skipped_with(cached.quotes, market_open);
            }
        }

        let Some(_guard) = self
            .in_flight
            .get(&market)
            .and_then(InFlight::acquire)
        else {
            tracing::debug!(market = %market, "Refresh already in flight");
            return RefreshReport::skipped_with(self.snapshot(market), market_open);
        };

        let started = Instant::now();
        let report = self.run_pass(source, market_open).await;

        self.cache.commit_pass(market, &report.quotes, report.live);
        metrics::record_refresh(market, started.elapsed());
        metrics::record_quotes(market, QuoteOrigin::Live, report.live);
        metrics::record_quotes(market, QuoteOrigin::Cached, report.cached);
        metrics::record_quotes(market, QuoteOrigin::Placeholder, report.placeholders);

        tracing::info!(
            market = %market,
            open = market_open,
            live = report.live,
            cached = report.cached,
            placeholders = report.placeholders,
            failed = report.failed,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Market refresh complete"
        );

        report
    }

    async fn run_pass(&self, source: &MarketSource, market_open: bool) -> RefreshReport {
        let mut report = RefreshReport {
            quotes: Vec::with_capacity(source.companies.len()),
            market_open,
            ..RefreshReport::default()
        };
        let mut last_upstream_call: Option<Instant> = None;

        for company in &source.companies {
            let go_live = market_open && !company.unlisted && !self.cancel.is_cancelled();
            if !go_live {
                self.resolve_offline(source.market, company, &mut report);
                continue;
            }

            if let Some(last) = last_upstream_call {
                let wait = source.call_spacing.saturating_sub(last.elapsed());
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        self.resolve_offline(source.market, company, &mut report);
                        continue;
                    }
                    () = tokio::time::sleep(wait) => {}
                }
            }

            let upstream_calls = AtomicUsize::new(0);
            let result = self.fetch_live(source, company, &upstream_calls).await;
            if upstream_calls.load(Ordering::Relaxed) > 0 {
                last_upstream_call = Some(Instant::now());
            }

            match result {
                Ok(quote) => {
                    let quote = self.enricher.enrich(quote.sanitized()).await;
                    self.cache.put_symbol(quote.clone());
                    report.live += 1;
                    report.quotes.push(quote);
                }
                Err(e) => {
                    tracing::warn!(
                        market = %source.market,
                        symbol = %company.symbol,
                        error = %e,
                        "Live fetch failed, using fallback"
                    );
                    report.failed += 1;
                    self.resolve_offline(source.market, company, &mut report);
                }
            }
        }

        report
    }

    async fn fetch_live(
        &self,
        source: &MarketSource,
        company: &Company,
        upstream_calls: &AtomicUsize,
    ) -> Result<Quote, ProviderError> {
        let provider = source.provider.name();
        retry(&source.retry, &self.cancel, &company.symbol, |_attempt| async move {
            if !source.limiter.try_acquire() {
                metrics::record_rate_limited(source.limiter.name());
                return Err(ProviderError::rate_limited(
                    source.limiter.name(),
                    "local ceiling reached",
                ));
            }
            upstream_calls.fetch_add(1, Ordering::Relaxed);
            let result = source.provider.fetch_quote(company).await;
            metrics::record_upstream(provider, UpstreamOutcome::from_result(&result));
            result
        })
        .await
        .map(|mut quote| {
            quote.market = source.market;
            if quote.name.is_empty() {
                quote.name.clone_from(&company.name);
            }
            if quote.sector.is_none() {
                quote.sector.clone_from(&company.sector);
            }
            quote
        })
    }

    fn resolve_offline(&self, market: Market, company: &Company, report: &mut RefreshReport) {
        if let Some(cached) = self.cache.get_symbol(market, &company.symbol) {
            report.cached += 1;
            report.quotes.push(cached);
        } else {
            report.placeholders += 1;
            report
                .quotes
                .push(Quote::placeholder(company, market, Utc::now().timestamp_millis()));
        }
    }
}
