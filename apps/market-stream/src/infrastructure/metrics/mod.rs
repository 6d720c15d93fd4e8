//! Prometheus Metrics Module
//!
//! Exposes service metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream**: provider requests by outcome, rate-limit rejections
//! - **Refresh**: quotes by origin, pass duration, adaptive interval
//! - **Push channel**: subscriber count, dropped messages
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the HTTP status port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::ProviderError;
use crate::domain::quote::Market;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the already installed handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Prometheus handle for rendering, if metrics were initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_stream_upstream_requests_total",
        "Upstream provider requests by outcome"
    );
    describe_counter!(
        "market_stream_rate_limited_total",
        "Calls denied by a local rate limiter"
    );
    describe_counter!(
        "market_stream_quotes_total",
        "Quotes produced by refresh passes, by origin"
    );
    describe_histogram!(
        "market_stream_refresh_seconds",
        "Duration of one market refresh pass"
    );
    describe_gauge!(
        "market_stream_refresh_interval_seconds",
        "Current adaptive refresh delay"
    );
    describe_gauge!(
        "market_stream_subscribers",
        "Connected push-channel subscribers"
    );
    describe_counter!(
        "market_stream_messages_dropped_total",
        "Messages dropped because a subscriber queue was full"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Where a published quote came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteOrigin {
    /// Fetched from the provider in this pass.
    Live,
    /// Last-known-good quote.
    Cached,
    /// Zero-valued placeholder.
    Placeholder,
}

impl QuoteOrigin {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Cached => "cached",
            Self::Placeholder => "placeholder",
        }
    }
}

/// Outcome of one upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOutcome {
    /// Parsed successfully.
    Ok,
    /// Provider signalled throttling.
    RateLimited,
    /// Transport or HTTP failure.
    Unavailable,
    /// Unexpected payload.
    Malformed,
}

impl UpstreamOutcome {
    /// Classify a provider result.
    pub const fn from_result<T>(result: &Result<T, ProviderError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(ProviderError::RateLimited { .. }) => Self::RateLimited,
            Err(ProviderError::UpstreamUnavailable { .. }) => Self::Unavailable,
            Err(ProviderError::MalformedResponse { .. }) => Self::Malformed,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::Malformed => "malformed",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one upstream request.
pub fn record_upstream(provider: &'static str, outcome: UpstreamOutcome) {
    counter!(
        "market_stream_upstream_requests_total",
        "provider" => provider,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a call denied by a local limiter.
pub fn record_rate_limited(limiter: &str) {
    counter!(
        "market_stream_rate_limited_total",
        "limiter" => limiter.to_string()
    )
    .increment(1);
}

/// Record quotes produced by a refresh pass.
pub fn record_quotes(market: Market, origin: QuoteOrigin, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "market_stream_quotes_total",
        "market" => market.as_str(),
        "source" => origin.as_str()
    )
    .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record the duration of a refresh pass.
pub fn record_refresh(market: Market, duration: Duration) {
    histogram!(
        "market_stream_refresh_seconds",
        "market" => market.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Update the adaptive refresh delay.
pub fn set_refresh_interval(delay: Duration) {
    gauge!("market_stream_refresh_interval_seconds").set(delay.as_secs_f64());
}

/// Update the subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("market_stream_subscribers").set(count as f64);
}

/// Record messages dropped on full subscriber queues.
pub fn record_messages_dropped(count: u64) {
    counter!("market_stream_messages_dropped_total").increment(count);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_origin_as_str() {
        assert_eq!(QuoteOrigin::Live.as_str(), "live");
        assert_eq!(QuoteOrigin::Cached.as_str(), "cached");
        assert_eq!(QuoteOrigin::Placeholder.as_str(), "placeholder");
    }

    #[test]
    fn upstream_outcome_classification() {
        let ok: Result<(), ProviderError> = Ok(());
        assert_eq!(UpstreamOutcome::from_result(&ok), UpstreamOutcome::Ok);

        let limited: Result<(), _> = Err(ProviderError::rate_limited("av", "Note"));
        assert_eq!(UpstreamOutcome::from_result(&limited).as_str(), "rate_limited");

        let malformed: Result<(), _> = Err(ProviderError::malformed("nse", "shape"));
        assert_eq!(UpstreamOutcome::from_result(&malformed), UpstreamOutcome::Malformed);
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_upstream("test", UpstreamOutcome::Ok);
        record_rate_limited("us");
        record_quotes(Market::Us, QuoteOrigin::Live, 3);
        set_subscribers(2);
    }
}
