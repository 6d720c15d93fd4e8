//! Port Interfaces
//!
//! Contracts between the application services and the outside world,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! implement these; services only ever hold `Arc<dyn Port>`.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`QuoteProvider`]: one market's quote source
//! - [`NewsSource`]: recent articles for a symbol
//! - [`TextGenerator`]: opaque short-text generation
//! - [`MarketStatusProbe`]: live provider-side open/closed reading
//! - [`UpdatePublisher`]: fan-out of refreshed quotes and statuses

use async_trait::async_trait;

use crate::domain::market_clock::MarketStatusPair;
use crate::domain::quote::{Company, Market, NewsItem, Quote};

// =============================================================================
// Errors
// =============================================================================

/// Failure of a single upstream call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Upstream throttling signal or local ceiling reached.
    #[error("{provider} rate limited: {detail}")]
    RateLimited {
        /// Provider or limiter name.
        provider: String,
        /// What signalled the limit.
        detail: String,
    },

    /// Network failure or non-success HTTP status.
    #[error("{provider} unavailable: {detail}")]
    UpstreamUnavailable {
        /// Provider name.
        provider: String,
        /// Transport or status detail.
        detail: String,
    },

    /// Upstream answered with an unexpected shape.
    #[error("{provider} returned a malformed response: {detail}")]
    MalformedResponse {
        /// Provider name.
        provider: String,
        /// Parse detail.
        detail: String,
    },
}

impl ProviderError {
    /// Build a [`ProviderError::RateLimited`].
    pub fn rate_limited(provider: &str, detail: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.to_string(),
            detail: detail.into(),
        }
    }

    /// Build a [`ProviderError::UpstreamUnavailable`].
    pub fn unavailable(provider: &str, detail: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            provider: provider.to_string(),
            detail: detail.into(),
        }
    }

    /// Build a [`ProviderError::MalformedResponse`].
    pub fn malformed(provider: &str, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            provider: provider.to_string(),
            detail: detail.into(),
        }
    }

    /// Whether another attempt may succeed. Rate limits go straight to fallback.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::RateLimited { .. })
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::UpstreamUnavailable { .. } => "unavailable",
            Self::MalformedResponse { .. } => "malformed",
        }
    }
}

// =============================================================================
// Driven Ports
// =============================================================================

/// Quote source for one market.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Provider name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Market served by this provider.
    fn market(&self) -> Market;

    /// Fetch and normalize one quote.
    async fn fetch_quote(&self, company: &Company) -> Result<Quote, ProviderError>;
}

/// Recent news for a symbol.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Market whose symbols this source understands.
    fn market(&self) -> Market;

    /// Fetch recent articles. An `Ok` result is cacheable, an `Err` is not.
    async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsItem>, ProviderError>;
}

/// What a [`TextGenerator`] is asked to write about a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsightKind {
    /// One-to-two-sentence insight on a significant move.
    Insight,
    /// One-sentence explanation of the price movement.
    MovementAnalysis,
}

impl InsightKind {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insight => "insight",
            Self::MovementAnalysis => "analysis",
        }
    }
}

/// Opaque short-text generation about a quote.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text of the requested kind.
    async fn generate(&self, kind: InsightKind, quote: &Quote) -> Result<String, ProviderError>;
}

/// Live provider-side open/closed reading for one market.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketStatusProbe: Send + Sync {
    /// Market this probe reports on.
    fn market(&self) -> Market;

    /// Whether the provider currently reports the market open.
    async fn is_open(&self) -> Result<bool, ProviderError>;
}

/// Destination of refresh results.
#[cfg_attr(test, mockall::automock)]
pub trait UpdatePublisher: Send + Sync {
    /// Publish one market's refreshed quotes.
    fn publish_market(&self, market: Market, quotes: &[Quote]);

    /// Publish a recomputed status pair.
    fn publish_status(&self, status: &MarketStatusPair);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limits_skip_retries() {
        assert!(!ProviderError::rate_limited("alpha_vantage", "Note").is_retryable());
        assert!(ProviderError::unavailable("nse", "503").is_retryable());
        assert!(ProviderError::malformed("nse", "missing priceInfo").is_retryable());
    }

    #[test]
    fn display_includes_provider() {
        let err = ProviderError::unavailable("nse", "HTTP 503");
        assert_eq!(err.to_string(), "nse unavailable: HTTP 503");
        assert_eq!(err.kind(), "unavailable");
    }
}
