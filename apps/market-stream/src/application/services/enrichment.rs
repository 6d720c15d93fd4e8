//! Quote Enrichment
//!
//! Attaches recent news, a short generated insight and a movement analysis
//! to live quotes. News and insight are only requested for significant
//! moves; analysis has its own threshold. Every external call is gated by
//! its rate limiter and cached per symbol. Failures never surface: the
//! field is left empty.

use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::{InsightKind, NewsSource, ProviderError, TextGenerator};
use crate::application::services::cache::TtlCache;
use crate::domain::quote::{NewsItem, Quote};
use crate::domain::rate_limit::RateLimiter;
use crate::infrastructure::metrics;

/// Significance thresholds and cache lifetimes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnrichmentConfig {
    /// Absolute percent price move that makes a quote significant.
    pub price_threshold_pct: f64,
    /// Percent of volume above average that makes a quote significant.
    pub volume_threshold_pct: f64,
    /// Absolute percent price move that triggers a movement analysis.
    pub analysis_threshold_pct: f64,
    /// News cache lifetime.
    pub news_ttl: Duration,
    /// Insight and analysis cache lifetime.
    pub insight_ttl: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            price_threshold_pct: 0.5,
            volume_threshold_pct: 50.0,
            analysis_threshold_pct: 0.5,
            news_ttl: Duration::from_secs(15 * 60),
            insight_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// A collaborator together with the limiter that gates it.
struct Gated<T: ?Sized> {
    inner: Arc<T>,
    limiter: Arc<RateLimiter>,
}

/// Adds news, insight and analysis to quotes.
pub struct Enricher {
    config: EnrichmentConfig,
    news: Option<Gated<dyn NewsSource>>,
    generator: Option<Gated<dyn TextGenerator>>,
    news_cache: TtlCache<String, Vec<NewsItem>>,
    text_cache: TtlCache<(InsightKind, String), Option<String>>,
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("config", &self.config)
            .field("news", &self.news.is_some())
            .field("generator", &self.generator.is_some())
            .finish_non_exhaustive()
    }
}

impl Enricher {
    /// Enricher with no collaborators; quotes pass through unchanged.
    #[must_use]
    pub fn new(config: EnrichmentConfig) -> Self {
        Self {
            config,
            news: None,
            generator: None,
            news_cache: TtlCache::new(config.news_ttl),
            text_cache: TtlCache::new(config.insight_ttl),
        }
    }

    /// Attach a news source gated by `limiter`.
    #[must_use]
    pub fn with_news(mut self, source: Arc<dyn NewsSource>, limiter: Arc<RateLimiter>) -> Self {
        self.news = Some(Gated {
            inner: source,
            limiter,
        });
        self
    }

    /// Attach a text generator gated by `limiter`.
    #[must_use]
    pub fn with_generator(
        mut self,
        generator: Arc<dyn TextGenerator>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        self.generator = Some(Gated {
            inner: generator,
            limiter,
        });
        self
    }

    /// Whether a quote moved enough to warrant news and an insight.
    #[must_use]
    pub fn is_significant(&self, quote: &Quote) -> bool {
        quote.change_percent.abs() >= self.config.price_threshold_pct
            || quote
                .volume_deviation_percent()
                .is_some_and(|deviation| deviation >= self.config.volume_threshold_pct)
    }

    /// Whether a quote warrants a movement analysis.
    #[must_use]
    pub fn wants_analysis(&self, quote: &Quote) -> bool {
        quote.price > 0.0 && quote.change_percent.abs() > self.config.analysis_threshold_pct
    }

    /// Enrich a live quote.
    pub async fn enrich(&self, mut quote: Quote) -> Quote {
        if self.is_significant(&quote) {
            quote.news = self.news_for(&quote).await;
            quote.insight = self.text_for(InsightKind::Insight, &quote).await;
        }
        if self.wants_analysis(&quote) {
            quote.analysis = self.text_for(InsightKind::MovementAnalysis, &quote).await;
        }
        quote
    }

    async fn news_for(&self, quote: &Quote) -> Vec<NewsItem> {
        let Some(news) = &self.news else {
            return Vec::new();
        };
        if news.inner.market() != quote.market {
            return Vec::new();
        }
        if let Some(cached) = self.news_cache.get(&quote.symbol) {
            return cached;
        }
        if !news.limiter.try_acquire() {
            metrics::record_rate_limited(news.limiter.name());
            return Vec::new();
        }

        match news.inner.fetch_news(&quote.symbol).await {
            Ok(items) => {
                self.news_cache.insert(quote.symbol.clone(), items.clone());
                items
            }
            Err(e) => {
                log_failure("news", &quote.symbol, &e);
                Vec::new()
            }
        }
    }

    async fn text_for(&self, kind: InsightKind, quote: &Quote) -> Option<String> {
        let generator = self.generator.as_ref()?;
        let key = (kind, quote.symbol.clone());
        if let Some(cached) = self.text_cache.get(&key) {
            return cached;
        }
        if !generator.limiter.try_acquire() {
            metrics::record_rate_limited(generator.limiter.name());
            return None;
        }

        let text = match generator.inner.generate(kind, quote).await {
            Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) => {
                log_failure(kind.as_str(), &quote.symbol, &e);
                None
            }
        };
        self.text_cache.insert(key, text.clone());
        text
    }
}

fn log_failure(what: &str, symbol: &str, error: &ProviderError) {
    tracing::debug!(what, symbol, error = %error, "Enrichment call failed");
}
