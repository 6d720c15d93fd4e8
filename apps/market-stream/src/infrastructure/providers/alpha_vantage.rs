//! Alpha Vantage US quote adapter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use super::{FlexNumber, fetch_json, now_millis, to_volume};
use crate::application::ports::{ProviderError, QuoteProvider};
use crate::domain::quote::{Company, Market, Quote};
use crate::domain::rate_limit::RateLimiter;
use crate::infrastructure::metrics;

/// Provider label for quote requests.
pub const PROVIDER: &str = "alpha_vantage";

/// Production endpoint.
pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

/// Daily samples averaged into `averageVolume`.
const AVERAGE_VOLUME_SAMPLES: usize = 30;

/// Shared HTTP access to the Alpha Vantage query endpoint.
#[derive(Clone)]
pub struct AlphaVantageClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for AlphaVantageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaVantageClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl AlphaVantageClient {
    /// Create a client against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::unavailable(PROVIDER, e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    /// GET request for `function` with extra query parameters.
    pub(super) fn query(&self, function: &str, params: &[(&str, &str)]) -> RequestBuilder {
        self.http
            .get(&self.base_url)
            .query(&[("function", function)])
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
    }
}

/// Throttling message embedded in a 200 body, if any.
pub(super) fn throttle_signal(note: Option<&str>, information: Option<&str>) -> Option<String> {
    if let Some(note) = note {
        return Some(note.to_string());
    }
    information
        .filter(|info| {
            let lower = info.to_lowercase();
            lower.contains("rate limit") || lower.contains("call frequency")
        })
        .map(ToString::to_string)
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "02. open")]
    open: Option<FlexNumber>,
    #[serde(rename = "05. price")]
    price: Option<FlexNumber>,
    #[serde(rename = "06. volume")]
    volume: Option<FlexNumber>,
    #[serde(rename = "09. change")]
    change: Option<FlexNumber>,
    #[serde(rename = "10. change percent")]
    change_percent: Option<FlexNumber>,
}

#[derive(Debug, Deserialize)]
struct DailySeriesResponse {
    #[serde(rename = "Time Series (Daily)")]
    series: Option<BTreeMap<String, DailyBar>>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    #[serde(rename = "5. volume")]
    volume: FlexNumber,
}

// =============================================================================
// Provider
// =============================================================================

/// US quotes from `GLOBAL_QUOTE`, with a per-symbol average volume from
/// `TIME_SERIES_DAILY`.
pub struct AlphaVantageProvider {
    client: AlphaVantageClient,
    limiter: Arc<RateLimiter>,
    average_volumes: RwLock<HashMap<String, u64>>,
}

impl AlphaVantageProvider {
    /// Create a provider. `limiter` gates the auxiliary daily-series call.
    #[must_use]
    pub fn new(client: AlphaVantageClient, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            limiter,
            average_volumes: RwLock::new(HashMap::new()),
        }
    }

    /// Cached average volume for `symbol`.
    #[must_use]
    pub fn cached_average_volume(&self, symbol: &str) -> Option<u64> {
        self.average_volumes.read().get(symbol).copied()
    }

    /// Cached value, or one fetch if absent and the limiter admits it.
    async fn average_volume(&self, symbol: &str) -> Option<u64> {
        if let Some(avg) = self.cached_average_volume(symbol) {
            return Some(avg);
        }
        if !self.limiter.try_acquire() {
            metrics::record_rate_limited(self.limiter.name());
            tracing::debug!(symbol = %symbol, "Skipping average volume fetch, rate limit reached");
            return None;
        }

        match self.fetch_average_volume(symbol).await {
            Ok(avg) => {
                self.average_volumes.write().insert(symbol.to_string(), avg);
                Some(avg)
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Average volume unavailable");
                None
            }
        }
    }

    async fn fetch_average_volume(&self, symbol: &str) -> Result<u64, ProviderError> {
        let body: DailySeriesResponse = fetch_json(
            PROVIDER,
            self.client.query("TIME_SERIES_DAILY", &[("symbol", symbol)]),
        )
        .await?;

        if let Some(signal) = throttle_signal(body.note.as_deref(), body.information.as_deref()) {
            return Err(ProviderError::rate_limited(PROVIDER, signal));
        }
        let series = body
            .series
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "missing Time Series (Daily)"))?;

        average_volume(&series)
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "empty daily series"))
    }
}

/// Mean volume of the most recent samples, rounded.
#[allow(clippy::cast_precision_loss)]
fn average_volume(series: &BTreeMap<String, DailyBar>) -> Option<u64> {
    let recent: Vec<f64> = series
        .values()
        .rev()
        .take(AVERAGE_VOLUME_SAMPLES)
        .map(|bar| bar.volume.0)
        .collect();
    if recent.is_empty() {
        return None;
    }
    Some(to_volume(recent.iter().sum::<f64>() / recent.len() as f64))
}

fn quote_from_global(
    company: &Company,
    raw: &GlobalQuote,
    timestamp: i64,
) -> Result<Quote, ProviderError> {
    let field = |value: Option<FlexNumber>, name: &str| {
        value
            .map(|n| n.0)
            .ok_or_else(|| ProviderError::malformed(PROVIDER, format!("missing {name}")))
    };

    let price = field(raw.price, "price")?;
    let change = field(raw.change, "change")?;
    let change_percent = field(raw.change_percent, "change percent")?;
    let volume = field(raw.volume, "volume")?;

    let (intraday_change, intraday_change_percent) = match raw.open.map(|n| n.0) {
        Some(open) if open > 0.0 => (Some(price - open), Some((price - open) / open * 100.0)),
        _ => (None, None),
    };

    let mut quote = Quote::placeholder(company, Market::Us, timestamp);
    quote.price = price;
    quote.change = change;
    quote.change_percent = change_percent;
    quote.intraday_change = intraday_change;
    quote.intraday_change_percent = intraday_change_percent;
    quote.volume = to_volume(volume);
    Ok(quote)
}

#[async_trait]
impl QuoteProvider for AlphaVantageProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn market(&self) -> Market {
        Market::Us
    }

    #[tracing::instrument(skip(self, company), fields(symbol = %company.symbol))]
    async fn fetch_quote(&self, company: &Company) -> Result<Quote, ProviderError> {
        let body: GlobalQuoteResponse = fetch_json(
            PROVIDER,
            self.client.query("GLOBAL_QUOTE", &[("symbol", company.symbol.as_str())]),
        )
        .await?;

        if let Some(signal) = throttle_signal(body.note.as_deref(), body.information.as_deref()) {
            return Err(ProviderError::rate_limited(PROVIDER, signal));
        }

        let raw = body
            .global_quote
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "missing Global Quote"))?;
        let mut quote = quote_from_global(company, &raw, now_millis())?;
        quote.average_volume = self.average_volume(&company.symbol).await;

        tracing::debug!(
            price = quote.price,
            change_percent = quote.change_percent,
            "US quote fetched"
        );
        Ok(quote)
    }
}
