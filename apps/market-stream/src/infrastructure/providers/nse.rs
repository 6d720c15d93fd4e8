//! NSE India quote adapter and live market-status probe.
//!
//! The NSE API only answers requests carrying the cookies set by its home
//! page, so the client primes a session with one browser-like `GET /` before
//! its first API call and again after any failed call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone};
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{FlexNumber, fetch_json, now_millis, to_volume};
use crate::application::ports::{MarketStatusProbe, ProviderError, QuoteProvider};
use crate::domain::quote::{Company, Market, Quote};

/// Provider label.
pub const PROVIDER: &str = "nse";

/// Production endpoint.
pub const DEFAULT_BASE_URL: &str = "https://www.nseindia.com";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// `metadata.lastUpdateTime` format, exchange-local.
const UPDATE_TIME_FORMAT: &str = "%d-%b-%Y %H:%M:%S";

/// Segment reported by `/api/marketStatus` for equities.
const CAPITAL_MARKET: &str = "Capital Market";

// =============================================================================
// Client
// =============================================================================

/// Cookie-holding HTTP session against the NSE website.
#[derive(Debug)]
pub struct NseClient {
    http: Client,
    base_url: String,
    call_spacing: Duration,
    primed: AtomicBool,
}

impl NseClient {
    /// Create a client. `call_spacing` separates the two calls of one quote.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        call_spacing: Duration,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(|e| ProviderError::unavailable(PROVIDER, e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            call_spacing,
            primed: AtomicBool::new(false),
        })
    }

    /// Whether a session cookie has been obtained.
    #[must_use]
    pub fn is_primed(&self) -> bool {
        self.primed.load(Ordering::Acquire)
    }

    async fn prime(&self) -> Result<(), ProviderError> {
        if self.is_primed() {
            return Ok(());
        }

        let response = self
            .http
            .get(format!("{}/", self.base_url))
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| ProviderError::unavailable(PROVIDER, format!("session priming: {e}")))?;

        if !response.status().is_success() {
            return Err(ProviderError::unavailable(
                PROVIDER,
                format!("session priming: HTTP {}", response.status()),
            ));
        }

        tracing::debug!("NSE session primed");
        self.primed.store(true, Ordering::Release);
        Ok(())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        self.prime().await?;

        let request = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header(reqwest::header::REFERER, format!("{}/", self.base_url))
            .query(query);

        let result = fetch_json(PROVIDER, request).await;
        if matches!(result, Err(ProviderError::UpstreamUnavailable { .. })) {
            self.primed.store(false, Ordering::Release);
        }
        result
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteEquity {
    price_info: Option<PriceInfo>,
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceInfo {
    last_price: Option<FlexNumber>,
    change: Option<FlexNumber>,
    p_change: Option<FlexNumber>,
    open: Option<FlexNumber>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    last_update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradeInfo {
    #[serde(rename = "securityWiseDP")]
    security_wise_dp: Option<SecurityWiseDp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecurityWiseDp {
    quantity_traded: Option<FlexNumber>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketStatusResponse {
    #[serde(default)]
    market_state: Vec<MarketState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketState {
    market: String,
    market_status: String,
}

/// Epoch milliseconds of an exchange-local `lastUpdateTime`.
fn parse_update_time(raw: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), UPDATE_TIME_FORMAT).ok()?;
    chrono_tz::Asia::Kolkata
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp_millis())
}

// =============================================================================
// Quote Provider
// =============================================================================

/// NSE equities: price from `quote-equity`, volume from its `trade_info` section.
#[derive(Debug, Clone)]
pub struct NseProvider {
    client: Arc<NseClient>,
}

impl NseProvider {
    /// Create a provider over a shared session.
    #[must_use]
    pub const fn new(client: Arc<NseClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QuoteProvider for NseProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn market(&self) -> Market {
        Market::In
    }

    #[tracing::instrument(skip(self, company), fields(symbol = %company.symbol))]
    async fn fetch_quote(&self, company: &Company) -> Result<Quote, ProviderError> {
        let symbol = company.symbol.as_str();

        let equity: QuoteEquity = self
            .client
            .get("/api/quote-equity", &[("symbol", symbol)])
            .await?;
        tokio::time::sleep(self.client.call_spacing).await;
        let trade: TradeInfo = self
            .client
            .get("/api/quote-equity", &[("symbol", symbol), ("section", "trade_info")])
            .await?;

        let price_info = equity
            .price_info
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "missing priceInfo"))?;
        let volume = trade
            .security_wise_dp
            .and_then(|dp| dp.quantity_traded)
            .ok_or_else(|| {
                ProviderError::malformed(PROVIDER, "missing securityWiseDP.quantityTraded")
            })?;

        let (Some(price), Some(change), Some(change_percent)) =
            (price_info.last_price, price_info.change, price_info.p_change)
        else {
            return Err(ProviderError::malformed(PROVIDER, "incomplete priceInfo"));
        };

        let timestamp = equity
            .metadata
            .and_then(|m| m.last_update_time)
            .and_then(|raw| parse_update_time(&raw))
            .unwrap_or_else(now_millis);

        let mut quote = Quote::placeholder(company, Market::In, timestamp);
        quote.price = price.0;
        quote.change = change.0;
        quote.change_percent = change_percent.0;
        if let Some(FlexNumber(open)) = price_info.open
            && open > 0.0
        {
            quote.intraday_change = Some(price.0 - open);
            quote.intraday_change_percent = Some((price.0 - open) / open * 100.0);
        }
        quote.volume = to_volume(volume.0);

        tracing::debug!(
            price = quote.price,
            change_percent = quote.change_percent,
            "NSE quote fetched"
        );
        Ok(quote)
    }
}

// =============================================================================
// Status Probe
// =============================================================================

/// Live NSE capital-market open/closed reading.
#[derive(Debug, Clone)]
pub struct NseStatusProbe {
    client: Arc<NseClient>,
}

impl NseStatusProbe {
    /// Create a probe over a shared session.
    #[must_use]
    pub const fn new(client: Arc<NseClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MarketStatusProbe for NseStatusProbe {
    fn market(&self) -> Market {
        Market::In
    }

    async fn is_open(&self) -> Result<bool, ProviderError> {
        let body: MarketStatusResponse = self.client.get("/api/marketStatus", &[]).await?;
        body.market_state
            .iter()
            .find(|state| state.market == CAPITAL_MARKET)
            .map(|state| state.market_status.eq_ignore_ascii_case("Open"))
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "no Capital Market entry"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> Arc<NseClient> {
        Arc::new(NseClient::new(server.uri(), Duration::ZERO, Duration::from_secs(5)).unwrap())
    }

    async fn mount_home(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "nsit=abc; Path=/"),
            )
            .mount(server)
            .await;
    }

    fn tcs() -> Company {
        Company::new("TCS", "Tata Consultancy Services Ltd.", "IT Services")
    }

    #[tokio::test]
    async fn parses_quote_from_both_sections() {
        let server = MockServer::start().await;
        mount_home(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/quote-equity"))
            .and(query_param("section", "trade_info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "securityWiseDP": { "quantityTraded": "1,234,567" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/quote-equity"))
            .and(query_param("symbol", "TCS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "priceInfo": {
                    "lastPrice": 3850.5,
                    "change": "-12.25",
                    "pChange": -0.317,
                    "open": 3860
                },
                "metadata": { "lastUpdateTime": "05-Jan-2024 15:30:00" }
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let quote = NseProvider::new(Arc::clone(&client)).fetch_quote(&tcs()).await.unwrap();

        assert!(client.is_primed());
        assert_eq!(quote.market, Market::In);
        assert!((quote.price - 3850.5).abs() < 1e-9);
        assert!((quote.change + 12.25).abs() < 1e-9);
        assert_eq!(quote.volume, 1_234_567);
        assert!((quote.intraday_change.unwrap() + 9.5).abs() < 1e-9);
        // 15:30 IST is 10:00 UTC.
        assert_eq!(quote.timestamp, 1_704_448_800_000);
    }

    #[tokio::test]
    async fn missing_price_info_is_malformed() {
        let server = MockServer::start().await;
        mount_home(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/quote-equity"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "info": {} })))
            .mount(&server)
            .await;

        let err = NseProvider::new(client(&server)).fetch_quote(&tcs()).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn failed_priming_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = NseProvider::new(Arc::clone(&client)).fetch_quote(&tcs()).await.unwrap_err();
        assert!(matches!(err, ProviderError::UpstreamUnavailable { .. }));
        assert!(!client.is_primed());
    }

    #[tokio::test]
    async fn api_failure_resets_session() {
        let server = MockServer::start().await;
        mount_home(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/marketStatus"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(NseStatusProbe::new(Arc::clone(&client)).is_open().await.is_err());
        assert!(!client.is_primed());
    }

    #[tokio::test]
    async fn status_probe_reads_capital_market() {
        let server = MockServer::start().await;
        mount_home(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/marketStatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "marketState": [
                    { "market": "Currency", "marketStatus": "Open" },
                    { "market": "Capital Market", "marketStatus": "Closed" }
                ]
            })))
            .mount(&server)
            .await;

        let probe = NseStatusProbe::new(client(&server));
        assert_eq!(probe.market(), Market::In);
        assert!(!probe.is_open().await.unwrap());
    }

    #[test]
    fn update_time_parsing() {
        assert_eq!(parse_update_time("05-Jan-2024 15:30:00"), Some(1_704_448_800_000));
        assert_eq!(parse_update_time("yesterday"), None);
    }
}
