//! Recent news from the Alpha Vantage `NEWS_SENTIMENT` feed.

use async_trait::async_trait;
use serde::Deserialize;

use super::alpha_vantage::{AlphaVantageClient, throttle_signal};
use super::fetch_json;
use crate::application::ports::{NewsSource, ProviderError};
use crate::domain::quote::{Market, NewsItem};

const PROVIDER: &str = "alpha_vantage_news";

/// Articles requested per symbol.
const REQUEST_LIMIT: &str = "5";

/// Articles attached to a quote.
const ATTACHED_ITEMS: usize = 3;

#[derive(Debug, Deserialize)]
struct NewsResponse {
    feed: Option<Vec<FeedItem>>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    time_published: String,
}

impl From<FeedItem> for NewsItem {
    fn from(item: FeedItem) -> Self {
        Self {
            title: item.title,
            url: item.url,
            summary: item.summary,
            source: item.source,
            time_published: item.time_published,
        }
    }
}

/// US news source.
///
/// Throttling is an error so the caller does not cache it; an unexpected
/// payload is an empty, cacheable list.
#[derive(Debug, Clone)]
pub struct AlphaVantageNews {
    client: AlphaVantageClient,
}

impl AlphaVantageNews {
    /// Create a news source sharing `client`.
    #[must_use]
    pub const fn new(client: AlphaVantageClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NewsSource for AlphaVantageNews {
    fn market(&self) -> Market {
        Market::Us
    }

    async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsItem>, ProviderError> {
        let request = self
            .client
            .query("NEWS_SENTIMENT", &[("tickers", symbol), ("limit", REQUEST_LIMIT)]);

        let body: NewsResponse = match fetch_json(PROVIDER, request).await {
            Ok(body) => body,
            Err(ProviderError::MalformedResponse { detail, .. }) => {
                tracing::warn!(symbol = %symbol, detail = %detail, "Unexpected news payload");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        if let Some(signal) = throttle_signal(body.note.as_deref(), body.information.as_deref()) {
            return Err(ProviderError::rate_limited(PROVIDER, signal));
        }

        let Some(feed) = body.feed else {
            tracing::warn!(symbol = %symbol, "News payload has no feed");
            return Ok(Vec::new());
        };

        Ok(feed.into_iter().take(ATTACHED_ITEMS).map(NewsItem::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn source(server: &MockServer) -> AlphaVantageNews {
        let client = AlphaVantageClient::new(server.uri(), "k", Duration::from_secs(5)).unwrap();
        AlphaVantageNews::new(client)
    }

    #[tokio::test]
    async fn keeps_first_three_items() {
        let server = MockServer::start().await;
        let feed: Vec<_> = (0..5)
            .map(|i| {
                json!({
                    "title": format!("Headline {i}"),
                    "url": format!("https://news.example/{i}"),
                    "summary": "Summary",
                    "source": "Wire",
                    "time_published": "20240105T133000",
                    "overall_sentiment_score": 0.1
                })
            })
            .collect();
        Mock::given(method("GET"))
            .and(query_param("function", "NEWS_SENTIMENT"))
            .and(query_param("tickers", "AAPL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "feed": feed })))
            .mount(&server)
            .await;

        let news = source(&server).fetch_news("AAPL").await.unwrap();
        assert_eq!(news.len(), 3);
        assert_eq!(news[0].title, "Headline 0");
        assert_eq!(news[2].time_published, "20240105T133000");
    }

    #[tokio::test]
    async fn throttling_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Information": "Please consider spreading out your free API requests more \
                                sparingly (1 request per second). \
                                Our standard API rate limit is 25 requests per day."
            })))
            .mount(&server)
            .await;

        let err = source(&server).fetch_news("AAPL").await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn unexpected_shape_is_an_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": "0" })))
            .mount(&server)
            .await;
        assert!(source(&server).fetch_news("AAPL").await.unwrap().is_empty());

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        assert!(source(&server).fetch_news("AAPL").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn http_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        assert!(source(&server).fetch_news("AAPL").await.is_err());
    }
}
