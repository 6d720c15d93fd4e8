//! Gemini `generateContent` text generator.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::fetch_json;
use crate::application::ports::{InsightKind, ProviderError, TextGenerator};
use crate::domain::quote::Quote;

const PROVIDER: &str = "gemini";

/// Production endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Text generator backed by a hosted Gemini model.
#[derive(Clone)]
pub struct GeminiGenerator {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl GeminiGenerator {
    /// Create a generator for `model`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
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
            model: model.into(),
            api_key: api_key.into(),
        })
    }
}

/// Short factual prompt describing `quote`.
fn prompt(kind: InsightKind, quote: &Quote) -> String {
    let mut text = match kind {
        InsightKind::Insight => format!(
            "Provide a brief (1-2 sentence) insight for a financial dashboard about {} ({}). ",
            quote.name, quote.symbol
        ),
        InsightKind::MovementAnalysis => format!(
            "In one sentence, explain the likely reason for today's price movement of {} ({}). ",
            quote.name, quote.symbol
        ),
    };

    let _ = write!(
        text,
        "Price is {:.2}, changed {:.2}% today. ",
        quote.price, quote.change_percent
    );
    if let Some(avg) = quote.average_volume
        && quote.volume > avg
    {
        let _ = write!(text, "Volume {} is above its average of {avg}. ", quote.volume);
    }
    if let Some(headline) = quote.news.first() {
        let _ = write!(text, "A recent headline: \"{}\". ", headline.title);
    }
    text.push_str("Be objective and concise.");
    text
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, kind: InsightKind, quote: &Quote) -> Result<String, ProviderError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let body = json!({ "contents": [{ "parts": [{ "text": prompt(kind, quote) }] }] });
        let request = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body);

        let response: GenerateResponse = fetch_json(PROVIDER, request).await?;

        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "no candidate text"))
    }
}
