//! Upstream Provider Adapters
//!
//! HTTP implementations of the driven ports:
//!
//! - [`alpha_vantage`]: US quotes and trailing average volume
//! - [`nse`]: NSE India quotes and the live market-status probe
//! - [`news`]: recent articles from the Alpha Vantage news feed
//! - [`gemini`]: short generated insights
//!
//! Adapters make exactly one logical attempt per call. Retries, pacing and
//! rate limiting are owned by the aggregator.

pub mod alpha_vantage;
pub mod gemini;
pub mod news;
pub mod nse;

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Deserializer};

use crate::application::ports::ProviderError;
use crate::infrastructure::metrics::{self, UpstreamOutcome};

pub use alpha_vantage::{AlphaVantageClient, AlphaVantageProvider};
pub use gemini::GeminiGenerator;
pub use news::AlphaVantageNews;
pub use nse::{NseClient, NseProvider, NseStatusProbe};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Response Handling
// =============================================================================

/// How a non-success status is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorCategory {
    RateLimited,
    Unavailable,
}

const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        _ => ErrorCategory::Unavailable,
    }
}

/// Send a request and parse the body as JSON.
///
/// Transport failures and non-success statuses become `UpstreamUnavailable`
/// (429 becomes `RateLimited`); an unparsable body becomes `MalformedResponse`.
async fn send_json<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::unavailable(provider, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(match categorize_status(status) {
            ErrorCategory::RateLimited => {
                ProviderError::rate_limited(provider, format!("HTTP {status}"))
            }
            ErrorCategory::Unavailable => {
                ProviderError::unavailable(provider, format!("HTTP {status}"))
            }
        });
    }

    let text = response
        .text()
        .await
        .map_err(|e| ProviderError::unavailable(provider, e.to_string()))?;

    serde_json::from_str(&text).map_err(|e| ProviderError::malformed(provider, e.to_string()))
}

/// [`send_json`] with the outcome recorded against `provider`.
async fn fetch_json<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let result = send_json(provider, request).await;
    metrics::record_upstream(provider, UpstreamOutcome::from_result(&result));
    result
}

// =============================================================================
// Numeric Coercion
// =============================================================================

/// A number that may arrive as a JSON number or a string such as
/// `"1,234.5"` or `"0.66%"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlexNumber(pub f64);

impl<'de> Deserialize<'de> for FlexNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self(n)),
            Raw::Text(s) => parse_number(&s)
                .map(Self)
                .ok_or_else(|| serde::de::Error::custom(format!("not a number: {s:?}"))),
        }
    }
}

/// Parse a loosely formatted numeric string.
#[must_use]
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Convert a non-negative float volume to an integer.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_volume(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("182.52", Some(182.52) ; "plain")]
    #[test_case("0.6600%", Some(0.66) ; "percent suffix")]
    #[test_case("1,234.5", Some(1234.5) ; "thousands separator")]
    #[test_case(" -3.10 ", Some(-3.1) ; "whitespace and sign")]
    #[test_case("-", None ; "dash")]
    #[test_case("", None ; "empty")]
    #[test_case("NaN", None ; "not finite")]
    fn parses_loose_numbers(raw: &str, expected: Option<f64>) {
        assert_eq!(parse_number(raw), expected);
    }

    #[test]
    fn flex_number_accepts_numbers_and_strings() {
        let values: Vec<FlexNumber> = serde_json::from_str(r#"[1.5, "2.5%", "1,000"]"#).unwrap();
        assert_eq!(values, vec![FlexNumber(1.5), FlexNumber(2.5), FlexNumber(1000.0)]);
        assert!(serde_json::from_str::<FlexNumber>(r#""n/a""#).is_err());
    }

    #[test]
    fn volume_conversion_clamps() {
        assert_eq!(to_volume(1_234.6), 1_235);
        assert_eq!(to_volume(-5.0), 0);
        assert_eq!(to_volume(f64::NAN), 0);
    }

    #[test]
    fn status_categories() {
        assert_eq!(categorize_status(StatusCode::TOO_MANY_REQUESTS), ErrorCategory::RateLimited);
        assert_eq!(categorize_status(StatusCode::BAD_GATEWAY), ErrorCategory::Unavailable);
        assert_eq!(categorize_status(StatusCode::FORBIDDEN), ErrorCategory::Unavailable);
    }
}
