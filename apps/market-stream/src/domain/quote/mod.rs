//! Quote Domain Types
//!
//! Canonical, provider-agnostic representation of one instrument snapshot.
//! Provider adapters parse their upstream payloads into [`Quote`]; the
//! aggregator, caches and broadcast hub only ever see this type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Market
// =============================================================================

/// One of the two exchanges served by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    /// US equities.
    #[serde(rename = "US")]
    Us,
    /// National Stock Exchange of India.
    #[serde(rename = "IN")]
    In,
}

impl Market {
    /// Every market, in broadcast order.
    pub const ALL: [Self; 2] = [Self::Us, Self::In];

    /// Wire identifier (`"US"` / `"IN"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::In => "IN",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = UnknownMarket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "US" => Ok(Self::Us),
            "IN" => Ok(Self::In),
            _ => Err(UnknownMarket(s.to_string())),
        }
    }
}

/// Returned when a string does not name a known market.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown market: {0}")]
pub struct UnknownMarket(pub String);

// =============================================================================
// Company (symbol universe entry)
// =============================================================================

/// Static metadata for one symbol of the configured universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    /// Ticker, unique within its market.
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Sector label.
    #[serde(default)]
    pub sector: Option<String>,
    /// Not exchange-listed: never fetched upstream.
    #[serde(default)]
    pub unlisted: bool,
}

impl Company {
    /// Create a listed company entry.
    #[must_use]
    pub fn new(symbol: &str, name: &str, sector: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            sector: Some(sector.to_string()),
            unlisted: false,
        }
    }

    /// Mark the entry as unlisted.
    #[must_use]
    pub const fn unlisted(mut self) -> Self {
        self.unlisted = true;
        self
    }
}

// =============================================================================
// News
// =============================================================================

/// One recent news article attached to a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    /// Headline.
    pub title: String,
    /// Article link.
    pub url: String,
    /// Short summary.
    pub summary: String,
    /// Publisher.
    pub source: String,
    /// Publication time as reported upstream (e.g. `20240105T133000`).
    pub time_published: String,
}

// =============================================================================
// Quote
// =============================================================================

/// Normalized snapshot of one instrument.
///
/// `price`, `change`, `change_percent` and `volume` are always numeric; use
/// [`Quote::sanitized`] before publishing to guarantee they are finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Ticker.
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Sector label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    /// Market the instrument trades on.
    pub market: Market,
    /// Last price.
    pub price: f64,
    /// Absolute change versus previous close.
    pub change: f64,
    /// Percent change versus previous close.
    pub change_percent: f64,
    /// Change versus today's open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intraday_change: Option<f64>,
    /// Percent change versus today's open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intraday_change_percent: Option<f64>,
    /// Traded volume.
    pub volume: u64,
    /// Trailing average daily volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_volume: Option<u64>,
    /// Observation time, epoch milliseconds.
    pub timestamp: i64,
    /// Short generated insight.
    #[serde(default)]
    pub insight: Option<String>,
    /// Recent news.
    #[serde(default)]
    pub news: Vec<NewsItem>,
    /// Generated movement analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

impl Quote {
    /// Zero-valued quote carrying the real identity of `company`.
    #[must_use]
    pub fn placeholder(company: &Company, market: Market, timestamp: i64) -> Self {
        Self {
            symbol: company.symbol.clone(),
            name: company.name.clone(),
            sector: company.sector.clone(),
            market,
            price: 0.0,
            change: 0.0,
            change_percent: 0.0,
            intraday_change: None,
            intraday_change_percent: None,
            volume: 0,
            average_volume: None,
            timestamp,
            insight: None,
            news: Vec::new(),
            analysis: None,
        }
    }

    /// Replace any non-finite numeric field with zero (optional ones with `None`).
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.price = finite_or_zero(self.price);
        self.change = finite_or_zero(self.change);
        self.change_percent = finite_or_zero(self.change_percent);
        self.intraday_change = self.intraday_change.filter(|v| v.is_finite());
        self.intraday_change_percent = self.intraday_change_percent.filter(|v| v.is_finite());
        self
    }

    /// Whether every mandatory numeric field is finite.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        self.price.is_finite() && self.change.is_finite() && self.change_percent.is_finite()
    }

    /// Percent by which `volume` exceeds `average_volume`, if known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn volume_deviation_percent(&self) -> Option<f64> {
        match self.average_volume {
            Some(avg) if avg > 0 => {
                Some((self.volume as f64 - avg as f64) / avg as f64 * 100.0)
            }
            _ => None,
        }
    }
}

const fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn apple() -> Company {
        Company::new("AAPL", "Apple Inc.", "Technology")
    }

    #[test]
    fn market_wire_names() {
        assert_eq!(serde_json::to_string(&Market::Us).unwrap(), "\"US\"");
        assert_eq!(serde_json::to_string(&Market::In).unwrap(), "\"IN\"");
        assert_eq!("in".parse::<Market>().unwrap(), Market::In);
        assert!("EU".parse::<Market>().is_err());
    }

    #[test]
    fn placeholder_is_zeroed_but_identified() {
        let quote = Quote::placeholder(&apple(), Market::Us, 1_700_000_000_000);
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.name, "Apple Inc.");
        assert_eq!(quote.sector.as_deref(), Some("Technology"));
        assert_eq!(quote.price, 0.0);
        assert_eq!(quote.volume, 0);
        assert!(quote.news.is_empty());
        assert!(quote.insight.is_none());
    }

    #[test]
    fn sanitized_replaces_non_finite_values() {
        let mut quote = Quote::placeholder(&apple(), Market::Us, 0);
        quote.price = f64::NAN;
        quote.change = f64::INFINITY;
        quote.change_percent = 1.5;
        quote.intraday_change = Some(f64::NEG_INFINITY);

        let quote = quote.sanitized();
        assert_eq!(quote.price, 0.0);
        assert_eq!(quote.change, 0.0);
        assert_eq!(quote.change_percent, 1.5);
        assert!(quote.intraday_change.is_none());
        assert!(quote.is_well_formed());
    }

    #[test]
    fn quote_serializes_camel_case() {
        let mut quote = Quote::placeholder(&apple(), Market::Us, 42);
        quote.change_percent = 0.66;
        quote.average_volume = Some(1000);

        let json = serde_json::to_value(&quote).unwrap();
        assert_eq!(json["changePercent"], 0.66);
        assert_eq!(json["averageVolume"], 1000);
        assert_eq!(json["market"], "US");
        assert_eq!(json["insight"], serde_json::Value::Null);
        assert!(json.get("intradayChange").is_none());
    }

    #[test]
    fn volume_deviation() {
        let mut quote = Quote::placeholder(&apple(), Market::Us, 0);
        quote.volume = 150;
        assert!(quote.volume_deviation_percent().is_none());

        quote.average_volume = Some(100);
        let deviation = quote.volume_deviation_percent().unwrap();
        assert!((deviation - 50.0).abs() < f64::EPSILON);

        quote.average_volume = Some(0);
        assert!(quote.volume_deviation_percent().is_none());
    }
}
