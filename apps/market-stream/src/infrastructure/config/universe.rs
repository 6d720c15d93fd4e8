//! Symbol Universe
//!
//! Per-market trading hours and company lists. The built-in universe is
//! used unless `MARKET_STREAM_UNIVERSE_FILE` points at a YAML file of the
//! same shape:
//!
//! ```yaml
//! us:
//!   hours: { open: "09:30", close: "16:00", timezone: America/New_York, extended_hours: true }
//!   companies:
//!     - { symbol: AAPL, name: Apple Inc., sector: Technology }
//! in:
//!   hours: { open: "09:15", close: "15:30", timezone: Asia/Kolkata }
//!   companies:
//!     - { symbol: RELIANCE JIO, name: Reliance Jio, sector: Telecom, unlisted: true }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::settings::ConfigError;
use crate::domain::market_clock::TradingHours;
use crate::domain::quote::{Company, Market};

/// Hours and companies of one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketUniverse {
    /// Trading hours.
    pub hours: TradingHours,
    /// Companies, in publication order.
    pub companies: Vec<Company>,
}

/// Universe of both markets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Universe {
    /// US equities.
    pub us: MarketUniverse,
    /// NSE India.
    #[serde(rename = "in")]
    pub india: MarketUniverse,
}

impl Universe {
    /// Universe of `market`.
    #[must_use]
    pub const fn get(&self, market: Market) -> &MarketUniverse {
        match market {
            Market::Us => &self.us,
            Market::In => &self.india,
        }
    }

    /// Load and validate a YAML universe file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::UniverseFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let universe: Self = serde_yaml_bw::from_str(&raw).map_err(|e| ConfigError::UniverseFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        universe.validate()?;
        Ok(universe)
    }

    /// Check every market has companies with unique symbols.
    ///
    /// An unknown timezone is only logged; the market clock degrades to
    /// system-local time for it.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty company list or a duplicate symbol.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for market in Market::ALL {
            let universe = self.get(market);
            if universe.companies.is_empty() {
                return Err(ConfigError::EmptyUniverse(market.to_string()));
            }

            let mut seen = HashSet::new();
            for company in &universe.companies {
                if !seen.insert(company.symbol.as_str()) {
                    return Err(ConfigError::DuplicateSymbol {
                        market: market.to_string(),
                        symbol: company.symbol.clone(),
                    });
                }
            }

            if !universe.hours.has_valid_timezone() {
                tracing::warn!(
                    market = %market,
                    timezone = %universe.hours.timezone,
                    "Unknown timezone identifier; market clock will use system local time"
                );
            }
        }
        Ok(())
    }

    /// Built-in reference universe.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            us: MarketUniverse {
                hours: TradingHours::us_equities(),
                companies: us_companies(),
            },
            india: MarketUniverse {
                hours: TradingHours::nse(),
                companies: nse_companies(),
            },
        }
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::builtin()
    }
}

fn us_companies() -> Vec<Company> {
    [
        ("AAPL", "Apple Inc.", "Technology"),
        ("MSFT", "Microsoft Corporation", "Technology"),
        ("GOOGL", "Alphabet Inc.", "Technology"),
        ("AMZN", "Amazon.com, Inc.", "Technology"),
        ("NVDA", "NVIDIA Corporation", "Technology"),
        ("META", "Meta Platforms, Inc.", "Technology"),
        ("TSM", "Taiwan Semiconductor Manufacturing Company", "Technology"),
        ("AVGO", "Broadcom Inc.", "Technology"),
        ("JPM", "JPMorgan Chase & Co.", "Finance"),
        ("BAC", "Bank of America Corp", "Finance"),
        ("V", "Visa Inc.", "Finance"),
        ("MA", "Mastercard Incorporated", "Finance"),
        ("WFC", "Wells Fargo & Company", "Finance"),
        ("TSLA", "Tesla, Inc.", "EV/Auto"),
        ("RIVN", "Rivian Automotive, Inc.", "EV/Auto"),
        ("F", "Ford Motor Company", "EV/Auto"),
        ("GM", "General Motors Company", "EV/Auto"),
        ("JNJ", "Johnson & Johnson", "Healthcare"),
        ("UNH", "UnitedHealth Group Incorporated", "Healthcare"),
        ("PFE", "Pfizer Inc.", "Healthcare"),
        ("ABBV", "AbbVie Inc.", "Healthcare"),
        ("MRK", "Merck & Co., Inc.", "Healthcare"),
        ("XOM", "Exxon Mobil Corporation", "Energy"),
        ("CVX", "Chevron Corporation", "Energy"),
        ("COP", "ConocoPhillips", "Energy"),
        ("WMT", "Walmart Inc.", "Retail"),
        ("COST", "Costco Wholesale Corporation", "Retail"),
        ("HD", "The Home Depot, Inc.", "Retail"),
        ("TGT", "Target Corporation", "Retail"),
    ]
    .into_iter()
    .map(|(symbol, name, sector)| Company::new(symbol, name, sector))
    .collect()
}

fn nse_companies() -> Vec<Company> {
    let mut companies: Vec<Company> = [
        ("RELIANCE", "Reliance Industries Ltd.", "Conglomerate"),
        ("ITC", "ITC Ltd.", "Conglomerate"),
        ("ADANIENT", "Adani Enterprises Ltd.", "Conglomerate"),
        ("TCS", "Tata Consultancy Services Ltd.", "IT Services"),
        ("INFY", "Infosys Ltd.", "IT Services"),
        ("HCLTECH", "HCL Technologies Ltd.", "IT Services"),
        ("WIPRO", "Wipro Ltd.", "IT Services"),
        ("HDFCBANK", "HDFC Bank Ltd.", "Banking"),
        ("ICICIBANK", "ICICI Bank Ltd.", "Banking"),
        ("SBIN", "State Bank of India", "Banking"),
        ("KOTAKBANK", "Kotak Mahindra Bank Ltd.", "Banking"),
        ("AXISBANK", "Axis Bank Ltd.", "Banking"),
        ("HINDUNILVR", "Hindustan Unilever Ltd.", "Consumer Goods"),
        ("NESTLEIND", "Nestle India Ltd.", "Consumer Goods"),
        ("ASIANPAINT", "Asian Paints Ltd.", "Consumer Goods"),
        ("BHARTIARTL", "Bharti Airtel Ltd.", "Telecom"),
    ]
    .into_iter()
    .map(|(symbol, name, sector)| Company::new(symbol, name, sector))
    .collect();

    companies.push(
        Company::new("RELIANCE JIO", "Reliance Jio Infocomm Ltd.", "Telecom").unlisted(),
    );

    companies.extend(
        [
            ("LT", "Larsen & Toubro Ltd.", "Infrastructure"),
            ("ULTRACEMCO", "UltraTech Cement Ltd.", "Infrastructure"),
            ("SUNPHARMA", "Sun Pharmaceutical Industries Ltd.", "Pharmaceuticals"),
            ("DRREDDY", "Dr. Reddy's Laboratories Ltd.", "Pharmaceuticals"),
            ("MARUTI", "Maruti Suzuki India Ltd.", "Auto"),
            ("TATAMOTORS", "Tata Motors Ltd.", "Auto"),
            ("M&M", "Mahindra & Mahindra Ltd.", "Auto"),
        ]
        .into_iter()
        .map(|(symbol, name, sector)| Company::new(symbol, name, sector)),
    );

    companies
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn builtin_universe_is_valid() {
        let universe = Universe::builtin();
        assert!(universe.validate().is_ok());
        assert_eq!(universe.us.companies.len(), 29);
        assert_eq!(universe.india.companies.len(), 25);
        assert!(universe.us.hours.extended_hours);
        assert!(!universe.india.hours.extended_hours);

        let unlisted: Vec<_> = universe
            .india
            .companies
            .iter()
            .filter(|c| c.unlisted)
            .map(|c| c.symbol.as_str())
            .collect();
        assert_eq!(unlisted, ["RELIANCE JIO"]);
    }

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
us:
  hours: {{ open: "09:30", close: "16:00", timezone: America/New_York, extended_hours: true }}
  companies:
    - {{ symbol: AAPL, name: Apple Inc., sector: Technology }}
in:
  hours: {{ open: "09:15", close: "15:30", timezone: Asia/Kolkata }}
  companies:
    - {{ symbol: TCS, name: Tata Consultancy Services Ltd. }}
    - {{ symbol: RELIANCE JIO, name: Reliance Jio Infocomm Ltd., unlisted: true }}
"#
        )
        .unwrap();

        let universe = Universe::load(file.path()).unwrap();
        assert_eq!(universe.us.companies[0].symbol, "AAPL");
        assert_eq!(universe.india.hours, TradingHours::nse());
        assert!(universe.india.companies[0].sector.is_none());
        assert!(universe.india.companies[1].unlisted);
    }

    #[test]
    fn rejects_duplicate_symbols() {
        let mut universe = Universe::builtin();
        universe.us.companies.push(Company::new("AAPL", "Apple again", "Technology"));
        assert!(matches!(
            universe.validate(),
            Err(ConfigError::DuplicateSymbol { ref symbol, .. }) if symbol == "AAPL"
        ));
    }

    #[test]
    fn rejects_empty_market() {
        let mut universe = Universe::builtin();
        universe.india.companies.clear();
        assert!(matches!(universe.validate(), Err(ConfigError::EmptyUniverse(_))));
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let err = Universe::load(Path::new("/nonexistent/universe.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::UniverseFile { .. }));
    }
}
