//! Service Configuration Settings
//!
//! Configuration types for the service, loaded once from environment
//! variables at start-up. Nothing here is mutable at runtime.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::universe::Universe;
use crate::application::services::enrichment::EnrichmentConfig;
use crate::application::services::retry::RetryPolicy;
use crate::application::services::scheduler::SchedulerConfig;
use crate::domain::market_clock::StatusOverride;

/// Jitter applied to configured retry delays.
const RETRY_JITTER: f64 = 0.1;

/// Upstream API credentials.
#[derive(Clone)]
pub struct Credentials {
    alpha_vantage_key: String,
    gemini_key: Option<String>,
}

impl Credentials {
    /// Create credentials.
    #[must_use]
    pub const fn new(alpha_vantage_key: String, gemini_key: Option<String>) -> Self {
        Self {
            alpha_vantage_key,
            gemini_key,
        }
    }

    /// US quote and news API key.
    #[must_use]
    pub fn alpha_vantage_key(&self) -> &str {
        &self.alpha_vantage_key
    }

    /// Text-generation API key, if configured.
    #[must_use]
    pub fn gemini_key(&self) -> Option<&str> {
        self.gemini_key.as_deref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("alpha_vantage_key", &"[REDACTED]")
            .field("gemini_key", &self.gemini_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Listening ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Status, health and metrics HTTP port.
    pub http_port: u16,
    /// Push-channel WebSocket port.
    pub ws_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 3000,
            ws_port: 8080,
        }
    }
}

/// Call budgets per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// US provider calls (quotes, daily series, news).
    pub us: u32,
    /// NSE calls (quotes, status probe).
    pub india: u32,
    /// Text-generation calls.
    pub insight: u32,
    /// On-demand refresh requests.
    pub api: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            us: 5,
            india: 20,
            insight: 15,
            api: 30,
            window: Duration::from_secs(60),
        }
    }
}

/// Upstream pacing and retry schedules.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    /// Delay between consecutive US symbol fetches.
    pub us_call_spacing: Duration,
    /// Delay between consecutive NSE calls.
    pub in_call_spacing: Duration,
    /// US retry delays.
    pub us_retry_delays: Vec<Duration>,
    /// NSE retry delays.
    pub in_retry_delays: Vec<Duration>,
    /// Text-generation model name.
    pub gemini_model: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            us_call_spacing: Duration::from_millis(12_000),
            in_call_spacing: Duration::from_millis(400),
            us_retry_delays: vec![Duration::from_millis(2_000), Duration::from_millis(5_000)],
            in_retry_delays: vec![Duration::from_millis(500), Duration::from_millis(1_000)],
            gemini_model: "gemini-1.5-flash".to_string(),
        }
    }
}

impl ProviderSettings {
    /// US retry policy.
    #[must_use]
    pub fn us_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.us_retry_delays.clone()).with_jitter(RETRY_JITTER)
    }

    /// NSE retry policy.
    #[must_use]
    pub fn in_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.in_retry_delays.clone()).with_jitter(RETRY_JITTER)
    }
}

/// Push-channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushSettings {
    /// Outbound queue capacity per subscriber.
    pub subscriber_queue: usize,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Silence after which a subscriber is closed.
    pub heartbeat_timeout: Duration,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            subscriber_queue: 512,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Listening ports.
    pub server: ServerSettings,
    /// Call budgets.
    pub rate_limits: RateLimitSettings,
    /// Upstream pacing and retries.
    pub providers: ProviderSettings,
    /// Per-market quote list TTL.
    pub quote_ttl: Duration,
    /// Enrichment thresholds and cache lifetimes.
    pub enrichment: EnrichmentConfig,
    /// Refresh and status timers.
    pub scheduler: SchedulerConfig,
    /// Live status reconciliation.
    pub status_override: StatusOverride,
    /// Push-channel settings.
    pub push: PushSettings,
    /// Symbol universe and trading hours.
    pub universe: Universe,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the US API key is missing or empty, or the
    /// universe file cannot be loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`ServiceConfig::from_env`].
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);

        let alpha_vantage_key = env
            .get("ALPHA_VANTAGE_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("ALPHA_VANTAGE_API_KEY".to_string()))?;
        if alpha_vantage_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("ALPHA_VANTAGE_API_KEY".to_string()));
        }
        let gemini_key = env.get("GEMINI_API_KEY").filter(|k| !k.trim().is_empty());

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            http_port: env.parse("MARKET_STREAM_HTTP_PORT", server_defaults.http_port),
            ws_port: env.parse("MARKET_STREAM_WS_PORT", server_defaults.ws_port),
        };

        let limit_defaults = RateLimitSettings::default();
        let rate_limits = RateLimitSettings {
            us: env.parse("MARKET_STREAM_US_RATE_LIMIT", limit_defaults.us),
            india: env.parse("MARKET_STREAM_IN_RATE_LIMIT", limit_defaults.india),
            insight: env.parse("MARKET_STREAM_INSIGHT_RATE_LIMIT", limit_defaults.insight),
            api: env.parse("MARKET_STREAM_API_RATE_LIMIT", limit_defaults.api),
            window: env.secs("MARKET_STREAM_RATE_WINDOW_SECS", limit_defaults.window),
        };

        let provider_defaults = ProviderSettings::default();
        let providers = ProviderSettings {
            us_call_spacing: env.millis(
                "MARKET_STREAM_US_CALL_SPACING_MS",
                provider_defaults.us_call_spacing,
            ),
            in_call_spacing: env.millis(
                "MARKET_STREAM_IN_CALL_SPACING_MS",
                provider_defaults.in_call_spacing,
            ),
            us_retry_delays: env.millis_list(
                "MARKET_STREAM_US_RETRY_DELAYS_MS",
                provider_defaults.us_retry_delays,
            ),
            in_retry_delays: env.millis_list(
                "MARKET_STREAM_IN_RETRY_DELAYS_MS",
                provider_defaults.in_retry_delays,
            ),
            gemini_model: env.get("GEMINI_MODEL").unwrap_or(provider_defaults.gemini_model),
        };

        let enrichment_defaults = EnrichmentConfig::default();
        let enrichment = EnrichmentConfig {
            price_threshold_pct: env.parse(
                "MARKET_STREAM_PRICE_THRESHOLD_PCT",
                enrichment_defaults.price_threshold_pct,
            ),
            volume_threshold_pct: env.parse(
                "MARKET_STREAM_VOLUME_THRESHOLD_PCT",
                enrichment_defaults.volume_threshold_pct,
            ),
            analysis_threshold_pct: env.parse(
                "MARKET_STREAM_ANALYSIS_THRESHOLD_PCT",
                enrichment_defaults.analysis_threshold_pct,
            ),
            news_ttl: env.secs("MARKET_STREAM_NEWS_TTL_SECS", enrichment_defaults.news_ttl),
            insight_ttl: env.secs(
                "MARKET_STREAM_INSIGHT_TTL_SECS",
                enrichment_defaults.insight_ttl,
            ),
        };

        let scheduler_defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            initial_interval: env.secs(
                "MARKET_STREAM_REFRESH_INITIAL_SECS",
                scheduler_defaults.initial_interval,
            ),
            floor: env.secs("MARKET_STREAM_REFRESH_FLOOR_SECS", scheduler_defaults.floor),
            ceiling: env.secs("MARKET_STREAM_REFRESH_CEILING_SECS", scheduler_defaults.ceiling),
            status_interval: env.secs(
                "MARKET_STREAM_STATUS_INTERVAL_SECS",
                scheduler_defaults.status_interval,
            ),
        };

        let push_defaults = PushSettings::default();
        let push = PushSettings {
            subscriber_queue: env
                .parse("MARKET_STREAM_SUBSCRIBER_QUEUE", push_defaults.subscriber_queue)
                .max(1),
            heartbeat_interval: env.secs(
                "MARKET_STREAM_HEARTBEAT_INTERVAL_SECS",
                push_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.secs(
                "MARKET_STREAM_HEARTBEAT_TIMEOUT_SECS",
                push_defaults.heartbeat_timeout,
            ),
        };

        let status_override = env
            .get("MARKET_STREAM_STATUS_OVERRIDE")
            .and_then(|raw| match StatusOverride::from_str(&raw) {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid status override policy, using default");
                    None
                }
            })
            .unwrap_or_default();

        let universe = match env.get("MARKET_STREAM_UNIVERSE_FILE") {
            Some(path) => Universe::load(&PathBuf::from(path))?,
            None => Universe::builtin(),
        };

        Ok(Self {
            credentials: Credentials::new(alpha_vantage_key, gemini_key),
            server,
            rate_limits,
            providers,
            quote_ttl: env.secs("MARKET_STREAM_CACHE_TTL_SECS", Duration::from_secs(300)),
            enrichment,
            scheduler,
            status_override,
            push,
            universe,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Universe file could not be read or parsed.
    #[error("failed to load universe file {path}: {reason}")]
    UniverseFile {
        /// File path.
        path: String,
        /// Underlying error.
        reason: String,
    },
    /// A market has no companies.
    #[error("universe for market {0} has no companies")]
    EmptyUniverse(String),
    /// A symbol appears twice in one market.
    #[error("duplicate symbol {symbol} in market {market}")]
    DuplicateSymbol {
        /// Market.
        market: String,
        /// Symbol.
        symbol: String,
    },
}

/// Typed access to a variable lookup; unparsable values fall back to defaults.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn millis_list(&self, key: &str, default: Vec<Duration>) -> Vec<Duration> {
        let Some(raw) = self.get(key) else {
            return default;
        };
        let parsed: Result<Vec<u64>, _> = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse::<u64>)
            .collect();
        parsed.map_or(default, |millis| millis.into_iter().map(Duration::from_millis).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(&move |key| env.get(key).cloned())
    }

    #[test]
    fn missing_api_key_is_fatal() {
        assert!(matches!(config(&[]), Err(ConfigError::MissingEnvVar(_))));
        assert!(matches!(
            config(&[("ALPHA_VANTAGE_API_KEY", "  ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("ALPHA_VANTAGE_API_KEY", "demo")]).unwrap();
        assert_eq!(cfg.server, ServerSettings::default());
        assert_eq!(cfg.rate_limits, RateLimitSettings::default());
        assert_eq!(cfg.providers.us_retry_delays.len(), 2);
        assert_eq!(cfg.quote_ttl, Duration::from_secs(300));
        assert_eq!(cfg.status_override, StatusOverride::IsOpenOnly);
        assert_eq!(cfg.push.subscriber_queue, 512);
        assert!(cfg.credentials.gemini_key().is_none());
        assert_eq!(cfg.universe.us.companies.len(), 29);
    }

    #[test]
    fn overrides_apply() {
        let cfg = config(&[
            ("ALPHA_VANTAGE_API_KEY", "demo"),
            ("GEMINI_API_KEY", "g-key"),
            ("MARKET_STREAM_WS_PORT", "9001"),
            ("MARKET_STREAM_US_RATE_LIMIT", "25"),
            ("MARKET_STREAM_US_RETRY_DELAYS_MS", "100, 200,300"),
            ("MARKET_STREAM_STATUS_OVERRIDE", "ignore"),
            ("MARKET_STREAM_PRICE_THRESHOLD_PCT", "1.5"),
            ("MARKET_STREAM_REFRESH_CEILING_SECS", "600"),
        ])
        .unwrap();

        assert_eq!(cfg.server.ws_port, 9001);
        assert_eq!(cfg.rate_limits.us, 25);
        assert_eq!(
            cfg.providers.us_retry_delays,
            vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(300)]
        );
        assert_eq!(cfg.status_override, StatusOverride::Ignore);
        assert!((cfg.enrichment.price_threshold_pct - 1.5).abs() < f64::EPSILON);
        assert_eq!(cfg.scheduler.ceiling, Duration::from_secs(600));
        assert_eq!(cfg.credentials.gemini_key(), Some("g-key"));
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let cfg = config(&[
            ("ALPHA_VANTAGE_API_KEY", "demo"),
            ("MARKET_STREAM_HTTP_PORT", "not-a-port"),
            ("MARKET_STREAM_IN_RETRY_DELAYS_MS", "500,soon"),
            ("MARKET_STREAM_STATUS_OVERRIDE", "sometimes"),
        ])
        .unwrap();

        assert_eq!(cfg.server.http_port, 3000);
        assert_eq!(cfg.providers.in_retry_delays, ProviderSettings::default().in_retry_delays);
        assert_eq!(cfg.status_override, StatusOverride::IsOpenOnly);
    }

    #[test]
    fn empty_retry_list_disables_retries() {
        let cfg = config(&[
            ("ALPHA_VANTAGE_API_KEY", "demo"),
            ("MARKET_STREAM_US_RETRY_DELAYS_MS", ""),
        ])
        .unwrap();
        assert_eq!(cfg.providers.us_retry().max_attempts(), 1);
    }

    #[test]
    fn missing_universe_file_is_fatal() {
        let result = config(&[
            ("ALPHA_VANTAGE_API_KEY", "demo"),
            ("MARKET_STREAM_UNIVERSE_FILE", "/nonexistent/universe.yaml"),
        ]);
        assert!(matches!(result, Err(ConfigError::UniverseFile { .. })));
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("av-secret".to_string(), Some("gm-secret".to_string()));
        let debug = format!("{creds:?}");
        assert!(!debug.contains("av-secret"));
        assert!(!debug.contains("gm-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
