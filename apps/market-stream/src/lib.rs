#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream - Market Data Aggregation and Broadcast
//!
//! Polls a US quote API (Alpha Vantage) and the NSE India API under strict
//! per-provider rate limits, normalizes everything into one quote shape,
//! masks upstream outages with caches and placeholders, and pushes live
//! updates to WebSocket subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and logic
//!   - `quote`: Quote, Company, Market, news items
//!   - `market_clock`: Trading hours and session status
//!   - `rate_limit`: Fixed-window call budgets
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Quote providers, news, text generation, status probe, publisher
//!   - `services`: Retry, caches, enrichment, status, aggregation, scheduling
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `providers`: HTTP adapters for the upstream APIs
//!   - `broadcast`: Subscriber registry and fan-out
//!   - `websocket`: Push channel
//!   - `health`: Status, health and metrics endpoint
//!   - `config`: Environment configuration and the symbol universe
//!
//! # Data Flow
//!
//! ```text
//! Alpha Vantage ──┐                                            ┌──► Subscriber 1
//!                 ├──► Aggregator ──► Scheduler ──► Broadcast ─┼──► Subscriber 2
//! NSE India ──────┘    (cache,        (adaptive      Hub       └──► Subscriber N
//!                       enrich)        interval)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market_clock::{
    MarketStatus, MarketStatusPair, SessionStatus, StatusOverride, TradingHours,
};
pub use domain::quote::{Company, Market, NewsItem, Quote};
pub use domain::rate_limit::{RateLimiter, RateLimiterSnapshot};

// Application services
pub use application::services::aggregator::{Aggregator, MarketSource, RefreshMode, RefreshReport};
pub use application::services::scheduler::{RefreshTrigger, SchedulerConfig, UpdateScheduler};
pub use application::services::status::MarketStatusService;

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credentials, ProviderSettings, PushSettings, RateLimitSettings, ServerSettings,
    ServiceConfig, Universe,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{
    BroadcastHub, BroadcastStats, ClientMessage, HubConfig, ServerMessage, SharedBroadcastHub,
    Topic,
};

// Push channel
pub use infrastructure::websocket::{PushServer, PushServerError, heartbeat::HeartbeatConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
