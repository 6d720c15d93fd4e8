//! Configuration Module
//!
//! Environment-driven service settings and the symbol universe.

mod settings;
mod universe;

pub use settings::{
    ConfigError, Credentials, ProviderSettings, PushSettings, RateLimitSettings, ServerSettings,
    ServiceConfig,
};
pub use universe::{MarketUniverse, Universe};
