//! Domain Layer - Core market-data types and pure logic.
//!
//! Nothing in this layer performs I/O. Time is always injected, so every
//! computation here is deterministic under test.

/// Quotes, companies, markets and news items.
pub mod quote;

/// Trading-session computation from configured hours.
pub mod market_clock;

/// Fixed-window call budgets.
pub mod rate_limit;
