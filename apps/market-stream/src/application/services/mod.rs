//! Application Services
//!
//! - `retry`: declarative retry schedules and the generic retry helper
//! - `cache`: per-market list cache, per-symbol fallback cache, TTL maps
//! - `enrichment`: news, insight and movement analysis for significant moves
//! - `status`: market-status computation with live-probe reconciliation
//! - `aggregator`: one full-universe refresh pass per market
//! - `scheduler`: adaptive refresh loop and fixed status timer

pub mod aggregator;
pub mod cache;
pub mod enrichment;
pub mod retry;
pub mod scheduler;
pub mod status;
