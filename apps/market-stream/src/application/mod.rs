//! Application Layer - Use cases and port definitions.
//!
//! Services here orchestrate the domain against the ports; they never
//! touch HTTP or sockets directly.

/// Port interfaces for upstream providers and collaborators.
pub mod ports;

/// Retry, caching, enrichment, status, aggregation and scheduling.
pub mod services;
