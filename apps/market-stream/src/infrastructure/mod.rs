//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the two servers that face clients.

/// Upstream HTTP adapters (Alpha Vantage, NSE, Gemini).
pub mod providers;

/// Subscriber registry, replay snapshot and fan-out.
pub mod broadcast;

/// WebSocket push-channel server.
pub mod websocket;

/// Configuration loading and the symbol universe.
pub mod config;

/// Status, health and metrics HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
