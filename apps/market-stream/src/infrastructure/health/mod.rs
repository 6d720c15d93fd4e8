//! Status, Health Check and Metrics Endpoint
//!
//! HTTP surface for operators, load balancers and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /api/status` - Uptime, market status pair, rate-limiter counters
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready once a market status exists)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::status::MarketStatusService;
use crate::domain::market_clock::MarketStatusPair;
use crate::domain::rate_limit::{RateLimiter, RateLimiterSnapshot};
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// `GET /api/status` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Always `"running"` while the process serves requests.
    pub status: &'static str,
    /// Service version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current status of both markets.
    pub market_status: MarketStatusPair,
    /// Counters of every rate limiter.
    pub rate_limits: Vec<RateLimiterSnapshot>,
    /// Connected push-channel subscribers.
    pub subscribers: usize,
}

/// `GET /health` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether a market status has been computed yet.
    pub status_computed: bool,
    /// Connected push-channel subscribers.
    pub subscribers: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving computed state.
    Healthy,
    /// Up, but no market status computed yet.
    Degraded,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the status server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    status: Arc<MarketStatusService>,
    limiters: Vec<Arc<RateLimiter>>,
    hub: SharedBroadcastHub,
}

impl HealthServerState {
    /// Create server state.
    #[must_use]
    pub fn new(
        version: String,
        status: Arc<MarketStatusService>,
        limiters: Vec<Arc<RateLimiter>>,
        hub: SharedBroadcastHub,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            status,
            limiters,
            hub,
        }
    }

    fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Router with every endpoint.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// Health Server
// =============================================================================

/// Status HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self { port, state, cancel }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Status server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Status server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn status_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(build_status_response(&state, Utc::now()))
}

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let status_computed = state.status.latest().is_some();
    let response = HealthResponse {
        status: determine_health_status(status_computed),
        version: state.version.clone(),
        uptime_secs: state.uptime_secs(),
        current_time: Utc::now(),
        status_computed,
        subscribers: state.hub.subscriber_count(),
    };
    (StatusCode::OK, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.status.latest().is_some() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

/// Status body; before the first scheduled computation the pair is computed on the spot.
fn build_status_response(state: &HealthServerState, now: DateTime<Utc>) -> StatusResponse {
    StatusResponse {
        status: "running",
        version: state.version.clone(),
        uptime_secs: state.uptime_secs(),
        market_status: state.status.latest().unwrap_or_else(|| state.status.compute_at(now)),
        rate_limits: state.limiters.iter().map(|l| l.snapshot()).collect(),
        subscribers: state.hub.subscriber_count(),
    }
}

const fn determine_health_status(status_computed: bool) -> HealthStatus {
    if status_computed {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Status server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::domain::market_clock::{SessionStatus, StatusOverride, TradingHours};
    use crate::infrastructure::broadcast::BroadcastHub;

    fn state() -> HealthServerState {
        let status = Arc::new(MarketStatusService::new(
            TradingHours::us_equities(),
            TradingHours::nse(),
            StatusOverride::default(),
        ));
        let us = Arc::new(RateLimiter::new("us", 5, Duration::from_secs(60)));
        assert!(us.try_acquire());
        HealthServerState::new(
            "1.2.3".to_string(),
            status,
            vec![us, Arc::new(RateLimiter::new("in", 20, Duration::from_secs(60)))],
            Arc::new(BroadcastHub::with_defaults()),
        )
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(serde_json::to_string(&HealthStatus::Healthy).unwrap(), "\"healthy\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
    }

    #[test]
    fn degraded_until_status_computed() {
        assert_eq!(determine_health_status(false), HealthStatus::Degraded);
        assert_eq!(determine_health_status(true), HealthStatus::Healthy);
    }

    #[test]
    fn status_response_computes_pair_on_demand() {
        // Wednesday 2024-01-10 15:00 UTC is 10:00 in New York.
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 15, 0, 0).unwrap();
        let response = build_status_response(&state(), now);

        assert_eq!(response.status, "running");
        assert_eq!(response.market_status.us.status, SessionStatus::Open);
        assert_eq!(response.rate_limits.len(), 2);
        assert_eq!(response.rate_limits[0].calls_in_window, 1);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["marketStatus"]["US"]["status"], "OPEN");
        assert_eq!(json["rateLimits"][1]["name"], "in");
        assert!(json["uptimeSecs"].is_u64());
    }
}
