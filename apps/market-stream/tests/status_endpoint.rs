//! Status Endpoint Integration Tests
//!
//! Exercises the HTTP status router in-process through `tower::ServiceExt`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use tower::ServiceExt;

use market_stream::infrastructure::health::router;
use market_stream::{
    BroadcastHub, HealthServerState, MarketStatusService, RateLimiter, StatusOverride,
    TradingHours, init_metrics,
};

struct Fixture {
    state: Arc<HealthServerState>,
    status: Arc<MarketStatusService>,
    hub: Arc<BroadcastHub>,
    us_limiter: Arc<RateLimiter>,
}

fn fixture() -> Fixture {
    let status = Arc::new(MarketStatusService::new(
        TradingHours::us_equities(),
        TradingHours::nse(),
        StatusOverride::default(),
    ));
    let hub = Arc::new(BroadcastHub::with_defaults());
    let window = Duration::from_secs(60);
    let us_limiter = Arc::new(RateLimiter::new("us", 5, window));
    let limiters = vec![
        Arc::clone(&us_limiter),
        Arc::new(RateLimiter::new("in", 20, window)),
        Arc::new(RateLimiter::new("insight", 15, window)),
        Arc::new(RateLimiter::new("api", 30, window)),
    ];
    let state = Arc::new(HealthServerState::new(
        "0.1.0-test".to_string(),
        Arc::clone(&status),
        limiters,
        Arc::clone(&hub),
    ));
    Fixture {
        state,
        status,
        hub,
        us_limiter,
    }
}

async fn get(fixture: &Fixture, uri: &str) -> Response {
    router(Arc::clone(&fixture.state))
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_status_reports_markets_limiters_and_subscribers() {
    let fixture = fixture();
    assert!(fixture.us_limiter.try_acquire());
    assert!(fixture.us_limiter.try_acquire());
    let _subscription = fixture.hub.subscribe();

    let response = get(&fixture, "/api/status").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "running");
    assert_eq!(json["version"], "0.1.0-test");
    assert!(json["uptimeSecs"].is_u64());
    assert_eq!(json["subscribers"], 1);

    for market in ["US", "IN"] {
        let status = &json["marketStatus"][market];
        assert!(status["isOpen"].is_boolean(), "{market} status missing isOpen");
        assert!(status["status"].is_string());
        assert!(status["lastUpdate"].is_i64());
    }

    let limits = json["rateLimits"].as_array().unwrap();
    let names: Vec<_> = limits.iter().map(|l| l["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["us", "in", "insight", "api"]);
    assert_eq!(limits[0]["ceiling"], 5);
    assert_eq!(limits[0]["windowSecs"], 60);
    assert_eq!(limits[0]["callsInWindow"], 2);
    assert_eq!(limits[0]["rejectedTotal"], 0);
}

#[tokio::test]
async fn test_status_counts_rejected_calls() {
    let fixture = fixture();
    for _ in 0..5 {
        assert!(fixture.us_limiter.try_acquire());
    }
    assert!(!fixture.us_limiter.try_acquire());

    let json = body_json(get(&fixture, "/api/status").await).await;
    assert_eq!(json["rateLimits"][0]["callsInWindow"], 5);
    assert_eq!(json["rateLimits"][0]["rejectedTotal"], 1);
}

#[tokio::test]
async fn test_readiness_follows_first_status_computation() {
    let fixture = fixture();

    let response = get(&fixture, "/readyz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let health = body_json(get(&fixture, "/health").await).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["statusComputed"], false);

    fixture.status.refresh().await;

    let response = get(&fixture, "/readyz").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "READY");

    let health = body_json(get(&fixture, "/health").await).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["statusComputed"], true);
}

#[tokio::test]
async fn test_liveness_always_ok() {
    let fixture = fixture();
    let response = get(&fixture, "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "OK");
}

#[tokio::test]
async fn test_metrics_rendered_in_prometheus_format() {
    let fixture = fixture();
    init_metrics().unwrap();

    let response = get(&fixture, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let fixture = fixture();
    let response = get(&fixture, "/api/quotes").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
