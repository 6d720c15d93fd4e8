//! Market Stream Binary
//!
//! Starts the market data aggregation and broadcast service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALPHA_VANTAGE_API_KEY`: US quote and news API key
//!
//! ## Optional
//! - `GEMINI_API_KEY`: Text-generation key (insights disabled when unset)
//! - `GEMINI_MODEL`: Text-generation model (default: gemini-1.5-flash)
//! - `MARKET_STREAM_HTTP_PORT`: Status, health and metrics port (default: 3000)
//! - `MARKET_STREAM_WS_PORT`: Push-channel port (default: 8080)
//! - `MARKET_STREAM_UNIVERSE_FILE`: YAML symbol universe (default: built-in)
//! - `MARKET_STREAM_*`: Rate limits, pacing, retries, TTLs, thresholds, timers
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use market_stream::application::ports::{NewsSource, TextGenerator, UpdatePublisher};
use market_stream::application::services::cache::QuoteCache;
use market_stream::application::services::enrichment::Enricher;
use market_stream::infrastructure::providers::{
    AlphaVantageClient, AlphaVantageNews, AlphaVantageProvider, DEFAULT_TIMEOUT, GeminiGenerator,
    NseClient, NseProvider, NseStatusProbe, alpha_vantage, gemini, nse,
};
use market_stream::infrastructure::telemetry;
use market_stream::{
    Aggregator, BroadcastHub, HealthServer, HealthServerState, HeartbeatConfig, HubConfig, Market,
    MarketSource, MarketStatusService, PushServer, RateLimiter, ServiceConfig, UpdateScheduler,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Market Stream");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable, metrics disabled");
    }

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Rate limiters
    let window = config.rate_limits.window;
    let us_limiter = Arc::new(RateLimiter::new("us", config.rate_limits.us, window));
    let in_limiter = Arc::new(RateLimiter::new("in", config.rate_limits.india, window));
    let insight_limiter = Arc::new(RateLimiter::new("insight", config.rate_limits.insight, window));
    let api_limiter = Arc::new(RateLimiter::new("api", config.rate_limits.api, window));

    // Upstream clients
    let av_client = AlphaVantageClient::new(
        alpha_vantage::DEFAULT_BASE_URL,
        config.credentials.alpha_vantage_key(),
        DEFAULT_TIMEOUT,
    )?;
    let nse_client = Arc::new(NseClient::new(
        nse::DEFAULT_BASE_URL,
        config.providers.in_call_spacing,
        DEFAULT_TIMEOUT,
    )?);

    // Market status, reconciled against the live NSE probe
    let status = Arc::new(
        MarketStatusService::new(
            config.universe.us.hours.clone(),
            config.universe.india.hours.clone(),
            config.status_override,
        )
        .with_probe(
            Arc::new(NseStatusProbe::new(Arc::clone(&nse_client))),
            Arc::clone(&in_limiter),
        ),
    );

    // Enrichment collaborators
    let news: Arc<dyn NewsSource> = Arc::new(AlphaVantageNews::new(av_client.clone()));
    let mut enricher = Enricher::new(config.enrichment).with_news(news, Arc::clone(&us_limiter));
    if let Some(key) = config.credentials.gemini_key() {
        let generator: Arc<dyn TextGenerator> = Arc::new(GeminiGenerator::new(
            gemini::DEFAULT_BASE_URL,
            config.providers.gemini_model.clone(),
            key,
            DEFAULT_TIMEOUT,
        )?);
        enricher = enricher.with_generator(generator, Arc::clone(&insight_limiter));
    } else {
        tracing::info!("GEMINI_API_KEY not set, insights disabled");
    }

    // Aggregator over both markets
    let sources = vec![
        MarketSource {
            market: Market::Us,
            companies: config.universe.us.companies.clone(),
            provider: Arc::new(AlphaVantageProvider::new(av_client, Arc::clone(&us_limiter))),
            limiter: Arc::clone(&us_limiter),
            retry: config.providers.us_retry(),
            call_spacing: config.providers.us_call_spacing,
        },
        MarketSource {
            market: Market::In,
            companies: config.universe.india.companies.clone(),
            provider: Arc::new(NseProvider::new(Arc::clone(&nse_client))),
            limiter: Arc::clone(&in_limiter),
            retry: config.providers.in_retry(),
            call_spacing: config.providers.in_call_spacing,
        },
    ];
    let aggregator = Arc::new(Aggregator::new(
        sources,
        Arc::new(QuoteCache::new(config.quote_ttl)),
        Arc::clone(&status),
        Arc::new(enricher),
        shutdown_token.clone(),
    ));

    // Broadcast hub and scheduler
    let broadcast_hub = Arc::new(BroadcastHub::new(HubConfig {
        queue_capacity: config.push.subscriber_queue,
    }));
    let publisher: Arc<dyn UpdatePublisher> = Arc::clone(&broadcast_hub) as Arc<dyn UpdatePublisher>;
    let scheduler = UpdateScheduler::new(
        Arc::clone(&aggregator),
        Arc::clone(&status),
        publisher,
        config.scheduler,
        shutdown_token.clone(),
    );
    let refresh_trigger = scheduler.trigger(Arc::clone(&api_limiter));

    // Push channel
    let push_server = PushServer::new(
        config.server.ws_port,
        Arc::clone(&broadcast_hub),
        HeartbeatConfig::from_push_settings(&config.push),
        shutdown_token.clone(),
    )
    .with_trigger(refresh_trigger);

    // Status server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&status),
        vec![us_limiter, in_limiter, insight_limiter, api_limiter],
        Arc::clone(&broadcast_hub),
    ));
    let health_server = HealthServer::new(
        config.server.http_port,
        health_state,
        shutdown_token.clone(),
    );

    // A server that fails to bind or serve shuts the whole process down
    let health_shutdown = shutdown_token.clone();
    let health_task = tokio::spawn(async move {
        let result = health_server.run().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Status server error");
            health_shutdown.cancel();
        }
        result
    });

    let push_shutdown = shutdown_token.clone();
    let push_task = tokio::spawn(async move {
        let result = push_server.run().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Push channel error");
            push_shutdown.cancel();
        }
        result
    });

    let scheduler_task = tokio::spawn(scheduler.run());

    tracing::info!("Market stream ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        tokio::join!(scheduler_task, push_task, health_task)
    })
    .await;
    match drained {
        Ok((_, push, health)) => {
            if let Ok(Err(e)) = push {
                return Err(e.into());
            }
            if let Ok(Err(e)) = health {
                return Err(e.into());
            }
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Shutdown timed out, exiting"
            );
        }
    }

    tracing::info!("Market stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        ws_port = config.server.ws_port,
        us_symbols = config.universe.get(Market::Us).companies.len(),
        in_symbols = config.universe.get(Market::In).companies.len(),
        insights = config.credentials.gemini_key().is_some(),
        status_override = config.status_override.as_str(),
        "Configuration loaded"
    );
    tracing::debug!(
        us_rate_limit = config.rate_limits.us,
        in_rate_limit = config.rate_limits.india,
        insight_rate_limit = config.rate_limits.insight,
        api_rate_limit = config.rate_limits.api,
        window_secs = config.rate_limits.window.as_secs(),
        cache_ttl_secs = config.quote_ttl.as_secs(),
        "Rate limits"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT) or an internal cancellation.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
