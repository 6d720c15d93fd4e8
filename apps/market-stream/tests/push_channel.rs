//! Push Channel Integration Tests
//!
//! Drives the WebSocket server over a real socket: replay on connect, live
//! fan-out, subscriber filters, on-demand refresh and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use market_stream::{
    BroadcastHub, Company, HeartbeatConfig, Market, MarketStatusPair, MarketStatusService,
    PushServer, Quote, ServerMessage, StatusOverride, TradingHours,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Start a push server on a random port.
async fn start_server() -> (SocketAddr, Arc<BroadcastHub>, CancellationToken) {
    let hub = Arc::new(BroadcastHub::with_defaults());
    let cancel = CancellationToken::new();
    let server = PushServer::new(
        0,
        Arc::clone(&hub),
        HeartbeatConfig::default(),
        cancel.clone(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server.run_with_listener(listener).await.unwrap();
    });

    (addr, hub, cancel)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

/// Next server message, skipping control frames.
async fn next_message(client: &mut Client) -> ServerMessage {
    loop {
        let frame = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Assert that no data message arrives for a short while.
async fn assert_quiet(client: &mut Client) {
    let deadline = tokio::time::Instant::now() + QUIET_PERIOD;
    while let Ok(frame) = tokio::time::timeout_at(deadline, client.next()).await {
        if let Some(Ok(Message::Text(text))) = frame {
            panic!("unexpected message: {text}");
        }
    }
}

async fn wait_for_subscribers(hub: &BroadcastHub, expected: usize) {
    timeout(RECV_TIMEOUT, async {
        while hub.subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count never reached the expected value");
}

fn status_pair() -> MarketStatusPair {
    let service = MarketStatusService::new(
        TradingHours::us_equities(),
        TradingHours::nse(),
        StatusOverride::default(),
    );
    // Wednesday 2024-01-10 15:00 UTC: New York open, Mumbai closed.
    service.compute_at(Utc.with_ymd_and_hms(2024, 1, 10, 15, 0, 0).unwrap())
}

fn quote(symbol: &str, market: Market, price: f64) -> Quote {
    let company = Company::new(symbol, &format!("{symbol} Ltd."), "Technology");
    let mut quote = Quote::placeholder(&company, market, 1_704_898_800_000);
    quote.price = price;
    quote
}

fn update_symbol(message: &ServerMessage) -> &str {
    message
        .quote()
        .map(|q| q.symbol.as_str())
        .expect("expected a marketUpdate")
}

#[tokio::test]
async fn test_replay_on_connect_sends_status_then_each_symbol_once() {
    let (addr, hub, cancel) = start_server().await;
    hub.publish_market_status(&status_pair());
    hub.publish_quotes(
        Market::Us,
        &[quote("AAPL", Market::Us, 185.5), quote("MSFT", Market::Us, 375.0)],
    );
    hub.publish_quotes(Market::In, &[quote("TCS", Market::In, 3_700.0)]);

    let mut client = connect(addr).await;

    let first = next_message(&mut client).await;
    match first {
        ServerMessage::MarketStatus(pair) => {
            assert!(pair.us.is_open);
            assert!(!pair.india.is_open);
        }
        other @ ServerMessage::MarketUpdate(_) => panic!("expected status first, got {other:?}"),
    }

    let mut symbols = Vec::new();
    for _ in 0..3 {
        symbols.push(update_symbol(&next_message(&mut client).await).to_string());
    }
    assert_eq!(symbols, ["AAPL", "MSFT", "TCS"]);
    assert_quiet(&mut client).await;

    cancel.cancel();
}

#[tokio::test]
async fn test_live_updates_reach_every_subscriber() {
    let (addr, hub, cancel) = start_server().await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    wait_for_subscribers(&hub, 2).await;

    hub.publish_quotes(Market::Us, &[quote("NVDA", Market::Us, 495.2)]);

    for client in [&mut first, &mut second] {
        let message = next_message(client).await;
        let quote = message.quote().unwrap();
        assert_eq!(quote.symbol, "NVDA");
        assert_eq!(quote.market, Market::Us);
        assert!((quote.price - 495.2).abs() < f64::EPSILON);
    }

    cancel.cancel();
}

#[tokio::test]
async fn test_wire_format_uses_type_and_data() {
    let (addr, hub, cancel) = start_server().await;
    let mut client = connect(addr).await;
    wait_for_subscribers(&hub, 1).await;

    hub.publish_quotes(Market::In, &[quote("INFY", Market::In, 1_450.0)]);

    let frame = timeout(RECV_TIMEOUT, client.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = frame else {
        panic!("expected a text frame");
    };
    let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(json["type"], "marketUpdate");
    assert_eq!(json["data"]["symbol"], "INFY");
    assert_eq!(json["data"]["market"], "IN");
    assert!(json["data"]["changePercent"].is_number());

    cancel.cancel();
}

#[tokio::test]
async fn test_subscribe_narrows_filter_but_status_always_arrives() {
    let (addr, hub, cancel) = start_server().await;
    hub.publish_market_status(&status_pair());
    hub.publish_quotes(Market::Us, &[quote("AAPL", Market::Us, 185.5)]);
    hub.publish_quotes(Market::In, &[quote("TCS", Market::In, 3_700.0)]);

    let mut client = connect(addr).await;
    for _ in 0..3 {
        next_message(&mut client).await;
    }

    client.send(Message::text(r#"{"type":"subscribe","symbol":"in"}"#)).await.unwrap();
    client.send(Message::text(r#"{"type":"refresh"}"#)).await.unwrap();

    // Replay after the filter change: status plus Indian quotes only.
    assert!(matches!(next_message(&mut client).await, ServerMessage::MarketStatus(_)));
    assert_eq!(update_symbol(&next_message(&mut client).await), "TCS");
    assert_quiet(&mut client).await;

    hub.publish_quotes(Market::Us, &[quote("AAPL", Market::Us, 186.0)]);
    hub.publish_quotes(Market::In, &[quote("TCS", Market::In, 3_710.0)]);
    hub.publish_market_status(&status_pair());

    assert_eq!(update_symbol(&next_message(&mut client).await), "TCS");
    assert!(matches!(next_message(&mut client).await, ServerMessage::MarketStatus(_)));
    assert_quiet(&mut client).await;

    cancel.cancel();
}

#[tokio::test]
async fn test_unrecognized_client_message_is_ignored() {
    let (addr, hub, cancel) = start_server().await;
    let mut client = connect(addr).await;
    wait_for_subscribers(&hub, 1).await;

    client.send(Message::text("not json")).await.unwrap();
    client.send(Message::text(r#"{"type":"teleport"}"#)).await.unwrap();

    hub.publish_quotes(Market::Us, &[quote("AMZN", Market::Us, 151.9)]);
    assert_eq!(update_symbol(&next_message(&mut client).await), "AMZN");
    assert_eq!(hub.subscriber_count(), 1);

    cancel.cancel();
}

#[tokio::test]
async fn test_client_close_removes_subscriber() {
    let (addr, hub, cancel) = start_server().await;
    let mut client = connect(addr).await;
    wait_for_subscribers(&hub, 1).await;

    client.close(None).await.unwrap();
    wait_for_subscribers(&hub, 0).await;

    // Publishing with nobody connected is a no-op.
    assert_eq!(hub.publish_quotes(Market::Us, &[quote("AAPL", Market::Us, 185.5)]), 0);

    cancel.cancel();
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let (addr, hub, cancel) = start_server().await;
    let mut client = connect(addr).await;
    wait_for_subscribers(&hub, 1).await;

    cancel.cancel();

    let ended = timeout(RECV_TIMEOUT, async {
        loop {
            match client.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "session did not close on shutdown");
    wait_for_subscribers(&hub, 0).await;
}
