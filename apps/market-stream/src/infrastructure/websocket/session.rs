//! One subscriber connection.
//!
//! The session registers with the hub, then multiplexes four sources until
//! one of them ends the connection: shutdown, the hub's outbound queue,
//! inbound frames and the heartbeat timer.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::time::MissedTickBehavior;

use super::PushState;
use super::heartbeat::{HeartbeatEvent, HeartbeatState};
use crate::infrastructure::broadcast::{ClientMessage, Subscription, SubscriberId, Topic};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Shutdown,
    ClientClosed,
    HubClosed,
    SendFailed,
    HeartbeatTimeout,
}

impl CloseReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::ClientClosed => "client_closed",
            Self::HubClosed => "hub_closed",
            Self::SendFailed => "send_failed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
        }
    }
}

/// Drive one subscriber connection to completion.
pub(super) async fn run(socket: WebSocket, state: PushState) {
    let Subscription { id, mut receiver } = state.hub.subscribe();
    let (mut sink, mut stream) = socket.split();

    let mut heartbeat = HeartbeatState::new(state.heartbeat);
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + state.heartbeat.ping_interval,
        state.heartbeat.ping_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;
            () = state.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break CloseReason::Shutdown;
            }
            outbound = receiver.recv() => {
                let Some(message) = outbound else {
                    break CloseReason::HubClosed;
                };
                let text = match serde_json::to_string(message.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(
                            subscriber = %id,
                            error = %e,
                            "Failed to serialize message"
                        );
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break CloseReason::SendFailed;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    None | Some(Err(_) | Ok(Message::Close(_))) => {
                        break CloseReason::ClientClosed;
                    }
                    Some(Ok(frame)) => {
                        heartbeat.record_activity(Instant::now());
                        state.hub.touch(id);
                        if let Message::Text(text) = frame {
                            handle_client_text(&state, id, text.as_str());
                        }
                    }
                }
            }
            _ = ticker.tick() => {
                match heartbeat.on_tick(Instant::now()) {
                    HeartbeatEvent::Timeout => break CloseReason::HeartbeatTimeout,
                    HeartbeatEvent::SendPing => {
                        if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                            break CloseReason::SendFailed;
                        }
                    }
                }
            }
        }
    };

    state.hub.unsubscribe(id);
    tracing::debug!(subscriber = %id, reason = reason.as_str(), "Session closed");
}

fn handle_client_text(state: &PushState, id: SubscriberId, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(subscriber = %id, error = %e, "Ignoring unrecognized client message");
            return;
        }
    };

    match message {
        ClientMessage::Refresh => {
            let replayed = state.hub.replay(id);
            let scheduled = state.trigger.as_ref().is_some_and(|trigger| trigger.request());
            tracing::debug!(subscriber = %id, replayed, scheduled, "Refresh requested");
        }
        ClientMessage::Subscribe { symbol } => {
            state.hub.subscribe_topic(id, Topic::parse(&symbol));
        }
        ClientMessage::Unsubscribe { symbol } => {
            state.hub.unsubscribe_topic(id, &Topic::parse(&symbol));
        }
    }
}
