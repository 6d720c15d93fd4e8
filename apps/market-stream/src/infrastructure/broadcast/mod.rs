//! Broadcast Hub
//!
//! Owns the subscriber set of the push channel and fans refresh results out
//! to it.
//!
//! # Architecture
//!
//! Each subscriber gets a bounded outbound queue (`mpsc`) of shared
//! [`ServerMessage`]s; the transport session drains it. Publishing never
//! blocks: a full queue drops the message for that subscriber and a closed
//! queue removes the subscriber.
//!
//! The hub also keeps the last published status pair and the last published
//! quotes of each market, so a new subscriber is brought up to date
//! immediately (status first, then one `marketUpdate` per quote).
//!
//! Lock order is `status`, then `snapshots`, then `subscribers`. Publishing
//! holds the replay state it changed until fan-out is done, and registration
//! holds the replay state it read until the subscriber is inserted, so a new
//! subscriber sees each publication exactly once: in its replay or live.

mod messages;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use messages::{ClientMessage, ServerMessage, SubscriptionFilter, Topic};

use crate::application::ports::UpdatePublisher;
use crate::domain::market_clock::MarketStatusPair;
use crate::domain::quote::{Market, Quote};
use crate::infrastructure::metrics;

/// Opaque subscriber identifier.
pub type SubscriberId = Uuid;

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

// =============================================================================
// Subscriber
// =============================================================================

/// Lifecycle of one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriberState {
    /// Registered, initial replay pending.
    Connected,
    /// Receiving live updates.
    Active,
    /// Removed from the hub.
    Closed,
}

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<Arc<ServerMessage>>,
    filter: SubscriptionFilter,
    state: SubscriberState,
    connected_at: Instant,
    last_activity: Instant,
}

impl Subscriber {
    fn wants(&self, message: &ServerMessage) -> bool {
        message.quote().is_none_or(|quote| self.filter.matches(quote))
    }
}

/// Receiving end handed to the transport.
#[derive(Debug)]
pub struct Subscription {
    /// Subscriber identifier.
    pub id: SubscriberId,
    /// Outbound queue.
    pub receiver: mpsc::Receiver<Arc<ServerMessage>>,
}

/// Read guards over the replay state.
struct ReplayView<'a> {
    status: RwLockReadGuard<'a, Option<MarketStatusPair>>,
    snapshots: RwLockReadGuard<'a, HashMap<Market, Vec<Quote>>>,
}

/// Result of one non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Dropped,
    Closed,
}

fn enqueue(tx: &mpsc::Sender<Arc<ServerMessage>>, message: Arc<ServerMessage>) -> Delivery {
    match tx.try_send(message) {
        Ok(()) => Delivery::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
    }
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Hub configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound queue capacity per subscriber.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { queue_capacity: 512 }
    }
}

/// Subscriber registry with replay state.
#[derive(Debug)]
pub struct BroadcastHub {
    config: HubConfig,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    status: RwLock<Option<MarketStatusPair>>,
    snapshots: RwLock<HashMap<Market, Vec<Quote>>>,
    messages_dropped: AtomicU64,
}

impl BroadcastHub {
    /// Create a hub.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            config: HubConfig {
                queue_capacity: config.queue_capacity.max(1),
            },
            subscribers: RwLock::new(HashMap::new()),
            status: RwLock::new(None),
            snapshots: RwLock::new(HashMap::new()),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Create a hub with default capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    // =========================================================================
    // Subscriber Lifecycle
    // =========================================================================

    /// Register a subscriber and queue its initial replay.
    pub fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.config.queue_capacity);
        let id = Uuid::new_v4();
        let mut subscriber = Subscriber {
            tx,
            filter: SubscriptionFilter::default(),
            state: SubscriberState::Connected,
            connected_at: Instant::now(),
            last_activity: Instant::now(),
        };

        let count = {
            let view = self.replay_view();
            let mut subscribers = self.subscribers.write();
            let queued = self.replay_into(&view, &subscriber);
            subscriber.state = SubscriberState::Active;
            subscribers.insert(id, subscriber);
            tracing::info!(subscriber = %id, replayed = queued, "Subscriber connected");
            subscribers.len()
        };
        metrics::set_subscribers(count);

        Subscription { id, receiver }
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(&id).map(|mut s| {
                s.state = SubscriberState::Closed;
                s
            });
            (removed, subscribers.len())
        };
        metrics::set_subscribers(count);

        if let Some(subscriber) = &removed {
            tracing::info!(
                subscriber = %id,
                connected_secs = subscriber.connected_at.elapsed().as_secs(),
                idle_secs = subscriber.last_activity.elapsed().as_secs(),
                "Subscriber disconnected"
            );
        }
        removed.is_some()
    }

    /// Lifecycle state of a subscriber; unknown ids are `Closed`.
    #[must_use]
    pub fn state(&self, id: SubscriberId) -> SubscriberState {
        self.subscribers
            .read()
            .get(&id)
            .map_or(SubscriberState::Closed, |s| s.state)
    }

    /// Record inbound activity from a subscriber.
    pub fn touch(&self, id: SubscriberId) {
        if let Some(subscriber) = self.subscribers.write().get_mut(&id) {
            subscriber.last_activity = Instant::now();
        }
    }

    /// Add a topic to a subscriber's filter.
    pub fn subscribe_topic(&self, id: SubscriberId, topic: Topic) -> bool {
        self.subscribers.write().get_mut(&id).is_some_and(|s| {
            tracing::debug!(subscriber = %id, topic = %topic, "Topic subscribed");
            s.filter.subscribe(topic);
            true
        })
    }

    /// Remove a topic from a subscriber's filter.
    pub fn unsubscribe_topic(&self, id: SubscriberId, topic: &Topic) -> bool {
        self.subscribers
            .write()
            .get_mut(&id)
            .is_some_and(|s| s.filter.unsubscribe(topic))
    }

    /// Queue the current status and quotes for one subscriber.
    ///
    /// Returns the number of messages queued.
    pub fn replay(&self, id: SubscriberId) -> usize {
        let view = self.replay_view();
        let subscribers = self.subscribers.read();
        subscribers.get(&id).map_or(0, |s| self.replay_into(&view, s))
    }

    fn replay_view(&self) -> ReplayView<'_> {
        ReplayView {
            status: self.status.read(),
            snapshots: self.snapshots.read(),
        }
    }

    fn replay_into(&self, view: &ReplayView<'_>, subscriber: &Subscriber) -> usize {
        let mut messages = Vec::new();
        if let Some(status) = view.status.as_ref().cloned() {
            messages.push(ServerMessage::MarketStatus(status));
        }
        for market in Market::ALL {
            messages.extend(
                view.snapshots
                    .get(&market)
                    .into_iter()
                    .flatten()
                    .cloned()
                    .map(ServerMessage::MarketUpdate),
            );
        }

        let mut queued = 0;
        for message in messages {
            if !subscriber.wants(&message) {
                continue;
            }
            match enqueue(&subscriber.tx, Arc::new(message)) {
                Delivery::Sent => queued += 1,
                Delivery::Dropped => self.count_dropped(1),
                Delivery::Closed => break,
            }
        }
        queued
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Publish one quote and record it for replay.
    pub fn publish(&self, quote: Quote) -> usize {
        let mut snapshots = self.snapshots.write();
        let snapshot = snapshots.entry(quote.market).or_default();
        match snapshot.iter_mut().find(|q| q.symbol == quote.symbol) {
            Some(existing) => *existing = quote.clone(),
            None => snapshot.push(quote.clone()),
        }
        let delivered = self.fan_out(&[Arc::new(ServerMessage::MarketUpdate(quote))]);
        drop(snapshots);
        delivered
    }

    /// Publish a market's quotes, one message each, replacing its replay list.
    pub fn publish_quotes(&self, market: Market, quotes: &[Quote]) -> usize {
        let messages: Vec<_> = quotes
            .iter()
            .cloned()
            .map(|q| Arc::new(ServerMessage::MarketUpdate(q)))
            .collect();

        let mut snapshots = self.snapshots.write();
        snapshots.insert(market, quotes.to_vec());
        let delivered = self.fan_out(&messages);
        drop(snapshots);

        tracing::debug!(
            market = %market,
            quotes = quotes.len(),
            delivered,
            "Market update broadcast"
        );
        delivered
    }

    /// Publish a status pair to every subscriber and record it for replay.
    pub fn publish_market_status(&self, status: &MarketStatusPair) -> usize {
        let message = Arc::new(ServerMessage::MarketStatus(status.clone()));
        let mut latest = self.status.write();
        *latest = Some(status.clone());
        let delivered = self.fan_out(&[message]);
        drop(latest);
        delivered
    }

    /// Enqueue messages for every interested subscriber; returns deliveries.
    fn fan_out(&self, messages: &[Arc<ServerMessage>]) -> usize {
        let mut delivered = 0;
        let mut dropped = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for (id, subscriber) in subscribers.iter() {
                if subscriber.state != SubscriberState::Active {
                    continue;
                }
                for message in messages {
                    if !subscriber.wants(message) {
                        continue;
                    }
                    match enqueue(&subscriber.tx, Arc::clone(message)) {
                        Delivery::Sent => delivered += 1,
                        Delivery::Dropped => dropped += 1,
                        Delivery::Closed => {
                            closed.push(*id);
                            break;
                        }
                    }
                }
            }
        }

        if dropped > 0 {
            tracing::warn!(dropped, "Subscriber queues full, messages dropped");
            self.count_dropped(dropped);
        }
        for id in closed {
            self.unsubscribe(id);
        }
        delivered
    }

    fn count_dropped(&self, count: u64) {
        self.messages_dropped.fetch_add(count, Ordering::Relaxed);
        metrics::record_messages_dropped(count);
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Last published status pair.
    #[must_use]
    pub fn latest_status(&self) -> Option<MarketStatusPair> {
        self.status.read().clone()
    }

    /// Hub statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        let snapshots = self.snapshots.read();
        BroadcastStats {
            subscribers: self.subscriber_count(),
            cached_quotes: snapshots.values().map(Vec::len).sum(),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

impl UpdatePublisher for BroadcastHub {
    fn publish_market(&self, market: Market, quotes: &[Quote]) {
        self.publish_quotes(market, quotes);
    }

    fn publish_status(&self, status: &MarketStatusPair) {
        self.publish_market_status(status);
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStats {
    /// Registered subscribers.
    pub subscribers: usize,
    /// Quotes held for replay.
    pub cached_quotes: usize,
    /// Messages dropped on full queues since start.
    pub messages_dropped: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::domain::market_clock::MarketStatus;
    use crate::domain::quote::Company;

    fn quote(symbol: &str, market: Market, price: f64) -> Quote {
        let mut q = Quote::placeholder(&Company::new(symbol, symbol, "Test"), market, 0);
        q.price = price;
        q
    }

    fn status() -> MarketStatusPair {
        MarketStatusPair {
            us: MarketStatus::unknown(1),
            india: MarketStatus::unknown(1),
        }
    }

    fn drain(sub: &mut Subscription) -> Vec<Arc<ServerMessage>> {
        let mut out = Vec::new();
        while let Ok(message) = sub.receiver.try_recv() {
            out.push(message);
        }
        out
    }

    #[test]
    fn hub_creation() {
        let hub = BroadcastHub::with_defaults();
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.stats(), BroadcastStats::default());
        assert!(hub.latest_status().is_none());
    }

    #[test]
    fn subscriber_count_tracks_lifecycle() {
        let hub = BroadcastHub::with_defaults();
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);
        assert_eq!(hub.state(a.id), SubscriberState::Active);

        assert!(hub.unsubscribe(a.id));
        assert!(!hub.unsubscribe(a.id));
        assert_eq!(hub.state(a.id), SubscriberState::Closed);
        assert_eq!(hub.subscriber_count(), 1);
        drop(b);
    }

    #[test]
    fn new_subscriber_gets_status_then_every_cached_quote() {
        let hub = BroadcastHub::with_defaults();
        hub.publish_market_status(&status());
        hub.publish_quotes(
            Market::Us,
            &[quote("AAPL", Market::Us, 1.0), quote("MSFT", Market::Us, 2.0)],
        );
        hub.publish_quotes(Market::In, &[quote("TCS", Market::In, 3.0)]);

        let mut sub = hub.subscribe();
        let messages = drain(&mut sub);

        assert_eq!(messages.len(), 4);
        assert!(matches!(*messages[0], ServerMessage::MarketStatus(_)));
        let symbols: Vec<_> = messages[1..]
            .iter()
            .filter_map(|m| m.quote().map(|q| q.symbol.clone()))
            .collect();
        assert_eq!(symbols, ["AAPL", "MSFT", "TCS"]);
        assert_eq!(symbols.iter().collect::<HashSet<_>>().len(), symbols.len());
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let hub = BroadcastHub::with_defaults();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        let delivered = hub.publish_quotes(Market::Us, &[quote("AAPL", Market::Us, 1.0)]);
        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut a).len(), 1);
        assert_eq!(drain(&mut b).len(), 1);
    }

    #[test]
    fn filters_apply_to_quotes_but_not_status() {
        let hub = BroadcastHub::with_defaults();
        let mut sub = hub.subscribe();
        assert!(hub.subscribe_topic(sub.id, Topic::parse("IN")));

        hub.publish_quotes(Market::Us, &[quote("AAPL", Market::Us, 1.0)]);
        hub.publish_quotes(Market::In, &[quote("TCS", Market::In, 1.0)]);
        hub.publish_market_status(&status());

        let messages = drain(&mut sub);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].quote().unwrap().symbol, "TCS");
        assert!(matches!(*messages[1], ServerMessage::MarketStatus(_)));
    }

    #[test]
    fn single_quote_publish_updates_replay_in_place() {
        let hub = BroadcastHub::with_defaults();
        hub.publish_quotes(
            Market::Us,
            &[quote("AAPL", Market::Us, 1.0), quote("MSFT", Market::Us, 2.0)],
        );
        hub.publish(quote("AAPL", Market::Us, 5.0));
        assert_eq!(hub.stats().cached_quotes, 2);

        let mut sub = hub.subscribe();
        let prices: Vec<f64> = drain(&mut sub)
            .iter()
            .filter_map(|m| m.quote().map(|q| q.price))
            .collect();
        assert_eq!(prices, [5.0, 2.0]);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let hub = BroadcastHub::new(HubConfig { queue_capacity: 2 });
        let mut sub = hub.subscribe();

        let quotes: Vec<_> = (0..5).map(|i| quote(&format!("S{i}"), Market::Us, 1.0)).collect();
        let delivered = hub.publish_quotes(Market::Us, &quotes);

        assert_eq!(delivered, 2);
        assert_eq!(hub.stats().messages_dropped, 3);
        assert_eq!(drain(&mut sub).len(), 2);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn closed_receivers_are_removed_on_publish() {
        let hub = BroadcastHub::with_defaults();
        let sub = hub.subscribe();
        drop(sub.receiver);

        hub.publish_market_status(&status());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn replay_on_demand() {
        let hub = BroadcastHub::with_defaults();
        let mut sub = hub.subscribe();
        hub.publish_market_status(&status());
        hub.publish_quotes(Market::In, &[quote("TCS", Market::In, 1.0)]);
        drain(&mut sub);

        assert_eq!(hub.replay(sub.id), 2);
        assert_eq!(drain(&mut sub).len(), 2);
        assert_eq!(hub.replay(Uuid::new_v4()), 0);
    }

    #[test]
    fn concurrent_subscribe_never_sees_a_publication_twice() {
        let hub = BroadcastHub::with_defaults();
        let done = std::sync::atomic::AtomicBool::new(false);
        let mut duplicates = Vec::new();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut version = 0_u32;
                while !done.load(Ordering::Relaxed) {
                    version += 1;
                    let price = f64::from(version);
                    hub.publish_quotes(
                        Market::Us,
                        &[quote("AAPL", Market::Us, price), quote("MSFT", Market::Us, price)],
                    );
                }
            });

            for _ in 0..500 {
                let mut sub = hub.subscribe();
                std::thread::yield_now();
                let mut seen = HashSet::new();
                for message in drain(&mut sub) {
                    let quote = message.quote().unwrap();
                    if !seen.insert((quote.symbol.clone(), quote.price.to_bits())) {
                        duplicates.push(format!("{} at {}", quote.symbol, quote.price));
                    }
                }
                hub.unsubscribe(sub.id);
            }
            done.store(true, Ordering::Relaxed);
        });

        assert!(duplicates.is_empty(), "delivered twice: {duplicates:?}");
    }

    #[test]
    fn publisher_port_routes_to_hub() {
        let hub = BroadcastHub::with_defaults();
        let mut sub = hub.subscribe();
        let publisher: &dyn UpdatePublisher = &hub;

        publisher.publish_status(&status());
        publisher.publish_market(Market::Us, &[quote("AAPL", Market::Us, 1.0)]);

        assert_eq!(drain(&mut sub).len(), 2);
        assert_eq!(hub.latest_status(), Some(status()));
    }
}
