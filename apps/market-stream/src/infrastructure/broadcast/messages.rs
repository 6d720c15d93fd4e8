//! Push-channel message schema and subscriber filters.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::market_clock::MarketStatusPair;
use crate::domain::quote::{Market, Quote};

/// Server to subscriber message: `{"type": …, "data": …}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// One quote.
    MarketUpdate(Quote),
    /// Status of both markets.
    MarketStatus(MarketStatusPair),
}

impl ServerMessage {
    /// Quote carried by a `marketUpdate`.
    #[must_use]
    pub const fn quote(&self) -> Option<&Quote> {
        match self {
            Self::MarketUpdate(quote) => Some(quote),
            Self::MarketStatus(_) => None,
        }
    }
}

/// Subscriber to server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Replay current state and request an immediate refresh.
    Refresh,
    /// Add a topic to the filter.
    Subscribe {
        /// `ALL`, `US`, `IN` or a symbol.
        symbol: String,
    },
    /// Remove a topic from the filter.
    Unsubscribe {
        /// `ALL`, `US`, `IN` or a symbol.
        symbol: String,
    },
}

/// What a subscriber wants to receive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every quote.
    All,
    /// Every quote of one market.
    Market(Market),
    /// One symbol, in any market.
    Symbol(String),
}

impl Topic {
    /// Parse a client-supplied topic.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("ALL") {
            return Self::All;
        }
        trimmed
            .parse::<Market>()
            .map_or_else(|_| Self::Symbol(trimmed.to_uppercase()), Self::Market)
    }

    /// Whether `quote` falls under this topic.
    #[must_use]
    pub fn matches(&self, quote: &Quote) -> bool {
        match self {
            Self::All => true,
            Self::Market(market) => quote.market == *market,
            Self::Symbol(symbol) => quote.symbol.eq_ignore_ascii_case(symbol),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("ALL"),
            Self::Market(market) => write!(f, "{market}"),
            Self::Symbol(symbol) => f.write_str(symbol),
        }
    }
}

/// Topic set of one subscriber.
///
/// Starts as `{ALL}`. The first explicit subscribe replaces the default,
/// later ones add to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    topics: HashSet<Topic>,
    explicit: bool,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self {
            topics: HashSet::from([Topic::All]),
            explicit: false,
        }
    }
}

impl SubscriptionFilter {
    /// Add `topic`.
    pub fn subscribe(&mut self, topic: Topic) {
        if !self.explicit {
            self.topics.clear();
            self.explicit = true;
        }
        self.topics.insert(topic);
    }

    /// Remove `topic`. Returns whether it was present.
    pub fn unsubscribe(&mut self, topic: &Topic) -> bool {
        self.topics.remove(topic)
    }

    /// Whether `quote` passes the filter.
    #[must_use]
    pub fn matches(&self, quote: &Quote) -> bool {
        self.topics.iter().any(|topic| topic.matches(quote))
    }

    /// Current topics.
    #[must_use]
    pub const fn topics(&self) -> &HashSet<Topic> {
        &self.topics
    }
}
