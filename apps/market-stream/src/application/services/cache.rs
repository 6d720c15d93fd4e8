//! Quote Caches
//!
//! - [`QuoteCache`]: the per-market list (fresh for a TTL, then stale but
//!   still served as fallback) and the per-symbol last-known-good quotes,
//!   which never expire.
//! - [`TtlCache`]: a small keyed map whose entries are only returned while
//!   fresh, used for news and generated text.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::domain::quote::{Market, Quote};

// =============================================================================
// Timed Entry
// =============================================================================

/// A value with its capture time and declared lifetime.
#[derive(Debug, Clone)]
pub struct TimedEntry<T> {
    value: T,
    captured_at: Instant,
    ttl: Duration,
}

impl<T> TimedEntry<T> {
    /// Capture `value` now.
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            captured_at: Instant::now(),
            ttl,
        }
    }

    /// Whether `now - captured_at < ttl`.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.captured_at.elapsed() < self.ttl
    }

    /// Time since capture.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Cached value, fresh or not.
    pub const fn value(&self) -> &T {
        &self.value
    }
}

// =============================================================================
// Quote Cache
// =============================================================================

/// Snapshot of a per-market cached list.
#[derive(Debug, Clone)]
pub struct CachedQuotes {
    /// Quotes in universe order.
    pub quotes: Vec<Quote>,
    /// Whether the list is within its TTL.
    pub is_fresh: bool,
}

/// Per-market and per-symbol quote caches.
#[derive(Debug)]
pub struct QuoteCache {
    ttl: Duration,
    markets: RwLock<HashMap<Market, TimedEntry<Vec<Quote>>>>,
    symbols: RwLock<HashMap<(Market, String), Quote>>,
}

impl QuoteCache {
    /// Create empty caches with a per-market list TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            markets: RwLock::new(HashMap::new()),
            symbols: RwLock::new(HashMap::new()),
        }
    }

    /// Cached list for `market` and whether it is fresh.
    #[must_use]
    pub fn get(&self, market: Market) -> Option<CachedQuotes> {
        self.markets.read().get(&market).map(|entry| CachedQuotes {
            quotes: entry.value().clone(),
            is_fresh: entry.is_fresh(),
        })
    }

    /// Replace the list for `market`.
    pub fn put(&self, market: Market, quotes: Vec<Quote>) {
        self.markets
            .write()
            .insert(market, TimedEntry::new(quotes, self.ttl));
    }

    /// Last-known-good quote for one symbol.
    #[must_use]
    pub fn get_symbol(&self, market: Market, symbol: &str) -> Option<Quote> {
        self.symbols
            .read()
            .get(&(market, symbol.to_string()))
            .cloned()
    }

    /// Record a live quote as last-known-good.
    pub fn put_symbol(&self, quote: Quote) {
        self.symbols
            .write()
            .insert((quote.market, quote.symbol.clone()), quote);
    }

    /// Store the result of a refresh pass.
    ///
    /// The list is written only when the pass produced at least one live
    /// quote, or when nothing was cached for the market yet. A list without
    /// live quotes is stale from the start. Returns whether the list was
    /// written.
    pub fn commit_pass(&self, market: Market, quotes: &[Quote], live: usize) -> bool {
        let mut markets = self.markets.write();
        if live == 0 && markets.contains_key(&market) {
            return false;
        }
        let ttl = if live == 0 { Duration::ZERO } else { self.ttl };
        markets.insert(market, TimedEntry::new(quotes.to_vec(), ttl));
        true
    }

    /// Number of symbols with a last-known-good quote.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbols.read().len()
    }
}

// =============================================================================
// TTL Cache
// =============================================================================

/// Keyed cache that only returns fresh entries.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, TimedEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create an empty cache.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.is_fresh())
            .map(|entry| entry.value().clone())
    }

    /// Insert or replace `key`, dropping any expired entries.
    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.is_fresh());
        entries.insert(key, TimedEntry::new(value, self.ttl));
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
