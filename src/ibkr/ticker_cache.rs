//! Lock-protected tick cache (§4.A "Ticker cache"). Single-writer (the tick
//! dispatcher) + many readers, keyed by symbol.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, Default)]
pub struct Tick {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_size: Option<f64>,
    pub volume: Option<f64>,
}

struct Entry {
    tick: Tick,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct TickerCache {
    entries: RwLock<HashMap<String, Entry>>,
    /// Broker tickerId -> symbol, so the single tick dispatcher can resolve
    /// an inbound `TickPrice`/`TickSize` event by its numeric req id.
    ticker_ids: RwLock<HashMap<i32, String>>,
}

impl TickerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_ticker_id(&self, ticker_id: i32, symbol: &str) {
        self.ticker_ids.write().insert(ticker_id, symbol.to_string());
    }

    pub fn unbind_ticker_id(&self, ticker_id: i32) {
        self.ticker_ids.write().remove(&ticker_id);
    }

    pub fn symbol_for_ticker_id(&self, ticker_id: i32) -> Option<String> {
        self.ticker_ids.read().get(&ticker_id).cloned()
    }

    pub fn update_bid(&self, symbol: &str, price: f64, now: DateTime<Utc>) {
        self.mutate(symbol, now, |tick| tick.bid = Some(price));
    }

    pub fn update_ask(&self, symbol: &str, price: f64, now: DateTime<Utc>) {
        self.mutate(symbol, now, |tick| tick.ask = Some(price));
    }

    pub fn update_last(&self, symbol: &str, price: f64, now: DateTime<Utc>) {
        self.mutate(symbol, now, |tick| tick.last = Some(price));
    }

    pub fn update_bid_size(&self, symbol: &str, size: f64, now: DateTime<Utc>) {
        self.mutate(symbol, now, |tick| tick.bid_size = Some(size));
    }

    pub fn update_ask_size(&self, symbol: &str, size: f64, now: DateTime<Utc>) {
        self.mutate(symbol, now, |tick| tick.ask_size = Some(size));
    }

    pub fn update_volume(&self, symbol: &str, volume: f64, now: DateTime<Utc>) {
        self.mutate(symbol, now, |tick| tick.volume = Some(volume));
    }

    fn mutate(&self, symbol: &str, now: DateTime<Utc>, f: impl FnOnce(&mut Tick)) {
        let mut entries = self.entries.write();
        let entry = entries.entry(symbol.to_string()).or_insert_with(|| Entry {
            tick: Tick::default(),
            updated_at: now,
        });
        f(&mut entry.tick);
        entry.updated_at = now;
    }

    pub fn get(&self, symbol: &str) -> Option<Tick> {
        self.entries.read().get(symbol).map(|e| e.tick)
    }

    /// A tick is stale once its age exceeds `max_age`.
    pub fn is_stale(&self, symbol: &str, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.entries.read().get(symbol) {
            Some(entry) => now - entry.updated_at > max_age,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_accumulate_on_the_same_symbol() {
        let cache = TickerCache::new();
        let now = Utc::now();
        cache.update_bid("AAPL", 190.0, now);
        cache.update_ask("AAPL", 190.1, now);
        let tick = cache.get("AAPL").unwrap();
        assert_eq!(tick.bid, Some(190.0));
        assert_eq!(tick.ask, Some(190.1));
    }

    #[test]
    fn unknown_symbol_is_always_stale() {
        let cache = TickerCache::new();
        assert!(cache.is_stale("MSFT", chrono::Duration::seconds(5), Utc::now()));
    }

    #[test]
    fn staleness_is_a_function_of_age() {
        let cache = TickerCache::new();
        let t0 = Utc::now();
        cache.update_last("AAPL", 190.0, t0);
        let fresh = cache.is_stale("AAPL", chrono::Duration::seconds(5), t0 + chrono::Duration::seconds(1));
        let stale = cache.is_stale("AAPL", chrono::Duration::seconds(5), t0 + chrono::Duration::seconds(10));
        assert!(!fresh);
        assert!(stale);
    }

    #[test]
    fn ticker_id_binding_resolves_symbol() {
        let cache = TickerCache::new();
        cache.bind_ticker_id(42, "AAPL");
        assert_eq!(cache.symbol_for_ticker_id(42).as_deref(), Some("AAPL"));
        cache.unbind_ticker_id(42);
        assert!(cache.symbol_for_ticker_id(42).is_none());
    }
}
