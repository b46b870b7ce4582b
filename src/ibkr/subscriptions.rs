//! Subscription registry (§4.A "Subscriptions"): opaque-id indirection over
//! broker req ids, so callers never hold a req id across a reconnect. Caps
//! concurrent market-data subscriptions, enforces the single
//! account-updates subscription, and replays active subscriptions on
//! reconnect while preserving the caller's opaque ids.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::wrapper::BrokerSocket;

pub const MAX_MARKET_DATA_SUBSCRIPTIONS: usize = 50;
pub const RING_BUFFER_CAPACITY: usize = 300;

/// Opaque handle returned to callers. Stable across reconnects; never
/// reused for a different subscription within the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone)]
struct MarketDataSub {
    symbol: String,
    exchange: String,
    req_id: i32,
}

/// Bounded history of recent ticks/bars for a subscription, dropping the
/// oldest entry once `RING_BUFFER_CAPACITY` is reached.
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

struct Inner {
    next_id: AtomicU64,
    market_data: Mutex<HashMap<SubscriptionId, MarketDataSub>>,
    by_symbol_exchange: Mutex<HashMap<(String, String), SubscriptionId>>,
    req_id_to_sub: Mutex<HashMap<i32, SubscriptionId>>,
    account_updates: Mutex<Option<(SubscriptionId, String)>>,
    buffers: Mutex<HashMap<SubscriptionId, RingBuffer<super::wrapper::BrokerEvent>>>,
}

/// Registry of live market-data and account-updates subscriptions, keyed
/// by an opaque id that survives broker reconnects. Register the registry's
/// `resubscribe_all` as an `IbkrConnection::on_reconnect` callback to get
/// automatic resubscribe (§4.A, Testable Property 10).
pub struct SubscriptionRegistry<S: BrokerSocket> {
    socket: std::sync::Arc<S>,
    inner: Inner,
}

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("market data subscription cap ({max}) reached")]
    CapReached { max: usize },
    #[error("an account-updates subscription is already active")]
    AccountUpdatesAlreadyActive,
}

impl<S: BrokerSocket> SubscriptionRegistry<S> {
    pub fn new(socket: std::sync::Arc<S>) -> Self {
        Self {
            socket,
            inner: Inner {
                next_id: AtomicU64::new(1),
                market_data: Mutex::new(HashMap::new()),
                by_symbol_exchange: Mutex::new(HashMap::new()),
                req_id_to_sub: Mutex::new(HashMap::new()),
                account_updates: Mutex::new(None),
                buffers: Mutex::new(HashMap::new()),
            },
        }
    }

    fn alloc_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Subscribes to real-time market data for `symbol`/`exchange`, reusing
    /// an existing subscription's id if one is already active for that key.
    pub fn subscribe_market_data(
        &self,
        req_id: i32,
        symbol: &str,
        exchange: &str,
    ) -> Result<SubscriptionId, SubscribeError> {
        let key = (symbol.to_string(), exchange.to_string());
        if let Some(existing) = self.inner.by_symbol_exchange.lock().get(&key) {
            return Ok(*existing);
        }

        if self.inner.market_data.lock().len() >= MAX_MARKET_DATA_SUBSCRIPTIONS {
            return Err(SubscribeError::CapReached {
                max: MAX_MARKET_DATA_SUBSCRIPTIONS,
            });
        }

        let id = self.alloc_id();
        self.socket.req_real_time_bars(req_id, symbol, exchange);
        self.inner.market_data.lock().insert(
            id,
            MarketDataSub {
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
                req_id,
            },
        );
        self.inner.by_symbol_exchange.lock().insert(key, id);
        self.inner.req_id_to_sub.lock().insert(req_id, id);
        self.inner
            .buffers
            .lock()
            .insert(id, RingBuffer::new(RING_BUFFER_CAPACITY));
        Ok(id)
    }

    pub fn unsubscribe_market_data(&self, id: SubscriptionId) {
        if let Some(sub) = self.inner.market_data.lock().remove(&id) {
            self.socket.cancel_real_time_bars(sub.req_id);
            self.inner
                .by_symbol_exchange
                .lock()
                .remove(&(sub.symbol, sub.exchange));
            self.inner.req_id_to_sub.lock().remove(&sub.req_id);
            self.inner.buffers.lock().remove(&id);
        }
    }

    /// Only one account-updates subscription may be active process-wide
    /// (§4.A "single account-updates-subscription constraint").
    pub fn subscribe_account_updates(
        &self,
        req_id: i32,
        account: &str,
    ) -> Result<SubscriptionId, SubscribeError> {
        let mut guard = self.inner.account_updates.lock();
        if let Some((existing_id, existing_account)) = guard.as_ref() {
            if existing_account == account {
                return Ok(*existing_id);
            }
            return Err(SubscribeError::AccountUpdatesAlreadyActive);
        }
        let id = self.alloc_id();
        self.socket.req_account_updates(req_id, account);
        *guard = Some((id, account.to_string()));
        Ok(id)
    }

    pub fn unsubscribe_account_updates(&self) {
        if let Some((_, account)) = self.inner.account_updates.lock().take() {
            self.socket.cancel_account_updates(&account);
        }
    }

    pub fn record_event(&self, req_id: i32, event: super::wrapper::BrokerEvent) {
        if let Some(id) = self.inner.req_id_to_sub.lock().get(&req_id).copied() {
            if let Some(buffer) = self.inner.buffers.lock().get_mut(&id) {
                buffer.push(event);
            }
        }
    }

    pub fn buffer_len(&self, id: SubscriptionId) -> usize {
        self.inner.buffers.lock().get(&id).map(|b| b.len()).unwrap_or(0)
    }

    pub fn active_market_data_count(&self) -> usize {
        self.inner.market_data.lock().len()
    }

    /// Replays every currently-tracked market-data subscription against
    /// fresh broker req ids, without changing the opaque ids callers hold.
    /// Intended to be wired up via `IbkrConnection::on_reconnect`.
    pub fn resubscribe_all(&self, next_req_id: impl Fn() -> i32) {
        let snapshot: Vec<(SubscriptionId, MarketDataSub)> = self
            .inner
            .market_data
            .lock()
            .iter()
            .map(|(id, sub)| (*id, sub.clone()))
            .collect();

        for (id, sub) in snapshot {
            let new_req_id = next_req_id();
            self.socket.req_real_time_bars(new_req_id, &sub.symbol, &sub.exchange);

            self.inner.req_id_to_sub.lock().remove(&sub.req_id);
            self.inner.req_id_to_sub.lock().insert(new_req_id, id);
            if let Some(entry) = self.inner.market_data.lock().get_mut(&id) {
                entry.req_id = new_req_id;
            }
        }

        if let Some((_, account)) = self.inner.account_updates.lock().clone() {
            let req_id = next_req_id();
            self.socket.req_account_updates(req_id, &account);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ibkr::wrapper::SimulatedBrokerSocket;
    use std::sync::Arc;

    fn registry() -> SubscriptionRegistry<SimulatedBrokerSocket> {
        SubscriptionRegistry::new(Arc::new(SimulatedBrokerSocket::new()))
    }

    #[test]
    fn subscribing_the_same_symbol_twice_returns_the_same_id() {
        let reg = registry();
        let a = reg.subscribe_market_data(1, "AAPL", "SMART").unwrap();
        let b = reg.subscribe_market_data(2, "AAPL", "SMART").unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.active_market_data_count(), 1);
    }

    #[test]
    fn subscription_cap_is_enforced() {
        let reg = registry();
        for i in 0..MAX_MARKET_DATA_SUBSCRIPTIONS {
            reg.subscribe_market_data(i as i32, &format!("SYM{i}"), "SMART").unwrap();
        }
        let result = reg.subscribe_market_data(9999, "OVERFLOW", "SMART");
        assert!(matches!(result, Err(SubscribeError::CapReached { max }) if max == MAX_MARKET_DATA_SUBSCRIPTIONS));
    }

    #[test]
    fn second_account_updates_subscription_for_a_different_account_is_rejected() {
        let reg = registry();
        reg.subscribe_account_updates(1, "DU1234567").unwrap();
        let result = reg.subscribe_account_updates(2, "DU7654321");
        assert!(matches!(result, Err(SubscribeError::AccountUpdatesAlreadyActive)));
    }

    #[test]
    fn resubscribe_preserves_opaque_id_while_changing_req_id() {
        let reg = registry();
        let id = reg.subscribe_market_data(1, "AAPL", "SMART").unwrap();

        let mut next = 100;
        reg.resubscribe_all(|| {
            next += 1;
            next
        });

        let id_again = reg.subscribe_market_data(999, "AAPL", "SMART").unwrap();
        assert_eq!(id, id_again);
    }

    #[test]
    fn ring_buffer_drops_oldest_entry_past_capacity() {
        let mut buf = RingBuffer::new(3);
        buf.push(1);
        buf.push(2);
        buf.push(3);
        buf.push(4);
        let items: Vec<_> = buf.iter().copied().collect();
        assert_eq!(items, vec![2, 3, 4]);
    }
}
