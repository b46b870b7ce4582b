//! IBKR session layer (Component A, §4.A). Owns the broker connection, the
//! subscription registry, the ticker cache, and the persistent event
//! writer. Everything downstream (risk gate, ensemble engine, trailing
//! executor) talks to this layer through `BrokerEvent`s delivered over the
//! broker-event-loop task (§5) — never directly to a broker socket.

pub mod adapters;
pub mod connection;
pub mod event_writer;
pub mod place_order;
pub mod subscriptions;
pub mod ticker_cache;
pub mod wrapper;

pub use adapters::{AdapterGuard, TimeoutPolicy};
pub use connection::{IbkrConnection, ReqIdAllocator};
pub use place_order::{PlaceOrderOutcome, TIMEOUT_SYNTHETIC_STATUS_LABEL};
pub use subscriptions::{SubscribeError, SubscriptionId, SubscriptionRegistry};
pub use ticker_cache::{Tick, TickerCache};
pub use wrapper::{BrokerEvent, BrokerSocket, SimulatedBrokerSocket, TickType};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use crate::error::BridgeResult;
use crate::models::OrderStatus;
use crate::persistence::PersistenceStore;
use crate::wire::events::{SequenceAllocator, WireEvent};

/// `req_open_orders`'s snapshot is best-effort: if the broker never sends
/// an `OpenOrderEnd` (silence), the caller proceeds anyway rather than
/// blocking the general task pool indefinitely.
const OPEN_ORDERS_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Bundles the connection, registry, and cache, and drives the single
/// broker-event-loop task that serializes all inbound broker events
/// (§5 "Two concurrency tiers"). Constructed once per process.
pub struct IbkrSessionLayer<S: BrokerSocket> {
    pub connection: Arc<IbkrConnection<S>>,
    pub registry: Arc<SubscriptionRegistry<S>>,
    pub ticker_cache: Arc<TickerCache>,
    /// Order ids awaiting their first confirming `orderStatus` event, used
    /// by `place_order` to settle its `AdapterGuard` (§4.A "event-driven
    /// adapter pattern"). Keyed separately from the persistent writer,
    /// which always applies regardless of whether anyone is waiting.
    pending_order_settles: Mutex<HashMap<i64, oneshot::Sender<OrderStatus>>>,
    /// Single in-flight `req_open_orders` snapshot, settled by the next
    /// `OpenOrderEnd` callback (§9 "Event-listener lifecycle" via
    /// `AdapterGuard`). Only one sync may be outstanding at a time.
    open_orders_settle: Mutex<Option<oneshot::Sender<()>>>,
}

impl<S: BrokerSocket + 'static> IbkrSessionLayer<S> {
    pub fn new(connection: Arc<IbkrConnection<S>>) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(connection.socket().clone()));
        let conn_for_resub = connection.clone();
        let registry_for_resub = registry.clone();
        connection.on_reconnect(move || {
            registry_for_resub.resubscribe_all(|| conn_for_resub.get_next_req_id());
        });

        Self {
            connection,
            registry,
            ticker_cache: Arc::new(TickerCache::new()),
            pending_order_settles: Mutex::new(HashMap::new()),
            open_orders_settle: Mutex::new(None),
        }
    }

    /// Requests the broker's open-order snapshot and awaits its
    /// `OpenOrderEnd` terminator via an `AdapterGuard` in `BestEffort`
    /// mode — broker silence resolves the wait rather than hanging it.
    pub async fn sync_open_orders(&self) -> BridgeResult<()> {
        let (guard, tx) = AdapterGuard::register_with_default(OPEN_ORDERS_SYNC_TIMEOUT, ());
        *self.open_orders_settle.lock() = Some(tx);
        let req_id = self.connection.get_next_req_id();
        self.connection.socket().req_open_orders(req_id);
        guard.wait().await
    }

    /// Registers interest in the next `orderStatus` event for `order_id`.
    /// The returned receiver fires exactly once; if no event ever arrives
    /// (broker silence) the caller's `AdapterGuard` times out independently
    /// — this registry entry is removed either way.
    pub(crate) fn await_order_status(&self, order_id: i64) -> oneshot::Receiver<OrderStatus> {
        let (tx, rx) = oneshot::channel();
        self.pending_order_settles.lock().insert(order_id, tx);
        rx
    }

    fn settle_pending_order(&self, order_id: i64, status: OrderStatus) {
        if let Some(tx) = self.pending_order_settles.lock().remove(&order_id) {
            let _ = tx.send(status);
        }
    }

    /// Drains the broker's normalized event stream into the ticker cache,
    /// the subscription ring buffers, and the persistence layer, forever —
    /// this is the one task in the process allowed to touch the broker
    /// socket's callback surface (§5).
    pub async fn run_event_loop(
        &self,
        mut events: mpsc::Receiver<BrokerEvent>,
        store: Arc<dyn PersistenceStore>,
        broadcast_tx: broadcast::Sender<WireEvent>,
        sequence: Arc<SequenceAllocator>,
    ) {
        while let Some(event) = events.recv().await {
            match &event {
                BrokerEvent::ConnectionClosed => {
                    self.connection.mark_disconnected();
                }
                BrokerEvent::Error {
                    req_id,
                    error_code,
                    error_string,
                } => {
                    if wrapper::is_informational_code(*error_code) {
                        tracing::info!(req_id, error_code, error_string, "broker notice");
                    } else {
                        warn!(req_id, error_code, error_string, "broker error");
                    }
                }
                BrokerEvent::TickPrice { req_id, tick_type, price } => {
                    if let Some(symbol) = self.ticker_cache.symbol_for_ticker_id(*req_id) {
                        let now = chrono::Utc::now();
                        match tick_type {
                            TickType::Bid => self.ticker_cache.update_bid(&symbol, *price, now),
                            TickType::Ask => self.ticker_cache.update_ask(&symbol, *price, now),
                            TickType::Last => self.ticker_cache.update_last(&symbol, *price, now),
                            _ => {}
                        }
                    }
                    self.registry.record_event(*req_id, event.clone());
                }
                BrokerEvent::TickSize { req_id, tick_type, size } => {
                    if let Some(symbol) = self.ticker_cache.symbol_for_ticker_id(*req_id) {
                        let now = chrono::Utc::now();
                        match tick_type {
                            TickType::BidSize => self.ticker_cache.update_bid_size(&symbol, *size, now),
                            TickType::AskSize => self.ticker_cache.update_ask_size(&symbol, *size, now),
                            TickType::Volume => self.ticker_cache.update_volume(&symbol, *size, now),
                            _ => {}
                        }
                    }
                    self.registry.record_event(*req_id, event.clone());
                }
                BrokerEvent::OrderStatus { order_id, status, .. } => {
                    if let Some(parsed) = event_writer::parse_order_status_public(status) {
                        self.settle_pending_order(*order_id as i64, parsed);
                    }
                    event_writer::apply_event(store.as_ref(), &event, &broadcast_tx, &sequence).await;
                }
                BrokerEvent::ExecDetails { .. } | BrokerEvent::CommissionReport { .. } => {
                    event_writer::apply_event(store.as_ref(), &event, &broadcast_tx, &sequence).await;
                }
                BrokerEvent::OpenOrderEnd => {
                    if let Some(tx) = self.open_orders_settle.lock().take() {
                        let _ = tx.send(());
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientMode;
    use crate::persistence::memory_store::MemoryPersistenceStore;

    fn layer() -> (Arc<IbkrSessionLayer<SimulatedBrokerSocket>>, mpsc::Receiver<BrokerEvent>) {
        let socket = Arc::new(SimulatedBrokerSocket::new());
        let events = socket.subscribe_events();
        let connection = Arc::new(IbkrConnection::new(socket, "127.0.0.1", 7497, 1, ClientMode::Rest));
        (Arc::new(IbkrSessionLayer::new(connection)), events)
    }

    #[tokio::test]
    async fn sync_open_orders_resolves_on_open_order_end() {
        let (session, events) = layer();
        let store: Arc<dyn PersistenceStore> = Arc::new(MemoryPersistenceStore::new());
        let (broadcast_tx, _rx) = broadcast::channel(16);
        let sequence = Arc::new(SequenceAllocator::new());
        let session_for_loop = session.clone();
        tokio::spawn(async move {
            session_for_loop.run_event_loop(events, store, broadcast_tx, sequence).await;
        });

        session.sync_open_orders().await.unwrap();
    }
}
