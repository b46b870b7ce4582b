//! `BrokerWrapper`: the callback surface a real broker socket binding
//! drives, mirroring the TWS API `EWrapper` contract (grounded in the
//! reference IBKR client's `Wrapper` trait). This crate never implements
//! the wire protocol itself (§6) — only this trait and a deterministic test
//! double, `SimulatedBrokerSocket`, that drives it.

use tokio::sync::mpsc;

/// One broker callback, normalized into an owned event so it can cross a
/// channel into the single broker-event-loop task (§5).
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Error {
        req_id: i32,
        error_code: i32,
        error_string: String,
    },
    ConnectAck,
    ConnectionClosed,
    NextValidId {
        order_id: i32,
    },
    TickPrice {
        req_id: i32,
        tick_type: TickType,
        price: f64,
    },
    TickSize {
        req_id: i32,
        tick_type: TickType,
        size: f64,
    },
    OrderStatus {
        order_id: i32,
        status: String,
        filled: f64,
        remaining: f64,
        avg_fill_price: f64,
        parent_id: i32,
    },
    OpenOrderEnd,
    ExecDetails {
        req_id: i32,
        order_id: i32,
        exec_id: String,
        side: String,
        shares: f64,
        price: f64,
        cum_qty: f64,
        avg_price: f64,
    },
    ExecDetailsEnd {
        req_id: i32,
    },
    CommissionReport {
        exec_id: String,
        commission: f64,
        realized_pnl: f64,
    },
    UpdatePortfolio {
        symbol: String,
        position: f64,
        market_price: f64,
        average_cost: f64,
        unrealized_pnl: f64,
        account_name: String,
    },
    AccountDownloadEnd {
        account_name: String,
    },
    RealtimeBar {
        req_id: i32,
        time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickType {
    Bid,
    Ask,
    Last,
    BidSize,
    AskSize,
    Volume,
}

/// Known-informational broker diagnostic codes, swallowed per §4.A/§6
/// "relevant broker error semantics": everything else is fatal for the
/// owning request.
pub fn is_informational_code(code: i32) -> bool {
    matches!(code, 2104 | 2106 | 2108 | 2158 | 1100 | 1101 | 1102)
}

/// The operations an `ibkr` session layer issues against a live broker
/// connection. A real binding implements this against the TWS socket
/// protocol; `SimulatedBrokerSocket` implements it in-process for tests.
#[async_trait::async_trait]
pub trait BrokerSocket: Send + Sync {
    async fn connect(&self, host: &str, port: u16, client_id: i32) -> anyhow::Result<()>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;

    fn req_real_time_bars(&self, req_id: i32, symbol: &str, exchange: &str);
    fn cancel_real_time_bars(&self, req_id: i32);
    fn req_account_updates(&self, req_id: i32, account: &str);
    fn cancel_account_updates(&self, account: &str);
    fn req_mkt_data(&self, req_id: i32, symbol: &str);
    fn cancel_mkt_data(&self, req_id: i32);

    /// `transmit` mirrors the TWS API's bracket semantics: only the last
    /// leg of a bracket transmits, so the broker acts once all legs have
    /// arrived (§3 "transmit semantics").
    fn place_order(
        &self,
        order_id: i32,
        symbol: &str,
        side: &str,
        quantity: f64,
        order_type: &str,
        transmit: bool,
    );
    fn cancel_order(&self, order_id: i32);
    fn req_open_orders(&self, req_id: i32);

    /// Re-places an order at `order_id` with a new stop price — IBKR's
    /// modify semantics are "placeOrder again with the same id" rather than
    /// a distinct wire message (§4.D modification dispatch).
    fn modify_stop_price(&self, order_id: i32, new_stop_price: f64);

    /// Subscribes the caller to the normalized event stream.
    fn subscribe_events(&self) -> mpsc::Receiver<BrokerEvent>;
}

/// A deterministic in-process double driving `BrokerSocket`/`BrokerEvent`
/// without a real TWS connection, so adapter and subscription-registry
/// logic can be exercised in tests.
pub struct SimulatedBrokerSocket {
    connected: std::sync::atomic::AtomicBool,
    event_tx: mpsc::Sender<BrokerEvent>,
    event_rx: parking_lot::Mutex<Option<mpsc::Receiver<BrokerEvent>>>,
}

impl SimulatedBrokerSocket {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1024);
        Self {
            connected: std::sync::atomic::AtomicBool::new(false),
            event_tx: tx,
            event_rx: parking_lot::Mutex::new(Some(rx)),
        }
    }

    /// Test hook: push an event as if it arrived from the broker.
    pub fn inject(&self, event: BrokerEvent) {
        let _ = self.event_tx.try_send(event);
    }
}

impl Default for SimulatedBrokerSocket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BrokerSocket for SimulatedBrokerSocket {
    async fn connect(&self, _host: &str, _port: u16, _client_id: i32) -> anyhow::Result<()> {
        self.connected.store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = self.event_tx.try_send(BrokerEvent::ConnectAck);
        let _ = self.event_tx.try_send(BrokerEvent::NextValidId { order_id: 1 });
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, std::sync::atomic::Ordering::SeqCst);
        let _ = self.event_tx.try_send(BrokerEvent::ConnectionClosed);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn req_real_time_bars(&self, _req_id: i32, _symbol: &str, _exchange: &str) {}
    fn cancel_real_time_bars(&self, _req_id: i32) {}
    fn req_account_updates(&self, _req_id: i32, _account: &str) {}
    fn cancel_account_updates(&self, _account: &str) {}
    fn req_mkt_data(&self, _req_id: i32, _symbol: &str) {}
    fn cancel_mkt_data(&self, _req_id: i32) {}

    fn place_order(
        &self,
        order_id: i32,
        _symbol: &str,
        _side: &str,
        _quantity: f64,
        _order_type: &str,
        transmit: bool,
    ) {
        if !transmit {
            // Non-transmitting legs sit at the broker without an ack until
            // the last leg of the bracket arrives.
            return;
        }
        let _ = self.event_tx.try_send(BrokerEvent::OrderStatus {
            order_id,
            status: "PreSubmitted".to_string(),
            filled: 0.0,
            remaining: 0.0,
            avg_fill_price: 0.0,
            parent_id: 0,
        });
    }

    fn cancel_order(&self, _order_id: i32) {}
    fn req_open_orders(&self, _req_id: i32) {
        let _ = self.event_tx.try_send(BrokerEvent::OpenOrderEnd);
    }

    fn modify_stop_price(&self, order_id: i32, _new_stop_price: f64) {
        let _ = self.event_tx.try_send(BrokerEvent::OrderStatus {
            order_id,
            status: "Submitted".to_string(),
            filled: 0.0,
            remaining: 0.0,
            avg_fill_price: 0.0,
            parent_id: 0,
        });
    }

    fn subscribe_events(&self) -> mpsc::Receiver<BrokerEvent> {
        self.event_rx
            .lock()
            .take()
            .expect("subscribe_events called more than once")
    }
}
