//! `place_order` (§4.A "Event-driven adapter pattern" applied to order
//! placement; §3 "Order" lifecycle; §8 Testable Property 1; §9 open
//! question on the best-effort timeout status).
//!
//! Placing an order is risk-gated, allocates a correlation id, and then
//! awaits the first correlated `orderStatus` event off the session layer's
//! settle channel: the broker confirms placement only implicitly (there is
//! no dedicated "place order" ack distinct from that event), so a timeout
//! here is best-effort — it resolves with a synthetic status rather than
//! failing the caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};
use crate::models::{Order, OrderStatus, PlaceOrderRequest};
use crate::persistence::PersistenceStore;
use crate::risk::{Clock, Decision, OrderContext, RiskGate};

use super::wrapper::BrokerSocket;
use super::IbkrSessionLayer;

/// Default timeout for order placement (§4.A "arm a timeout (default
/// 10s...)").
pub const PLACE_ORDER_TIMEOUT: Duration = Duration::from_secs(10);

/// The synthetic status assigned when a placement times out without an
/// explicit confirming event. Downstream consumers cannot distinguish this
/// from a true submitted order except by later correlating with an
/// `orderStatus` event.
pub const TIMEOUT_SYNTHETIC_STATUS_LABEL: &str = "Submitted (timeout waiting for confirmation)";

pub struct PlaceOrderOutcome {
    pub order: Order,
    /// True if the placement settled via the best-effort timeout path
    /// rather than an explicit broker confirmation.
    pub timed_out_best_effort: bool,
}

fn build_order(request: &PlaceOrderRequest, order_id: i64, correlation_id: String) -> Order {
    Order {
        order_id,
        symbol: request.symbol().to_string(),
        side: request.side(),
        order_type: request.order_type(),
        quantity: request.quantity(),
        limit_price: request.limit_price(),
        stop_price: request.stop_price(),
        trailing_percent: request.trailing_percent(),
        tif: request.tif(),
        parent_order_id: None,
        oca_group: None,
        correlation_id,
        status: OrderStatus::PendingSubmit,
        created_at: chrono::Utc::now(),
    }
}

impl<S: BrokerSocket + 'static> IbkrSessionLayer<S> {
    /// Places a single (non-bracket) order. Admission is checked first
    /// (§4.B); a denial never reaches the broker and never touches
    /// persistence (§7 "Admission denial").
    pub async fn place_order<C: Clock>(
        &self,
        risk_gate: &RiskGate<C>,
        store: &dyn PersistenceStore,
        request: &PlaceOrderRequest,
        reference_price: Option<f64>,
    ) -> BridgeResult<PlaceOrderOutcome> {
        match risk_gate.check(OrderContext {
            request,
            reference_price,
        }) {
            Decision::Admitted => {}
            Decision::Denied { reason } => return Err(BridgeError::AdmissionDenied { reason }),
        }

        let order_id = self.connection.get_next_req_id() as i64;
        let correlation_id = Uuid::new_v4().to_string();
        let mut order = build_order(request, order_id, correlation_id);

        store.insert_order(&order).await?;

        let settle_rx = self.await_order_status(order_id);

        self.connection.socket().place_order(
            order_id as i32,
            &order.symbol,
            order.side.as_broker_str(),
            order.quantity,
            order.order_type.as_broker_str(),
            true,
        );

        // There is no broker ack distinct from the first `orderStatus`
        // event, so a timeout here is best-effort (§4.A): the caller still
        // gets an outcome, just one that was never confirmed.
        let (status, timed_out_best_effort) =
            match tokio::time::timeout(PLACE_ORDER_TIMEOUT, settle_rx).await {
                Ok(Ok(status)) => (status, false),
                Ok(Err(_)) | Err(_) => (OrderStatus::Submitted, true),
            };
        order.status = status;

        if timed_out_best_effort {
            info!(
                order_id,
                symbol = %order.symbol,
                "place_order timed out awaiting confirmation, returning {}",
                TIMEOUT_SYNTHETIC_STATUS_LABEL
            );
        }

        store.update_order_status(order_id, order.status).await?;

        Ok(PlaceOrderOutcome {
            order,
            timed_out_best_effort,
        })
    }

    /// Places a bracket: a parent entry order plus a take-profit limit and
    /// a stop-loss stop, all sharing one correlation id and one OCA group
    /// (§3 "Bracket order", GLOSSARY). Only the last leg transmits, so the
    /// broker acts once every leg has arrived (§3 "transmit semantics").
    /// Admission is checked once, against the parent's quantity and side —
    /// the children are protective exits, not independent risk.
    pub async fn place_bracket_order<C: Clock>(
        &self,
        risk_gate: &RiskGate<C>,
        store: &dyn PersistenceStore,
        parent_request: &PlaceOrderRequest,
        take_profit_price: f64,
        stop_loss_price: f64,
        reference_price: Option<f64>,
    ) -> BridgeResult<[Order; 3]> {
        match risk_gate.check(OrderContext {
            request: parent_request,
            reference_price,
        }) {
            Decision::Admitted => {}
            Decision::Denied { reason } => return Err(BridgeError::AdmissionDenied { reason }),
        }

        let correlation_id = Uuid::new_v4().to_string();
        let oca_group = format!("oca-{correlation_id}");

        let parent_id = self.connection.get_next_req_id() as i64;
        let mut parent = build_order(parent_request, parent_id, correlation_id.clone());
        parent.oca_group = Some(oca_group.clone());

        let exit_side = parent.side.opposite();
        let quantity = parent.quantity;

        let tp_id = self.connection.get_next_req_id() as i64;
        let mut take_profit = Order {
            order_id: tp_id,
            symbol: parent.symbol.clone(),
            side: exit_side,
            order_type: crate::models::OrderType::Lmt,
            quantity,
            limit_price: Some(take_profit_price),
            stop_price: None,
            trailing_percent: None,
            tif: parent.tif,
            parent_order_id: Some(parent_id),
            oca_group: Some(oca_group.clone()),
            correlation_id: correlation_id.clone(),
            status: OrderStatus::PendingSubmit,
            created_at: chrono::Utc::now(),
        };

        let sl_id = self.connection.get_next_req_id() as i64;
        let mut stop_loss = Order {
            order_id: sl_id,
            symbol: parent.symbol.clone(),
            side: exit_side,
            order_type: crate::models::OrderType::Stp,
            quantity,
            limit_price: None,
            stop_price: Some(stop_loss_price),
            trailing_percent: None,
            tif: parent.tif,
            parent_order_id: Some(parent_id),
            oca_group: Some(oca_group),
            correlation_id,
            status: OrderStatus::PendingSubmit,
            created_at: chrono::Utc::now(),
        };

        store.insert_order(&parent).await?;
        store.insert_order(&take_profit).await?;
        store.insert_order(&stop_loss).await?;

        // Parent and take-profit legs are queued without transmitting;
        // only the stop-loss, the last leg, transmits the whole group.
        self.connection.socket().place_order(
            parent_id as i32,
            &parent.symbol,
            parent.side.as_broker_str(),
            parent.quantity,
            parent.order_type.as_broker_str(),
            false,
        );
        self.connection.socket().place_order(
            tp_id as i32,
            &take_profit.symbol,
            take_profit.side.as_broker_str(),
            take_profit.quantity,
            take_profit.order_type.as_broker_str(),
            false,
        );
        self.connection.socket().place_order(
            sl_id as i32,
            &stop_loss.symbol,
            stop_loss.side.as_broker_str(),
            stop_loss.quantity,
            stop_loss.order_type.as_broker_str(),
            true,
        );

        parent.status = OrderStatus::PreSubmitted;
        take_profit.status = OrderStatus::PreSubmitted;
        stop_loss.status = OrderStatus::PreSubmitted;

        Ok([parent, take_profit, stop_loss])
    }
}
