//! Persistent event writer: the long-lived listeners that turn broker
//! `orderStatus` / `execDetails` / `commissionReport` callbacks into
//! `PersistenceStore` writes (§4.A "Persistent listeners"). Attached once
//! per process; never raises errors back through the broker event loop —
//! a write failure is logged and the loop keeps running.

use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::models::{Execution, OrderSide, OrderStatus};
use crate::persistence::PersistenceStore;
use crate::wire::events::{SequenceAllocator, WireEvent};

use super::wrapper::BrokerEvent;

/// Parses the wire status string from a broker `OrderStatus` event. Unknown
/// strings fall back to `PreSubmitted` rather than panicking — a broker
/// protocol addition should degrade, not crash the event loop.
/// Public alias used by the session layer to settle a pending
/// `place_order` `AdapterGuard` off the same parsed status the persistent
/// writer applies, without exposing the whole parsing internals.
pub(crate) fn parse_order_status_public(raw: &str) -> Option<OrderStatus> {
    Some(parse_order_status(raw))
}

fn parse_order_status(raw: &str) -> OrderStatus {
    match raw {
        "PendingSubmit" => OrderStatus::PendingSubmit,
        "PreSubmitted" => OrderStatus::PreSubmitted,
        "Submitted" => OrderStatus::Submitted,
        "Cancelled" => OrderStatus::Cancelled,
        "ApiCancelled" => OrderStatus::ApiCancelled,
        "Filled" => OrderStatus::Filled,
        "Inactive" => OrderStatus::Inactive,
        other => {
            warn!(status = other, "unrecognized order status, treating as PreSubmitted");
            OrderStatus::PreSubmitted
        }
    }
}

fn parse_side(raw: &str) -> Option<OrderSide> {
    match raw.to_ascii_uppercase().as_str() {
        "BOT" | "BUY" => Some(OrderSide::Buy),
        "SLD" | "SELL" => Some(OrderSide::Sell),
        _ => None,
    }
}

/// Applies one broker event to the persistence layer, if it is a kind this
/// writer cares about, and republishes it on the wire event channel on
/// success (§6 "Event fan-out contract"). Events for orders the store has
/// never seen (placed before this process started, or already pruned) are
/// dropped rather than treated as errors.
pub async fn apply_event(
    store: &dyn PersistenceStore,
    event: &BrokerEvent,
    broadcast_tx: &broadcast::Sender<WireEvent>,
    sequence: &SequenceAllocator,
) {
    match event {
        BrokerEvent::OrderStatus { order_id, status, .. } => {
            let parsed = parse_order_status(status);
            match store.update_order_status(*order_id as i64, parsed).await {
                Ok(()) => {
                    let _ = broadcast_tx.send(WireEvent::OrderStatus {
                        seq: sequence.next(),
                        order_id: *order_id as i64,
                        status: parsed,
                        at: chrono::Utc::now(),
                    });
                }
                Err(e) => error!(order_id, error = %e, "failed to persist order status update"),
            }
        }
        BrokerEvent::ExecDetails {
            order_id,
            exec_id,
            side,
            shares,
            price,
            cum_qty,
            avg_price,
            ..
        } => {
            let Some(side) = parse_side(side) else {
                warn!(side = %side, "unrecognized execution side, dropping execution event");
                return;
            };
            let Ok(Some(_order)) = store.get_order(*order_id as i64).await else {
                warn!(order_id, "execution for unknown order, dropping");
                return;
            };
            let execution = Execution {
                exec_id: exec_id.clone(),
                order_id: *order_id as i64,
                side,
                shares: *shares,
                price: *price,
                cumulative_quantity: *cum_qty,
                average_price: *avg_price,
                timestamp: chrono::Utc::now(),
                commission: None,
                realized_pnl: None,
            };
            match store.insert_execution(&execution).await {
                Ok(_) => {
                    let _ = broadcast_tx.send(WireEvent::execution(sequence, execution));
                }
                Err(e) => error!(exec_id = %exec_id, error = %e, "failed to persist execution"),
            }
        }
        BrokerEvent::CommissionReport {
            exec_id, commission, ..
        } => {
            match store.update_execution_commission(exec_id, *commission).await {
                Ok(()) => {
                    let _ = broadcast_tx.send(WireEvent::Commission {
                        seq: sequence.next(),
                        exec_id: exec_id.clone(),
                        commission: *commission,
                    });
                }
                Err(e) => error!(exec_id = %exec_id, error = %e, "failed to persist commission report"),
            }
        }
        _ => {}
    }
}
