//! Wire event contract (§6 "Event fan-out contract"). The core publishes
//! these nine kinds to any wire collaborator; each carries a monotonically
//! increasing per-process sequence number.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::background::tunnel_monitor::IncidentSeverity;
use crate::models::{Evaluation, Execution, Order, OrderStatus};

/// `AtomicU64`-backed monotonic counter shared by every publisher (§9
/// "Event sequence counter").
#[derive(Default)]
pub struct SequenceAllocator {
    next: AtomicU64,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    OrderStatus {
        seq: u64,
        order_id: i64,
        status: OrderStatus,
        at: DateTime<Utc>,
    },
    Execution {
        seq: u64,
        execution: Box<Execution>,
    },
    Commission {
        seq: u64,
        exec_id: String,
        commission: f64,
    },
    Alert {
        seq: u64,
        symbol: String,
        at: DateTime<Utc>,
    },
    Evaluation {
        seq: u64,
        evaluation: Box<Evaluation>,
    },
    Signal {
        seq: u64,
        symbol: String,
        message: String,
    },
    SessionState {
        seq: u64,
        locked: bool,
        lock_reason: Option<String>,
        realized_pnl: f64,
        trade_count: u32,
    },
    TunnelStatus {
        seq: u64,
        connected: bool,
        consecutive_failures: u32,
        uptime_pct: f64,
        severity: Option<String>,
    },
    TrailingStopModified {
        seq: u64,
        symbol: String,
        order_id: i64,
        new_stop_price: f64,
    },
}

impl WireEvent {
    pub fn order_status(seq: &SequenceAllocator, order: &Order) -> Self {
        WireEvent::OrderStatus {
            seq: seq.next(),
            order_id: order.order_id,
            status: order.status,
            at: Utc::now(),
        }
    }

    pub fn execution(seq: &SequenceAllocator, execution: Execution) -> Self {
        WireEvent::Execution {
            seq: seq.next(),
            execution: Box::new(execution),
        }
    }

    pub fn evaluation(seq: &SequenceAllocator, evaluation: Evaluation) -> Self {
        WireEvent::Evaluation {
            seq: seq.next(),
            evaluation: Box::new(evaluation),
        }
    }

    pub fn signal(seq: &SequenceAllocator, symbol: impl Into<String>, message: impl Into<String>) -> Self {
        WireEvent::Signal {
            seq: seq.next(),
            symbol: symbol.into(),
            message: message.into(),
        }
    }

    pub fn tunnel_status(
        seq: &SequenceAllocator,
        connected: bool,
        consecutive_failures: u32,
        uptime_pct: f64,
        severity: Option<IncidentSeverity>,
    ) -> Self {
        WireEvent::TunnelStatus {
            seq: seq.next(),
            connected,
            consecutive_failures,
            uptime_pct,
            severity: severity.map(|s| match s {
                IncidentSeverity::Warning => "warning".to_string(),
                IncidentSeverity::Critical => "critical".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonically_increasing() {
        let seq = SequenceAllocator::new();
        let a = seq.next();
        let b = seq.next();
        let c = seq.next();
        assert!(b > a);
        assert!(c > b);
    }

    #[test]
    fn event_serializes_with_tagged_type_field() {
        let seq = SequenceAllocator::new();
        let event = WireEvent::tunnel_status(&seq, true, 0, 100.0, None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tunnel_status");
    }
}
