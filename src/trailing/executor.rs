//! Trailing-stop executor (Component D, §4.D). One producer (position
//! updates from account-updates snapshots) and one consumer (the processor
//! loop), which runs single-flight per §5's shared-resource policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::BridgeResult;
use crate::models::OrderStatus;

use super::policy::StopPolicy;
use super::position::PositionState;

/// The subset of broker operations the executor needs to dispatch a stop
/// modification. Kept narrow and local to this module rather than pulling
/// in the whole `ibkr` session layer, mirroring the capability-trait
/// pattern used for scoring providers (§9 "Provider polymorphism").
#[async_trait]
pub trait StopOrderBroker: Send + Sync {
    async fn order_status(&self, order_id: i64) -> Option<OrderStatus>;
    async fn modify_stop_order(
        &self,
        order_id: i64,
        new_stop_price: f64,
        oca_group: Option<&str>,
    ) -> BridgeResult<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSummary {
    pub processed: u32,
    pub modified: u32,
    pub errors: u32,
}

pub struct TrailingExecutor<B: StopOrderBroker> {
    broker: B,
    positions: Mutex<HashMap<String, PositionState>>,
    policy: Mutex<StopPolicy>,
    running: AtomicBool,
}

impl<B: StopOrderBroker> TrailingExecutor<B> {
    pub fn new(broker: B, policy: StopPolicy) -> Self {
        Self {
            broker,
            positions: Mutex::new(HashMap::new()),
            policy: Mutex::new(policy),
            running: AtomicBool::new(true),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn set_policy(&self, policy: StopPolicy) {
        *self.policy.lock() = policy;
    }

    pub fn upsert_position(&self, position: PositionState) {
        if position.quantity == 0.0 {
            self.positions.lock().remove(&position.symbol);
        } else {
            self.positions.lock().insert(position.symbol.clone(), position);
        }
    }

    pub fn update_price(&self, symbol: &str, price: f64) {
        if let Some(position) = self.positions.lock().get_mut(symbol) {
            position.on_price_update(price);
        }
    }

    pub fn position(&self, symbol: &str) -> Option<PositionState> {
        self.positions.lock().get(symbol).cloned()
    }

    /// Read-only snapshot of every tracked position, for callers (the wire
    /// interface) that need the whole book rather than a single symbol.
    pub fn all_positions(&self) -> Vec<PositionState> {
        self.positions.lock().values().cloned().collect()
    }

    /// Returns whether `candidate` tightens the committed stop for this
    /// position's direction (§4.D "Monotonicity"): non-decreasing for long,
    /// non-increasing for short. No committed stop always tightens.
    fn tightens(position: &PositionState, candidate: f64) -> bool {
        match position.stop_price {
            None => true,
            Some(current) if position.is_short() => candidate <= current,
            Some(current) => candidate >= current,
        }
    }

    /// Evaluates every open position's policy candidate, dispatches
    /// modifications for ones that tighten, and returns processing counts.
    /// A no-op when the executor has been stopped.
    pub async fn process_trailing_stops(&self) -> ProcessSummary {
        if !self.running.load(Ordering::SeqCst) {
            return ProcessSummary::default();
        }

        let policy = *self.policy.lock();
        let candidates: Vec<(String, Option<i64>, Option<f64>)> = {
            let mut positions = self.positions.lock();
            let mut out = Vec::new();
            for (symbol, position) in positions.iter_mut() {
                let candidate = policy.candidate(position);
                out.push((symbol.clone(), position.stop_order_id, candidate));
            }
            out
        };

        let mut summary = ProcessSummary::default();

        for (symbol, stop_order_id, candidate) in candidates {
            let Some(order_id) = stop_order_id else {
                continue;
            };
            let Some(candidate_price) = candidate else {
                continue;
            };

            summary.processed += 1;

            let tightens = {
                let positions = self.positions.lock();
                let Some(position) = positions.get(&symbol) else {
                    continue;
                };
                Self::tightens(position, candidate_price)
            };

            if !tightens {
                // Programmer-error class invariant violation (§7): a
                // candidate that would loosen the stop is discarded
                // silently, never applied.
                continue;
            }

            let status = self.broker.order_status(order_id).await;
            match status {
                Some(status) if status.is_modifiable() => {}
                Some(_) => {
                    warn!(order_id, symbol = %symbol, "stop order not modifiable, skipping");
                    continue;
                }
                None => {
                    warn!(order_id, symbol = %symbol, "stop order not found at broker, skipping");
                    continue;
                }
            }

            // OCA groups live on the Order record, not position state; the
            // broker adapter resolves the group from its own order store.
            match self
                .broker
                .modify_stop_order(order_id, candidate_price, None)
                .await
            {
                Ok(()) => {
                    let mut positions = self.positions.lock();
                    if let Some(position) = positions.get_mut(&symbol) {
                        position.stop_price = Some(candidate_price);
                    }
                    summary.modified += 1;
                }
                Err(e) => {
                    error!(order_id, symbol = %symbol, error = %e, "stop modification failed, keeping prior stop");
                    summary.errors += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FakeBroker {
        status: OrderStatus,
        fail_modify: bool,
        modify_calls: AtomicU32,
    }

    #[async_trait]
    impl StopOrderBroker for FakeBroker {
        async fn order_status(&self, _order_id: i64) -> Option<OrderStatus> {
            Some(self.status)
        }

        async fn modify_stop_order(
            &self,
            _order_id: i64,
            _new_stop_price: f64,
            _oca_group: Option<&str>,
        ) -> BridgeResult<()> {
            self.modify_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_modify {
                Err(crate::error::BridgeError::Fatal {
                    code: 1,
                    message: "simulated broker rejection".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn position_with_stop(stop_price: Option<f64>) -> PositionState {
        let mut pos = PositionState::new("AAPL", 100.0, 150.0);
        pos.on_price_update(155.0);
        pos.stop_order_id = Some(1);
        pos.stop_price = stop_price;
        pos
    }

    #[tokio::test]
    async fn tightening_candidate_is_applied_and_counted() {
        let broker = FakeBroker {
            status: OrderStatus::Submitted,
            fail_modify: false,
            modify_calls: AtomicU32::new(0),
        };
        let executor = TrailingExecutor::new(broker, StopPolicy::FixedPct { pct: 2.0 });
        executor.upsert_position(position_with_stop(Some(150.0)));

        let summary = executor.process_trailing_stops().await;
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.modified, 1);
        assert_eq!(summary.errors, 0);

        let position = executor.position("AAPL").unwrap();
        assert_eq!(position.stop_price, Some(151.9));
    }

    #[tokio::test]
    async fn loosening_candidate_is_silently_discarded() {
        let broker = FakeBroker {
            status: OrderStatus::Submitted,
            fail_modify: false,
            modify_calls: AtomicU32::new(0),
        };
        let executor = TrailingExecutor::new(broker, StopPolicy::FixedPct { pct: 2.0 });
        // Committed stop already tighter than fixed_pct(2.0) would produce.
        executor.upsert_position(position_with_stop(Some(154.0)));

        let summary = executor.process_trailing_stops().await;
        assert_eq!(summary.modified, 0);
        let position = executor.position("AAPL").unwrap();
        assert_eq!(position.stop_price, Some(154.0));
    }

    #[tokio::test]
    async fn non_modifiable_order_status_is_skipped() {
        let broker = FakeBroker {
            status: OrderStatus::Filled,
            fail_modify: false,
            modify_calls: AtomicU32::new(0),
        };
        let executor = TrailingExecutor::new(broker, StopPolicy::FixedPct { pct: 2.0 });
        executor.upsert_position(position_with_stop(Some(150.0)));

        let summary = executor.process_trailing_stops().await;
        assert_eq!(summary.modified, 0);
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn broker_error_keeps_prior_stop_and_counts_error() {
        let broker = FakeBroker {
            status: OrderStatus::Submitted,
            fail_modify: true,
            modify_calls: AtomicU32::new(0),
        };
        let executor = TrailingExecutor::new(broker, StopPolicy::FixedPct { pct: 2.0 });
        executor.upsert_position(position_with_stop(Some(150.0)));

        let summary = executor.process_trailing_stops().await;
        assert_eq!(summary.errors, 1);
        let position = executor.position("AAPL").unwrap();
        assert_eq!(position.stop_price, Some(150.0));
    }

    #[tokio::test]
    async fn stopped_executor_is_a_noop() {
        let broker = FakeBroker {
            status: OrderStatus::Submitted,
            fail_modify: false,
            modify_calls: AtomicU32::new(0),
        };
        let executor = TrailingExecutor::new(broker, StopPolicy::FixedPct { pct: 2.0 });
        executor.upsert_position(position_with_stop(Some(150.0)));
        executor.stop();

        let summary = executor.process_trailing_stops().await;
        assert_eq!(summary, ProcessSummary::default());
    }
}
