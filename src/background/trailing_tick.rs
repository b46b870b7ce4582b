//! Trailing tick loop (§4.E): on a configured interval, runs
//! `process_trailing_stops()` and reports a summary.

use std::time::Duration;

use tracing::info;

use crate::trailing::{ProcessSummary, StopOrderBroker, TrailingExecutor};

/// Runs `executor.process_trailing_stops()` once per tick forever. Split
/// out from `TrailingExecutor` itself so the interval and the processing
/// logic can be tested independently (§5 "general task pool").
pub async fn run_forever<B: StopOrderBroker>(
    executor: &TrailingExecutor<B>,
    tick_interval: Duration,
    mut on_summary: impl FnMut(ProcessSummary),
) {
    let mut interval = tokio::time::interval(tick_interval);
    loop {
        interval.tick().await;
        let summary = executor.process_trailing_stops().await;
        info!(
            processed = summary.processed,
            modified = summary.modified,
            errors = summary.errors,
            "trailing tick"
        );
        on_summary(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeResult;
    use crate::models::OrderStatus;
    use crate::trailing::{PositionState, StopPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NoopBroker;

    #[async_trait]
    impl StopOrderBroker for NoopBroker {
        async fn order_status(&self, _order_id: i64) -> Option<OrderStatus> {
            Some(OrderStatus::Submitted)
        }
        async fn modify_stop_order(
            &self,
            _order_id: i64,
            _new_stop_price: f64,
            _oca_group: Option<&str>,
        ) -> BridgeResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn tick_loop_invokes_callback_at_least_once() {
        let executor = TrailingExecutor::new(NoopBroker, StopPolicy::FixedPct { pct: 2.0 });
        let mut position = PositionState::new("AAPL", 100.0, 150.0);
        position.on_price_update(155.0);
        position.stop_order_id = Some(1);
        executor.upsert_position(position);

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();

        let run = run_forever(&executor, Duration::from_millis(5), move |_summary| {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
        });

        let _ = tokio::time::timeout(Duration::from_millis(30), run).await;
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }
}
