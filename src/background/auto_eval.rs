//! Auto-eval loop (§4.E): on new alert ingestion, enqueue ensemble scoring
//! subject to a concurrency cap and a per-(symbol, strategy) deduplication
//! window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::debug;

/// Tracks the last-enqueued instant per (symbol, strategy) key so repeat
/// alerts within `window` are skipped rather than re-scored.
pub struct DedupWindow {
    window: chrono::Duration,
    last_seen: Mutex<HashMap<(String, String), chrono::DateTime<chrono::Utc>>>,
}

impl DedupWindow {
    pub fn new(window: chrono::Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true and records `now` if this key is outside the window (or
    /// unseen); returns false without mutating state if it is a duplicate.
    pub fn admit(&self, symbol: &str, strategy: &str, now: chrono::DateTime<chrono::Utc>) -> bool {
        let key = (symbol.to_string(), strategy.to_string());
        let mut last_seen = self.last_seen.lock();
        match last_seen.get(&key) {
            Some(prev) if now - *prev < self.window => false,
            _ => {
                last_seen.insert(key, now);
                true
            }
        }
    }
}

/// Bounds the number of in-flight scoring evaluations so a burst of alerts
/// cannot unbounded-fan-out provider calls.
pub struct AutoEvalScheduler {
    semaphore: Arc<Semaphore>,
    dedup: DedupWindow,
}

impl AutoEvalScheduler {
    pub fn new(concurrency_cap: usize, dedup_window: chrono::Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_cap)),
            dedup: DedupWindow::new(dedup_window),
        }
    }

    /// Runs `evaluate` for this alert if it passes the dedup check and a
    /// concurrency slot is available, awaiting the slot if not. Returns
    /// `None` if the alert was deduplicated.
    pub async fn maybe_evaluate<F, Fut, T>(
        &self,
        symbol: &str,
        strategy: &str,
        now: chrono::DateTime<chrono::Utc>,
        evaluate: F,
    ) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        if !self.dedup.admit(symbol, strategy, now) {
            debug!(symbol, strategy, "alert deduplicated, skipping auto-eval");
            return None;
        }
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed");
        let result = evaluate().await;
        drop(permit);
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_window_rejects_repeat_within_window() {
        let dedup = DedupWindow::new(chrono::Duration::minutes(5));
        let t0 = chrono::Utc::now();
        assert!(dedup.admit("AAPL", "momentum", t0));
        assert!(!dedup.admit("AAPL", "momentum", t0 + chrono::Duration::minutes(2)));
        assert!(dedup.admit("AAPL", "momentum", t0 + chrono::Duration::minutes(6)));
    }

    #[test]
    fn dedup_window_is_keyed_by_symbol_and_strategy() {
        let dedup = DedupWindow::new(chrono::Duration::minutes(5));
        let t0 = chrono::Utc::now();
        assert!(dedup.admit("AAPL", "momentum", t0));
        assert!(dedup.admit("AAPL", "mean_reversion", t0));
        assert!(dedup.admit("MSFT", "momentum", t0));
    }

    #[tokio::test]
    async fn deduplicated_alert_never_invokes_the_evaluator() {
        let scheduler = AutoEvalScheduler::new(4, chrono::Duration::minutes(5));
        let t0 = chrono::Utc::now();
        let first = scheduler.maybe_evaluate("AAPL", "momentum", t0, || async { 1 }).await;
        assert_eq!(first, Some(1));

        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_clone = called.clone();
        let second = scheduler
            .maybe_evaluate("AAPL", "momentum", t0, move || async move {
                called_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                2
            })
            .await;
        assert_eq!(second, None);
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn concurrency_cap_limits_simultaneous_evaluations() {
        let scheduler = Arc::new(AutoEvalScheduler::new(1, chrono::Duration::seconds(0)));
        let in_flight = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_observed = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let scheduler = scheduler.clone();
            let in_flight = in_flight.clone();
            let max_observed = max_observed.clone();
            handles.push(tokio::spawn(async move {
                scheduler
                    .maybe_evaluate(&format!("SYM{i}"), "s", chrono::Utc::now(), || async move {
                        let now = in_flight.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                        max_observed.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_observed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
