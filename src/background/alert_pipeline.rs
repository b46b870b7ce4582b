//! Alert-ingestion pipeline (§4.C/§4.E glue): the path from a newly
//! persisted alert to a published trading signal. Bridges the auto-eval
//! scheduler's dedup/concurrency policy to the ensemble engine, then
//! persists and broadcasts both the evaluation and the resulting signal.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::ensemble::EnsembleEngine;
use crate::error::{BridgeError, BridgeResult};
use crate::models::{Alert, AnalyticsJob, Evaluation, Regime, Signal};
use crate::persistence::PersistenceStore;
use crate::wire::events::{SequenceAllocator, WireEvent};

use super::auto_eval::AutoEvalScheduler;

/// No market-state detector is wired in yet (§4.C takes `Regime` as an
/// input, not something this crate derives); every alert routes to the
/// `Chop` weight slot until one is.
fn classify_regime(_alert: &Alert) -> Regime {
    Regime::Chop
}

fn feature_vector(alert: &Alert) -> Vec<f64> {
    vec![
        alert.entry_price.unwrap_or(0.0),
        alert.stop_price.unwrap_or(0.0),
        alert.shares.unwrap_or(0.0),
        alert.last_price.unwrap_or(0.0),
    ]
}

fn build_prompt(alert: &Alert) -> String {
    format!(
        "symbol={} strategy={} entry={:?} stop={:?} shares={:?} last={:?}",
        alert.symbol,
        alert.strategy.as_deref().unwrap_or("unknown"),
        alert.entry_price,
        alert.stop_price,
        alert.shares,
        alert.last_price,
    )
}

/// Wires a persisted `Alert` through the ensemble engine, subject to
/// `AutoEvalScheduler`'s dedup/concurrency policy, and publishes the
/// resulting evaluation and signal on the wire.
pub struct AlertPipeline {
    ensemble: Arc<EnsembleEngine>,
    scheduler: Arc<AutoEvalScheduler>,
    store: Arc<dyn PersistenceStore>,
    broadcast_tx: broadcast::Sender<WireEvent>,
    sequence: Arc<SequenceAllocator>,
}

impl AlertPipeline {
    pub fn new(
        ensemble: Arc<EnsembleEngine>,
        scheduler: Arc<AutoEvalScheduler>,
        store: Arc<dyn PersistenceStore>,
        broadcast_tx: broadcast::Sender<WireEvent>,
        sequence: Arc<SequenceAllocator>,
    ) -> Self {
        Self {
            ensemble,
            scheduler,
            store,
            broadcast_tx,
            sequence,
        }
    }

    /// Persists `alert`, then — unless the auto-eval scheduler's dedup
    /// window suppresses it — runs it through the ensemble and persists
    /// and publishes the resulting evaluation and signal. Returns the
    /// evaluation when one actually ran, `None` when deduplicated.
    pub async fn ingest(&self, alert: Alert) -> BridgeResult<Option<Evaluation>> {
        self.store.insert_alert(&alert).await?;

        let ensemble = self.ensemble.clone();
        let store = self.store.clone();
        let broadcast_tx = self.broadcast_tx.clone();
        let sequence = self.sequence.clone();
        let strategy = alert.strategy.clone().unwrap_or_else(|| "default".to_string());
        let regime = classify_regime(&alert);
        let features = feature_vector(&alert);
        let prompt = build_prompt(&alert);
        let symbol = alert.symbol.clone();
        let now = alert.alert_time;
        let job_id = format!("auto_eval-{symbol}-{}", Uuid::new_v4());

        let outcome = self
            .scheduler
            .maybe_evaluate(&symbol, &strategy, now, move || async move {
                store
                    .upsert_analytics_job(&AnalyticsJob {
                        job_id: job_id.clone(),
                        kind: "auto_eval".to_string(),
                        status: "running".to_string(),
                        detail: Some(format!("symbol={symbol}")),
                        updated_at: chrono::Utc::now(),
                    })
                    .await?;

                let evaluation = ensemble.evaluate(&symbol, features, &prompt, regime).await;
                store.insert_evaluation(&evaluation).await?;
                if broadcast_tx
                    .send(WireEvent::evaluation(&sequence, evaluation.clone()))
                    .is_err()
                {
                    warn!(symbol = %symbol, "no wire subscribers for evaluation broadcast");
                }

                let signal = Signal {
                    alert_symbol: evaluation.alert_symbol.clone(),
                    trade_score: evaluation.trade_score,
                    should_trade: evaluation.should_trade,
                    order_id: None,
                    created_at: chrono::Utc::now(),
                };
                store.insert_signal(&signal).await?;
                let _ = broadcast_tx.send(WireEvent::signal(
                    &sequence,
                    signal.alert_symbol.clone(),
                    format!(
                        "trade_score={:.2} should_trade={}",
                        signal.trade_score, signal.should_trade
                    ),
                ));

                store
                    .upsert_analytics_job(&AnalyticsJob {
                        job_id: job_id.clone(),
                        kind: "auto_eval".to_string(),
                        status: "completed".to_string(),
                        detail: Some(format!("trade_score={:.2}", evaluation.trade_score)),
                        updated_at: chrono::Utc::now(),
                    })
                    .await?;

                Ok::<Evaluation, BridgeError>(evaluation)
            })
            .await;

        match outcome {
            Some(Ok(evaluation)) => Ok(Some(evaluation)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::FixedScoringProvider;
    use crate::models::ProviderOutput;
    use crate::persistence::memory_store::MemoryPersistenceStore;
    use std::time::Duration;

    fn pipeline() -> (AlertPipeline, broadcast::Receiver<WireEvent>) {
        let provider = Arc::new(FixedScoringProvider::new(
            "fixed",
            ProviderOutput {
                provider_id: "fixed".to_string(),
                score: 80.0,
                expected_rr: 2.0,
                confidence: 0.9,
                should_trade: true,
                raw_text: String::new(),
                compliant: true,
            },
        ));
        let ensemble = Arc::new(EnsembleEngine::new(
            vec![provider],
            Duration::from_secs(1),
            crate::ensemble::DEFAULT_DISAGREEMENT_COEFFICIENT,
        ));
        let scheduler = Arc::new(AutoEvalScheduler::new(4, chrono::Duration::minutes(5)));
        let store: Arc<dyn PersistenceStore> = Arc::new(MemoryPersistenceStore::new());
        let (broadcast_tx, broadcast_rx) = broadcast::channel(16);
        let sequence = Arc::new(SequenceAllocator::new());
        (
            AlertPipeline::new(ensemble, scheduler, store, broadcast_tx, sequence),
            broadcast_rx,
        )
    }

    #[tokio::test]
    async fn ingest_persists_alert_evaluation_and_signal_and_publishes_both() {
        let (pipeline, mut rx) = pipeline();
        let alert = Alert::new("AAPL", chrono::Utc::now());

        let evaluation = pipeline.ingest(alert).await.unwrap().expect("not deduplicated");
        assert_eq!(evaluation.alert_symbol, "AAPL");
        assert!(evaluation.should_trade);

        let first = rx.try_recv().unwrap();
        assert!(matches!(first, WireEvent::Evaluation { .. }));
        let second = rx.try_recv().unwrap();
        assert!(matches!(second, WireEvent::Signal { .. }));
    }

    #[tokio::test]
    async fn deduplicated_alert_returns_none_and_publishes_nothing() {
        let (pipeline, mut rx) = pipeline();
        let now = chrono::Utc::now();
        let first = Alert::new("MSFT", now);
        let second = Alert::new("MSFT", now + chrono::Duration::seconds(1));

        assert!(pipeline.ingest(first).await.unwrap().is_some());
        let _ = rx.try_recv();
        let _ = rx.try_recv();

        assert!(pipeline.ingest(second).await.unwrap().is_none());
        assert!(rx.try_recv().is_err());
    }
}
