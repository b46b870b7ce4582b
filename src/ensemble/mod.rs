//! Ensemble scoring core (Component C, §4.C).

pub mod aggregate;
pub mod provider;
pub mod weights;

pub use aggregate::{aggregate, sentinel_no_trade, DEFAULT_DISAGREEMENT_COEFFICIENT, MIN_SCORE_THRESHOLD};
pub use provider::{fan_out, FixedScoringProvider, HttpScoringProvider, ScoringProvider};
pub use weights::WeightTable;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::models::{Evaluation, Regime};

/// Bundles provider fan-out, aggregation, and the weight table behind one
/// `evaluate` entry point — the shape `src/background/auto_eval.rs` drives.
pub struct EnsembleEngine {
    providers: Vec<Arc<dyn ScoringProvider>>,
    per_provider_timeout: Duration,
    disagreement_coefficient: f64,
    weights: Mutex<WeightTable>,
}

impl EnsembleEngine {
    pub fn new(
        providers: Vec<Arc<dyn ScoringProvider>>,
        per_provider_timeout: Duration,
        disagreement_coefficient: f64,
    ) -> Self {
        let provider_ids: Vec<String> = providers.iter().map(|p| p.provider_id().to_string()).collect();
        Self {
            providers,
            per_provider_timeout,
            disagreement_coefficient,
            weights: Mutex::new(WeightTable::uniform(provider_ids)),
        }
    }

    pub async fn evaluate(
        &self,
        alert_symbol: &str,
        feature_vector: Vec<f64>,
        prompt: &str,
        regime: Regime,
    ) -> Evaluation {
        let outputs = fan_out(
            &self.providers,
            alert_symbol,
            &feature_vector,
            prompt,
            self.per_provider_timeout,
        )
        .await;

        let compliant_count = outputs.iter().filter(|o| o.compliant).count();
        if compliant_count == 0 {
            let weights_used = self.weights.lock().get(regime).clone();
            return sentinel_no_trade(alert_symbol, regime, feature_vector, weights_used, Utc::now());
        }

        let weights_snapshot = self.weights.lock().get(regime).clone();
        aggregate(
            alert_symbol,
            &outputs,
            &weights_snapshot,
            self.disagreement_coefficient,
            regime,
            feature_vector,
            Utc::now(),
        )
    }

    pub fn record_outcome(
        &self,
        regime: Regime,
        realized_rr: f64,
        per_provider_sign: &HashMap<String, i32>,
    ) {
        self.weights.lock().update(regime, realized_rr, per_provider_sign);
    }

    pub fn weights_snapshot(&self, regime: Regime) -> HashMap<String, f64> {
        self.weights.lock().get(regime).clone()
    }
}
