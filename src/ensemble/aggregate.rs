//! Ensemble aggregation arithmetic (§4.C). Every scalar here appears in
//! acceptance tests with specific numeric expectations — reproduce the
//! formulas exactly, including the unclamped penalized score.

use std::collections::HashMap;

use statrs::statistics::{Data, OrderStatistics};

use crate::models::{Evaluation, ProviderOutput, Regime};

/// Disagreement coefficient `k` in `penalty = k * spread^2 / 10000`.
pub const DEFAULT_DISAGREEMENT_COEFFICIENT: f64 = 1.5;

/// Minimum penalized score for `should_trade` to be eligible; boundary is
/// inclusive (§4.C, §8 boundary behaviors).
pub const MIN_SCORE_THRESHOLD: f64 = 40.0;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn median(values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Data::new(values).median()
}

/// A sentinel "no trade" ensemble with zeroed metrics. Returned when zero
/// providers are compliant (§4.C). `unanimous := true` per spec.
pub fn sentinel_no_trade(
    alert_symbol: &str,
    regime: Regime,
    feature_vector: Vec<f64>,
    weights_used: HashMap<String, f64>,
    evaluated_at: chrono::DateTime<chrono::Utc>,
) -> Evaluation {
    Evaluation {
        alert_symbol: alert_symbol.to_string(),
        provider_outputs: Vec::new(),
        trade_score: 0.0,
        median_score: 0.0,
        expected_rr: 0.0,
        confidence: 0.0,
        score_spread: 0.0,
        disagreement_penalty: 0.0,
        unanimous: true,
        majority: false,
        should_trade: false,
        regime,
        feature_vector,
        weights_used,
        evaluated_at,
    }
}

/// Aggregates compliant provider outputs into a single ensemble evaluation.
/// `weights` is the configured weight map over all known providers, keyed by
/// provider id; it is restricted to compliant providers and renormalized
/// here so callers never need to pre-filter.
///
/// `outputs` must contain at least one compliant entry — callers check for
/// the zero-compliant case and return `sentinel_no_trade` instead.
pub fn aggregate(
    alert_symbol: &str,
    outputs: &[ProviderOutput],
    weights: &HashMap<String, f64>,
    disagreement_coefficient: f64,
    regime: Regime,
    feature_vector: Vec<f64>,
    evaluated_at: chrono::DateTime<chrono::Utc>,
) -> Evaluation {
    // Aggregation is deterministic in provider-id order after collection
    // (§5 "Ordering"), independent of fan-out arrival order.
    let mut compliant: Vec<&ProviderOutput> =
        outputs.iter().filter(|o| o.compliant).collect();
    compliant.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));

    let raw_weight_sum: f64 = compliant
        .iter()
        .map(|o| weights.get(&o.provider_id).copied().unwrap_or(0.0))
        .sum();

    let normalize = |w: f64| -> f64 {
        if raw_weight_sum > 0.0 {
            w / raw_weight_sum
        } else {
            1.0 / compliant.len() as f64
        }
    };

    let weights_used: HashMap<String, f64> = compliant
        .iter()
        .map(|o| {
            let raw = weights.get(&o.provider_id).copied().unwrap_or(0.0);
            (o.provider_id.clone(), normalize(raw))
        })
        .collect();

    let weighted_score: f64 = compliant
        .iter()
        .map(|o| o.score * weights_used[&o.provider_id])
        .sum();
    let weighted_rr: f64 = compliant
        .iter()
        .map(|o| o.expected_rr * weights_used[&o.provider_id])
        .sum();
    let weighted_confidence: f64 = compliant
        .iter()
        .map(|o| o.confidence * weights_used[&o.provider_id])
        .sum();

    let scores: Vec<f64> = compliant.iter().map(|o| o.score).collect();
    let median_score = median(scores.clone());
    let spread = scores.iter().cloned().fold(f64::MIN, f64::max)
        - scores.iter().cloned().fold(f64::MAX, f64::min);
    let penalty = disagreement_coefficient * spread * spread / 10_000.0;
    let penalized_score = weighted_score - penalty;

    let true_count = compliant.iter().filter(|o| o.should_trade).count();
    let majority = true_count as f64 > compliant.len() as f64 / 2.0;
    let unanimous = compliant.iter().all(|o| o.should_trade)
        || compliant.iter().all(|o| !o.should_trade);
    let should_trade = majority && penalized_score >= MIN_SCORE_THRESHOLD;

    Evaluation {
        alert_symbol: alert_symbol.to_string(),
        provider_outputs: outputs.to_vec(),
        trade_score: round2(penalized_score),
        median_score: round2(median_score),
        expected_rr: round2(weighted_rr),
        confidence: round2(weighted_confidence),
        score_spread: round2(spread),
        disagreement_penalty: round2(penalty),
        unanimous,
        majority,
        should_trade,
        regime,
        feature_vector,
        weights_used,
        evaluated_at,
    }
}
