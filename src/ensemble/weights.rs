//! Bayesian regime-indexed weight table (§4.C, §9).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{Regime, ALL_REGIMES};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightTable {
    providers: Vec<String>,
    weights: HashMap<Regime, HashMap<String, f64>>,
}

impl WeightTable {
    /// Every regime starts at the uniform prior `1/K` over `providers`.
    pub fn uniform(providers: Vec<String>) -> Self {
        let k = providers.len().max(1) as f64;
        let mut weights = HashMap::new();
        for regime in ALL_REGIMES {
            let per_provider: HashMap<String, f64> =
                providers.iter().map(|p| (p.clone(), 1.0 / k)).collect();
            weights.insert(regime, per_provider);
        }
        Self { providers, weights }
    }

    pub fn get(&self, regime: Regime) -> &HashMap<String, f64> {
        self.weights.get(&regime).expect("every regime is initialized")
    }

    /// `per_provider_sign` maps provider id to {-1, 0, +1}: whether that
    /// provider's call agreed with, was neutral on, or disagreed with the
    /// trade direction that produced `realized_rr`.
    pub fn update(
        &mut self,
        regime: Regime,
        realized_rr: f64,
        per_provider_sign: &HashMap<String, i32>,
    ) {
        let prior = self
            .weights
            .get(&regime)
            .cloned()
            .unwrap_or_else(|| WeightTable::uniform(self.providers.clone()).get(regime).clone());

        let mut posterior: HashMap<String, f64> = HashMap::new();
        for provider in &self.providers {
            let sign = per_provider_sign.get(provider).copied().unwrap_or(0);
            let credit = if realized_rr > 0.0 {
                (sign as f64 * realized_rr).max(0.0)
            } else {
                0.0
            };
            let prior_weight = prior.get(provider).copied().unwrap_or(0.0);
            posterior.insert(provider.clone(), prior_weight * (1.0 + credit));
        }

        let total: f64 = posterior.values().sum();
        if total > 0.0 {
            for v in posterior.values_mut() {
                *v /= total;
            }
        } else {
            let k = self.providers.len().max(1) as f64;
            for provider in &self.providers {
                posterior.insert(provider.clone(), 1.0 / k);
            }
        }

        self.weights.insert(regime, posterior);
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Malformed JSON silently resets to uniform priors rather than
    /// propagating a parse error (§4.C, §8 round-trip/idempotence).
    pub fn from_json(json: &str, providers: Vec<String>) -> Self {
        match serde_json::from_str::<WeightTable>(json) {
            Ok(table) if table.providers == providers => table,
            _ => WeightTable::uniform(providers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn providers() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    #[test]
    fn uniform_prior_sums_to_one() {
        let table = WeightTable::uniform(providers());
        for regime in ALL_REGIMES {
            let sum: f64 = table.get(regime).values().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn weights_stay_nonnegative_and_sum_to_one_after_update() {
        let mut table = WeightTable::uniform(providers());
        let signs = HashMap::from([
            ("a".to_string(), 1),
            ("b".to_string(), -1),
            ("c".to_string(), 0),
        ]);
        table.update(Regime::Trending, 1.5, &signs);
        let weights = table.get(Regime::Trending);
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for w in weights.values() {
            assert!(*w >= 0.0);
        }
    }

    #[test]
    fn losing_trade_with_identical_signs_leaves_relative_balance_unchanged() {
        let mut table = WeightTable::uniform(providers());
        let signs = HashMap::from([
            ("a".to_string(), 1),
            ("b".to_string(), 1),
            ("c".to_string(), 1),
        ]);
        table.update(Regime::Chop, -0.5, &signs);
        let weights = table.get(Regime::Chop);
        let a = weights["a"];
        let b = weights["b"];
        let c = weights["c"];
        assert!((a - b).abs() < 1e-9);
        assert!((b - c).abs() < 1e-9);
    }

    #[test]
    fn consistently_correct_provider_converges_toward_one() {
        let mut table = WeightTable::uniform(providers());
        for _ in 0..200 {
            let signs = HashMap::from([
                ("a".to_string(), 1),
                ("b".to_string(), -1),
                ("c".to_string(), -1),
            ]);
            table.update(Regime::Volatile, 2.0, &signs);
        }
        let weights = table.get(Regime::Volatile);
        assert!(weights["a"] > 0.9);
    }

    #[test]
    fn json_round_trip_preserves_weights_exactly() {
        let mut table = WeightTable::uniform(providers());
        let signs = HashMap::from([
            ("a".to_string(), 1),
            ("b".to_string(), 0),
            ("c".to_string(), -1),
        ]);
        table.update(Regime::Trending, 1.0, &signs);
        let json = table.to_json();
        let restored = WeightTable::from_json(&json, providers());
        assert_eq!(table.get(Regime::Trending), restored.get(Regime::Trending));
    }

    #[test]
    fn malformed_json_resets_to_uniform_prior() {
        let restored = WeightTable::from_json("not json", providers());
        for regime in ALL_REGIMES {
            for w in restored.get(regime).values() {
                assert!((*w - 1.0 / 3.0).abs() < 1e-9);
            }
        }
    }
}
