//! Provider polymorphism (§9): every scoring provider is substitutable
//! behind a single capability trait. The aggregator in `aggregate.rs` only
//! ever sees this capability, never a concrete provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::ProviderOutput;

#[async_trait]
pub trait ScoringProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn score(&self, symbol: &str, feature_vector: &[f64], prompt: &str) -> ProviderOutput;
}

/// Wire shape a scoring provider's HTTP endpoint is expected to return
/// (§6 "Provider protocol"). Any payload that doesn't parse into this is
/// non-compliant.
#[derive(Debug, Deserialize)]
struct ProviderResponsePayload {
    score: f64,
    expected_rr: f64,
    confidence: f64,
    should_trade: bool,
    #[serde(default)]
    reasoning: String,
}

fn is_well_formed(payload: &ProviderResponsePayload) -> bool {
    (0.0..=100.0).contains(&payload.score)
        && (0.0..=1.0).contains(&payload.confidence)
        && payload.expected_rr.is_finite()
}

fn non_compliant(provider_id: &str, reason: &str) -> ProviderOutput {
    ProviderOutput {
        provider_id: provider_id.to_string(),
        score: 0.0,
        expected_rr: 0.0,
        confidence: 0.0,
        should_trade: false,
        raw_text: reason.to_string(),
        compliant: false,
    }
}

/// HTTP-backed scoring provider. The three "classes" named in §9 (GPT,
/// Claude, Gemini) differ only in endpoint/model identity — the request and
/// response shape is identical, so one struct parameterized by endpoint
/// covers all three.
pub struct HttpScoringProvider {
    provider_id: String,
    endpoint: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpScoringProvider {
    pub fn new(
        provider_id: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            http: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl ScoringProvider for HttpScoringProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn score(&self, symbol: &str, feature_vector: &[f64], prompt: &str) -> ProviderOutput {
        let body = serde_json::json!({
            "model": self.model,
            "symbol": symbol,
            "feature_vector": feature_vector,
            "prompt": prompt,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return non_compliant(&self.provider_id, &format!("request error: {e}")),
        };

        if !response.status().is_success() {
            return non_compliant(
                &self.provider_id,
                &format!("http status {}", response.status()),
            );
        }

        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return non_compliant(&self.provider_id, &format!("body read error: {e}")),
        };

        let payload: ProviderResponsePayload = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => return non_compliant(&self.provider_id, &format!("parse error: {e}")),
        };

        if !is_well_formed(&payload) {
            return non_compliant(&self.provider_id, "out-of-range field values");
        }

        ProviderOutput {
            provider_id: self.provider_id.clone(),
            score: payload.score,
            expected_rr: payload.expected_rr,
            confidence: payload.confidence,
            should_trade: payload.should_trade,
            raw_text: payload.reasoning,
            compliant: true,
        }
    }
}

/// Deterministic test double that always returns a fixed output — used by
/// ensemble aggregation tests and by integration tests that need a known
/// ensemble without live network calls.
pub struct FixedScoringProvider {
    provider_id: String,
    output: ProviderOutput,
}

impl FixedScoringProvider {
    pub fn new(provider_id: impl Into<String>, output: ProviderOutput) -> Self {
        Self {
            provider_id: provider_id.into(),
            output,
        }
    }
}

#[async_trait]
impl ScoringProvider for FixedScoringProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn score(&self, _symbol: &str, _feature_vector: &[f64], _prompt: &str) -> ProviderOutput {
        self.output.clone()
    }
}

/// Fan out `score` to every configured provider concurrently. Each task has
/// its own timeout; one provider's timeout or panic never cancels the
/// others (§4.C "Provider fan-out").
pub async fn fan_out(
    providers: &[std::sync::Arc<dyn ScoringProvider>],
    symbol: &str,
    feature_vector: &[f64],
    prompt: &str,
    per_provider_timeout: Duration,
) -> Vec<ProviderOutput> {
    let tasks: Vec<_> = providers
        .iter()
        .map(|provider| {
            let provider = provider.clone();
            let symbol = symbol.to_string();
            let feature_vector = feature_vector.to_vec();
            let prompt = prompt.to_string();
            let provider_id = provider.provider_id().to_string();
            tokio::spawn(async move {
                match tokio::time::timeout(
                    per_provider_timeout,
                    provider.score(&symbol, &feature_vector, &prompt),
                )
                .await
                {
                    Ok(output) => output,
                    Err(_) => non_compliant(&provider_id, "timeout"),
                }
            })
        })
        .collect();

    let mut outputs = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(output) => outputs.push(output),
            Err(_) => outputs.push(non_compliant("unknown", "task panicked")),
        }
    }
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_survives_one_providers_timeout() {
        struct SlowProvider;
        #[async_trait]
        impl ScoringProvider for SlowProvider {
            fn provider_id(&self) -> &str {
                "slow"
            }
            async fn score(&self, _: &str, _: &[f64], _: &str) -> ProviderOutput {
                tokio::time::sleep(Duration::from_secs(10)).await;
                unreachable!("timeout should fire first")
            }
        }

        let fast = FixedScoringProvider::new(
            "fast",
            ProviderOutput {
                provider_id: "fast".to_string(),
                score: 80.0,
                expected_rr: 2.0,
                confidence: 0.8,
                should_trade: true,
                raw_text: String::new(),
                compliant: true,
            },
        );

        let providers: Vec<std::sync::Arc<dyn ScoringProvider>> =
            vec![std::sync::Arc::new(SlowProvider), std::sync::Arc::new(fast)];

        let outputs = fan_out(&providers, "AAPL", &[1.0, 2.0], "prompt", Duration::from_millis(20))
            .await;
        assert_eq!(outputs.len(), 2);
        let slow = outputs.iter().find(|o| o.provider_id == "slow").unwrap();
        assert!(!slow.compliant);
        let fast = outputs.iter().find(|o| o.provider_id == "fast").unwrap();
        assert!(fast.compliant);
    }
}
