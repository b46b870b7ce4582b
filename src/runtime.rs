//! `BridgeRuntime` (§9 "Runtime context"): the handles the running process
//! needs to wire the session layer, risk gate, ensemble engine, trailing
//! executor, tunnel monitor, and wire interface together. `main.rs`
//! constructs one of these and drives it; nothing here runs on its own.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::background::{AlertPipeline, AutoEvalScheduler, TunnelMonitor, TunnelProbe, TunnelRestarter};
use crate::config::Config;
use crate::ensemble::{EnsembleEngine, FixedScoringProvider, HttpScoringProvider, ScoringProvider};
use crate::error::BridgeResult;
use crate::ibkr::{IbkrConnection, IbkrSessionLayer, SimulatedBrokerSocket};
use crate::models::ProviderOutput;
use crate::persistence::{PersistenceStore, SqlitePersistenceStore};
use crate::risk::{RiskGate, SystemClock};
use crate::trailing::{StopOrderBroker, StopPolicy, TrailingExecutor};
use crate::wire::{SequenceAllocator, WireEvent};

const ENSEMBLE_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
const AUTO_EVAL_CONCURRENCY_CAP: usize = 4;

/// Bridges `TrailingExecutor`'s narrow `StopOrderBroker` capability to the
/// full session layer + persistence pair, the way the wire routes bridge
/// `RiskGate`/`TrailingExecutor` to axum state (§9 "Provider polymorphism").
pub struct IbkrStopOrderBroker<S: crate::ibkr::BrokerSocket + 'static> {
    session: Arc<IbkrSessionLayer<S>>,
    store: Arc<dyn PersistenceStore>,
}

impl<S: crate::ibkr::BrokerSocket + 'static> IbkrStopOrderBroker<S> {
    pub fn new(session: Arc<IbkrSessionLayer<S>>, store: Arc<dyn PersistenceStore>) -> Self {
        Self { session, store }
    }
}

#[async_trait::async_trait]
impl<S: crate::ibkr::BrokerSocket + 'static> StopOrderBroker for IbkrStopOrderBroker<S> {
    async fn order_status(&self, order_id: i64) -> Option<crate::models::OrderStatus> {
        self.store.get_order(order_id).await.ok().flatten().map(|o| o.status)
    }

    async fn modify_stop_order(
        &self,
        order_id: i64,
        new_stop_price: f64,
        _oca_group: Option<&str>,
    ) -> BridgeResult<()> {
        self.session.connection.socket().modify_stop_price(order_id as i32, new_stop_price);
        Ok(())
    }
}

/// Probes the externally managed ingress proxy over HTTPS. Returns an error
/// immediately, without a request, if no tunnel URL is configured — there is
/// nothing to probe, which is distinct from a probe failure.
pub struct ReqwestTunnelProbe {
    url: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTunnelProbe {
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl TunnelProbe for ReqwestTunnelProbe {
    async fn probe(&self) -> Result<Duration, String> {
        let Some(url) = self.url.as_deref() else {
            return Err("no tunnel url configured".to_string());
        };
        let started = std::time::Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("http status {}", response.status()));
        }
        Ok(started.elapsed())
    }
}

/// No real OS service manager binding is in scope (§1 Non-goals); this
/// restarter only logs, so the consecutive-failure escalation path in
/// `TunnelMonitor` still exercises end to end without one.
pub struct NoopTunnelRestarter;

#[async_trait::async_trait]
impl TunnelRestarter for NoopTunnelRestarter {
    async fn query_service(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop_service(&self) -> anyhow::Result<()> {
        warn!("tunnel restart requested, no service manager binding configured");
        Ok(())
    }

    async fn start_service(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn provider_triple(prefix: &str) -> Option<(String, String, String)> {
    let endpoint = env::var(format!("{prefix}_ENDPOINT")).ok()?;
    let api_key = env::var(format!("{prefix}_API_KEY")).ok()?;
    let model = env::var(format!("{prefix}_MODEL")).ok()?;
    Some((endpoint, api_key, model))
}

fn unconfigured_stub(provider_id: &str) -> Arc<dyn ScoringProvider> {
    Arc::new(FixedScoringProvider::new(
        provider_id,
        ProviderOutput {
            provider_id: provider_id.to_string(),
            score: 0.0,
            expected_rr: 0.0,
            confidence: 0.0,
            should_trade: false,
            raw_text: "provider not configured".to_string(),
            compliant: false,
        },
    ))
}

/// Builds the three named provider slots (§9 "three classes"), falling back
/// to an always-non-compliant stub for any slot missing its full
/// endpoint/key/model triple rather than failing startup.
fn build_providers() -> Vec<Arc<dyn ScoringProvider>> {
    [("GPT", "gpt"), ("CLAUDE", "claude"), ("GEMINI", "gemini")]
        .into_iter()
        .map(|(env_prefix, provider_id)| match provider_triple(env_prefix) {
            Some((endpoint, api_key, model)) => {
                info!(provider_id, "scoring provider configured from environment");
                Arc::new(HttpScoringProvider::new(
                    provider_id,
                    endpoint,
                    api_key,
                    model,
                    ENSEMBLE_PROVIDER_TIMEOUT,
                )) as Arc<dyn ScoringProvider>
            }
            None => {
                warn!(provider_id, "scoring provider not configured, using non-compliant stub");
                unconfigured_stub(provider_id)
            }
        })
        .collect()
}

/// Bundles handles to every component so `main.rs` can wire the broker
/// event loop, the background loops, and the wire interface against a
/// single, consistently-constructed set of collaborators.
pub struct BridgeRuntime {
    pub config: Config,
    pub store: Arc<dyn PersistenceStore>,
    pub connection: Arc<IbkrConnection<SimulatedBrokerSocket>>,
    pub session: Arc<IbkrSessionLayer<SimulatedBrokerSocket>>,
    pub risk_gate: Arc<RiskGate<SystemClock>>,
    pub ensemble: Arc<EnsembleEngine>,
    pub trailing_executor: Arc<TrailingExecutor<IbkrStopOrderBroker<SimulatedBrokerSocket>>>,
    pub tunnel_monitor: Arc<TunnelMonitor<ReqwestTunnelProbe, NoopTunnelRestarter>>,
    pub auto_eval: Arc<AutoEvalScheduler>,
    pub alert_pipeline: Arc<AlertPipeline>,
    pub sequence: Arc<SequenceAllocator>,
    pub broadcast_tx: broadcast::Sender<WireEvent>,
}

impl BridgeRuntime {
    pub fn new(config: Config) -> BridgeResult<Self> {
        let store: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistenceStore::open(&config.db_path)?);

        let socket = Arc::new(SimulatedBrokerSocket::new());
        let connection = Arc::new(IbkrConnection::new(
            socket,
            config.ibkr.host.clone(),
            config.ibkr.port,
            config.ibkr.client_id,
            config.ibkr.mode,
        ));
        let session = Arc::new(IbkrSessionLayer::new(connection.clone()));

        let risk_gate = Arc::new(RiskGate::new(
            SystemClock,
            config.risk.clone(),
            config.ibkr.port,
            config.paper_mode,
        ));

        let ensemble = Arc::new(EnsembleEngine::new(
            build_providers(),
            ENSEMBLE_PROVIDER_TIMEOUT,
            crate::ensemble::DEFAULT_DISAGREEMENT_COEFFICIENT,
        ));

        let stop_broker = IbkrStopOrderBroker::new(session.clone(), store.clone());
        let trailing_executor = Arc::new(TrailingExecutor::new(
            stop_broker,
            StopPolicy::FixedPct { pct: config.trailing_stop_pct },
        ));

        let tunnel_monitor = Arc::new(TunnelMonitor::new(
            ReqwestTunnelProbe::new(config.tunnel.url.clone(), Duration::from_secs(5)),
            NoopTunnelRestarter,
            config.tunnel.clone(),
        ));

        let auto_eval = Arc::new(AutoEvalScheduler::new(
            AUTO_EVAL_CONCURRENCY_CAP,
            chrono::Duration::minutes(1),
        ));

        let sequence = Arc::new(SequenceAllocator::new());
        let (broadcast_tx, _rx) = broadcast::channel(1024);

        let alert_pipeline = Arc::new(AlertPipeline::new(
            ensemble.clone(),
            auto_eval.clone(),
            store.clone(),
            broadcast_tx.clone(),
            sequence.clone(),
        ));

        Ok(Self {
            config,
            store,
            connection,
            session,
            risk_gate,
            ensemble,
            trailing_executor,
            tunnel_monitor,
            auto_eval,
            alert_pipeline,
            sequence,
            broadcast_tx,
        })
    }
}
