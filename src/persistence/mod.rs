//! Persistence adapter contracts (Component F, §6).
//!
//! The core requires these idempotent operations from an external store;
//! schema DDL and the embedded SQL engine's internals are out of scope
//! (§1) — this module defines the *contract* plus a minimal SQLite
//! implementation so the rest of the crate and its tests have something to
//! run against.

pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::MemoryPersistenceStore;
pub use sqlite_store::SqlitePersistenceStore;

use crate::error::BridgeResult;
use crate::models::{Alert, AnalyticsJob, Evaluation, Execution, Order, OrderStatus, Outcome, Signal};
use async_trait::async_trait;

/// Result of an idempotent insert: whether it was newly created, and how
/// many prior rows matched the uniqueness key (§8 round-trip/idempotence:
/// duplicate alert ingestion "reports the duplicate count").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: bool,
    pub duplicate_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RiskConfigRow {
    pub key: String,
    pub value: f64,
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn insert_alert(&self, alert: &Alert) -> BridgeResult<InsertOutcome>;
    async fn insert_evaluation(&self, evaluation: &Evaluation) -> BridgeResult<()>;
    async fn insert_outcome(&self, outcome: &Outcome) -> BridgeResult<()>;

    async fn insert_order(&self, order: &Order) -> BridgeResult<()>;
    async fn update_order_status(&self, order_id: i64, status: OrderStatus) -> BridgeResult<()>;
    async fn get_order(&self, order_id: i64) -> BridgeResult<Option<Order>>;

    async fn insert_execution(&self, execution: &Execution) -> BridgeResult<InsertOutcome>;
    async fn update_execution_commission(
        &self,
        exec_id: &str,
        commission: f64,
    ) -> BridgeResult<()>;

    async fn insert_signal(&self, signal: &Signal) -> BridgeResult<()>;

    async fn query_recent_alerts(&self, limit: u32) -> BridgeResult<Vec<Alert>>;
    async fn query_recent_evaluations(&self, limit: u32) -> BridgeResult<Vec<Evaluation>>;
    async fn query_recent_signals(&self, limit: u32) -> BridgeResult<Vec<Signal>>;

    async fn read_risk_config(&self) -> BridgeResult<Vec<RiskConfigRow>>;
    async fn write_risk_config(&self, key: &str, value: f64) -> BridgeResult<()>;

    async fn upsert_analytics_job(&self, job: &AnalyticsJob) -> BridgeResult<()>;
}
