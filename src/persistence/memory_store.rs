//! In-memory `PersistenceStore` used by unit/integration tests so they
//! don't need a filesystem-backed SQLite file.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::BridgeResult;
use crate::models::{Alert, AnalyticsJob, Evaluation, Execution, Order, OrderStatus, Outcome, Signal};

use super::{InsertOutcome, PersistenceStore, RiskConfigRow};

#[derive(Default)]
struct Inner {
    alerts: Vec<Alert>,
    alert_keys: HashMap<(String, i64), u32>,
    evaluations: Vec<Evaluation>,
    outcomes: Vec<Outcome>,
    orders: HashMap<i64, Order>,
    executions: HashMap<String, Execution>,
    risk_config: HashMap<String, f64>,
    signals: Vec<Signal>,
    analytics_jobs: HashMap<String, AnalyticsJob>,
}

#[derive(Default)]
pub struct MemoryPersistenceStore {
    inner: Mutex<Inner>,
}

impl MemoryPersistenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for MemoryPersistenceStore {
    async fn insert_alert(&self, alert: &Alert) -> BridgeResult<InsertOutcome> {
        let mut inner = self.inner.lock();
        let key = (alert.symbol.clone(), alert.alert_time.timestamp());
        let count = inner.alert_keys.entry(key).or_insert(0);
        if *count > 0 {
            *count += 1;
            return Ok(InsertOutcome {
                inserted: false,
                duplicate_count: *count - 1,
            });
        }
        *count = 1;
        inner.alerts.push(alert.clone());
        Ok(InsertOutcome {
            inserted: true,
            duplicate_count: 0,
        })
    }

    async fn insert_evaluation(&self, evaluation: &Evaluation) -> BridgeResult<()> {
        self.inner.lock().evaluations.push(evaluation.clone());
        Ok(())
    }

    async fn insert_outcome(&self, outcome: &Outcome) -> BridgeResult<()> {
        self.inner.lock().outcomes.push(outcome.clone());
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> BridgeResult<()> {
        self.inner.lock().orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn update_order_status(&self, order_id: i64, status: OrderStatus) -> BridgeResult<()> {
        if let Some(order) = self.inner.lock().orders.get_mut(&order_id) {
            order.status = status;
        }
        Ok(())
    }

    async fn get_order(&self, order_id: i64) -> BridgeResult<Option<Order>> {
        Ok(self.inner.lock().orders.get(&order_id).cloned())
    }

    async fn insert_execution(&self, execution: &Execution) -> BridgeResult<InsertOutcome> {
        let mut inner = self.inner.lock();
        if inner.executions.contains_key(&execution.exec_id) {
            return Ok(InsertOutcome {
                inserted: false,
                duplicate_count: 1,
            });
        }
        inner
            .executions
            .insert(execution.exec_id.clone(), execution.clone());
        Ok(InsertOutcome {
            inserted: true,
            duplicate_count: 0,
        })
    }

    async fn update_execution_commission(
        &self,
        exec_id: &str,
        commission: f64,
    ) -> BridgeResult<()> {
        if let Some(exec) = self.inner.lock().executions.get_mut(exec_id) {
            exec.commission = Some(commission);
        }
        Ok(())
    }

    async fn insert_signal(&self, signal: &Signal) -> BridgeResult<()> {
        self.inner.lock().signals.push(signal.clone());
        Ok(())
    }

    async fn query_recent_signals(&self, limit: u32) -> BridgeResult<Vec<Signal>> {
        let inner = self.inner.lock();
        Ok(inner
            .signals
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn upsert_analytics_job(&self, job: &AnalyticsJob) -> BridgeResult<()> {
        self.inner
            .lock()
            .analytics_jobs
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn query_recent_alerts(&self, limit: u32) -> BridgeResult<Vec<Alert>> {
        let inner = self.inner.lock();
        Ok(inner
            .alerts
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn query_recent_evaluations(&self, limit: u32) -> BridgeResult<Vec<Evaluation>> {
        let inner = self.inner.lock();
        Ok(inner
            .evaluations
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn read_risk_config(&self) -> BridgeResult<Vec<RiskConfigRow>> {
        Ok(self
            .inner
            .lock()
            .risk_config
            .iter()
            .map(|(key, value)| RiskConfigRow {
                key: key.clone(),
                value: *value,
            })
            .collect())
    }

    async fn write_risk_config(&self, key: &str, value: f64) -> BridgeResult<()> {
        self.inner.lock().risk_config.insert(key.to_string(), value);
        Ok(())
    }
}
