//! SQLite-backed `PersistenceStore` (WAL mode, `Arc<Mutex<Connection>>`,
//! `spawn_blocking` for the synchronous `rusqlite` calls).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::error::{BridgeError, BridgeResult};
use crate::models::{
    Alert, AnalyticsJob, Evaluation, Execution, Order, OrderSide, OrderStatus, OrderType, Outcome,
    Signal, TimeInForce,
};

use super::{InsertOutcome, PersistenceStore, RiskConfigRow};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS alerts (
    symbol TEXT NOT NULL,
    entry_time INTEGER NOT NULL,
    strategy TEXT,
    entry_price REAL,
    stop_price REAL,
    shares REAL,
    last_price REAL,
    dup_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (symbol, entry_time)
);

CREATE TABLE IF NOT EXISTS orders (
    order_id INTEGER PRIMARY KEY,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    order_type TEXT NOT NULL,
    quantity REAL NOT NULL,
    limit_price REAL,
    stop_price REAL,
    trailing_percent REAL,
    tif TEXT NOT NULL,
    parent_order_id INTEGER,
    oca_group TEXT,
    correlation_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS executions (
    exec_id TEXT PRIMARY KEY,
    order_id INTEGER NOT NULL,
    side TEXT NOT NULL,
    shares REAL NOT NULL,
    price REAL NOT NULL,
    cumulative_quantity REAL NOT NULL,
    average_price REAL NOT NULL,
    ts INTEGER NOT NULL,
    commission REAL,
    realized_pnl REAL
);

CREATE TABLE IF NOT EXISTS evaluations (
    alert_symbol TEXT NOT NULL,
    evaluated_at INTEGER NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outcomes (
    evaluation_alert_symbol TEXT NOT NULL,
    entry_time INTEGER NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS risk_config (
    key TEXT PRIMARY KEY,
    value REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS signals (
    alert_symbol TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    trade_score REAL NOT NULL,
    should_trade INTEGER NOT NULL,
    order_id INTEGER
);

CREATE TABLE IF NOT EXISTS analytics_jobs (
    job_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    detail TEXT,
    updated_at INTEGER NOT NULL
);
"#;

#[derive(Clone)]
pub struct SqlitePersistenceStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistenceStore {
    pub fn open(path: &str) -> BridgeResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> BridgeResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn side_to_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

fn side_from_str(s: &str) -> OrderSide {
    match s {
        "SELL" => OrderSide::Sell,
        _ => OrderSide::Buy,
    }
}

fn status_to_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::PendingSubmit => "PendingSubmit",
        OrderStatus::PreSubmitted => "PreSubmitted",
        OrderStatus::Submitted => "Submitted",
        OrderStatus::Filled => "Filled",
        OrderStatus::Cancelled => "Cancelled",
        OrderStatus::ApiCancelled => "ApiCancelled",
        OrderStatus::Inactive => "Inactive",
    }
}

fn status_from_str(s: &str) -> OrderStatus {
    match s {
        "PreSubmitted" => OrderStatus::PreSubmitted,
        "Submitted" => OrderStatus::Submitted,
        "Filled" => OrderStatus::Filled,
        "Cancelled" => OrderStatus::Cancelled,
        "ApiCancelled" => OrderStatus::ApiCancelled,
        "Inactive" => OrderStatus::Inactive,
        _ => OrderStatus::PendingSubmit,
    }
}

fn order_type_to_str(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Mkt => "Mkt",
        OrderType::Lmt => "Lmt",
        OrderType::Stp => "Stp",
        OrderType::StpLmt => "StpLmt",
        OrderType::Trail => "Trail",
        OrderType::TrailLimit => "TrailLimit",
        OrderType::Rel => "Rel",
        OrderType::Mit => "Mit",
        OrderType::Moc => "Moc",
        OrderType::Loc => "Loc",
    }
}

fn order_type_from_str(s: &str) -> OrderType {
    match s {
        "Lmt" => OrderType::Lmt,
        "Stp" => OrderType::Stp,
        "StpLmt" => OrderType::StpLmt,
        "Trail" => OrderType::Trail,
        "TrailLimit" => OrderType::TrailLimit,
        "Rel" => OrderType::Rel,
        "Mit" => OrderType::Mit,
        "Moc" => OrderType::Moc,
        "Loc" => OrderType::Loc,
        _ => OrderType::Mkt,
    }
}

fn tif_to_str(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Day => "DAY",
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::Gtd => "GTD",
    }
}

fn tif_from_str(s: &str) -> TimeInForce {
    match s {
        "GTC" => TimeInForce::Gtc,
        "IOC" => TimeInForce::Ioc,
        "GTD" => TimeInForce::Gtd,
        _ => TimeInForce::Day,
    }
}

#[async_trait]
impl PersistenceStore for SqlitePersistenceStore {
    async fn insert_alert(&self, alert: &Alert) -> BridgeResult<InsertOutcome> {
        let conn = self.conn.clone();
        let alert = alert.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let entry_time = alert.alert_time.timestamp();
            let existing: Option<u32> = conn
                .query_row(
                    "SELECT dup_count FROM alerts WHERE symbol = ?1 AND entry_time = ?2",
                    params![alert.symbol, entry_time],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(dup_count) = existing {
                conn.execute(
                    "UPDATE alerts SET dup_count = dup_count + 1 WHERE symbol = ?1 AND entry_time = ?2",
                    params![alert.symbol, entry_time],
                )?;
                return Ok(InsertOutcome {
                    inserted: false,
                    duplicate_count: dup_count + 1,
                });
            }

            conn.execute(
                "INSERT INTO alerts (symbol, entry_time, strategy, entry_price, stop_price, shares, last_price, dup_count) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
                params![
                    alert.symbol,
                    entry_time,
                    alert.strategy,
                    alert.entry_price,
                    alert.stop_price,
                    alert.shares,
                    alert.last_price,
                ],
            )?;
            Ok(InsertOutcome {
                inserted: true,
                duplicate_count: 0,
            })
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn insert_evaluation(&self, evaluation: &Evaluation) -> BridgeResult<()> {
        let conn = self.conn.clone();
        let symbol = evaluation.alert_symbol.clone();
        let evaluated_at = evaluation.evaluated_at.timestamp();
        let payload = serde_json::to_string(evaluation).map_err(|e| BridgeError::Other(e.into()))?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO evaluations (alert_symbol, evaluated_at, payload_json) VALUES (?1, ?2, ?3)",
                params![symbol, evaluated_at, payload],
            )?;
            Ok::<(), BridgeError>(())
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn insert_outcome(&self, outcome: &Outcome) -> BridgeResult<()> {
        let conn = self.conn.clone();
        let symbol = outcome.evaluation_alert_symbol.clone();
        let entry_time = outcome.entry_time.timestamp();
        let payload = serde_json::to_string(outcome).map_err(|e| BridgeError::Other(e.into()))?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO outcomes (evaluation_alert_symbol, entry_time, payload_json) VALUES (?1, ?2, ?3)",
                params![symbol, entry_time, payload],
            )?;
            Ok::<(), BridgeError>(())
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn insert_order(&self, order: &Order) -> BridgeResult<()> {
        let conn = self.conn.clone();
        let order = order.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT OR REPLACE INTO orders \
                 (order_id, symbol, side, order_type, quantity, limit_price, stop_price, trailing_percent, tif, parent_order_id, oca_group, correlation_id, status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    order.order_id,
                    order.symbol,
                    side_to_str(order.side),
                    order_type_to_str(order.order_type),
                    order.quantity,
                    order.limit_price,
                    order.stop_price,
                    order.trailing_percent,
                    tif_to_str(order.tif),
                    order.parent_order_id,
                    order.oca_group,
                    order.correlation_id,
                    status_to_str(order.status),
                    order.created_at.timestamp(),
                ],
            )?;
            Ok::<(), BridgeError>(())
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn update_order_status(&self, order_id: i64, status: OrderStatus) -> BridgeResult<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let updated = conn.execute(
                "UPDATE orders SET status = ?1 WHERE order_id = ?2",
                params![status_to_str(status), order_id],
            )?;
            if updated == 0 {
                // Order not present locally (placed externally). Drop per §4.A.
                warn!(order_id, "orderStatus event for unknown order, dropping");
            }
            Ok::<(), BridgeError>(())
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn get_order(&self, order_id: i64) -> BridgeResult<Option<Order>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let row = conn
                .query_row(
                    "SELECT order_id, symbol, side, order_type, quantity, limit_price, stop_price, trailing_percent, tif, parent_order_id, oca_group, correlation_id, status, created_at \
                     FROM orders WHERE order_id = ?1",
                    params![order_id],
                    |row| {
                        let side: String = row.get(2)?;
                        let order_type: String = row.get(3)?;
                        let tif: String = row.get(8)?;
                        let status: String = row.get(12)?;
                        let created_at: i64 = row.get(13)?;
                        Ok(Order {
                            order_id: row.get(0)?,
                            symbol: row.get(1)?,
                            side: side_from_str(&side),
                            order_type: order_type_from_str(&order_type),
                            quantity: row.get(4)?,
                            limit_price: row.get(5)?,
                            stop_price: row.get(6)?,
                            trailing_percent: row.get(7)?,
                            tif: tif_from_str(&tif),
                            parent_order_id: row.get(9)?,
                            oca_group: row.get(10)?,
                            correlation_id: row.get(11)?,
                            status: status_from_str(&status),
                            created_at: chrono::DateTime::from_timestamp(created_at, 0)
                                .unwrap_or_default(),
                        })
                    },
                )
                .optional()?;
            Ok::<Option<Order>, BridgeError>(row)
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn insert_execution(&self, execution: &Execution) -> BridgeResult<InsertOutcome> {
        let conn = self.conn.clone();
        let execution = execution.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let exists: Option<String> = conn
                .query_row(
                    "SELECT exec_id FROM executions WHERE exec_id = ?1",
                    params![execution.exec_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Ok(InsertOutcome {
                    inserted: false,
                    duplicate_count: 1,
                });
            }
            conn.execute(
                "INSERT INTO executions (exec_id, order_id, side, shares, price, cumulative_quantity, average_price, ts, commission, realized_pnl) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    execution.exec_id,
                    execution.order_id,
                    side_to_str(execution.side),
                    execution.shares,
                    execution.price,
                    execution.cumulative_quantity,
                    execution.average_price,
                    execution.timestamp.timestamp(),
                    execution.commission,
                    execution.realized_pnl,
                ],
            )?;
            Ok(InsertOutcome {
                inserted: true,
                duplicate_count: 0,
            })
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn update_execution_commission(
        &self,
        exec_id: &str,
        commission: f64,
    ) -> BridgeResult<()> {
        let conn = self.conn.clone();
        let exec_id = exec_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "UPDATE executions SET commission = ?1 WHERE exec_id = ?2",
                params![commission, exec_id],
            )?;
            Ok::<(), BridgeError>(())
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn query_recent_alerts(&self, limit: u32) -> BridgeResult<Vec<Alert>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let mut stmt = conn.prepare(
                "SELECT symbol, entry_time, strategy, entry_price, stop_price, shares, last_price \
                 FROM alerts ORDER BY entry_time DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                let entry_time: i64 = row.get(1)?;
                Ok(Alert {
                    symbol: row.get(0)?,
                    strategy: row.get(2)?,
                    entry_price: row.get(3)?,
                    stop_price: row.get(4)?,
                    shares: row.get(5)?,
                    last_price: row.get(6)?,
                    alert_time: chrono::DateTime::from_timestamp(entry_time, 0).unwrap_or_default(),
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<Vec<Alert>, BridgeError>(out)
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn query_recent_evaluations(&self, limit: u32) -> BridgeResult<Vec<Evaluation>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let mut stmt = conn.prepare(
                "SELECT payload_json FROM evaluations ORDER BY evaluated_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                let json = row?;
                if let Ok(eval) = serde_json::from_str::<Evaluation>(&json) {
                    out.push(eval);
                }
            }
            Ok::<Vec<Evaluation>, BridgeError>(out)
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn insert_signal(&self, signal: &Signal) -> BridgeResult<()> {
        let conn = self.conn.clone();
        let signal = signal.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO signals (alert_symbol, created_at, trade_score, should_trade, order_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    signal.alert_symbol,
                    signal.created_at.timestamp(),
                    signal.trade_score,
                    signal.should_trade as i64,
                    signal.order_id,
                ],
            )?;
            Ok::<(), BridgeError>(())
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn query_recent_signals(&self, limit: u32) -> BridgeResult<Vec<Signal>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let mut stmt = conn.prepare(
                "SELECT alert_symbol, created_at, trade_score, should_trade, order_id \
                 FROM signals ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                let created_at: i64 = row.get(1)?;
                let should_trade: i64 = row.get(3)?;
                Ok(Signal {
                    alert_symbol: row.get(0)?,
                    created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
                    trade_score: row.get(2)?,
                    should_trade: should_trade != 0,
                    order_id: row.get(4)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<Vec<Signal>, BridgeError>(out)
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn upsert_analytics_job(&self, job: &AnalyticsJob) -> BridgeResult<()> {
        let conn = self.conn.clone();
        let job = job.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO analytics_jobs (job_id, kind, status, detail, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(job_id) DO UPDATE SET status = excluded.status, detail = excluded.detail, updated_at = excluded.updated_at",
                params![job.job_id, job.kind, job.status, job.detail, job.updated_at.timestamp()],
            )?;
            Ok::<(), BridgeError>(())
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn read_risk_config(&self) -> BridgeResult<Vec<RiskConfigRow>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let mut stmt = conn.prepare("SELECT key, value FROM risk_config")?;
            let rows = stmt.query_map([], |row| {
                Ok(RiskConfigRow {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<Vec<RiskConfigRow>, BridgeError>(out)
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }

    async fn write_risk_config(&self, key: &str, value: f64) -> BridgeResult<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO risk_config (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok::<(), BridgeError>(())
        })
        .await
        .map_err(|e| BridgeError::Other(e.into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn duplicate_alert_insert_is_idempotent_and_counted() {
        let store = SqlitePersistenceStore::open_in_memory().unwrap();
        let alert = Alert::new("MSFT", Utc::now());
        let first = store.insert_alert(&alert).await.unwrap();
        assert!(first.inserted);
        let second = store.insert_alert(&alert).await.unwrap();
        assert!(!second.inserted);
        assert_eq!(second.duplicate_count, 1);

        let recent = store.query_recent_alerts(10).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn order_status_update_on_unknown_order_is_a_noop_not_an_error() {
        let store = SqlitePersistenceStore::open_in_memory().unwrap();
        store.update_order_status(999, OrderStatus::Filled).await.unwrap();
    }

    #[tokio::test]
    async fn order_round_trips_through_storage() {
        let store = SqlitePersistenceStore::open_in_memory().unwrap();
        let order = Order {
            order_id: 42,
            symbol: "AAPL".to_string(),
            side: OrderSide::Sell,
            order_type: crate::models::OrderType::StpLmt,
            quantity: 100.0,
            limit_price: Some(190.5),
            stop_price: Some(191.0),
            trailing_percent: None,
            tif: crate::models::TimeInForce::Gtc,
            parent_order_id: Some(41),
            oca_group: Some("oca-1".to_string()),
            correlation_id: "corr-1".to_string(),
            status: OrderStatus::PreSubmitted,
            created_at: Utc::now(),
        };
        store.insert_order(&order).await.unwrap();
        let fetched = store.get_order(42).await.unwrap().expect("order present");
        assert_eq!(fetched.side, OrderSide::Sell);
        assert!(matches!(fetched.order_type, crate::models::OrderType::StpLmt));
        assert!(matches!(fetched.tif, crate::models::TimeInForce::Gtc));
        assert_eq!(fetched.limit_price, Some(190.5));
        assert_eq!(fetched.oca_group.as_deref(), Some("oca-1"));

        store.update_order_status(42, OrderStatus::Filled).await.unwrap();
        let refetched = store.get_order(42).await.unwrap().unwrap();
        assert_eq!(refetched.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn signal_round_trips_and_is_returned_most_recent_first() {
        let store = SqlitePersistenceStore::open_in_memory().unwrap();
        let older = Signal {
            alert_symbol: "AAPL".to_string(),
            trade_score: 70.94,
            should_trade: true,
            order_id: None,
            created_at: Utc::now() - chrono::Duration::minutes(5),
        };
        let newer = Signal {
            alert_symbol: "MSFT".to_string(),
            trade_score: 32.82,
            should_trade: false,
            order_id: Some(7),
            created_at: Utc::now(),
        };
        store.insert_signal(&older).await.unwrap();
        store.insert_signal(&newer).await.unwrap();

        let recent = store.query_recent_signals(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].alert_symbol, "MSFT");
        assert_eq!(recent[0].order_id, Some(7));
        assert_eq!(recent[1].alert_symbol, "AAPL");
        assert!(!recent[0].should_trade);
        assert!(recent[1].should_trade);
    }

    #[tokio::test]
    async fn analytics_job_upsert_updates_status_in_place() {
        let store = SqlitePersistenceStore::open_in_memory().unwrap();
        let mut job = AnalyticsJob {
            job_id: "eval-AAPL-1".to_string(),
            kind: "auto_eval".to_string(),
            status: "running".to_string(),
            detail: None,
            updated_at: Utc::now(),
        };
        store.upsert_analytics_job(&job).await.unwrap();

        job.status = "completed".to_string();
        job.detail = Some("trade_score=70.94".to_string());
        store.upsert_analytics_job(&job).await.unwrap();
    }
}
