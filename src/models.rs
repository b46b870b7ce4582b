//! Core data model (§3). Every entity here is referred to by semantic role
//! elsewhere in the crate, never by storage layout — `src/persistence`
//! decides how these are laid out on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Mkt,
    Lmt,
    Stp,
    StpLmt,
    Trail,
    TrailLimit,
    Rel,
    Mit,
    Moc,
    Loc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Gtd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSubmit,
    PreSubmitted,
    Submitted,
    Filled,
    Cancelled,
    ApiCancelled,
    Inactive,
}

impl OrderStatus {
    /// Terminal states are final per §3's lifecycle invariant.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::ApiCancelled
                | OrderStatus::Inactive
        )
    }

    /// Modification is only permitted while the broker still has the order
    /// live but not yet confirmed working (§4.D modification dispatch).
    pub fn is_modifiable(self) -> bool {
        matches!(self, OrderStatus::PreSubmitted | OrderStatus::Submitted)
    }
}

/// A tagged variant over order types so invalid field combinations (e.g.
/// `Mkt` carrying a limit price) are unrepresentable (§9 "Dynamic config
/// objects").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlaceOrderRequest {
    Market {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        tif: TimeInForce,
    },
    Limit {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        limit_price: f64,
        tif: TimeInForce,
    },
    Stop {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        stop_price: f64,
        tif: TimeInForce,
    },
    StopLimit {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        stop_price: f64,
        limit_price: f64,
        tif: TimeInForce,
    },
    Trail {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        trailing_percent: f64,
        tif: TimeInForce,
    },
    TrailLimit {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        trailing_percent: f64,
        limit_price: f64,
        tif: TimeInForce,
    },
}

impl PlaceOrderRequest {
    pub fn symbol(&self) -> &str {
        match self {
            PlaceOrderRequest::Market { symbol, .. }
            | PlaceOrderRequest::Limit { symbol, .. }
            | PlaceOrderRequest::Stop { symbol, .. }
            | PlaceOrderRequest::StopLimit { symbol, .. }
            | PlaceOrderRequest::Trail { symbol, .. }
            | PlaceOrderRequest::TrailLimit { symbol, .. } => symbol,
        }
    }

    pub fn side(&self) -> OrderSide {
        match self {
            PlaceOrderRequest::Market { side, .. }
            | PlaceOrderRequest::Limit { side, .. }
            | PlaceOrderRequest::Stop { side, .. }
            | PlaceOrderRequest::StopLimit { side, .. }
            | PlaceOrderRequest::Trail { side, .. }
            | PlaceOrderRequest::TrailLimit { side, .. } => *side,
        }
    }

    pub fn quantity(&self) -> f64 {
        match self {
            PlaceOrderRequest::Market { quantity, .. }
            | PlaceOrderRequest::Limit { quantity, .. }
            | PlaceOrderRequest::Stop { quantity, .. }
            | PlaceOrderRequest::StopLimit { quantity, .. }
            | PlaceOrderRequest::Trail { quantity, .. }
            | PlaceOrderRequest::TrailLimit { quantity, .. } => *quantity,
        }
    }

    pub fn order_type(&self) -> OrderType {
        match self {
            PlaceOrderRequest::Market { .. } => OrderType::Mkt,
            PlaceOrderRequest::Limit { .. } => OrderType::Lmt,
            PlaceOrderRequest::Stop { .. } => OrderType::Stp,
            PlaceOrderRequest::StopLimit { .. } => OrderType::StpLmt,
            PlaceOrderRequest::Trail { .. } => OrderType::Trail,
            PlaceOrderRequest::TrailLimit { .. } => OrderType::TrailLimit,
        }
    }

    pub fn limit_price(&self) -> Option<f64> {
        match self {
            PlaceOrderRequest::Limit { limit_price, .. }
            | PlaceOrderRequest::StopLimit { limit_price, .. }
            | PlaceOrderRequest::TrailLimit { limit_price, .. } => Some(*limit_price),
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<f64> {
        match self {
            PlaceOrderRequest::Stop { stop_price, .. }
            | PlaceOrderRequest::StopLimit { stop_price, .. } => Some(*stop_price),
            _ => None,
        }
    }

    pub fn trailing_percent(&self) -> Option<f64> {
        match self {
            PlaceOrderRequest::Trail { trailing_percent, .. }
            | PlaceOrderRequest::TrailLimit { trailing_percent, .. } => Some(*trailing_percent),
            _ => None,
        }
    }

    pub fn tif(&self) -> TimeInForce {
        match self {
            PlaceOrderRequest::Market { tif, .. }
            | PlaceOrderRequest::Limit { tif, .. }
            | PlaceOrderRequest::Stop { tif, .. }
            | PlaceOrderRequest::StopLimit { tif, .. }
            | PlaceOrderRequest::Trail { tif, .. }
            | PlaceOrderRequest::TrailLimit { tif, .. } => *tif,
        }
    }
}

impl OrderSide {
    pub fn as_broker_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// The opposing side, used to build a bracket's take-profit/stop-loss
    /// children from the parent's entry side.
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl OrderType {
    pub fn as_broker_str(&self) -> &'static str {
        match self {
            OrderType::Mkt => "MKT",
            OrderType::Lmt => "LMT",
            OrderType::Stp => "STP",
            OrderType::StpLmt => "STP LMT",
            OrderType::Trail => "TRAIL",
            OrderType::TrailLimit => "TRAIL LIMIT",
            OrderType::Rel => "REL",
            OrderType::Mit => "MIT",
            OrderType::Moc => "MOC",
            OrderType::Loc => "LOC",
        }
    }
}

/// Durable record of a placed or proposed broker order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub trailing_percent: Option<f64>,
    pub tif: TimeInForce,
    pub parent_order_id: Option<i64>,
    pub oca_group: Option<String>,
    pub correlation_id: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Immutable fill record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub exec_id: String,
    pub order_id: i64,
    pub side: OrderSide,
    pub shares: f64,
    pub price: f64,
    pub cumulative_quantity: f64,
    pub average_price: f64,
    pub timestamp: DateTime<Utc>,
    pub commission: Option<f64>,
    pub realized_pnl: Option<f64>,
}

/// External signal, immutable after ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: String,
    pub strategy: Option<String>,
    pub entry_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub shares: Option<f64>,
    pub last_price: Option<f64>,
    pub alert_time: DateTime<Utc>,
}

impl Alert {
    pub fn new(symbol: &str, alert_time: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_ascii_uppercase(),
            strategy: None,
            entry_price: None,
            stop_price: None,
            shares: None,
            last_price: None,
            alert_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum Regime {
    Trending,
    Chop,
    Volatile,
}

pub const ALL_REGIMES: [Regime; 3] = [Regime::Trending, Regime::Chop, Regime::Volatile];

/// Per-provider scoring output collected during ensemble fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub provider_id: String,
    pub score: f64,
    pub expected_rr: f64,
    pub confidence: f64,
    pub should_trade: bool,
    pub raw_text: String,
    pub compliant: bool,
}

/// Ensemble scoring result keyed to an alert or ad-hoc request. Immutable
/// after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub alert_symbol: String,
    pub provider_outputs: Vec<ProviderOutput>,
    pub trade_score: f64,
    pub median_score: f64,
    pub expected_rr: f64,
    pub confidence: f64,
    pub score_spread: f64,
    pub disagreement_penalty: f64,
    pub unanimous: bool,
    pub majority: bool,
    pub should_trade: bool,
    pub regime: Regime,
    pub feature_vector: Vec<f64>,
    pub weights_used: std::collections::HashMap<String, f64>,
    pub evaluated_at: DateTime<Utc>,
}

/// Post-trade ground truth. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub evaluation_alert_symbol: String,
    pub trade_taken: bool,
    pub realized_rr: f64,
    pub confidence_percentile_at_entry: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
}

/// A persisted decision artifact linking an evaluation to a tradeable
/// instruction (GLOSSARY "Signal"). `order_id` is `None` until a
/// downstream caller actually acts on it by placing an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub alert_symbol: String,
    pub trade_score: f64,
    pub should_trade: bool,
    pub order_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Bookkeeping row for a background analytics computation (e.g. an
/// auto-eval dispatch), appended when the job starts and updated as it
/// progresses (§6 "append/update analytics-job row").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsJob {
    pub job_id: String,
    pub kind: String,
    pub status: String,
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}
