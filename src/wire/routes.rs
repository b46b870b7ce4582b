//! Thin wire-interface glue (§6/Component G): health check, a `/ws`
//! broadcast endpoint, and a minimal read-only REST surface. Full REST
//! CRUD, MCP tool registration, and dashboard rendering are out of scope
//! (§1) — this demonstrates the event fan-out contract, nothing more.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::background::AlertPipeline;
use crate::models::{Alert, Evaluation};
use crate::risk::{Clock, RiskGate};
use crate::trailing::{StopOrderBroker, TrailingExecutor};

use super::events::WireEvent;

#[derive(Clone)]
pub struct WireState<C: Clock, B: StopOrderBroker> {
    pub risk_gate: Arc<RiskGate<C>>,
    pub trailing_executor: Arc<TrailingExecutor<B>>,
    pub alert_pipeline: Arc<AlertPipeline>,
    pub broadcast_tx: broadcast::Sender<WireEvent>,
}

pub fn router<C, B>(state: WireState<C, B>) -> Router
where
    C: Clock + Send + Sync + 'static,
    B: StopOrderBroker + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler::<C, B>))
        .route("/api/risk/state", get(risk_state::<C, B>))
        .route("/api/session/state", get(session_state::<C, B>))
        .route("/api/trailing/state", get(trailing_state::<C, B>))
        .route("/api/alerts", post(ingest_alert::<C, B>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Deserialize)]
struct IngestAlertRequest {
    symbol: String,
    strategy: Option<String>,
    entry_price: Option<f64>,
    stop_price: Option<f64>,
    shares: Option<f64>,
    last_price: Option<f64>,
}

#[derive(Serialize)]
struct IngestAlertResponse {
    evaluated: bool,
    evaluation: Option<Evaluation>,
}

async fn ingest_alert<C, B>(
    State(state): State<WireState<C, B>>,
    Json(body): Json<IngestAlertRequest>,
) -> Result<Json<IngestAlertResponse>, (axum::http::StatusCode, String)>
where
    C: Clock,
    B: StopOrderBroker,
{
    let mut alert = Alert::new(&body.symbol, chrono::Utc::now());
    alert.strategy = body.strategy;
    alert.entry_price = body.entry_price;
    alert.stop_price = body.stop_price;
    alert.shares = body.shares;
    alert.last_price = body.last_price;

    let evaluation = state
        .alert_pipeline
        .ingest(alert)
        .await
        .map_err(|e| (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(IngestAlertResponse {
        evaluated: evaluation.is_some(),
        evaluation,
    }))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct RiskStateResponse {
    effective_max_order_size: f64,
    effective_max_notional: f64,
}

async fn risk_state<C, B>(State(state): State<WireState<C, B>>) -> Json<RiskStateResponse>
where
    C: Clock,
    B: StopOrderBroker,
{
    Json(RiskStateResponse {
        effective_max_order_size: state.risk_gate.effective_max_order_size(),
        effective_max_notional: state.risk_gate.effective_max_notional(),
    })
}

#[derive(Serialize)]
struct SessionStateResponse {
    date: chrono::NaiveDate,
    realized_pnl: f64,
    trade_count: u32,
    consecutive_losses: u32,
    locked: bool,
    lock_reason: Option<String>,
}

async fn session_state<C, B>(State(state): State<WireState<C, B>>) -> Json<SessionStateResponse>
where
    C: Clock,
    B: StopOrderBroker,
{
    let session = state.risk_gate.session().lock();
    Json(SessionStateResponse {
        date: session.date,
        realized_pnl: session.realized_pnl,
        trade_count: session.trade_count,
        consecutive_losses: session.consecutive_losses,
        locked: session.locked,
        lock_reason: session.lock_reason.clone(),
    })
}

#[derive(Serialize)]
struct TrailingStateResponse {
    symbol: String,
    quantity: f64,
    stop_price: Option<f64>,
    high_water_mark: Option<f64>,
}

async fn trailing_state<C, B>(
    State(state): State<WireState<C, B>>,
) -> Json<Vec<TrailingStateResponse>>
where
    C: Clock,
    B: StopOrderBroker,
{
    let positions = state
        .trailing_executor
        .all_positions()
        .into_iter()
        .map(|p| TrailingStateResponse {
            symbol: p.symbol,
            quantity: p.quantity,
            stop_price: p.stop_price,
            high_water_mark: p.high_water_mark,
        })
        .collect();
    Json(positions)
}

async fn ws_handler<C, B>(
    ws: WebSocketUpgrade,
    State(state): State<WireState<C, B>>,
) -> Response
where
    C: Clock + Send + Sync + 'static,
    B: StopOrderBroker + 'static,
{
    let rx = state.broadcast_tx.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx)).into_response()
}

async fn handle_socket(mut socket: WebSocket, mut rx: broadcast::Receiver<WireEvent>) {
    loop {
        tokio::select! {
            event = rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ws client lagged, dropping buffered events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let msg = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                if socket.send(Message::Text(msg)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
