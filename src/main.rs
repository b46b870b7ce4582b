//! IBKR day-trading bridge server entrypoint. Parses CLI/env configuration,
//! builds a `BridgeRuntime`, connects the broker, spawns the broker event
//! loop and the three background loops, and serves the wire interface until
//! shutdown (§5 "Cancellation").

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use ibkr_bridge::background::trailing_tick;
use ibkr_bridge::config::ClientMode;
use ibkr_bridge::wire::{self, WireState};
use ibkr_bridge::{BridgeRuntime, Config};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI surface of §6: `--mode`, `--log-level`, `--db-path`, each falling
/// back to the matching environment variable via clap's `env` feature, and
/// finally to `Config::from_env`'s own defaults when neither is set.
#[derive(Parser, Debug)]
#[command(name = "ibkr-bridge", about = "IBKR day-trading bridge server")]
struct Cli {
    #[arg(long, env = "IBKR_MODE", value_parser = ["rest", "mcp", "both"])]
    mode: Option<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "DB_PATH")]
    db_path: Option<String>,
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Exit codes per §6: 0 normal shutdown, 1 fatal startup error, 2
/// configuration error.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(2);
        }
    };

    if let Some(mode) = cli.mode.as_deref() {
        config.ibkr.mode = match mode {
            "mcp" => ClientMode::Mcp,
            "both" => ClientMode::Both,
            _ => ClientMode::Rest,
        };
    }
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }

    match run(config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let port = config.port;
    let runtime = BridgeRuntime::new(config)?;

    runtime.connection.connect().await?;

    let events = runtime.connection.socket().subscribe_events();
    let event_loop_session = runtime.session.clone();
    let event_loop_store = runtime.store.clone();
    let event_loop_broadcast = runtime.broadcast_tx.clone();
    let event_loop_sequence = runtime.sequence.clone();
    let event_loop = tokio::spawn(async move {
        event_loop_session
            .run_event_loop(events, event_loop_store, event_loop_broadcast, event_loop_sequence)
            .await;
    });

    let trailing_executor = runtime.trailing_executor.clone();
    let trailing_task = tokio::spawn(async move {
        trailing_tick::run_forever(&trailing_executor, Duration::from_secs(30), |summary| {
            if summary.modified > 0 || summary.errors > 0 {
                info!(
                    processed = summary.processed,
                    modified = summary.modified,
                    errors = summary.errors,
                    "trailing tick summary"
                );
            }
        })
        .await;
    });

    let tunnel_monitor = runtime.tunnel_monitor.clone();
    let tunnel_task = tokio::spawn(async move {
        tunnel_monitor.run_forever().await;
    });

    let state = WireState {
        risk_gate: runtime.risk_gate.clone(),
        trailing_executor: runtime.trailing_executor.clone(),
        alert_pipeline: runtime.alert_pipeline.clone(),
        broadcast_tx: runtime.broadcast_tx.clone(),
    };
    let app = wire::router(state).layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "ibkr-bridge listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown signal received, tearing down");
    event_loop.abort();
    trailing_task.abort();
    tunnel_task.abort();
    runtime.connection.disconnect().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
