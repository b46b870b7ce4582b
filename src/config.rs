//! Environment configuration (§6). Loaded once at startup via
//! `Config::from_env`.

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Rest,
    Mcp,
    Both,
}

impl ClientMode {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "mcp" => ClientMode::Mcp,
            "both" => ClientMode::Both,
            _ => ClientMode::Rest,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IbkrConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub mode: ClientMode,
}

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub max_order_size: f64,
    pub max_notional: f64,
    pub max_orders_per_min: u32,
    pub min_share_price: f64,
    pub max_daily_loss: f64,
    pub max_daily_trades: u32,
    pub consecutive_loss_limit: u32,
    pub cooldown_minutes: i64,
    pub late_lockout_minutes: i64,
    pub account_equity_base: f64,
    pub max_position_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_concentration_pct: f64,
    pub volatility_scalar: f64,
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub url: Option<String>,
    pub probe_interval_sec: u64,
    pub failure_threshold: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ibkr: IbkrConfig,
    pub risk: RiskEnvConfig,
    pub tunnel: TunnelConfig,
    pub api_key: Option<String>,
    pub db_path: String,
    pub port: u16,
    /// Explicit paper-trading flag, kept alongside the port-keyed bypass
    /// (`risk::gate::PAPER_PORTS`) so the bypass never applies from a port
    /// number alone in a misconfigured production deployment (§9 open
    /// question).
    pub paper_mode: bool,
    pub trailing_stop_pct: f64,
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let ibkr = IbkrConfig {
            host: env::var("IBKR_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("IBKR_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7497),
            client_id: env::var("IBKR_CLIENT_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            mode: env::var("IBKR_MODE")
                .map(|v| ClientMode::parse(&v))
                .unwrap_or(ClientMode::Rest),
        };

        let risk = RiskEnvConfig {
            max_order_size: env_f64("RISK_MAX_ORDER_SIZE", 1000.0),
            max_notional: env_f64("RISK_MAX_NOTIONAL", 25_000.0),
            max_orders_per_min: env_u32("RISK_MAX_ORDERS_PER_MIN", 10),
            min_share_price: env_f64("RISK_MIN_PRICE", 1.0),
            max_daily_loss: env_f64("RISK_MAX_DAILY_LOSS", 500.0),
            max_daily_trades: env_u32("RISK_MAX_DAILY_TRADES", 20),
            consecutive_loss_limit: env_u32("RISK_CONSEC_LOSS_LIMIT", 3),
            cooldown_minutes: env_i64("RISK_COOLDOWN_MINUTES", 30),
            late_lockout_minutes: env_i64("RISK_LATE_LOCKOUT_MIN", 15),
            account_equity_base: env_f64("RISK_ACCOUNT_EQUITY_BASE", 100_000.0),
            max_position_pct: env_f64("RISK_MAX_POSITION_PCT", 0.1),
            max_daily_loss_pct: env_f64("RISK_MAX_DAILY_LOSS_PCT", 0.02),
            max_concentration_pct: env_f64("RISK_MAX_CONCENTRATION_PCT", 0.2),
            volatility_scalar: env_f64("RISK_VOLATILITY_SCALAR", 1.0),
        };

        let tunnel = TunnelConfig {
            url: env::var("TUNNEL_URL").ok(),
            probe_interval_sec: env_u64("TUNNEL_PROBE_INTERVAL_SEC", 30),
            failure_threshold: env_u32("TUNNEL_FAILURE_THRESHOLD", 3),
        };

        Ok(Self {
            ibkr,
            risk,
            tunnel,
            api_key: env::var("API_KEY").ok(),
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "./bridge.db".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            paper_mode: env::var("PAPER_MODE")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            trailing_stop_pct: env_f64("TRAILING_STOP_PCT", 2.0),
        })
    }
}

/// Runtime-configured overrides may only tighten a hard floor, never relax
/// it (§4.B configuration source precedence): effective value = min(hard
/// floor, environment override, runtime-configured value) for caps that are
/// upper bounds.
pub fn tighten_only(hard_floor: f64, env_override: Option<f64>, runtime_value: Option<f64>) -> f64 {
    let mut effective = hard_floor;
    if let Some(v) = env_override {
        effective = effective.min(v);
    }
    if let Some(v) = runtime_value {
        effective = effective.min(v);
    }
    effective
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tighten_only_never_relaxes() {
        assert_eq!(tighten_only(1000.0, Some(1500.0), None), 1000.0);
        assert_eq!(tighten_only(1000.0, Some(500.0), None), 500.0);
        assert_eq!(tighten_only(1000.0, Some(500.0), Some(200.0)), 200.0);
        assert_eq!(tighten_only(1000.0, None, None), 1000.0);
    }
}
