//! Pre-trade admission controller (§4.B). Fail-closed: the first rule that
//! triggers wins and no later rule is evaluated.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::config::RiskEnvConfig;
use crate::models::PlaceOrderRequest;

use super::clock::{is_regular_trading_hours, minutes_to_close, to_ny, Clock};
use super::session::Session;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Admitted,
    Denied { reason: String },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }
}

/// Paper-trading broker ports the source keys its bypass on (§9 open
/// question). Kept alongside an explicit `paper_mode` flag so the bypass
/// never silently applies from a port number alone in a misconfigured
/// production deployment.
pub const PAPER_PORTS: [u16; 2] = [7497, 4002];

pub struct RiskGate<C: Clock> {
    clock: C,
    env: RiskEnvConfig,
    /// Runtime-configured overrides loaded from the risk-config persistence
    /// collaborator; may only tighten the environment/hard floor (§4.B
    /// configuration source precedence).
    runtime_overrides: Mutex<RuntimeOverrides>,
    session: Mutex<Session>,
    broker_port: u16,
    paper_mode: bool,
}

#[derive(Debug, Default, Clone)]
pub struct RuntimeOverrides {
    pub max_order_size: Option<f64>,
    pub max_notional: Option<f64>,
}

pub struct OrderContext<'a> {
    pub request: &'a PlaceOrderRequest,
    pub reference_price: Option<f64>,
}

impl<C: Clock> RiskGate<C> {
    pub fn new(clock: C, env: RiskEnvConfig, broker_port: u16, paper_mode: bool) -> Self {
        Self {
            clock,
            env,
            runtime_overrides: Mutex::new(RuntimeOverrides::default()),
            session: Mutex::new(Session::new(chrono::Utc::now().date_naive())),
            broker_port,
            paper_mode,
        }
    }

    pub fn set_runtime_overrides(&self, overrides: RuntimeOverrides) {
        *self.runtime_overrides.lock() = overrides;
    }

    pub fn session(&self) -> &Mutex<Session> {
        &self.session
    }

    pub fn effective_max_order_size(&self) -> f64 {
        crate::config::tighten_only(
            self.env.max_order_size,
            None,
            self.runtime_overrides.lock().max_order_size,
        )
    }

    pub fn effective_max_notional(&self) -> f64 {
        let dynamic_cap = self.env.account_equity_base
            * self.env.max_position_pct.min(self.env.max_concentration_pct)
            * self.env.volatility_scalar;
        crate::config::tighten_only(
            self.env.max_notional.min(dynamic_cap),
            None,
            self.runtime_overrides.lock().max_notional,
        )
    }

    /// Evaluates the eleven-step decision chain of §4.B in order, admitting
    /// only if every step passes. On admission, the current timestamp is
    /// appended to the session's rate window.
    pub fn check(&self, ctx: OrderContext<'_>) -> Decision {
        let now = self.clock.now();
        let mut session = self.session.lock();
        session.ensure_today(now);

        // 1. Paper-trading bypass.
        if self.paper_mode || PAPER_PORTS.contains(&self.broker_port) {
            session.record_admitted_order(now);
            return Decision::Admitted;
        }

        // 2. Session lock.
        if session.locked {
            return Decision::Denied {
                reason: format!(
                    "Session locked: {}",
                    session.lock_reason.as_deref().unwrap_or("no reason given")
                ),
            };
        }

        // 3. Daily loss.
        if session.realized_pnl <= -self.env.max_daily_loss {
            return Decision::Denied {
                reason: format!(
                    "Daily loss limit reached: realized {:.2} <= -{:.2}",
                    session.realized_pnl, self.env.max_daily_loss
                ),
            };
        }

        // 4. Trade count.
        if session.trade_count >= self.env.max_daily_trades {
            return Decision::Denied {
                reason: format!(
                    "Daily trade count limit reached: {} >= {}",
                    session.trade_count, self.env.max_daily_trades
                ),
            };
        }

        // 5. Consecutive losses + cooldown.
        if session.consecutive_losses >= self.env.consecutive_loss_limit {
            if let Some(last_loss) = session.last_loss_time {
                let cooldown = chrono::Duration::minutes(self.env.cooldown_minutes);
                if now - last_loss < cooldown {
                    return Decision::Denied {
                        reason: format!(
                            "Consecutive loss cooldown active: {} losses, {} min remaining",
                            session.consecutive_losses,
                            (cooldown - (now - last_loss)).num_minutes()
                        ),
                    };
                }
            }
        }

        let now_ny = to_ny(now);

        // 6. Late-day lockout.
        if let Some(remaining) = minutes_to_close(now_ny) {
            if remaining < self.env.late_lockout_minutes {
                return Decision::Denied {
                    reason: format!(
                        "Late-day lockout: {} min to close < {} min lockout window",
                        remaining, self.env.late_lockout_minutes
                    ),
                };
            }
        }

        // 7. Regular trading hours.
        if !is_regular_trading_hours(now_ny) {
            return Decision::Denied {
                reason: "Outside regular trading hours".to_string(),
            };
        }

        // 8. Max order size.
        let quantity = ctx.request.quantity();
        let max_order_size = self.effective_max_order_size();
        if quantity > max_order_size {
            return Decision::Denied {
                reason: format!(
                    "Order size {} exceeds max {}",
                    quantity, max_order_size
                ),
            };
        }

        // 9. Notional cap.
        let reference_price = ctx.reference_price.unwrap_or(0.0);
        let notional = quantity * reference_price;
        let max_notional = self.effective_max_notional();
        if notional > max_notional {
            return Decision::Denied {
                reason: format!(
                    "Notional {:.2} exceeds max {:.2}",
                    notional, max_notional
                ),
            };
        }

        // 10. Order rate.
        let recent_orders = session.orders_in_last_60s(now);
        if recent_orders as u32 >= self.env.max_orders_per_min {
            return Decision::Denied {
                reason: format!(
                    "Order rate limit: {} orders in trailing 60s >= {}",
                    recent_orders, self.env.max_orders_per_min
                ),
            };
        }

        // 11. Min share price.
        if reference_price < self.env.min_share_price {
            return Decision::Denied {
                reason: format!(
                    "Reference price {:.2} below minimum {:.2}",
                    reference_price, self.env.min_share_price
                ),
            };
        }

        session.record_admitted_order(now);
        Decision::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, TimeInForce};
    use crate::risk::clock::FixedClock;
    use chrono::TimeZone;

    fn base_env() -> RiskEnvConfig {
        RiskEnvConfig {
            max_order_size: 1000.0,
            max_notional: 25_000.0,
            max_orders_per_min: 10,
            min_share_price: 1.0,
            max_daily_loss: 500.0,
            max_daily_trades: 20,
            consecutive_loss_limit: 3,
            cooldown_minutes: 30,
            late_lockout_minutes: 15,
            account_equity_base: 100_000.0,
            max_position_pct: 0.1,
            max_daily_loss_pct: 0.02,
            max_concentration_pct: 0.2,
            volatility_scalar: 1.0,
        }
    }

    fn market_order(quantity: f64) -> PlaceOrderRequest {
        PlaceOrderRequest::Market {
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            quantity,
            tif: TimeInForce::Day,
        }
    }

    fn rth_wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 5, 14, 0, 0).unwrap() // 10:00 NY
    }

    #[test]
    fn daily_loss_limit_denies_with_matching_reason() {
        let clock = FixedClock::new(rth_wednesday());
        let gate = RiskGate::new(clock, base_env(), 7496, false);
        gate.session().lock().record_trade(-500.0, rth_wednesday());

        let order = market_order(10.0);
        let decision = gate.check(OrderContext {
            request: &order,
            reference_price: Some(50.0),
        });
        match decision {
            Decision::Denied { reason } => assert!(reason.contains("Daily loss limit")),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn order_at_cap_is_admitted_cap_plus_one_denied() {
        let clock = FixedClock::new(rth_wednesday());
        let gate = RiskGate::new(clock, base_env(), 7496, false);

        let at_cap = market_order(1000.0);
        let decision = gate.check(OrderContext {
            request: &at_cap,
            reference_price: Some(10.0),
        });
        assert!(decision.is_admitted());

        let over_cap = market_order(1001.0);
        let decision = gate.check(OrderContext {
            request: &over_cap,
            reference_price: Some(10.0),
        });
        assert!(!decision.is_admitted());
    }

    #[test]
    fn paper_port_bypasses_every_other_check() {
        let clock = FixedClock::new(rth_wednesday());
        let gate = RiskGate::new(clock, base_env(), 7497, false);
        gate.session().lock().lock("should be ignored under paper bypass");

        let order = market_order(999_999.0);
        let decision = gate.check(OrderContext {
            request: &order,
            reference_price: Some(0.01),
        });
        assert!(decision.is_admitted());
    }

    #[test]
    fn outside_trading_hours_denied() {
        let after_close = Utc.with_ymd_and_hms(2024, 6, 5, 21, 0, 0).unwrap(); // 17:00 NY
        let clock = FixedClock::new(after_close);
        let gate = RiskGate::new(clock, base_env(), 7496, false);
        let order = market_order(10.0);
        let decision = gate.check(OrderContext {
            request: &order,
            reference_price: Some(50.0),
        });
        assert!(!decision.is_admitted());
    }

    #[test]
    fn tightening_a_cap_never_turns_a_denial_into_an_admission() {
        // Property 4 (§8): monotone in caps.
        let clock = FixedClock::new(rth_wednesday());
        let mut loose_env = base_env();
        loose_env.max_order_size = 100.0;
        let loose_gate = RiskGate::new(clock, loose_env, 7496, false);
        let order = market_order(50.0);
        assert!(loose_gate
            .check(OrderContext {
                request: &order,
                reference_price: Some(10.0),
            })
            .is_admitted());

        let clock = FixedClock::new(rth_wednesday());
        let mut tighter_env = base_env();
        tighter_env.max_order_size = 10.0;
        let tighter_gate = RiskGate::new(clock, tighter_env, 7496, false);
        assert!(!tighter_gate
            .check(OrderContext {
                request: &order,
                reference_price: Some(10.0),
            })
            .is_admitted());
    }

    #[test]
    fn rate_limit_denies_after_max_orders_per_minute() {
        let now = rth_wednesday();
        let clock = FixedClock::new(now);
        let mut env = base_env();
        env.max_orders_per_min = 2;
        let gate = RiskGate::new(clock, env, 7496, false);
        let order = market_order(1.0);

        assert!(gate
            .check(OrderContext {
                request: &order,
                reference_price: Some(10.0),
            })
            .is_admitted());
        assert!(gate
            .check(OrderContext {
                request: &order,
                reference_price: Some(10.0),
            })
            .is_admitted());
        let decision = gate.check(OrderContext {
            request: &order,
            reference_price: Some(10.0),
        });
        assert!(!decision.is_admitted());
    }
}
