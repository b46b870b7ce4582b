//! Stop-price policies (§4.D). Exactly one policy is active at a time;
//! switching is atomic because `StopPolicy` is a plain value swapped behind
//! a lock by the executor.

use super::position::PositionState;

#[derive(Debug, Clone, Copy)]
pub enum StopPolicy {
    FixedPct { pct: f64 },
    AtrMultiple { k: f64 },
    BreakevenTrail { be_trigger_r: f64, post_be_trail_pct: f64 },
}

impl StopPolicy {
    /// Computes the candidate stop price for `position` under this policy.
    /// `None` means "no movement" — the executor leaves the committed stop
    /// untouched. `BreakevenTrail` mutates `position.breakeven_triggered`
    /// as a side effect of crossing the trigger.
    pub fn candidate(&self, position: &mut PositionState) -> Option<f64> {
        let hwm = position.high_water_mark?;
        match *self {
            StopPolicy::FixedPct { pct } => Some(fixed_pct(hwm, pct, position.is_short())),
            StopPolicy::AtrMultiple { k } => {
                let atr = position.avg_cost * 0.02;
                let distance = k * atr;
                Some(if position.is_short() { hwm + distance } else { hwm - distance })
            }
            StopPolicy::BreakevenTrail {
                be_trigger_r,
                post_be_trail_pct,
            } => {
                let r = position.r_multiple();
                if !position.breakeven_triggered {
                    if r < be_trigger_r {
                        return None;
                    }
                    position.breakeven_triggered = true;
                    return Some(position.avg_cost);
                }
                Some(fixed_pct(hwm, post_be_trail_pct, position.is_short()))
            }
        }
    }
}

fn fixed_pct(hwm: f64, pct: f64, is_short: bool) -> f64 {
    if is_short {
        hwm * (1.0 + pct / 100.0)
    } else {
        hwm * (1.0 - pct / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_pct_long_candidate_matches_spec_scenario_three() {
        let mut pos = PositionState::new("AAPL", 100.0, 150.0);
        pos.on_price_update(155.0);
        let policy = StopPolicy::FixedPct { pct: 2.0 };
        let candidate = policy.candidate(&mut pos).unwrap();
        assert!((candidate - 151.9).abs() < 1e-9);
    }

    #[test]
    fn breakeven_trail_triggers_at_exactly_one_r_matches_spec_scenario_four() {
        let mut pos = PositionState::new("AAPL", 100.0, 150.0);
        pos.current_price = 153.0;
        pos.unrealized_pnl = 300.0;
        pos.high_water_mark = Some(153.0);
        let policy = StopPolicy::BreakevenTrail {
            be_trigger_r: 1.0,
            post_be_trail_pct: 1.0,
        };
        let candidate = policy.candidate(&mut pos).unwrap();
        assert_eq!(candidate, 150.0);
        assert!(pos.breakeven_triggered);
    }

    #[test]
    fn breakeven_trail_below_trigger_does_not_move() {
        let mut pos = PositionState::new("AAPL", 100.0, 150.0);
        pos.current_price = 150.5;
        pos.unrealized_pnl = 50.0;
        pos.high_water_mark = Some(150.5);
        let policy = StopPolicy::BreakevenTrail {
            be_trigger_r: 1.0,
            post_be_trail_pct: 1.0,
        };
        assert!(policy.candidate(&mut pos).is_none());
        assert!(!pos.breakeven_triggered);
    }

    #[test]
    fn breakeven_trail_after_trigger_uses_fixed_pct_off_hwm() {
        let mut pos = PositionState::new("AAPL", 100.0, 150.0);
        pos.breakeven_triggered = true;
        pos.high_water_mark = Some(160.0);
        let policy = StopPolicy::BreakevenTrail {
            be_trigger_r: 1.0,
            post_be_trail_pct: 1.0,
        };
        let candidate = policy.candidate(&mut pos).unwrap();
        assert!((candidate - 158.4).abs() < 1e-9);
    }

    #[test]
    fn short_fixed_pct_moves_stop_above_hwm() {
        let mut pos = PositionState::new("AAPL", -100.0, 150.0);
        pos.on_price_update(145.0);
        let policy = StopPolicy::FixedPct { pct: 2.0 };
        let candidate = policy.candidate(&mut pos).unwrap();
        assert!((candidate - 147.9).abs() < 1e-9);
    }
}
