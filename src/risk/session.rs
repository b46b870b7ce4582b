//! Process-wide daily trading state (§3 "Session", §4.B session transitions).
//! Exclusively owned by the risk gate.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use super::clock::{ny_date, to_ny};

#[derive(Debug, Clone)]
pub struct Session {
    pub date: chrono::NaiveDate,
    pub realized_pnl: f64,
    pub trade_count: u32,
    pub consecutive_losses: u32,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub last_loss_time: Option<DateTime<Utc>>,
    pub locked: bool,
    pub lock_reason: Option<String>,
    /// Timestamps of recently-admitted orders, oldest first, used for the
    /// trailing-60s order-rate window (§4.B point 10).
    rate_window: VecDeque<DateTime<Utc>>,
}

impl Session {
    pub fn new(date: chrono::NaiveDate) -> Self {
        Self {
            date,
            realized_pnl: 0.0,
            trade_count: 0,
            consecutive_losses: 0,
            last_trade_time: None,
            last_loss_time: None,
            locked: false,
            lock_reason: None,
            rate_window: VecDeque::new(),
        }
    }

    /// Lazily resets the session to a fresh day when the America/New_York
    /// calendar date has moved on (§4.B `ensure_today`).
    pub fn ensure_today(&mut self, now: DateTime<Utc>) {
        let today = ny_date(to_ny(now));
        if today != self.date {
            *self = Session::new(today);
        }
    }

    pub fn record_trade(&mut self, pnl: f64, now: DateTime<Utc>) {
        self.realized_pnl += pnl;
        self.trade_count += 1;
        self.last_trade_time = Some(now);
        if pnl < 0.0 {
            self.consecutive_losses += 1;
            self.last_loss_time = Some(now);
        } else {
            self.consecutive_losses = 0;
        }
    }

    pub fn lock(&mut self, reason: impl Into<String>) {
        self.locked = true;
        self.lock_reason = Some(reason.into());
    }

    pub fn unlock(&mut self) {
        self.locked = false;
        self.lock_reason = None;
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        *self = Session::new(ny_date(to_ny(now)));
    }

    /// Number of admitted orders within the trailing 60s window, evicting
    /// any entries that have aged out. 59s apart both count; 60s evicts the
    /// older entry (§8 boundary behaviors).
    pub fn orders_in_last_60s(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::seconds(60);
        while let Some(front) = self.rate_window.front() {
            if *front <= cutoff {
                self.rate_window.pop_front();
            } else {
                break;
            }
        }
        self.rate_window.len()
    }

    pub fn record_admitted_order(&mut self, now: DateTime<Utc>) {
        self.rate_window.push_back(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn consecutive_losses_reset_on_winning_trade() {
        let mut session = Session::new(ny_date(to_ny(utc(2024, 6, 3, 10, 0, 0))));
        session.record_trade(-100.0, utc(2024, 6, 3, 10, 1, 0));
        session.record_trade(-50.0, utc(2024, 6, 3, 10, 2, 0));
        assert_eq!(session.consecutive_losses, 2);
        session.record_trade(75.0, utc(2024, 6, 3, 10, 3, 0));
        assert_eq!(session.consecutive_losses, 0);
        assert_eq!(session.realized_pnl, -75.0);
        assert_eq!(session.trade_count, 3);
    }

    #[test]
    fn ensure_today_resets_on_date_change() {
        let mut session = Session::new(ny_date(to_ny(utc(2024, 6, 3, 10, 0, 0))));
        session.record_trade(-500.0, utc(2024, 6, 3, 10, 0, 0));
        session.ensure_today(utc(2024, 6, 4, 10, 0, 0));
        assert_eq!(session.realized_pnl, 0.0);
        assert_eq!(session.trade_count, 0);
    }

    #[test]
    fn ensure_today_is_noop_within_same_day() {
        let mut session = Session::new(ny_date(to_ny(utc(2024, 6, 3, 10, 0, 0))));
        session.record_trade(-500.0, utc(2024, 6, 3, 10, 0, 0));
        session.ensure_today(utc(2024, 6, 3, 15, 0, 0));
        assert_eq!(session.realized_pnl, -500.0);
    }

    #[test]
    fn rate_window_evicts_at_exactly_60_seconds() {
        let mut session = Session::new(ny_date(to_ny(utc(2024, 6, 3, 10, 0, 0))));
        session.record_admitted_order(utc(2024, 6, 3, 10, 0, 0));
        // 59s later: still counted.
        assert_eq!(session.orders_in_last_60s(utc(2024, 6, 3, 10, 0, 59)), 1);
        // 60s later: evicted.
        assert_eq!(session.orders_in_last_60s(utc(2024, 6, 3, 10, 1, 0)), 0);
    }

    #[test]
    fn lock_unlock_round_trip() {
        let mut session = Session::new(ny_date(to_ny(utc(2024, 6, 3, 10, 0, 0))));
        session.lock("manual halt");
        assert!(session.locked);
        assert_eq!(session.lock_reason.as_deref(), Some("manual halt"));
        session.unlock();
        assert!(!session.locked);
        assert!(session.lock_reason.is_none());
    }
}
