//! Injectable time source so the risk gate never reads the clock directly
//! (§9 "Time and calendars").

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_ny(&self) -> DateTime<Tz> {
        self.now().with_timezone(&New_York)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test double: returns a fixed instant, advanceable by tests.
pub struct FixedClock {
    instant: parking_lot::Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: parking_lot::Mutex::new(instant),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock() = instant;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.instant.lock();
        *guard = *guard + delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock()
    }
}

/// Regular trading hours, America/New_York calendar: 09:30-16:00.
pub fn is_regular_trading_hours(now_ny: DateTime<Tz>) -> bool {
    use chrono::Timelike;
    let weekday = now_ny.weekday();
    if matches!(weekday, chrono::Weekday::Sat | chrono::Weekday::Sun) {
        return false;
    }
    let minutes_of_day = now_ny.hour() * 60 + now_ny.minute();
    let open = 9 * 60 + 30;
    let close = 16 * 60;
    minutes_of_day >= open && minutes_of_day < close
}

/// Minutes remaining until the configured close, None if already past close
/// or before open (late-day lockout only applies inside the session).
pub fn minutes_to_close(now_ny: DateTime<Tz>) -> Option<i64> {
    use chrono::Timelike;
    if !is_regular_trading_hours(now_ny) {
        return None;
    }
    let minutes_of_day = now_ny.hour() as i64 * 60 + now_ny.minute() as i64;
    let close = 16 * 60;
    Some(close - minutes_of_day)
}

pub fn ny_date(now_ny: DateTime<Tz>) -> chrono::NaiveDate {
    now_ny.date_naive()
}

pub fn to_ny(dt: DateTime<Utc>) -> DateTime<Tz> {
    New_York.from_utc_datetime(&dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn weekend_is_never_rth() {
        // Saturday 2024-06-01 noon NY.
        let ny = New_York.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert!(!is_regular_trading_hours(ny));
    }

    #[test]
    fn market_open_boundary() {
        let before = New_York.with_ymd_and_hms(2024, 6, 3, 9, 29, 59).unwrap();
        let at_open = New_York.with_ymd_and_hms(2024, 6, 3, 9, 30, 0).unwrap();
        assert!(!is_regular_trading_hours(before));
        assert!(is_regular_trading_hours(at_open));
    }

    #[test]
    fn market_close_boundary() {
        let last_minute = New_York.with_ymd_and_hms(2024, 6, 3, 15, 59, 0).unwrap();
        let at_close = New_York.with_ymd_and_hms(2024, 6, 3, 16, 0, 0).unwrap();
        assert!(is_regular_trading_hours(last_minute));
        assert!(!is_regular_trading_hours(at_close));
    }
}
