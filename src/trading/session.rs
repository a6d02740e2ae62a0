// src/trading/session.rs
use crate::config::SessionConfig;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use std::sync::atomic::{AtomicI64, Ordering};

/// Time source shared by both execution modes. Live mode reads the wall
/// clock; replay mode advances a simulated clock from candle timestamps, so
/// every deadline check is deterministic.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Simulated clock for deterministic replay.
#[derive(Debug, Default)]
pub struct SimClock {
    now: AtomicI64,
}

impl SimClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set_ms(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Session boundaries and the trade windows derived from them. All checks
/// are deadline comparisons against the tick's timestamp; nothing is
/// scheduled, so the checks replay identically.
///
/// Candle timestamps are treated as exchange-local milliseconds; the derived
/// time of day is compared directly against the configured session times.
#[derive(Debug, Clone)]
pub struct SessionSchedule {
    config: SessionConfig,
}

impl SessionSchedule {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    fn time_of_day(&self, now_ms: i64) -> Option<(Weekday, NaiveTime)> {
        let dt: DateTime<Utc> = DateTime::from_timestamp_millis(now_ms)?;
        let naive = dt.naive_utc();
        Some((naive.weekday(), naive.time()))
    }

    /// Whether the market session is open at all (weekday, inside hours).
    pub fn is_session_open(&self, now_ms: i64) -> bool {
        match self.time_of_day(now_ms) {
            Some((weekday, time)) => {
                !matches!(weekday, Weekday::Sat | Weekday::Sun)
                    && time >= self.config.open
                    && time <= self.config.close
            }
            None => false,
        }
    }

    /// Whether a new entry may be created: session open, past the opening
    /// no-trade window, before the cutoff, and clear of the auto-close
    /// window.
    pub fn entry_allowed(&self, now_ms: i64) -> bool {
        if !self.is_session_open(now_ms) {
            return false;
        }
        let time = match self.time_of_day(now_ms) {
            Some((_, time)) => time,
            None => return false,
        };

        let window_end = self
            .config
            .open
            .overflowing_add_signed(Duration::minutes(self.config.no_trade_window_minutes))
            .0;
        if time < window_end {
            return false;
        }
        if time > self.config.cutoff_time {
            return false;
        }
        !self.auto_close_due(now_ms)
    }

    /// Whether all open trades must be force-closed ahead of the session
    /// close.
    pub fn auto_close_due(&self, now_ms: i64) -> bool {
        let time = match self.time_of_day(now_ms) {
            Some((_, time)) => time,
            None => return false,
        };
        let auto_close_start = self
            .config
            .close
            .overflowing_sub_signed(Duration::minutes(self.config.auto_close_minutes))
            .0;
        time >= auto_close_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ms_at(hour: u32, minute: u32) -> i64 {
        // Wednesday 2024-01-03
        NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    fn schedule() -> SessionSchedule {
        SessionSchedule::new(SessionConfig::default())
    }

    #[test]
    fn entries_blocked_inside_opening_window() {
        let schedule = schedule();
        assert!(!schedule.entry_allowed(ms_at(9, 31)));
        assert!(schedule.entry_allowed(ms_at(9, 33)));
    }

    #[test]
    fn entries_blocked_after_cutoff() {
        let schedule = schedule();
        assert!(schedule.entry_allowed(ms_at(15, 15)));
        assert!(!schedule.entry_allowed(ms_at(15, 16)));
    }

    #[test]
    fn auto_close_window_before_session_close() {
        let schedule = schedule();
        assert!(!schedule.auto_close_due(ms_at(15, 44)));
        assert!(schedule.auto_close_due(ms_at(15, 45)));
        assert!(schedule.auto_close_due(ms_at(15, 59)));
    }

    #[test]
    fn weekend_is_closed() {
        // Saturday 2024-01-06
        let saturday = NaiveDate::from_ymd_opt(2024, 1, 6)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        assert!(!schedule().is_session_open(saturday));
        assert!(!schedule().entry_allowed(saturday));
    }

    #[test]
    fn sim_clock_replays_deterministically() {
        let clock = SimClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.set_ms(2_000);
        assert_eq!(clock.now_ms(), 2_000);
    }
}
