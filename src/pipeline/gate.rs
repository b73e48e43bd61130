//! Daily time-of-day window.
//!
//! The window is inclusive on both ends and compared at one-second
//! resolution. It never wraps past midnight: `from > to` denies everything,
//! and `from == to` allows exactly that one second. Malformed bounds deny
//! everything.

use chrono::{FixedOffset, Local, NaiveTime, Timelike, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::session::ActiveWindow;

/// Source of wall-clock time of day and monotonic instants.
pub trait Clock: Send + Sync {
    fn time_of_day(&self) -> NaiveTime;

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Host clock, optionally pinned to a fixed UTC offset instead of the host
/// zone.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    pub fn local() -> Self {
        Self { offset: None }
    }

    /// `None` if the offset is outside +/-24h.
    pub fn with_utc_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self {
            offset: Some(offset),
        })
    }
}

impl Clock for SystemClock {
    fn time_of_day(&self) -> NaiveTime {
        match self.offset {
            Some(offset) => Utc::now().with_timezone(&offset).time(),
            None => Local::now().time(),
        }
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    state: Mutex<(NaiveTime, Instant)>,
}

impl FixedClock {
    pub fn new(time: NaiveTime) -> Self {
        Self {
            state: Mutex::new((time, Instant::now())),
        }
    }

    pub fn set_time(&self, time: NaiveTime) {
        self.lock().0 = time;
    }

    /// Move both the time of day and the monotonic instant forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        state.0 = state.0 + delta;
        state.1 += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (NaiveTime, Instant)> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for FixedClock {
    fn time_of_day(&self) -> NaiveTime {
        self.lock().0
    }

    fn now(&self) -> Instant {
        self.lock().1
    }
}

/// Parse `HH:MM:SS` (24h). `HH:MM` is read as `HH:MM:00`, which is what
/// browser time inputs submit.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

/// `from <= now <= to`, failing closed on malformed bounds.
pub fn allowed(now: NaiveTime, from: &str, to: &str) -> bool {
    match (parse_time_of_day(from), parse_time_of_day(to)) {
        (Some(from), Some(to)) => within(truncate_to_second(now), from, to),
        _ => false,
    }
}

fn within(now: NaiveTime, from: NaiveTime, to: NaiveTime) -> bool {
    from <= now && now <= to
}

fn truncate_to_second(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

/// Pre-parsed window for the pipeline loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindowGate {
    bounds: Option<(NaiveTime, NaiveTime)>,
}

impl TimeWindowGate {
    pub fn new(window: &ActiveWindow) -> Self {
        let bounds = match (parse_time_of_day(&window.from), parse_time_of_day(&window.to)) {
            (Some(from), Some(to)) => {
                if from > to {
                    log::warn!(
                        "TimeWindowGate: window {}-{} wraps midnight; overnight windows are not supported, processing stays idle",
                        window.from,
                        window.to
                    );
                }
                Some((from, to))
            }
            _ => {
                log::warn!(
                    "TimeWindowGate: malformed window '{}'-'{}'; processing stays idle",
                    window.from,
                    window.to
                );
                None
            }
        };
        Self { bounds }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.bounds, Some((from, to)) if from <= to)
    }

    pub fn allows(&self, now: NaiveTime) -> bool {
        match self.bounds {
            Some((from, to)) => within(truncate_to_second(now), from, to),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn inclusive_bounds() {
        assert!(allowed(t(9, 0, 0), "09:00:00", "17:00:00"));
        assert!(allowed(t(17, 0, 0), "09:00:00", "17:00:00"));
        assert!(allowed(t(12, 30, 0), "09:00:00", "17:00:00"));
        assert!(!allowed(t(8, 59, 59), "09:00:00", "17:00:00"));
        assert!(!allowed(t(17, 0, 1), "09:00:00", "17:00:00"));
    }

    #[test]
    fn sub_second_times_compare_at_second_resolution() {
        let late = NaiveTime::from_hms_milli_opt(23, 59, 59, 900).unwrap();
        assert!(allowed(late, "00:00:00", "23:59:59"));
    }

    #[test]
    fn single_instant_window() {
        assert!(allowed(t(9, 0, 0), "09:00:00", "09:00:00"));
        assert!(!allowed(t(9, 0, 1), "09:00:00", "09:00:00"));
        assert!(!allowed(t(12, 0, 0), "09:00:00", "09:00:00"));
    }

    #[test]
    fn no_overnight_wrap() {
        for now in [t(23, 0, 0), t(1, 0, 0), t(12, 0, 0)] {
            assert!(!allowed(now, "22:00:00", "02:00:00"));
        }
        assert!(!TimeWindowGate::new(&ActiveWindow::new("22:00:00", "02:00:00")).is_valid());
    }

    #[test]
    fn malformed_bounds_fail_closed() {
        for (from, to) in [("", "17:00:00"), ("9am", "17:00:00"), ("09:00:00", "25:00:00")] {
            assert!(!allowed(t(12, 0, 0), from, to));
            assert!(!TimeWindowGate::new(&ActiveWindow::new(from, to)).allows(t(12, 0, 0)));
        }
    }

    #[test]
    fn minutes_only_input_is_accepted() {
        assert!(allowed(t(9, 0, 30), "09:00", "09:01"));
    }

    #[test]
    fn fixed_clock_advances_both_readings() {
        let clock = FixedClock::new(t(8, 59, 55));
        let before = clock.now();
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.time_of_day(), t(9, 0, 5));
        assert_eq!(clock.now() - before, Duration::from_secs(10));
    }

    #[test]
    fn utc_offset_is_bounded() {
        assert!(SystemClock::with_utc_offset_minutes(330).is_some());
        assert!(SystemClock::with_utc_offset_minutes(24 * 60).is_none());
    }
}
