//! Minute-based simulation time and shift-window arithmetic.
//!
//! The logical clock is a monotone `f64` number of minutes since the start of
//! the run. Days are 1440 minutes; the working shift is a daily window given
//! in hours of the day.

use serde::{Deserialize, Serialize};

/// Simulation time in minutes since the start of the run.
pub type Minutes = f64;

pub const MINUTES_PER_HOUR: f64 = 60.0;
pub const MINUTES_PER_DAY: f64 = 24.0 * MINUTES_PER_HOUR;
pub const MINUTES_PER_WEEK: f64 = 7.0 * MINUTES_PER_DAY;

/// End-of-run horizon for a run of `weeks` simulated weeks.
pub fn horizon_minutes(weeks: u32) -> Minutes {
    f64::from(weeks) * MINUTES_PER_WEEK
}

/// Minutes elapsed since the most recent midnight.
pub fn minute_of_day(now: Minutes) -> f64 {
    now.rem_euclid(MINUTES_PER_DAY)
}

/// A daily working window, in hours of the day. Applies every simulated day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShiftWindow {
    pub start_hour: f64,
    pub end_hour: f64,
}

impl ShiftWindow {
    pub fn new(start_hour: f64, end_hour: f64) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    fn start_minute(&self) -> f64 {
        self.start_hour * MINUTES_PER_HOUR
    }

    fn end_minute(&self) -> f64 {
        self.end_hour * MINUTES_PER_HOUR
    }

    /// Whether `now` falls inside the working window (half-open: the shift-end
    /// instant counts as closed).
    pub fn contains(&self, now: Minutes) -> bool {
        let m = minute_of_day(now);
        m >= self.start_minute() && m < self.end_minute()
    }

    /// Absolute time of the next shift opening at or after `now`. Returns
    /// `now` itself when the window is currently open.
    pub fn next_open(&self, now: Minutes) -> Minutes {
        if self.contains(now) {
            return now;
        }
        let day = (now / MINUTES_PER_DAY).floor();
        let today_open = day * MINUTES_PER_DAY + self.start_minute();
        if now < today_open {
            today_open
        } else {
            today_open + MINUTES_PER_DAY
        }
    }

    /// Absolute time of the next shift close strictly after `now`.
    pub fn next_close(&self, now: Minutes) -> Minutes {
        let day = (now / MINUTES_PER_DAY).floor();
        let today_close = day * MINUTES_PER_DAY + self.end_minute();
        if now < today_close {
            today_close
        } else {
            today_close + MINUTES_PER_DAY
        }
    }

    /// Advance `work` minutes of shift-only effort starting at `start`,
    /// skipping closed hours. Returns the absolute completion time. Used for
    /// repairs, which pause at shift end and resume next morning.
    pub fn advance_working(&self, start: Minutes, work: Minutes) -> Minutes {
        let mut now = self.next_open(start);
        let mut left = work;
        loop {
            let close = self.next_close(now);
            let room = close - now;
            if left <= room {
                return now + left;
            }
            left -= room;
            now = self.next_open(close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift() -> ShiftWindow {
        ShiftWindow::new(7.0, 16.0)
    }

    #[test]
    fn horizon_is_weeks_in_minutes() {
        assert_eq!(horizon_minutes(1), 10_080.0);
        assert_eq!(horizon_minutes(4), 40_320.0);
    }

    #[test]
    fn contains_respects_daily_window() {
        let s = shift();
        assert!(!s.contains(0.0)); // midnight
        assert!(s.contains(7.0 * 60.0)); // opening instant
        assert!(s.contains(12.0 * 60.0));
        assert!(!s.contains(16.0 * 60.0)); // closing instant is closed
        assert!(s.contains(MINUTES_PER_DAY + 8.0 * 60.0)); // next day
    }

    #[test]
    fn next_open_rolls_to_tomorrow_after_close() {
        let s = shift();
        assert_eq!(s.next_open(0.0), 420.0);
        assert_eq!(s.next_open(500.0), 500.0); // already open
        assert_eq!(s.next_open(17.0 * 60.0), MINUTES_PER_DAY + 420.0);
    }

    #[test]
    fn advance_working_spans_the_night() {
        let s = shift();
        // 30 minutes of work starting 10 minutes before close.
        let start = 16.0 * 60.0 - 10.0;
        let done = s.advance_working(start, 30.0);
        assert_eq!(done, MINUTES_PER_DAY + 420.0 + 20.0);
    }

    #[test]
    fn advance_working_starts_at_next_open_when_closed() {
        let s = shift();
        let done = s.advance_working(0.0, 60.0);
        assert_eq!(done, 480.0);
    }
}
