//! Cycle cadence and daily trading window.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// A daily time-of-day window, `start` inclusive and `end` exclusive.
///
/// A window whose end is before its start wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Opening time (UTC).
    pub start: NaiveTime,
    /// Closing time (UTC).
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Create a window.
    #[must_use]
    pub const fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether `time` falls inside the window.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Scheduler configuration for the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between handler cycles.
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Daily window in which cycles run (unset = around the clock).
    #[serde(default)]
    pub window: Option<TimeWindow>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            window: None,
        }
    }
}

const fn default_cycle_interval() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn daytime_window() {
        let window = TimeWindow::new(t(7, 0), t(20, 0));
        assert!(window.contains(t(7, 0)));
        assert!(window.contains(t(12, 30)));
        assert!(!window.contains(t(20, 0)));
        assert!(!window.contains(t(3, 0)));
    }

    #[test]
    fn overnight_window_wraps() {
        let window = TimeWindow::new(t(22, 0), t(6, 0));
        assert!(window.contains(t(23, 0)));
        assert!(window.contains(t(1, 0)));
        assert!(!window.contains(t(12, 0)));
    }
}
