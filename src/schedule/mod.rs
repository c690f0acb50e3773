//! When the daemon runs its update cycle.

use chrono::{Local, Timelike};
use std::time::Duration;

use crate::config::ScheduleConfig;

/// Whether `hour` falls inside `[start, end)`. A range with `start > end`
/// wraps past midnight; `start == end` is an empty window.
pub fn within_hours(start: u8, end: u8, hour: u8) -> bool {
    if start <= end {
        // Normal range (e.g., 9-17)
        hour >= start && hour < end
    } else {
        // Overnight range (e.g., 22-6)
        hour >= start || hour < end
    }
}

/// Check the configured hours of operation against `hour`.
pub fn should_run_at(schedule: &ScheduleConfig, hour: u8) -> bool {
    match (schedule.hours_start, schedule.hours_end) {
        (Some(start), Some(end)) => within_hours(start, end, hour),
        _ => true,
    }
}

/// Check the configured hours of operation against the local clock.
pub fn should_run_now(schedule: &ScheduleConfig) -> bool {
    should_run_at(schedule, Local::now().hour() as u8)
}

/// Pause between two cycles.
pub fn interval(schedule: &ScheduleConfig) -> Duration {
    Duration::from_secs(schedule.interval_hours.max(1) * 3600)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_range() {
        assert!(!within_hours(9, 17, 8));
        assert!(within_hours(9, 17, 9));
        assert!(within_hours(9, 17, 16));
        assert!(!within_hours(9, 17, 17));
    }

    #[test]
    fn test_overnight_range() {
        assert!(within_hours(22, 6, 23));
        assert!(within_hours(22, 6, 0));
        assert!(within_hours(22, 6, 5));
        assert!(!within_hours(22, 6, 6));
        assert!(!within_hours(22, 6, 12));
    }

    #[test]
    fn test_unbounded_schedule_always_runs() {
        let mut schedule = ScheduleConfig::default();
        assert!(should_run_at(&schedule, 3));

        schedule.hours_start = Some(1);
        assert!(should_run_at(&schedule, 12));

        schedule.hours_end = Some(4);
        assert!(should_run_at(&schedule, 3));
        assert!(!should_run_at(&schedule, 12));
    }

    #[test]
    fn test_interval() {
        let mut schedule = ScheduleConfig::default();
        assert_eq!(interval(&schedule), Duration::from_secs(24 * 3600));
        schedule.interval_hours = 0;
        assert_eq!(interval(&schedule), Duration::from_secs(3600));
    }
}
