use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use stakeward_core::{Outcome, Schedule};

/// Completion tally for a periodic commitment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub completed: i64,
    pub expected: i64,
}

impl Progress {
    pub fn new(completed: i64, expected: i64) -> Self {
        Self {
            completed,
            expected,
        }
    }

    /// The 80% rule, inclusive: 4/5 succeeds, 3/4 fails. Integer
    /// cross-multiplication keeps the boundary exact. An empty schedule has
    /// no defined rate and fails defensively.
    pub fn outcome(&self) -> Outcome {
        if self.expected <= 0 {
            return Outcome::Failure;
        }
        if self.completed * 5 >= self.expected * 4 {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }

    pub fn rate(&self) -> f64 {
        if self.expected <= 0 {
            return 0.0;
        }
        self.completed as f64 / self.expected as f64
    }
}

/// Every calendar date in `[start_on, start_on + duration_weeks * 7]`, both
/// endpoints inclusive, whose weekday is in `days_of_week` (0 = Sunday).
pub fn expected_instances(schedule: &Schedule) -> Vec<NaiveDate> {
    if schedule.duration_weeks < 0 {
        return Vec::new();
    }
    let last = end_date(schedule);
    let mut instances = Vec::new();
    let mut current = schedule.start_on;
    while current <= last {
        let day = current.weekday().num_days_from_sunday() as i16;
        if schedule.days_of_week.contains(&day) {
            instances.push(current);
        }
        current += Duration::days(1);
    }
    instances
}

pub fn end_date(schedule: &Schedule) -> NaiveDate {
    schedule.start_on + Duration::days(i64::from(schedule.duration_weeks) * 7)
}

pub fn progress(schedule: &Schedule, check_in_count: i64) -> Progress {
    Progress::new(check_in_count, expected_instances(schedule).len() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn schedule(start: NaiveDate, weeks: i32, days: &[i16]) -> Schedule {
        Schedule {
            start_on: start,
            duration_weeks: weeks,
            days_of_week: days.to_vec(),
        }
    }

    #[test]
    fn mon_wed_fri_one_week_inclusive_endpoints() {
        // 2025-06-02 is a Monday; the window runs through 2025-06-09
        // inclusive, so the closing Monday counts too.
        let s = schedule(date(2025, 6, 2), 1, &[1, 3, 5]);
        let instances = expected_instances(&s);
        assert_eq!(
            instances,
            vec![
                date(2025, 6, 2),
                date(2025, 6, 4),
                date(2025, 6, 6),
                date(2025, 6, 9),
            ]
        );
    }

    #[test]
    fn daily_for_two_weeks() {
        let s = schedule(date(2025, 6, 1), 2, &[0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(expected_instances(&s).len(), 15);
    }

    #[test]
    fn end_date_is_weeks_times_seven() {
        let s = schedule(date(2025, 6, 2), 4, &[1]);
        assert_eq!(end_date(&s), date(2025, 6, 30));
    }

    #[test]
    fn no_selected_days_yields_no_instances() {
        let s = schedule(date(2025, 6, 2), 4, &[]);
        assert!(expected_instances(&s).is_empty());
    }

    #[test]
    fn four_of_five_is_success() {
        assert_eq!(Progress::new(4, 5).outcome(), Outcome::Success);
    }

    #[test]
    fn three_of_four_is_failure() {
        assert_eq!(Progress::new(3, 4).outcome(), Outcome::Failure);
    }

    #[test]
    fn exact_boundary_is_inclusive() {
        assert_eq!(Progress::new(8, 10).outcome(), Outcome::Success);
        assert_eq!(Progress::new(79, 100).outcome(), Outcome::Failure);
        assert_eq!(Progress::new(80, 100).outcome(), Outcome::Success);
    }

    #[test]
    fn empty_schedule_fails_defensively() {
        assert_eq!(Progress::new(0, 0).outcome(), Outcome::Failure);
        assert_eq!(Progress::new(3, 0).outcome(), Outcome::Failure);
        assert_eq!(Progress::new(0, 0).rate(), 0.0);
    }

    #[test]
    fn progress_counts_expected_from_schedule() {
        let s = schedule(date(2025, 6, 2), 1, &[1, 3, 5]);
        let p = progress(&s, 4);
        assert_eq!(p.expected, 4);
        assert_eq!(p.outcome(), Outcome::Success);
    }
}
