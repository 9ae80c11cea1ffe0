/*
Schedule activation logic.
Pure functions over an immutable snapshot of schedules and a reference
date/instant supplied by the caller. No clocks, no I/O, no state.
*/

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::{RepeatMode, RuleType, Schedule, TimeOfDay};

// Dates that carry at least one schedule, for calendar indicators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub schedule_ids: Vec<Uuid>,
}

// Schedule list filter offered by the dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFilter {
    #[default]
    All,
    Limit,
    Quota,
    Active,
}

// Is `date` inside [start_date, end_date]? Absent bounds do not constrain.
pub fn date_in_range(schedule: &Schedule, date: NaiveDate) -> bool {
    if schedule.start_date.is_some_and(|start| date < start) {
        return false;
    }
    if schedule.end_date.is_some_and(|end| date > end) {
        return false;
    }
    true
}

// Inclusive on both ends. start > end is an overnight window that wraps midnight.
pub fn time_in_window(start: TimeOfDay, end: TimeOfDay, t: TimeOfDay) -> bool {
    if start <= end {
        start <= t && t <= end
    } else {
        t >= start || t <= end
    }
}

// Does the repeat pattern select this calendar date?
//
// - once: only the start date itself (end_date plays no part)
// - weekdays: Mon..Fri, weekends: Sat/Sun
// - custom: weekday in custom_days; absent or empty set never matches
pub fn repeat_matches(schedule: &Schedule, date: NaiveDate) -> bool {
    let weekday = date.weekday();
    match schedule.repeat_mode {
        RepeatMode::Once => match schedule.start_date {
            Some(start) => start == date,
            None => {
                trace!(id = %schedule.id, "once schedule without start_date, never active");
                false
            }
        },
        RepeatMode::Daily => true,
        RepeatMode::Weekdays => !matches!(weekday, Weekday::Sat | Weekday::Sun),
        RepeatMode::Weekends => matches!(weekday, Weekday::Sat | Weekday::Sun),
        RepeatMode::Custom => match schedule.custom_days {
            Some(days) if !days.is_empty() => days.contains(weekday),
            _ => {
                trace!(id = %schedule.id, "custom schedule without days, never active");
                false
            }
        },
    }
}

/// Whether `schedule` is in force at the local wall-clock `instant`.
///
/// Disabled schedules are never active. Otherwise the date range, the
/// time-of-day window and the repeat pattern must all hold; the checks run
/// in that order and stop at the first failure. Time is compared at minute
/// granularity.
///
/// An overnight window is matched against the date of `instant` itself:
/// at 05:30 on Saturday a weekdays-only 22:00-06:00 schedule is inactive even
/// though its Friday night span started the evening before.
pub fn is_active_at(schedule: &Schedule, instant: &NaiveDateTime) -> bool {
    if !schedule.is_enabled {
        return false;
    }
    let today = instant.date();
    if !date_in_range(schedule, today) {
        return false;
    }
    if !time_in_window(schedule.start_time, schedule.end_time, TimeOfDay::of(instant)) {
        return false;
    }
    repeat_matches(schedule, today)
}

/// Schedules that could apply at some point on `date`, ignoring time of day.
/// Used for calendar indicators.
pub fn active_on(schedules: &[Schedule], date: NaiveDate) -> Vec<&Schedule> {
    schedules
        .iter()
        .filter(|s| s.is_enabled)
        .filter(|s| date_in_range(s, date))
        .filter(|s| repeat_matches(s, date))
        .collect()
}

/// Every schedule active at `instant`, in input order. Overlaps on the same
/// device are all returned; no winner is picked.
pub fn active_at<'a>(schedules: &'a [Schedule], instant: &NaiveDateTime) -> Vec<&'a Schedule> {
    schedules
        .iter()
        .filter(|s| is_active_at(s, instant))
        .collect()
}

// device_ip -> ids of every schedule active on it at `instant`
pub fn active_by_device(
    schedules: &[Schedule],
    instant: &NaiveDateTime,
) -> BTreeMap<String, Vec<Uuid>> {
    let mut by_device: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
    for s in active_at(schedules, instant) {
        by_device.entry(s.device_ip.clone()).or_default().push(s.id);
    }
    by_device
}

// `active_on` for each day of a month. Days without schedules are included
// with an empty list so the caller can lay out the grid directly.
pub fn calendar_month(
    schedules: &[Schedule],
    year: i32,
    month: u32,
) -> Result<Vec<CalendarDay>, ValidationError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or(ValidationError::InvalidMonth { year, month })?;

    Ok(first
        .iter_days()
        .take_while(|d| d.month() == month)
        .map(|date| CalendarDay {
            date,
            schedule_ids: active_on(schedules, date).iter().map(|s| s.id).collect(),
        })
        .collect())
}

pub fn filter_schedules<'a>(
    schedules: &'a [Schedule],
    filter: ScheduleFilter,
    instant: &NaiveDateTime,
) -> Vec<&'a Schedule> {
    schedules
        .iter()
        .filter(|s| match filter {
            ScheduleFilter::All => true,
            ScheduleFilter::Limit => s.rule_type == RuleType::Limit,
            ScheduleFilter::Quota => s.rule_type == RuleType::Quota,
            ScheduleFilter::Active => is_active_at(s, instant),
        })
        .collect()
}

// Parse a "YYYY-MM-DD" query value.
pub fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(s.to_string()))
}

// Parse a local "YYYY-MM-DDTHH:MM" instant; seconds and a space separator
// are accepted too.
pub fn parse_instant(s: &str) -> Result<NaiveDateTime, ValidationError> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S",
    ];
    let trimmed = s.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| ValidationError::InvalidInstant(s.to_string()))
}
