use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Limit,
    Quota,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    Once,
    Daily,
    Weekdays,
    Weekends,
    Custom,
}

/// Local wall-clock time at minute granularity, `"HH:MM"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16); // minutes since midnight, 0..=1439

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(TimeOfDay((hour * 60 + minute) as u16))
        } else {
            None
        }
    }

    pub fn hour(self) -> u32 {
        u32::from(self.0 / 60)
    }

    pub fn minute(self) -> u32 {
        u32::from(self.0 % 60)
    }

    // Seconds are dropped: 17:00:59 is still 17:00.
    pub fn of(instant: &NaiveDateTime) -> Self {
        TimeOfDay((instant.hour() * 60 + instant.minute()) as u16)
    }
}

impl FromStr for TimeOfDay {
    type Err = ValidationError;

    // Strictly zero-padded "HH:MM".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidTime(s.to_string());
        let b = s.as_bytes();
        let shape_ok = b.len() == 5
            && b[2] == b':'
            && [b[0], b[1], b[3], b[4]].iter().all(u8::is_ascii_digit);
        if !shape_ok {
            return Err(invalid());
        }
        let t = NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| invalid())?;
        TimeOfDay::new(t.hour(), t.minute()).ok_or_else(invalid)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Set of weekdays indexed 0=Sunday .. 6=Saturday, stored as a bitmask.
/// Serialized as a sorted JSON array of indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);

    pub fn from_indices(indices: &[u8]) -> Result<Self, ValidationError> {
        let mut set = WeekdaySet::EMPTY;
        for &i in indices {
            if i > 6 {
                return Err(ValidationError::InvalidWeekday(i));
            }
            set.0 |= 1 << i;
        }
        Ok(set)
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_sunday()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn indices(self) -> impl Iterator<Item = u8> {
        (0..7u8).filter(move |i| self.0 & (1 << i) != 0)
    }
}

impl TryFrom<Vec<u8>> for WeekdaySet {
    type Error = ValidationError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        WeekdaySet::from_indices(&value)
    }
}

impl From<WeekdaySet> for Vec<u8> {
    fn from(set: WeekdaySet) -> Self {
        set.indices().collect()
    }
}

/// Enforcement payload. The activation engine never reads it; it is carried
/// through to whoever applies the policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enforcement {
    #[serde(default)]
    pub limit_dl_kbps: Option<u64>,
    #[serde(default)]
    pub limit_ul_kbps: Option<u64>,
    #[serde(default)]
    pub priority: Option<u8>, // 0..=7
    #[serde(default)]
    pub quota_dl_bytes: Option<u64>,
    #[serde(default)]
    pub quota_ul_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub name: String,
    pub rule_type: RuleType,
    pub device_ip: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub repeat_mode: RepeatMode,
    #[serde(default)]
    pub custom_days: Option<WeekdaySet>,
    #[serde(default = "enabled_by_default")]
    pub is_enabled: bool,
    #[serde(flatten)]
    pub enforcement: Enforcement,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default)]
pub struct Db {
    pub schedules: Vec<Schedule>,
    /// Stored records that failed to decode, kept verbatim.
    pub rejected: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_parses_and_formats() {
        let t: TimeOfDay = "09:05".parse().unwrap();
        assert_eq!((t.hour(), t.minute()), (9, 5));
        assert_eq!(t.to_string(), "09:05");
        assert_eq!("00:00".parse::<TimeOfDay>().unwrap(), TimeOfDay::new(0, 0).unwrap());
        assert_eq!("23:59".parse::<TimeOfDay>().unwrap().to_string(), "23:59");
    }

    #[test]
    fn time_of_day_rejects_garbage() {
        for bad in [
            "", "24:00", "12:60", "12", "ab:cd", "7:30", "07:5", " 7:30", "12:00:00", "1:2:3:4",
            "123:00",
        ] {
            assert!(bad.parse::<TimeOfDay>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn time_of_day_truncates_seconds_of_instant() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(17, 0, 59)
            .unwrap();
        assert_eq!(TimeOfDay::of(&at), TimeOfDay::new(17, 0).unwrap());
    }

    #[test]
    fn weekday_set_membership() {
        let set = WeekdaySet::from_indices(&[1, 3, 5]).unwrap();
        assert!(set.contains(Weekday::Mon));
        assert!(set.contains(Weekday::Wed));
        assert!(set.contains(Weekday::Fri));
        assert!(!set.contains(Weekday::Sun));
        assert!(!set.contains(Weekday::Sat));

        let weekend = WeekdaySet::from_indices(&[6, 0, 6]).unwrap();
        assert_eq!(weekend.indices().collect::<Vec<_>>(), vec![0, 6]);
        assert!(WeekdaySet::EMPTY.is_empty());
    }

    #[test]
    fn weekday_set_rejects_out_of_range() {
        assert_eq!(
            WeekdaySet::from_indices(&[0, 7]),
            Err(ValidationError::InvalidWeekday(7))
        );
        assert!(serde_json::from_str::<WeekdaySet>("[2, 9]").is_err());
    }

    #[test]
    fn schedule_uses_dashboard_field_names() {
        let json = r#"{
            "id": "6f1c1d0e-2a51-4c47-9a52-7b0a8f3c2d11",
            "name": "Kids tablet bedtime",
            "rule_type": "limit",
            "device_ip": "192.168.12.34",
            "start_date": "2024-06-01",
            "end_date": null,
            "start_time": "22:00",
            "end_time": "06:00",
            "repeat_mode": "custom",
            "custom_days": [5, 1, 3],
            "is_enabled": true,
            "limit_dl_kbps": 512,
            "limit_ul_kbps": 128,
            "priority": 3
        }"#;
        let s: Schedule = serde_json::from_str(json).unwrap();
        assert_eq!(s.rule_type, RuleType::Limit);
        assert_eq!(s.start_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(s.end_date, None);
        assert!(s.start_time > s.end_time);
        assert_eq!(s.custom_days, Some(WeekdaySet::from_indices(&[1, 3, 5]).unwrap()));
        assert_eq!(s.enforcement.limit_dl_kbps, Some(512));
        assert_eq!(s.enforcement.quota_dl_bytes, None);

        let back = serde_json::to_value(&s).unwrap();
        assert_eq!(back["start_time"], "22:00");
        assert_eq!(back["custom_days"], serde_json::json!([1, 3, 5]));
        assert_eq!(back["priority"], 3);
        assert_eq!(back["start_date"], "2024-06-01");
    }

    #[test]
    fn schedule_defaults_missing_optionals() {
        let json = r#"{
            "id": "6f1c1d0e-2a51-4c47-9a52-7b0a8f3c2d11",
            "name": "Quota",
            "rule_type": "quota",
            "device_ip": "10.0.0.2",
            "start_time": "08:00",
            "end_time": "18:00",
            "repeat_mode": "daily"
        }"#;
        let s: Schedule = serde_json::from_str(json).unwrap();
        assert!(s.is_enabled);
        assert_eq!(s.start_date, None);
        assert_eq!(s.custom_days, None);
        assert_eq!(s.enforcement, Enforcement::default());
    }
}
