//! Recurring clock windows and the "is this window active now" check.
//!
//! A window is a `start-end` range of wall-clock minutes on a set of
//! weekdays. When `start > end` the window wraps past midnight, and the
//! early-morning half is attributed to the day the window opened on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, Weekday};

use crate::error::ConfigError;

/// Wall-clock time as minutes since midnight, written as zero-padded `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MIDNIGHT: ClockTime = ClockTime(0);

    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self(u16::from(hour) * 60 + u16::from(minute)))
    }

    /// Clock reading of `now`, seconds truncated.
    pub fn of(now: &OffsetDateTime) -> Self {
        Self(u16::from(now.hour()) * 60 + u16::from(now.minute()))
    }

    pub fn hour(self) -> u8 {
        (self.0 / 60) as u8
    }

    pub fn minute(self) -> u8 {
        (self.0 % 60) as u8
    }

    pub fn minutes_since_midnight(self) -> u16 {
        self.0
    }
}

impl FromStr for ClockTime {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTime(value.to_string());
        let bytes = value.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(invalid());
        }
        let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }
        let hour = (digits[0] - b'0') * 10 + (digits[1] - b'0');
        let minute = (digits[2] - b'0') * 10 + (digits[3] - b'0');
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Weekday as written in config files (`Mon` .. `Sun`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Day {
    #[serde(alias = "mon", alias = "Monday")]
    Mon,
    #[serde(alias = "tue", alias = "Tuesday")]
    Tue,
    #[serde(alias = "wed", alias = "Wednesday")]
    Wed,
    #[serde(alias = "thu", alias = "Thursday")]
    Thu,
    #[serde(alias = "fri", alias = "Friday")]
    Fri,
    #[serde(alias = "sat", alias = "Saturday")]
    Sat,
    #[serde(alias = "sun", alias = "Sunday")]
    Sun,
}

impl Day {
    pub const ALL: [Day; 7] = [Day::Mon, Day::Tue, Day::Wed, Day::Thu, Day::Fri, Day::Sat, Day::Sun];
    pub const WEEKDAYS: [Day; 5] = [Day::Mon, Day::Tue, Day::Wed, Day::Thu, Day::Fri];

    pub fn short_name(self) -> &'static str {
        match self {
            Day::Mon => "Mon",
            Day::Tue => "Tue",
            Day::Wed => "Wed",
            Day::Thu => "Thu",
            Day::Fri => "Fri",
            Day::Sat => "Sat",
            Day::Sun => "Sun",
        }
    }
}

impl From<Weekday> for Day {
    fn from(value: Weekday) -> Self {
        match value {
            Weekday::Monday => Day::Mon,
            Weekday::Tuesday => Day::Tue,
            Weekday::Wednesday => Day::Wed,
            Weekday::Thursday => Day::Thu,
            Weekday::Friday => Day::Fri,
            Weekday::Saturday => Day::Sat,
            Weekday::Sunday => Day::Sun,
        }
    }
}

impl FromStr for Day {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mon" | "monday" => Ok(Day::Mon),
            "tue" | "tuesday" => Ok(Day::Tue),
            "wed" | "wednesday" => Ok(Day::Wed),
            "thu" | "thursday" => Ok(Day::Thu),
            "fri" | "friday" => Ok(Day::Fri),
            "sat" | "saturday" => Ok(Day::Sat),
            "sun" | "sunday" => Ok(Day::Sun),
            _ => Err(ConfigError::InvalidDay(value.to_string())),
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: ClockTime,
    pub end: ClockTime,
    #[serde(default)]
    pub days: Vec<Day>,
}

impl TimeWindow {
    pub fn new(start: &str, end: &str, days: &[Day]) -> Result<Self, ConfigError> {
        Ok(Self {
            start: start.parse()?,
            end: end.parse()?,
            days: days.to_vec(),
        })
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Clock-only test, inclusive at both ends.
    pub fn covers_clock(&self, clock: ClockTime) -> bool {
        if self.wraps_midnight() {
            clock >= self.start || clock <= self.end
        } else {
            self.start <= clock && clock <= self.end
        }
    }

    /// The weekday a reading belongs to: the previous day for the
    /// after-midnight half of a wrapping window.
    pub fn attributed_day(&self, now: &OffsetDateTime) -> Day {
        let clock = ClockTime::of(now);
        if self.wraps_midnight() && clock <= self.end {
            Day::from(now.weekday().previous())
        } else {
            Day::from(now.weekday())
        }
    }

    pub fn contains(&self, now: OffsetDateTime) -> bool {
        let day = self.attributed_day(&now);
        self.days.contains(&day) && self.covers_clock(ClockTime::of(&now))
    }

    pub fn days_label(&self) -> String {
        self.days
            .iter()
            .map(|day| day.short_name())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} on {}", self.start, self.end, self.days_label())
    }
}

/// First window active at `now`, if any.
pub fn first_active(windows: &[TimeWindow], now: OffsetDateTime) -> Option<&TimeWindow> {
    windows.iter().find(|window| window.contains(now))
}

/// Human listing used by `info` output: `09:00-17:00 (Mon,Tue); ...`.
pub fn format_windows(windows: &[TimeWindow]) -> String {
    if windows.is_empty() {
        return "always".to_string();
    }
    windows
        .iter()
        .map(|window| format!("{}-{} ({})", window.start, window.end, window.days_label()))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn window(start: &str, end: &str, days: &[Day]) -> TimeWindow {
        TimeWindow::new(start, end, days).unwrap()
    }

    #[test]
    fn parses_strict_clock_times() {
        assert_eq!("09:05".parse::<ClockTime>().unwrap(), ClockTime::new(9, 5).unwrap());
        assert_eq!("23:59".parse::<ClockTime>().unwrap().minutes_since_midnight(), 1439);
        for bad in ["9:05", "24:00", "12:60", "12-30", "ab:cd", "", "12:3"] {
            assert!(bad.parse::<ClockTime>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn clock_ordering_matches_padded_string_ordering() {
        let samples = ["00:00", "01:59", "09:00", "12:00", "17:30", "22:00", "23:59"];
        for a in samples {
            for b in samples {
                let parsed = a.parse::<ClockTime>().unwrap().cmp(&b.parse::<ClockTime>().unwrap());
                assert_eq!(parsed, a.cmp(b), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn boundaries_are_inclusive() {
        let same_day = window("09:00", "17:00", &Day::ALL);
        assert!(same_day.contains(datetime!(2024-01-01 09:00 UTC)));
        assert!(same_day.contains(datetime!(2024-01-01 17:00 UTC)));
        assert!(!same_day.contains(datetime!(2024-01-01 17:01 UTC)));

        let overnight = window("22:00", "02:00", &Day::ALL);
        assert!(overnight.contains(datetime!(2024-01-02 22:00 UTC)));
        assert!(overnight.contains(datetime!(2024-01-03 02:00 UTC)));
        assert!(!overnight.contains(datetime!(2024-01-03 02:01 UTC)));
    }

    #[test]
    fn office_hours_window() {
        let office = window("09:00", "17:00", &Day::WEEKDAYS);
        // 2024-01-01 is a Monday.
        assert!(office.contains(datetime!(2024-01-01 10:00 UTC)));
        assert!(!office.contains(datetime!(2024-01-01 18:00 UTC)));
        assert!(!office.contains(datetime!(2024-01-06 10:00 UTC)));
    }

    #[test]
    fn overnight_window_attributes_early_hours_to_previous_day() {
        let tuesday_night = window("22:00", "02:00", &[Day::Tue]);
        assert!(tuesday_night.contains(datetime!(2024-01-02 23:30 UTC)));
        // 01:00 Wednesday belongs to Tuesday's session.
        assert!(tuesday_night.contains(datetime!(2024-01-03 01:00 UTC)));
        // 01:00 Tuesday belongs to Monday's session, which is not configured.
        assert!(!tuesday_night.contains(datetime!(2024-01-02 01:00 UTC)));
        assert_eq!(
            tuesday_night.attributed_day(&datetime!(2024-01-03 01:00 UTC)),
            Day::Tue
        );
    }

    #[test]
    fn sunday_night_wraps_into_monday() {
        let sunday_night = window("23:00", "01:00", &[Day::Sun]);
        assert!(sunday_night.contains(datetime!(2024-01-08 00:30 UTC)));
        assert!(!sunday_night.contains(datetime!(2024-01-09 00:30 UTC)));
    }

    #[test]
    fn window_without_days_never_matches() {
        let empty = window("00:00", "23:59", &[]);
        assert!(!empty.contains(datetime!(2024-01-01 12:00 UTC)));
    }

    #[test]
    fn day_parsing_accepts_common_spellings() {
        assert_eq!("Mon".parse::<Day>().unwrap(), Day::Mon);
        assert_eq!("wednesday".parse::<Day>().unwrap(), Day::Wed);
        assert!("Mo".parse::<Day>().is_err());
        assert!("Funday".parse::<Day>().is_err());
    }

    #[test]
    fn formats_windows_for_listing() {
        let windows = vec![
            window("09:00", "17:00", &[Day::Mon, Day::Fri]),
            window("22:00", "02:00", &[Day::Sat]),
        ];
        assert_eq!(format_windows(&windows), "09:00-17:00 (Mon,Fri); 22:00-02:00 (Sat)");
        assert_eq!(format_windows(&[]), "always");
        assert_eq!(windows[0].to_string(), "09:00-17:00 on Mon,Fri");
    }
}
