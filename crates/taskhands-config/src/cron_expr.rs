//! Cron expression parsing and the wall clock schedules are read in.
//!
//! Shared by validation and the scheduler.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, TimeZone, Timelike, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Parse a cron expression.
///
/// Five-field crontab expressions get a `0` seconds field prepended; six and
/// seven-field expressions are passed through unchanged.
pub fn parse_cron_expression(expr: &str) -> Result<Schedule, cron::error::Error> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {}", trimmed))
    } else {
        Schedule::from_str(trimmed)
    }
}

/// Time zone in which cron fields and the auto-retry hour are interpreted.
///
/// Written in configuration as `local`, `utc` or a fixed offset such as
/// `+02:00` / `-0500`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScheduleZone {
    /// The host's local zone, daylight saving included.
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
}

impl ScheduleZone {
    /// Wall clock hour of `at` in this zone.
    pub fn hour_of(&self, at: DateTime<Utc>) -> u32 {
        match self {
            ScheduleZone::Local => at.with_timezone(&Local).hour(),
            ScheduleZone::Utc => at.hour(),
            ScheduleZone::Fixed(offset) => at.with_timezone(offset).hour(),
        }
    }

    /// First fire of `schedule` strictly after `after`, reading the cron
    /// fields as wall clock time in this zone.
    pub fn next_fire(&self, schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleZone::Local => next_in(schedule, &Local, after),
            ScheduleZone::Utc => next_in(schedule, &Utc, after),
            ScheduleZone::Fixed(offset) => next_in(schedule, offset, after),
        }
    }
}

fn next_in<Z: TimeZone>(schedule: &Schedule, zone: &Z, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(zone))
        .next()
        .map(|at| at.with_timezone(&Utc))
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

impl FromStr for ScheduleZone {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "local" | "" => Ok(ScheduleZone::Local),
            "utc" | "z" => Ok(ScheduleZone::Utc),
            _ => parse_offset(trimmed)
                .map(ScheduleZone::Fixed)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "scheduler.timezone".to_string(),
                    message: format!("expected 'local', 'utc' or an offset like '+02:00', got '{}'", s),
                }),
        }
    }
}

impl TryFrom<String> for ScheduleZone {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScheduleZone> for String {
    fn from(zone: ScheduleZone) -> Self {
        zone.to_string()
    }
}

impl fmt::Display for ScheduleZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleZone::Local => write!(f, "local"),
            ScheduleZone::Utc => write!(f, "utc"),
            ScheduleZone::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        // 2026-10-19 is a Monday
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, 0).unwrap()
    }

    #[test]
    fn test_five_field_expression() {
        let schedule = parse_cron_expression("0 9 * * MON-FRI").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.hour(), 9);
        assert_eq!(next.minute(), 0);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_six_field_expression() {
        assert!(parse_cron_expression("30 0 9 * * *").is_ok());
    }

    #[test]
    fn test_invalid_expression() {
        assert!(parse_cron_expression("not a cron").is_err());
        assert!(parse_cron_expression("").is_err());
    }

    #[test]
    fn test_parse_zone() {
        assert_eq!("local".parse::<ScheduleZone>().unwrap(), ScheduleZone::Local);
        assert_eq!("UTC".parse::<ScheduleZone>().unwrap(), ScheduleZone::Utc);
        assert_eq!(
            "-04:00".parse::<ScheduleZone>().unwrap(),
            ScheduleZone::Fixed(FixedOffset::west_opt(4 * 3600).unwrap())
        );
        assert_eq!(
            "+0530".parse::<ScheduleZone>().unwrap(),
            ScheduleZone::Fixed(FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap())
        );
        assert!("Europe/Paris".parse::<ScheduleZone>().is_err());
        assert!("+25:00".parse::<ScheduleZone>().is_err());
        assert!("+02:75".parse::<ScheduleZone>().is_err());
    }

    #[test]
    fn test_next_fire_reads_wall_clock_of_zone() {
        let schedule = parse_cron_expression("0 9 * * MON-FRI").unwrap();
        let new_york = ScheduleZone::Fixed(FixedOffset::west_opt(4 * 3600).unwrap());

        // 09:00 at -04:00 is 13:00 UTC
        assert_eq!(new_york.next_fire(&schedule, utc(4, 0)), Some(utc(13, 0)));
        assert_eq!(ScheduleZone::Utc.next_fire(&schedule, utc(4, 0)), Some(utc(9, 0)));
    }

    #[test]
    fn test_local_zone_fires_at_local_hour() {
        let schedule = parse_cron_expression("0 9 * * *").unwrap();
        let next = ScheduleZone::Local.next_fire(&schedule, utc(0, 0)).unwrap();
        assert_eq!(ScheduleZone::Local.hour_of(next), 9);
        assert_eq!(next.with_timezone(&Local).minute(), 0);
    }

    #[test]
    fn test_hour_of() {
        let zone = ScheduleZone::Fixed(FixedOffset::east_opt(2 * 3600).unwrap());
        assert_eq!(zone.hour_of(utc(18, 30)), 20);
        assert_eq!(ScheduleZone::Utc.hour_of(utc(18, 30)), 18);
    }

    #[test]
    fn test_zone_serde_roundtrip() {
        let zone: ScheduleZone = serde_json::from_str("\"+02:00\"").unwrap();
        assert_eq!(serde_json::to_string(&zone).unwrap(), "\"+02:00\"");
        assert!(serde_json::from_str::<ScheduleZone>("\"mars\"").is_err());
    }
}
