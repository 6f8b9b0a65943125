//! Business-hours window evaluated in a company's local timezone

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::str::FromStr;
use tracing::warn;

pub trait BusinessHours: Send + Sync {
    fn is_open(&self, tz: Tz, at: DateTime<Utc>) -> bool;

    /// First opening instant strictly after `after`
    fn next_open(&self, tz: Tz, after: DateTime<Utc>) -> DateTime<Utc>;
}

/// Same opening hours on every listed weekday, `[start_hour, end_hour)`
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub days: Vec<Weekday>,
}

impl BusinessWindow {
    pub fn new(start_hour: u32, end_hour: u32, days: Vec<Weekday>) -> Result<Self> {
        if start_hour >= end_hour || end_hour > 24 {
            anyhow::bail!(
                "Invalid business hours {}-{}: start must be before end and end at most 24",
                start_hour,
                end_hour
            );
        }
        if days.is_empty() {
            anyhow::bail!("Business days cannot be empty");
        }
        Ok(Self {
            start_hour,
            end_hour,
            days,
        })
    }

    fn opening_on(&self, tz: Tz, date: chrono::NaiveDate) -> Option<DateTime<Utc>> {
        let time = NaiveTime::from_hms_opt(self.start_hour, 0, 0)?;
        let local = date.and_time(time);
        // DST gaps have no local opening; try the next hour
        tz.from_local_datetime(&local)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl Default for BusinessWindow {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 18,
            days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
        }
    }
}

impl BusinessHours for BusinessWindow {
    fn is_open(&self, tz: Tz, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&tz);
        self.days.contains(&local.weekday())
            && local.hour() >= self.start_hour
            && local.hour() < self.end_hour
    }

    fn next_open(&self, tz: Tz, after: DateTime<Utc>) -> DateTime<Utc> {
        let start_date = after.with_timezone(&tz).date_naive();
        for offset in 0..=7 {
            let date = start_date + Duration::days(offset);
            if !self.days.contains(&date.weekday()) {
                continue;
            }
            if let Some(opening) = self.opening_on(tz, date) {
                if opening > after {
                    return opening;
                }
            }
        }
        warn!("No business-hours opening found within a week, retrying in an hour");
        after + Duration::hours(1)
    }
}

/// Parse "mon-fri" or "mon,wed,sat"
pub fn parse_days(input: &str) -> Result<Vec<Weekday>> {
    let input = input.trim().to_lowercase();
    if let Some((from, to)) = input.split_once('-') {
        let from = parse_weekday(from)?;
        let to = parse_weekday(to)?;
        let mut days = vec![from];
        let mut day = from;
        while day != to {
            day = day.succ();
            days.push(day);
        }
        return Ok(days);
    }

    input
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(parse_weekday)
        .collect()
}

fn parse_weekday(s: &str) -> Result<Weekday> {
    Weekday::from_str(s.trim()).map_err(|_| anyhow::anyhow!("Invalid weekday: {}", s))
}

/// Resolve an IANA timezone name, falling back to `default`
pub fn resolve_timezone(name: Option<&str>, default: Tz) -> Tz {
    match name {
        Some(name) => name.parse().unwrap_or_else(|_| {
            warn!("Invalid timezone '{}', using {}", name, default);
            default
        }),
        None => default,
    }
}
