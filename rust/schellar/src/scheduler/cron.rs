//! Cron expression parsing and evaluation.
//!
//! Schedules use the 6-field, seconds-resolution format:
//! `second minute hour day-of-month month day-of-week`, with fields separated
//! by exactly one space. Day-of-week numbers run 0-6 with 0 = Sunday; names
//! such as `Mon-Fri` are accepted too. Fire times are computed in UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

use crate::error::{Result, SchedulerError};

/// Number of fields in a schedule cron expression.
pub const CRON_FIELDS: usize = 6;

/// Highest numeric day-of-week (Saturday).
const MAX_DAY_OF_WEEK: u8 = 6;

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    schedule: CronSchedule,
}

impl CronExpression {
    /// Parse a cron expression string.
    ///
    /// # Examples
    ///
    /// - `0 0 9 * * *` - Daily at 09:00:00
    /// - `*/10 * * * * *` - Every 10 seconds
    /// - `0 30 8 * * Mon-Fri` - Weekdays at 08:30
    /// - `0 30 8 * * 1-5` - Same as above
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the expression does not have exactly six
    /// single-space-separated fields or if any field is invalid.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields = expr.split(' ').count();
        if fields != CRON_FIELDS {
            return Err(SchedulerError::validation(format!(
                "cronString '{expr}' is invalid. It must have {CRON_FIELDS} fields separated by single spaces, found {fields}"
            )));
        }
        if expr.split(' ').any(str::is_empty) {
            return Err(SchedulerError::validation(format!(
                "cronString '{expr}' is invalid. It contains an empty field"
            )));
        }

        let normalized = normalize_day_of_week(expr)
            .map_err(|e| SchedulerError::validation(format!("cronString '{expr}' is invalid: {e}")))?;
        let schedule = CronSchedule::from_str(&normalized).map_err(|e| {
            SchedulerError::validation(format!("cronString '{expr}' is invalid: {e}"))
        })?;
        Ok(Self {
            source: expr.to_string(),
            schedule,
        })
    }

    /// The expression as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First fire time strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

/// Rewrite the day-of-week field from 0-6 (Sunday = 0) into the 1-7
/// (Sunday = 1) numbering of the `cron` crate. Other fields are untouched.
fn normalize_day_of_week(expr: &str) -> std::result::Result<String, String> {
    let mut fields: Vec<String> = expr.split(' ').map(str::to_string).collect();
    if let Some(day_of_week) = fields.last_mut() {
        let items = day_of_week
            .split(',')
            .map(shift_day_item)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        *day_of_week = items.join(",");
    }
    Ok(fields.join(" "))
}

/// Shift one list item: `d`, `a-b`, `a/step`, `a-b/step` or `*/step`.
/// Step sizes are not day numbers and keep their value.
fn shift_day_item(item: &str) -> std::result::Result<String, String> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };
    let base = match base.split_once('-') {
        Some((start, end)) => format!("{}-{}", shift_day(start)?, shift_day(end)?),
        None => shift_day(base)?,
    };
    Ok(match step {
        Some(step) => format!("{base}/{step}"),
        None => base,
    })
}

fn shift_day(token: &str) -> std::result::Result<String, String> {
    match token.parse::<u8>() {
        Ok(day) if day <= MAX_DAY_OF_WEEK => Ok((day + 1).to_string()),
        Ok(day) => Err(format!(
            "day-of-week {day} is out of range 0-{MAX_DAY_OF_WEEK}"
        )),
        Err(_) => Ok(token.to_string()),
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_parse_daily() {
        let expr = CronExpression::parse("0 0 9 * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let next = expr.next_after(&start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());

        let after = expr.next_after(&next).unwrap();
        assert_eq!(after, Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_seconds_resolution() {
        let expr = CronExpression::parse("*/10 * * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 3).unwrap();
        let next = expr.next_after(&start).unwrap();
        assert_eq!(next.second(), 10);
    }

    #[test]
    fn test_field_count_enforced() {
        assert!(CronExpression::parse("0 9 * * *").is_err());
        assert!(CronExpression::parse("0 0 9 * * * 2024").is_err());
        assert!(CronExpression::parse("0  0 9 * * *").is_err());
        assert!(CronExpression::parse("").is_err());
    }

    #[test]
    fn test_parse_invalid_field() {
        let err = CronExpression::parse("0 0 25 * * *").unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        assert!(CronExpression::parse("x 0 9 * * *").is_err());
    }

    #[test]
    fn test_day_of_week_zero_is_sunday() {
        let expr = CronExpression::parse("0 0 9 * * 0").unwrap();
        // Saturday 2024-01-06.
        let start = Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).unwrap();
        let next = expr.next_after(&start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 7, 9, 0, 0).unwrap());
        assert_eq!(next.weekday(), Weekday::Sun);

        assert!(CronExpression::parse("* * * * * 0").is_ok());
    }

    #[test]
    fn test_weekday_range_starts_monday() {
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).unwrap();
        for source in ["0 0 9 * * 1-5", "0 0 9 * * Mon-Fri"] {
            let expr = CronExpression::parse(source).unwrap();
            let next = expr.next_after(&saturday).unwrap();
            assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap(), "{source}");
            assert_eq!(next.weekday(), Weekday::Mon);

            let friday = Utc.with_ymd_and_hms(2024, 1, 12, 10, 0, 0).unwrap();
            assert_eq!(expr.next_after(&friday).unwrap().weekday(), Weekday::Mon);
        }
    }

    #[test]
    fn test_day_of_week_lists_and_steps() {
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).unwrap();

        let expr = CronExpression::parse("0 0 9 * * 0,6").unwrap();
        assert_eq!(expr.next_after(&saturday).unwrap().weekday(), Weekday::Sun);
        let sunday = Utc.with_ymd_and_hms(2024, 1, 7, 10, 0, 0).unwrap();
        assert_eq!(expr.next_after(&sunday).unwrap().weekday(), Weekday::Sat);

        let expr = CronExpression::parse("0 0 9 * * 1-5/2").unwrap();
        let days: Vec<Weekday> = expr
            .schedule
            .after(&saturday)
            .take(3)
            .map(|t| t.weekday())
            .collect();
        assert_eq!(days, vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]);
    }

    #[test]
    fn test_day_of_week_out_of_range() {
        let err = CronExpression::parse("0 0 9 * * 7").unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(ref m) if m.contains("out of range")));
        assert_eq!(CronExpression::parse("0 0 9 * * 1-5").unwrap().as_str(), "0 0 9 * * 1-5");
    }
}
