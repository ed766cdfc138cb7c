//! Recurrence oracle: cron-like expressions resolved in a time zone.
//!
//! Expressions take 5 fields (minute hour day-of-month month day-of-week),
//! 6 fields (with a leading seconds field) or 7 (with a trailing year
//! range). 5-field input is normalised by prefixing a zero seconds field.
//! Quartz-only tokens (`L`, `W`, `#`) are rejected by the parser.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};

fn parse_expression(expr: &str) -> Result<cron::Schedule> {
    let fields = expr.split_whitespace().count();
    let normalised = match fields {
        5 => format!("0 {expr}"),
        6 | 7 => expr.to_string(),
        n => {
            return Err(SchedulerError::InvalidSchedule(format!(
                "expected 5 to 7 fields, got {n}"
            )))
        }
    };
    cron::Schedule::from_str(&normalised)
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))
}

pub(crate) fn parse_zone(zone: &str) -> Result<Tz> {
    zone.parse::<Tz>()
        .map_err(|_| SchedulerError::UnknownZone(zone.to_string()))
}

/// Reject invalid schedule expressions at creation time.
pub fn validate(expr: &str) -> Result<()> {
    parse_expression(expr).map(|_| ())
}

/// The next occurrence of `expr` strictly after `after`, resolved in
/// `zone` and returned in UTC. `None` means the schedule is exhausted
/// (e.g. its year range is over).
pub fn next_occurrence(
    expr: &str,
    zone: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let tz = parse_zone(zone)?;
    let schedule = parse_expression(expr)?;
    let local = after.with_timezone(&tz);
    Ok(schedule
        .after(&local)
        .next()
        .map(|dt| dt.with_timezone(&Utc)))
}

/// Resolve a creation request's moment: an explicit local moment wins,
/// otherwise the schedule's next occurrence after `now`. Both absent is a
/// validation error.
pub fn resolve_next_moment(
    moment: Option<NaiveDateTime>,
    schedule: Option<&str>,
    zone: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let tz = parse_zone(zone)?;
    match (moment, schedule) {
        (None, None) => Err(SchedulerError::Validation(
            "either a moment or a schedule is required".to_string(),
        )),
        (Some(local), _) => tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                SchedulerError::Validation(format!("moment does not exist in zone {zone}"))
            }),
        (None, Some(expr)) => next_occurrence(expr, zone, now)?.ok_or_else(|| {
            SchedulerError::Validation("schedule has no upcoming occurrence".to_string())
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn five_field_expressions_are_normalised() {
        assert!(validate("30 18 * * Fri").is_ok());
        assert!(validate("0 30 18 * * Fri").is_ok());
        assert!(validate("0 30 18 * * Fri 2026-2030").is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(validate("not a schedule").is_err());
        assert!(validate("").is_err());
        assert!(validate("99 99 * * *").is_err());
    }

    #[test]
    fn next_occurrence_is_strictly_after() {
        // Daily at 18:30 UTC.
        let after = at(2026, 6, 1, 18, 30);
        let next = next_occurrence("30 18 * * *", "UTC", after)
            .unwrap()
            .unwrap();
        assert!(next > after);
        assert_eq!(next, at(2026, 6, 2, 18, 30));
    }

    #[test]
    fn occurrences_resolve_in_the_event_zone() {
        // 18:30 in Amsterdam is 16:30 UTC during summer time.
        let after = at(2026, 6, 1, 0, 0);
        let next = next_occurrence("30 18 * * *", "Europe/Amsterdam", after)
            .unwrap()
            .unwrap();
        assert_eq!(next, at(2026, 6, 1, 16, 30));
    }

    #[test]
    fn unknown_zone_is_an_error() {
        assert!(matches!(
            next_occurrence("30 18 * * *", "Mars/Olympus", at(2026, 1, 1, 0, 0)),
            Err(SchedulerError::UnknownZone(_))
        ));
    }

    #[test]
    fn exhausted_year_range_yields_none() {
        let after = at(2026, 1, 1, 0, 0);
        let next = next_occurrence("0 0 12 * * * 2020", "UTC", after).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn explicit_moment_wins_over_schedule() {
        let local = NaiveDate::from_ymd_opt(2026, 7, 4)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        let resolved = resolve_next_moment(
            Some(local),
            Some("30 18 * * *"),
            "UTC",
            at(2026, 1, 1, 0, 0),
        )
        .unwrap();
        assert_eq!(resolved, at(2026, 7, 4, 20, 0));
        assert_eq!(resolved.hour(), 20);
    }

    #[test]
    fn missing_both_moment_and_schedule_is_rejected() {
        assert!(matches!(
            resolve_next_moment(None, None, "UTC", at(2026, 1, 1, 0, 0)),
            Err(SchedulerError::Validation(_))
        ));
    }
}
