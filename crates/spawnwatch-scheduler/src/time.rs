//! UTC time helpers: boundary parsing, validation, and storage encoding.

use chrono::{DateTime, Duration, NaiveTime, SecondsFormat, Utc};
use spawnwatch_core::error::{Result, SpawnWatchError};

/// Allowed lead time, in minutes, for pings and DM alerts.
pub const LEAD_MINUTES_RANGE: std::ops::RangeInclusive<i64> = 1..=1440;
/// Allowed dashboard lookahead, in hours.
pub const LOOKAHEAD_HOURS_RANGE: std::ops::RangeInclusive<i64> = 1..=168;

/// Parse `HH:MM` (server time is UTC) as the most recent such instant.
///
/// Today's `HH:MM` if it is not in the future, otherwise yesterday's.
pub fn parse_server_hhmm(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(input.trim(), "%H:%M").map_err(|_| {
        SpawnWatchError::Validation(format!(
            "invalid time '{input}': use HH:MM in UTC, e.g. 21:22"
        ))
    })?;
    let today = now.date_naive().and_time(time).and_utc();
    Ok(if today > now { today - Duration::days(1) } else { today })
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(input.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| SpawnWatchError::Validation(format!("invalid timestamp '{input}': {e}")))
}

pub fn validate_lead_minutes(minutes: i64) -> Result<i64> {
    if LEAD_MINUTES_RANGE.contains(&minutes) {
        Ok(minutes)
    } else {
        Err(SpawnWatchError::Validation(format!(
            "lead time must be between {} and {} minutes, got {minutes}",
            LEAD_MINUTES_RANGE.start(),
            LEAD_MINUTES_RANGE.end()
        )))
    }
}

pub fn validate_lookahead_hours(hours: i64) -> Result<i64> {
    if LOOKAHEAD_HOURS_RANGE.contains(&hours) {
        Ok(hours)
    } else {
        Err(SpawnWatchError::Validation(format!(
            "lookahead must be between {} and {} hours, got {hours}",
            LOOKAHEAD_HOURS_RANGE.start(),
            LOOKAHEAD_HOURS_RANGE.end()
        )))
    }
}

/// Explicit server-time rendering, e.g. `2024-01-01 10:00 UTC`.
pub fn fmt_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically.
pub fn to_sql(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_sql(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hhmm_in_past_is_today() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let t = parse_server_hhmm("09:30", now).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_hhmm_in_future_is_yesterday() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let t = parse_server_hhmm("21:22", now).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 21, 22, 0).unwrap());
    }

    #[test]
    fn test_hhmm_rejects_garbage() {
        let now = Utc::now();
        for bad in ["", "25:00", "12:61", "noon", "12"] {
            assert!(
                matches!(parse_server_hhmm(bad, now), Err(SpawnWatchError::Validation(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_timestamp_normalises_offset() {
        let t = parse_timestamp("2024-01-01T02:00:00+02:00").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_lead_minutes_range() {
        assert_eq!(validate_lead_minutes(1).unwrap(), 1);
        assert_eq!(validate_lead_minutes(1440).unwrap(), 1440);
        assert!(validate_lead_minutes(0).is_err());
        assert!(validate_lead_minutes(1441).is_err());
    }

    #[test]
    fn test_sql_encoding_orders_like_time() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let b = a + Duration::milliseconds(1);
        assert!(to_sql(a) < to_sql(b));
        assert_eq!(from_sql(&to_sql(b)), Some(b));
        assert_eq!(fmt_utc(a), "2024-01-01 09:00 UTC");
    }
}
