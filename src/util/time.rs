//! Timestamp and duration parsing.

use crate::error::{BeadsError, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 and the bare `YYYY-MM-DD HH:MM:SS` form some older
/// exports used.
///
/// # Errors
///
/// Returns a validation error when neither format matches.
pub fn parse_timestamp(s: &str, field_name: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(BeadsError::validation(
        field_name,
        format!("unrecognized timestamp: {s}"),
    ))
}

/// Parse a duration value like `5s`, `100ms`, `2m`, or a bare number of
/// seconds. Used for the `flush-debounce` configuration key.
///
/// # Errors
///
/// Returns a validation error for unrecognized formats.
pub fn parse_duration(s: &str, field_name: &str) -> Result<Duration> {
    let s = s.trim();

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let (amount, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) if pos > 0 => (&s[..pos], &s[pos..]),
        _ => {
            return Err(BeadsError::validation(
                field_name,
                format!("invalid duration: {s}"),
            ))
        }
    };

    let amount: u64 = amount.parse().map_err(|_| {
        BeadsError::validation(field_name, format!("invalid duration: {s}"))
    })?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        _ => Err(BeadsError::validation(
            field_name,
            format!("invalid duration unit: {unit} (use ms, s, m, h)"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        let dt = parse_timestamp("2026-01-15T12:00:00Z", "t").unwrap();
        assert_eq!(dt.timestamp(), 1_768_478_400);
    }

    #[test]
    fn parses_legacy_format() {
        assert!(parse_timestamp("2026-01-15 12:00:00", "t").is_ok());
        assert!(parse_timestamp("yesterday", "t").is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("5s", "d").unwrap(), Duration::from_secs(5));
        assert_eq!(
            parse_duration("100ms", "d").unwrap(),
            Duration::from_millis(100)
        );
        assert_eq!(parse_duration("2m", "d").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("30", "d").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("fast", "d").is_err());
        assert!(parse_duration("5d", "d").is_err());
    }
}
