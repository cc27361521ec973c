//! Timestamp formatting

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::fmt::Display;

/// Output layout for converted timestamps
pub const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

fn parse_utc(timestamp: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Convert a UTC timestamp such as `2025-05-14T16:24:33.537Z` into `tz`.
///
/// Empty input yields `None`; unparsable input yields
/// `"Invalid timestamp: <input>"`.
pub fn convert_utc_to<Tz>(timestamp: &str, tz: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let trimmed = timestamp.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(match parse_utc(trimmed) {
        Some(utc) => utc.with_timezone(tz).format(LOCAL_FORMAT).to_string(),
        None => format!("Invalid timestamp: {}", timestamp),
    })
}

/// Convert a UTC timestamp into the machine's local time zone
pub fn convert_utc_to_local(timestamp: &str) -> Option<String> {
    convert_utc_to(timestamp, &Local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_utc_passthrough() {
        assert_eq!(
            convert_utc_to("2025-05-14T16:24:33.537Z", &Utc).as_deref(),
            Some("2025-05-14 16:24:33 UTC")
        );
    }

    #[test]
    fn test_offset_zone() {
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        assert_eq!(
            convert_utc_to("2025-05-14T16:24:33Z", &ist).as_deref(),
            Some("2025-05-14 21:54:33 +05:30")
        );
    }

    #[test]
    fn test_naive_input_is_utc() {
        assert_eq!(
            convert_utc_to("2025-01-01T00:00:00.000", &Utc).as_deref(),
            Some("2025-01-01 00:00:00 UTC")
        );
    }

    #[test]
    fn test_empty_and_invalid() {
        assert_eq!(convert_utc_to_local(""), None);
        assert_eq!(
            convert_utc_to_local("yesterday").as_deref(),
            Some("Invalid timestamp: yesterday")
        );
    }
}
