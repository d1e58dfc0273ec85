//! Timestamp helpers for backup naming and incremental markers.

use chrono::{DateTime, NaiveDate, Utc};

/// A UTC timestamp.
pub type Timestamp = DateTime<Utc>;

/// Formats a timestamp as a filesystem-safe backup stamp.
///
/// Format: `YYYY-MM-DD_HH-MM-SS`, UTC.
#[must_use]
pub fn backup_stamp(at: &Timestamp) -> String {
    at.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Parses the date prefix of a record timestamp attribute.
///
/// Accepts full ISO 8601 timestamps or bare `YYYY-MM-DD` dates; anything
/// else yields `None`.
#[must_use]
pub fn parse_marker_date(value: &str) -> Option<NaiveDate> {
    let prefix = value.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_stamp_is_filesystem_safe() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 4, 0, 17).single().unwrap();
        assert_eq!(backup_stamp(&at), "2025-03-01_04-00-17");
    }

    #[test]
    fn test_parse_marker_date_from_timestamp() {
        let date = parse_marker_date("2025-02-22T18:30:00+00:00").unwrap();
        assert_eq!(date.to_string(), "2025-02-22");
    }

    #[test]
    fn test_parse_marker_date_from_bare_date() {
        assert!(parse_marker_date("2025-02-22").is_some());
    }

    #[test]
    fn test_parse_marker_date_rejects_garbage() {
        assert!(parse_marker_date("last tuesday").is_none());
        assert!(parse_marker_date("2025").is_none());
        assert!(parse_marker_date("").is_none());
    }
}
