//! Timestamp helpers.
//!
//! Event timestamps are caller-supplied ISO 8601 strings and travel through
//! the system verbatim. Parsing is lenient: an unparseable timestamp is
//! `None`, and callers (time-range filters, the retention pass) treat that
//! as "no match" / "keep defensively".

use chrono::{DateTime, SecondsFormat, Utc};

/// Parse an ISO 8601 string into a UTC instant. Accepts both `Z` and
/// numeric offsets; naive strings are assumed UTC. Returns `None` on any
/// parse failure.
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Tolerate naive timestamps without an offset.
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Format a UTC instant as ISO 8601 with millisecond precision and a `Z`
/// suffix, the canonical wire form.
pub fn to_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_z_suffix() {
        let dt = parse_ts("2026-02-10T14:00:00Z").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2026, 2, 10, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_numeric_offset() {
        let dt = parse_ts("2026-02-10T15:00:00+01:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2026, 2, 10, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_assumed_utc() {
        let dt = parse_ts("2026-02-10T14:00:00.250").unwrap();
        assert_eq!(to_iso(dt), "2026-02-10T14:00:00.250Z");
    }

    #[test]
    fn test_unparseable_is_none() {
        assert!(parse_ts("not-a-date").is_none());
        assert!(parse_ts("").is_none());
    }

    #[test]
    fn test_to_iso_millis_z() {
        let dt = Utc.with_ymd_and_hms(2026, 2, 10, 14, 0, 0).unwrap();
        assert_eq!(to_iso(dt), "2026-02-10T14:00:00.000Z");
    }
}
