use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::DatabaseError;

/// Format a timestamp as fixed-width RFC 3339 UTC text
/// (`2026-08-30T12:00:00Z`). Fixed width keeps lexicographic and
/// chronological order identical, which the expiry queries rely on.
pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_ts() -> String {
    format_ts(Utc::now())
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{format_ts, parse_ts};

    #[test]
    fn roundtrips_to_second_precision() {
        let now = Utc::now();
        let parsed = parse_ts(&format_ts(now)).expect("parse");
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn lexicographic_order_matches_chronological() {
        let earlier = Utc::now();
        let later = earlier + Duration::hours(3);
        assert!(format_ts(earlier) < format_ts(later));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_ts("not a timestamp").is_err());
    }
}
