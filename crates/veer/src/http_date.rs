//! HTTP date handling for conditional GET.
//!
//! Only the IMF-fixdate form (`Sun, 06 Nov 1994 08:49:37 GMT`) is produced
//! and accepted. Sub-second precision is not representable: formatting
//! truncates, so comparisons must use [`truncate_to_seconds`] on the other
//! side.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format a timestamp as an HTTP date.
pub fn format_http_date(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP date produced by [`format_http_date`].
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    NaiveDateTime::parse_from_str(value.trim(), HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc().into())
}

/// Drop the sub-second part of a timestamp.
pub fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since_epoch) => UNIX_EPOCH + Duration::from_secs(since_epoch.as_secs()),
        Err(before_epoch) => {
            let before = before_epoch.duration();
            let whole = before.as_secs() + u64::from(before.subsec_nanos() > 0);
            UNIX_EPOCH - Duration::from_secs(whole)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_known_date() {
        let time = UNIX_EPOCH + Duration::from_secs(784_111_777);
        assert_eq!(format_http_date(time), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_parse_known_date() {
        let parsed = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(parsed, UNIX_EPOCH + Duration::from_secs(784_111_777));
    }

    #[test]
    fn test_round_trip_at_second_resolution() {
        for secs in [0u64, 1, 86_399, 951_782_400, 1_700_000_000, 4_102_444_800] {
            let time = UNIX_EPOCH + Duration::from_secs(secs);
            assert_eq!(parse_http_date(&format_http_date(time)), Some(time));
        }
    }

    #[test]
    fn test_sub_second_precision_is_truncated() {
        let time = UNIX_EPOCH + Duration::from_millis(1_700_000_000_987);
        let parsed = parse_http_date(&format_http_date(time)).unwrap();
        assert_eq!(parsed, truncate_to_seconds(time));
        assert_ne!(parsed, time);
    }

    #[test]
    fn test_parse_rejects_other_forms() {
        assert!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT").is_none());
        assert!(parse_http_date("1994-11-06T08:49:37Z").is_none());
        assert!(parse_http_date("").is_none());
    }
}
