use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Epoch numbers above this are milliseconds.
pub const MILLIS_THRESHOLD: f64 = 10_000_000_000.0;

static RELATIVE_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d*\.?\d+(?:ms|h|m|s))+$").expect("valid regex"));
static RELATIVE_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d*\.?\d+)(ms|h|m|s)").expect("valid regex"));

pub fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let millis = if raw > MILLIS_THRESHOLD { raw } else { raw * 1000.0 };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

/// ISO-8601 / RFC 3339 timestamps, or a bare `yyyy-MM-dd` (midnight UTC).
pub fn parse_date_str(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = trimmed.parse::<DateTime<Utc>>() {
        return Some(parsed);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Relative header values such as `6m0s`, `1h2m3.5s`, `250ms` or `20s`.
///
/// Every `<number><unit>` group is summed. Returns `None` when any part of the
/// string is not a recognised group, or when the total does not fit a duration.
pub fn parse_relative_duration(raw: &str) -> Option<Duration> {
    let text = raw.trim();
    if !RELATIVE_VALUE.is_match(text) {
        return None;
    }

    let mut total_ms = 0.0_f64;
    for group in RELATIVE_GROUP.captures_iter(text) {
        let amount: f64 = group[1].parse().ok()?;
        let factor = match &group[2] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            _ => 3_600_000.0,
        };
        total_ms += amount * factor;
    }
    millis_delta(total_ms)
}

/// Checked millisecond delta; `None` for non-finite or out-of-range values.
pub fn millis_delta(millis: f64) -> Option<Duration> {
    let rounded = millis.round();
    if !rounded.is_finite() || rounded.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(rounded as i64)
}

/// `now` shifted by a number of seconds, if the result is representable.
pub fn after_secs(now: DateTime<Utc>, secs: f64) -> Option<DateTime<Utc>> {
    now.checked_add_signed(millis_delta(secs * 1000.0)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds_and_millis() {
        let secs = from_epoch(1_713_600_000.0).unwrap();
        let millis = from_epoch(1_713_600_000_000.0).unwrap();
        assert_eq!(secs, millis);
        assert_eq!(secs.timestamp(), 1_713_600_000);
    }

    #[test]
    fn negative_epoch_is_rejected() {
        assert!(from_epoch(-5.0).is_none());
    }

    #[test]
    fn iso_and_bare_dates() {
        let iso = parse_date_str("2024-01-08T00:00:00Z").unwrap();
        let fractional = parse_date_str("2024-01-08T00:00:00.000+00:00").unwrap();
        let bare = parse_date_str("2024-01-08").unwrap();
        assert_eq!(iso, bare);
        assert_eq!(iso, fractional);
        assert!(parse_date_str("next tuesday").is_none());
    }

    #[test]
    fn relative_units_are_summed() {
        assert_eq!(parse_relative_duration("1h2m3s"), Some(Duration::seconds(3723)));
        assert_eq!(parse_relative_duration("6m0s"), Some(Duration::seconds(360)));
        assert_eq!(parse_relative_duration("250ms"), Some(Duration::milliseconds(250)));
        assert_eq!(parse_relative_duration("1s500ms"), Some(Duration::milliseconds(1500)));
        assert_eq!(parse_relative_duration("0.5s"), Some(Duration::milliseconds(500)));
    }

    #[test]
    fn relative_rejects_garbage() {
        assert!(parse_relative_duration("").is_none());
        assert!(parse_relative_duration("soon").is_none());
        assert!(parse_relative_duration("5 days").is_none());
        assert!(parse_relative_duration("12").is_none());
    }

    #[test]
    fn oversized_relative_values_are_dropped() {
        assert!(parse_relative_duration("9999999999999999999h").is_none());
        assert!(parse_relative_duration("99999999999h").is_some());
        assert!(millis_delta(f64::INFINITY).is_none());
        assert!(millis_delta(1e300).is_none());
    }

    #[test]
    fn offsets_past_the_calendar_are_none() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(after_secs(now, 90.0), Some(now + Duration::seconds(90)));
        assert!(after_secs(now, 1e300).is_none());
        assert!(after_secs(now, 9.0e15).is_none());
    }
}
