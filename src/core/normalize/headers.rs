use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::dates::{after_secs, from_epoch, parse_date_str, parse_relative_duration};
use super::percent::ratio_percent;
use super::values::parse_loose_f64;
use super::windows::{WindowPair, WindowReading};

/// Bare numbers at or above this are absolute epoch values rather than a
/// number of seconds to wait.
const EPOCH_FLOOR: f64 = 1_000_000_000.0;

const RESET_HEADERS: &[&str] = &[
    "x-ratelimit-reset",
    "x-ratelimit-reset-requests",
    "x-ratelimit-reset-tokens",
];

/// Response headers with lowercased names.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    values: HashMap<String, String>,
}

impl ResponseHeaders {
    pub fn from_header_map(map: &reqwest::header::HeaderMap) -> Self {
        map.iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string())))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn number(&self, names: &[&str]) -> Option<f64> {
        names.iter().find_map(|n| self.get(n).and_then(parse_loose_f64))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ResponseHeaders {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }
}

/// Which header names carry limit / remaining counts for each window.
#[derive(Debug, Clone, Copy)]
pub struct HeaderNames {
    pub session_limit: &'static [&'static str],
    pub session_remaining: &'static [&'static str],
    pub weekly_limit: &'static [&'static str],
    pub weekly_remaining: &'static [&'static str],
}

impl HeaderNames {
    pub const RATE_LIMIT: HeaderNames = HeaderNames {
        session_limit: &[
            "x-ratelimit-limit-requests",
            "x-ratelimit-limit",
            "x-ratelimit-limit-tokens",
        ],
        session_remaining: &[
            "x-ratelimit-remaining-requests",
            "x-ratelimit-remaining",
            "x-ratelimit-remaining-tokens",
        ],
        weekly_limit: &[
            "x-weekly-ratelimit-limit",
            "x-ratelimit-limit-weekly",
            "x-usage-week-limit",
        ],
        weekly_remaining: &[
            "x-weekly-ratelimit-remaining",
            "x-ratelimit-remaining-weekly",
            "x-usage-week-remaining",
        ],
    };

    pub const GOOGLE: HeaderNames = HeaderNames {
        session_limit: &[
            "x-ratelimit-limit-requests",
            "x-ratelimit-limit",
            "x-goog-ratelimit-limit-requests",
            "x-goog-ratelimit-limit",
            "x-ratelimit-limit-tokens",
        ],
        session_remaining: &[
            "x-ratelimit-remaining-requests",
            "x-ratelimit-remaining",
            "x-goog-ratelimit-remaining-requests",
            "x-goog-ratelimit-remaining",
            "x-ratelimit-remaining-tokens",
        ],
        weekly_limit: HeaderNames::RATE_LIMIT.weekly_limit,
        weekly_remaining: HeaderNames::RATE_LIMIT.weekly_remaining,
    };
}

fn window_from(headers: &ResponseHeaders, limit: &[&str], remaining: &[&str]) -> Option<f64> {
    let limit = headers.number(limit)?;
    let remaining = headers.number(remaining)?;
    ratio_percent((limit - remaining).max(0.0), limit)
}

/// Usage from rate-limit headers. Without dedicated weekly headers the
/// session figure doubles as the weekly one.
pub fn usage_from_headers(headers: &ResponseHeaders, names: &HeaderNames, now: DateTime<Utc>) -> WindowPair {
    let resets_at = reset_from_headers(headers, now);
    let session = window_from(headers, names.session_limit, names.session_remaining);
    let weekly = window_from(headers, names.weekly_limit, names.weekly_remaining).or(session);

    let as_reading = |percent: f64| WindowReading { percent, resets_at };
    WindowPair {
        session: session.map(as_reading),
        weekly: weekly.map(as_reading),
    }
}

/// Reset instant from `x-ratelimit-reset*` or `retry-after`.
pub fn reset_from_headers(headers: &ResponseHeaders, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    RESET_HEADERS
        .iter()
        .find_map(|name| headers.get(name).and_then(|raw| parse_reset_value(raw, now)))
        .or_else(|| {
            headers
                .get("retry-after")
                .and_then(|raw| parse_reset_value(raw, now))
        })
}

fn parse_reset_value(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(number) = trimmed.parse::<f64>() {
        if !number.is_finite() || number < 0.0 {
            return None;
        }
        if number >= EPOCH_FLOOR {
            return from_epoch(number);
        }
        return after_secs(now, number);
    }
    if let Some(delta) = parse_relative_duration(trimmed) {
        return now.checked_add_signed(delta);
    }
    parse_date_str(trimmed)
}
