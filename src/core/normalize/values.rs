use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::dates::{from_epoch, parse_date_str};

static LOOSE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d*\.?\d+(?:[eE][-+]?\d+)?").expect("valid regex"));

/// Parse numbers that arrive as text: `"1,234.5"`, `"42%"`, `"12.5 credits"`.
pub fn parse_loose_f64(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '%')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(value) = cleaned.trim().parse::<f64>() {
        return value.is_finite().then_some(value);
    }
    LOOSE_NUMBER
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// A scalar as a number; text goes through [`parse_loose_f64`].
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_loose_f64(s),
        _ => None,
    }
}

/// A scalar as a timestamp: epoch seconds/millis or a date string.
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(raw) => from_epoch(raw),
            Err(_) => parse_date_str(s),
        },
        _ => None,
    }
}

/// First key present in `object` whose value parses as a number.
pub fn number(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| object.get(*key).and_then(as_number))
}

/// First key present in `object` holding a non-empty string.
pub fn string<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    })
}

/// First key present in `object` holding a parseable timestamp.
pub fn date(object: &Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|key| object.get(*key).and_then(as_date))
}

/// Depth-first search for a non-empty string under any of `keys`.
pub fn find_string<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    match value {
        Value::Object(map) => {
            string(map, keys).or_else(|| map.values().find_map(|child| find_string(child, keys)))
        }
        Value::Array(items) => items.iter().find_map(|child| find_string(child, keys)),
        _ => None,
    }
}

/// Depth-first search for an array under any of `keys`.
pub fn find_array<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    match value {
        Value::Object(map) => keys
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .or_else(|| map.values().find_map(|child| find_array(child, keys))),
        Value::Array(items) => items.iter().find_map(|child| find_array(child, keys)),
        _ => None,
    }
}

/// Depth-first search for a parseable timestamp under any of `keys`.
pub fn find_date(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    match value {
        Value::Object(map) => {
            date(map, keys).or_else(|| map.values().find_map(|child| find_date(child, keys)))
        }
        Value::Array(items) => items.iter().find_map(|child| find_date(child, keys)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loose_numbers() {
        assert_eq!(parse_loose_f64("42"), Some(42.0));
        assert_eq!(parse_loose_f64("1,234.5"), Some(1234.5));
        assert_eq!(parse_loose_f64(" 42% "), Some(42.0));
        assert_eq!(parse_loose_f64("12.5 credits"), Some(12.5));
        assert_eq!(parse_loose_f64("none"), None);
        assert_eq!(parse_loose_f64(""), None);
    }

    #[test]
    fn scalars_from_strings_and_numbers() {
        assert_eq!(as_number(&json!("0.5")), Some(0.5));
        assert_eq!(as_number(&json!(7)), Some(7.0));
        assert_eq!(as_number(&json!(true)), None);
        assert!(as_date(&json!("1713600000")).is_some());
        assert!(as_date(&json!("2024-01-08")).is_some());
        assert!(as_date(&json!(null)).is_none());
    }

    #[test]
    fn key_lists_take_first_usable_entry() {
        let value = json!({"limit": "n/a", "max": 100, "name": "  ", "id": "weekly"});
        let map = value.as_object().unwrap();
        assert_eq!(number(map, &["limit", "max"]), Some(100.0));
        assert_eq!(string(map, &["name", "id"]), Some("weekly"));
    }

    #[test]
    fn recursive_lookups() {
        let value = json!({
            "data": {"meta": [{"plan": "pro"}], "windows": [{"x": 1}]},
            "deep": {"resets_at": "2024-01-08T00:00:00Z"}
        });
        assert_eq!(find_string(&value, &["plan"]), Some("pro"));
        assert_eq!(find_array(&value, &["windows"]).map(Vec::len), Some(1));
        assert!(find_date(&value, &["resets_at"]).is_some());
        assert!(find_array(&value, &["buckets"]).is_none());
    }
}
