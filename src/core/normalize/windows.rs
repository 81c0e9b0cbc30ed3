//! Body strategies for locating session / weekly windows inside an arbitrary
//! JSON payload. Each strategy is a free function so it can be exercised on
//! its own; [`super::Normalizer`] chains them.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::percent::{fraction_to_percent, ratio_percent, within_sane_range};
use super::values::{date, number, string};

pub const RESET_KEYS: &[&str] = &[
    "end_date",
    "endDate",
    "resets_at",
    "reset_at",
    "resetDate",
    "reset_time",
    "resetTime",
    "expires_at",
];

const LABEL_KEYS: &[&str] = &[
    "window",
    "period",
    "name",
    "bucket",
    "type",
    "id",
    "key",
    "limit_name",
    "metered_feature",
];

const PERCENT_KEYS: &[&str] = &[
    "utilization",
    "usage",
    "value",
    "ratio",
    "percent",
    "percentage",
    "used_percent",
    "percent_used",
    "usage_ratio",
    "usagePercent",
    "usage_percent",
];
const USED_KEYS: &[&str] = &["used", "consumed", "current", "usage_count", "used_count", "count"];
const LIMIT_KEYS: &[&str] = &["limit", "max", "total", "allowed", "quota", "cap"];
const REMAINING_KEYS: &[&str] = &["remaining", "remaining_count", "left", "available"];

const SESSION_NAMED: &[&str] = &["five_hour", "fiveHour", "rolling_5h", "five_hour_window"];
const WEEKLY_NAMED: &[&str] = &["seven_day", "sevenDay", "rolling_7d", "seven_day_window"];
const PRIMARY_NAMED: &[&str] = &["primary_window", "primary"];
const SECONDARY_NAMED: &[&str] = &["secondary_window", "secondary"];
const CONTAINER_KEYS: &[&str] = &["rate_limit", "rate_limits", "rateLimit", "limits"];
const WINDOW_LIST_KEYS: &[&str] = &["usage_windows", "windows", "usageWindows", "buckets"];

const SESSION_SYNONYMS: &[&str] = &[
    "five_hour_usage",
    "five_hour_utilization",
    "5h_usage",
    "usage_5h",
    "utilization_5h",
    "session_usage",
];
const WEEKLY_SYNONYMS: &[&str] = &[
    "seven_day_usage",
    "seven_day_utilization",
    "7d_usage",
    "usage_7d",
    "utilization_7d",
    "weekly_usage",
];

pub const SESSION_LABEL_TOKENS: &[&str] = &["five", "5h", "5_hour", "session"];
pub const WEEKLY_LABEL_TOKENS: &[&str] = &["seven", "7d", "week", "weekly"];

pub const SESSION_PREFERRED: &[&str] =
    &["five", "5h", "hour", "session", "short", "current", "rolling_5"];
pub const WEEKLY_PREFERRED: &[&str] = &["seven", "7d", "week", "weekly", "long", "rolling_7"];

const SECONDS_KEYS: &[&str] = &[
    "limit_window_seconds",
    "window_seconds",
    "window_duration_seconds",
    "duration_seconds",
];
const MINUTES_KEYS: &[&str] = &["window_minutes", "limit_window_minutes", "duration_minutes"];
const HOURS_KEYS: &[&str] = &[
    "duration_hours",
    "window_hours",
    "hours",
    "period_hours",
    "rolling_hours",
];
const DAYS_KEYS: &[&str] = &["duration_days", "window_days", "days", "period_days"];

pub const SESSION_MAX_HOURS: f64 = 6.0;
pub const WEEKLY_MIN_HOURS: f64 = 144.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowReading {
    pub percent: f64,
    pub resets_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Session,
    Weekly,
}

/// Session / weekly figures found by the body strategies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowPair {
    pub session: Option<WindowReading>,
    pub weekly: Option<WindowReading>,
}

impl WindowPair {
    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.weekly.is_none()
    }

    /// Fill only the slots that are still empty.
    pub fn fill_from(&mut self, other: WindowPair) {
        if self.session.is_none() {
            self.session = other.session;
        }
        if self.weekly.is_none() {
            self.weekly = other.weekly;
        }
    }

    fn set(&mut self, kind: WindowKind, reading: WindowReading) {
        let slot = match kind {
            WindowKind::Session => &mut self.session,
            WindowKind::Weekly => &mut self.weekly,
        };
        if slot.is_none() {
            *slot = Some(reading);
        }
    }
}

/// Lowercased tokens naming sub-scopes the generic scan must not touch.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    excluded: Vec<String>,
}

impl Scope {
    pub fn excluding<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            excluded: tokens
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn excludes(&self, text: &str) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.excluded.iter().any(|token| lower.contains(token.as_str()))
    }

    /// True when any label-like field of the object names an excluded scope.
    pub fn excludes_object(&self, map: &Map<String, Value>) -> bool {
        labels(map).any(|l| self.excludes(l))
    }
}

fn labels(map: &Map<String, Value>) -> impl Iterator<Item = &str> + '_ {
    LABEL_KEYS.iter().filter_map(|k| map.get(*k)?.as_str())
}

pub fn label(map: &Map<String, Value>) -> String {
    string(map, LABEL_KEYS).unwrap_or_default().to_lowercase()
}

pub fn classify_hours(hours: f64) -> Option<WindowKind> {
    if hours <= SESSION_MAX_HOURS {
        Some(WindowKind::Session)
    } else if hours >= WEEKLY_MIN_HOURS {
        Some(WindowKind::Weekly)
    } else {
        None
    }
}

/// Window length in hours from whichever unit the object uses.
pub fn window_hours(map: &Map<String, Value>) -> Option<f64> {
    number(map, SECONDS_KEYS)
        .map(|s| s / 3600.0)
        .or_else(|| number(map, MINUTES_KEYS).map(|m| m / 60.0))
        .or_else(|| number(map, HOURS_KEYS))
        .or_else(|| number(map, DAYS_KEYS).map(|d| d * 24.0))
        .filter(|h| *h > 0.0)
}

/// Usage percentage carried directly by an object, via a percentage-like key,
/// a used/limit pair or a remaining/limit pair.
pub fn usage_percent(value: &Value) -> Option<f64> {
    let map = value.as_object()?;

    if let Some(direct) = number(map, PERCENT_KEYS) {
        return within_sane_range(fraction_to_percent(direct));
    }

    let limit = number(map, LIMIT_KEYS).filter(|l| *l > 0.0);
    if let (Some(used), Some(limit)) = (number(map, USED_KEYS), limit) {
        return ratio_percent(used, limit);
    }
    if let (Some(remaining), Some(limit)) = (number(map, REMAINING_KEYS), limit) {
        return ratio_percent(limit - remaining, limit);
    }
    None
}

pub fn reading(value: &Value) -> Option<WindowReading> {
    let percent = usage_percent(value)?;
    let resets_at = value.as_object().and_then(|map| date(map, RESET_KEYS));
    Some(WindowReading { percent, resets_at })
}

fn containers<'a>(map: &'a Map<String, Value>, scope: &Scope) -> Vec<&'a Map<String, Value>> {
    let mut found = vec![map];
    for key in CONTAINER_KEYS {
        if let Some(inner) = map.get(*key).and_then(Value::as_object) {
            if !scope.excludes_object(inner) {
                found.push(inner);
            }
        }
    }
    found
}

/// Strategy 1: explicitly named windows, duration-keyed primary/secondary
/// windows, then window lists.
pub fn known_shape(root: &Value, scope: &Scope) -> WindowPair {
    let mut pair = WindowPair::default();

    let map = match root {
        Value::Array(items) => return window_list(items, scope),
        Value::Object(map) => map,
        _ => return pair,
    };

    for container in containers(map, scope) {
        for (keys, kind) in [(SESSION_NAMED, WindowKind::Session), (WEEKLY_NAMED, WindowKind::Weekly)] {
            if let Some(found) = keys.iter().find_map(|k| container.get(*k)).and_then(reading) {
                pair.set(kind, found);
            }
        }

        for (keys, default_kind) in [
            (PRIMARY_NAMED, WindowKind::Session),
            (SECONDARY_NAMED, WindowKind::Weekly),
        ] {
            let Some(window) = keys.iter().find_map(|k| container.get(*k)) else {
                continue;
            };
            let Some(window_map) = window.as_object() else {
                continue;
            };
            if scope.excludes_object(window_map) {
                continue;
            }
            let kind = match window_hours(window_map) {
                Some(hours) => classify_hours(hours),
                None => Some(default_kind),
            };
            if let (Some(kind), Some(found)) = (kind, reading(window)) {
                pair.set(kind, found);
            }
        }
    }

    if pair.session.is_none() || pair.weekly.is_none() {
        if let Some(items) = find_window_list(root, scope) {
            pair.fill_from(window_list(items, scope));
        }
    }

    pair
}

fn find_window_list<'a>(value: &'a Value, scope: &Scope) -> Option<&'a Vec<Value>> {
    match value {
        Value::Object(map) => {
            if scope.excludes_object(map) {
                return None;
            }
            WINDOW_LIST_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array))
                .or_else(|| {
                    map.iter()
                        .filter(|(key, _)| !scope.excludes(key))
                        .find_map(|(_, child)| find_window_list(child, scope))
                })
        }
        Value::Array(items) => items.iter().find_map(|child| find_window_list(child, scope)),
        _ => None,
    }
}

/// Classify each entry of a window list by label, then by duration. Entries
/// that match neither are ranked by duration: shortest fills session,
/// longest fills weekly.
pub fn window_list(items: &[Value], scope: &Scope) -> WindowPair {
    let mut pair = WindowPair::default();
    let mut unclassified: Vec<(WindowReading, Option<f64>)> = Vec::new();

    for item in items {
        let Some(map) = item.as_object() else {
            continue;
        };
        if scope.excludes_object(map) {
            continue;
        }
        let Some(found) = reading(item) else {
            continue;
        };

        let name = label(map);
        let hours = window_hours(map);
        let is_session = ["five", "5h", "5_hour"].iter().any(|t| name.contains(t))
            || hours.is_some_and(|h| h <= SESSION_MAX_HOURS);
        let is_weekly = ["seven", "7d", "week"].iter().any(|t| name.contains(t))
            || hours.is_some_and(|h| h >= WEEKLY_MIN_HOURS);

        if is_session {
            pair.session = Some(found);
        } else if is_weekly {
            pair.weekly = Some(found);
        } else {
            unclassified.push((found, hours));
        }
    }

    if !unclassified.is_empty() && (pair.session.is_none() || pair.weekly.is_none()) {
        unclassified.sort_by(|a, b| {
            let a = a.1.unwrap_or(f64::MAX);
            let b = b.1.unwrap_or(f64::MAX);
            a.total_cmp(&b)
        });
        if pair.session.is_none() {
            pair.session = unclassified.first().map(|(r, _)| *r);
        }
        if pair.weekly.is_none() {
            pair.weekly = unclassified.last().map(|(r, _)| *r);
        }
    }

    pair
}

/// Strategy 2: alternate top-level key names, then a usage figure carried by
/// the top-level object itself.
pub fn synonyms(root: &Value) -> WindowPair {
    let mut pair = WindowPair::default();
    let Some(map) = root.as_object() else {
        return pair;
    };

    let top_reset = date(map, RESET_KEYS);
    let scaled = |keys: &[&str]| {
        number(map, keys)
            .and_then(|v| within_sane_range(fraction_to_percent(v)))
            .map(|percent| WindowReading { percent, resets_at: top_reset })
    };
    pair.session = scaled(SESSION_SYNONYMS);
    pair.weekly = scaled(WEEKLY_SYNONYMS);

    if pair.is_empty() {
        if let Some(found) = reading(root) {
            let kind = window_hours(map)
                .and_then(classify_hours)
                .unwrap_or(WindowKind::Session);
            pair.set(kind, found);
        }
    }
    pair
}

/// Strategy 3: first object whose label, or whose key in its parent,
/// contains one of `tokens`.
pub fn label_match(value: &Value, tokens: &[&str], scope: &Scope) -> Option<WindowReading> {
    match value {
        Value::Object(map) => {
            if scope.excludes_object(map) {
                return None;
            }
            let name = label(map);
            if tokens.iter().any(|t| name.contains(t)) {
                if let Some(found) = reading(value) {
                    return Some(found);
                }
            }

            let children = || map.iter().filter(|(key, _)| !scope.excludes(key));
            for (key, child) in children() {
                let key = key.to_lowercase();
                if tokens.iter().any(|t| key.contains(t)) {
                    let excluded = child.as_object().is_some_and(|m| scope.excludes_object(m));
                    if !excluded {
                        if let Some(found) = reading(child) {
                            return Some(found);
                        }
                    }
                }
            }
            children().find_map(|(_, child)| label_match(child, tokens, scope))
        }
        Value::Array(items) => items.iter().find_map(|child| label_match(child, tokens, scope)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub path: String,
    pub reading: WindowReading,
}

/// Strategy 4: every object in the tree that yields a percentage, tagged with
/// its dotted path.
pub fn harvest(root: &Value, scope: &Scope) -> Vec<Candidate> {
    let mut found = Vec::new();
    collect(root, String::new(), scope, &mut found);
    found
}

fn collect(value: &Value, path: String, scope: &Scope, out: &mut Vec<Candidate>) {
    match value {
        Value::Object(map) => {
            if scope.excludes_object(map) {
                return;
            }
            if let Some(found) = reading(value) {
                out.push(Candidate { path: path.clone(), reading: found });
            }
            for (key, child) in map {
                if scope.excludes(key) {
                    continue;
                }
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                collect(child, child_path, scope, out);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                collect(child, format!("{path}[{idx}]"), scope, out);
            }
        }
        _ => {}
    }
}

/// Highest token score wins, ties go to the larger percentage. A candidate
/// matching no token at all is never picked.
pub fn pick<'a>(candidates: &'a [Candidate], preferred: &[&str]) -> Option<&'a Candidate> {
    candidates
        .iter()
        .map(|c| {
            let path = c.path.to_lowercase();
            let score = preferred.iter().filter(|t| path.contains(**t)).count();
            (c, score)
        })
        .max_by(|(a, sa), (b, sb)| {
            sa.cmp(sb)
                .then_with(|| a.reading.percent.total_cmp(&b.reading.percent))
        })
        .filter(|(_, score)| *score > 0)
        .map(|(c, _)| c)
}

/// Scored pick per bucket, then smallest value for session and largest for
/// weekly when no path matched.
pub fn harvest_pair(root: &Value, scope: &Scope) -> WindowPair {
    let candidates = harvest(root, scope);
    if candidates.is_empty() {
        return WindowPair::default();
    }

    let mut pair = WindowPair {
        session: pick(&candidates, SESSION_PREFERRED).map(|c| c.reading),
        weekly: pick(&candidates, WEEKLY_PREFERRED).map(|c| c.reading),
    };

    let by_percent = |a: &&Candidate, b: &&Candidate| a.reading.percent.total_cmp(&b.reading.percent);
    if pair.session.is_none() {
        pair.session = candidates.iter().min_by(by_percent).map(|c| c.reading);
    }
    if pair.weekly.is_none() {
        pair.weekly = candidates.iter().max_by(by_percent).map(|c| c.reading);
    }
    pair
}

/// The narrower pass for a named sub-scope: locate the subtree whose key or
/// label mentions `token` and read its windows with the same duration split.
/// The weekly window is preferred when both are present.
pub fn sub_scope(root: &Value, token: &str) -> Option<WindowReading> {
    let token = token.to_lowercase();
    let subtree = find_sub_scope(root, &token)?;
    let unscoped = Scope::default();

    let pair = known_shape(subtree, &unscoped);
    pair.weekly
        .or(pair.session)
        .or_else(|| reading(subtree))
        .or_else(|| {
            let candidates = harvest(subtree, &unscoped);
            candidates
                .iter()
                .max_by(|a, b| a.reading.percent.total_cmp(&b.reading.percent))
                .map(|c| c.reading)
        })
}

fn find_sub_scope<'a>(value: &'a Value, token: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if labels(map).any(|l| l.to_lowercase().contains(token)) {
                return Some(value);
            }
            map.iter()
                .find(|(key, child)| key.to_lowercase().contains(token) && child.is_object())
                .map(|(_, child)| child)
                .or_else(|| map.values().find_map(|child| find_sub_scope(child, token)))
        }
        Value::Array(items) => items.iter().find_map(|child| find_sub_scope(child, token)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn none() -> Scope {
        Scope::default()
    }

    fn spark() -> Scope {
        Scope::excluding(["spark"])
    }

    #[test]
    fn usage_percent_variants() {
        assert_eq!(usage_percent(&json!({"utilization": 0.25})), Some(25.0));
        assert_eq!(usage_percent(&json!({"used_percent": 42})), Some(42.0));
        assert_eq!(usage_percent(&json!({"used": 30, "limit": 120})), Some(25.0));
        assert_eq!(usage_percent(&json!({"remaining": 90, "quota": 120})), Some(25.0));
        assert_eq!(usage_percent(&json!({"percent": 900})), None);
        assert_eq!(usage_percent(&json!({"used": 3, "limit": 0})), None);
        assert_eq!(usage_percent(&json!(12)), None);
    }

    #[test]
    fn small_ratios_stay_small() {
        // 1 used of 1000 is 0.1%, not 10%.
        let p = usage_percent(&json!({"used": 1, "limit": 1000})).unwrap();
        assert!((p - 0.1).abs() < 1e-9);
    }

    #[test]
    fn named_windows() {
        let payload = json!({
            "five_hour": {"utilization": 0.42, "resets_at": "2024-01-01T00:00:00Z"},
            "seven_day": {"utilization": 65, "resets_at": "2024-01-08T00:00:00Z"}
        });
        let pair = known_shape(&payload, &none());
        assert!((pair.session.unwrap().percent - 42.0).abs() < 1e-9);
        assert!((pair.weekly.unwrap().percent - 65.0).abs() < 1e-9);
        assert!(pair.weekly.unwrap().resets_at.is_some());
    }

    #[test]
    fn duration_keyed_windows_are_classified_by_length() {
        // Deliberately swapped: the primary window is the weekly one here.
        let payload = json!({
            "rate_limit": {
                "primary_window": {"used_percent": 70, "limit_window_seconds": 604800},
                "secondary_window": {"used_percent": 12, "limit_window_seconds": 18000}
            }
        });
        let pair = known_shape(&payload, &none());
        assert_eq!(pair.session.unwrap().percent, 12.0);
        assert_eq!(pair.weekly.unwrap().percent, 70.0);
    }

    #[test]
    fn mid_length_window_is_left_unclassified() {
        let payload = json!({"primary_window": {"used_percent": 50, "limit_window_seconds": 43200}});
        assert!(known_shape(&payload, &none()).is_empty());
    }

    #[test]
    fn window_list_by_label_and_duration() {
        let payload = json!({"data": {"usage_windows": [
            {"name": "5h", "usage": 0.2},
            {"duration_days": 7, "usage": 0.6, "end_date": "2024-01-08"}
        ]}});
        let pair = known_shape(&payload, &none());
        assert!((pair.session.unwrap().percent - 20.0).abs() < 1e-9);
        assert!((pair.weekly.unwrap().percent - 60.0).abs() < 1e-9);
        assert!(pair.weekly.unwrap().resets_at.is_some());
    }

    #[test]
    fn window_list_ranks_unlabelled_entries_by_duration() {
        let items = vec![
            json!({"window_hours": 24, "percent": 30}),
            json!({"window_hours": 12, "percent": 10}),
        ];
        let pair = window_list(&items, &none());
        assert_eq!(pair.session.unwrap().percent, 10.0);
        assert_eq!(pair.weekly.unwrap().percent, 30.0);
    }

    #[test]
    fn synonym_keys() {
        let pair = synonyms(&json!({"five_hour_usage": 0.3, "weekly_usage": "55%"}));
        assert!((pair.session.unwrap().percent - 30.0).abs() < 1e-9);
        assert_eq!(pair.weekly.unwrap().percent, 55.0);
    }

    #[test]
    fn top_level_ratio_falls_to_session() {
        let pair = synonyms(&json!({"used": 40, "limit": 50}));
        assert_eq!(pair.session.unwrap().percent, 80.0);
        assert!(pair.weekly.is_none());
    }

    #[test]
    fn label_tokens_match_nested_objects() {
        let payload = json!({"limits": [
            {"type": "weekly_cap", "used": 5, "limit": 10},
            {"type": "session", "ratio": 0.1}
        ]});
        let weekly = label_match(&payload, WEEKLY_LABEL_TOKENS, &none()).unwrap();
        let session = label_match(&payload, SESSION_LABEL_TOKENS, &none()).unwrap();
        assert_eq!(weekly.percent, 50.0);
        assert!((session.percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn label_match_skips_excluded_scope() {
        let payload = json!({"limits": [{"type": "spark_session", "percent": 90}]});
        assert!(label_match(&payload, SESSION_LABEL_TOKENS, &spark()).is_none());
    }

    #[test]
    fn every_label_field_is_checked_for_exclusion() {
        let window = json!({"name": "usage", "limit_name": "gpt-5-codex-spark", "percent": 90});
        assert!(spark().excludes_object(window.as_object().unwrap()));
        assert!(!none().excludes_object(window.as_object().unwrap()));

        let payload = json!({"limits": [
            {"type": "session", "limit_name": "gpt-5-codex-spark", "percent": 90},
            {"type": "session", "percent": 12}
        ]});
        let session = label_match(&payload, SESSION_LABEL_TOKENS, &spark()).unwrap();
        assert_eq!(session.percent, 12.0);
    }

    #[test]
    fn harvest_scores_paths() {
        let payload = json!({
            "quota": {
                "short_term": {"percent": 15},
                "long_term": {"percent": 40}
            }
        });
        let pair = harvest_pair(&payload, &none());
        assert_eq!(pair.session.unwrap().percent, 15.0);
        assert_eq!(pair.weekly.unwrap().percent, 40.0);
    }

    #[test]
    fn harvest_without_tokens_uses_magnitude() {
        let payload = json!({"a": {"percent": 15}, "b": {"percent": 40}});
        let pair = harvest_pair(&payload, &none());
        assert_eq!(pair.session.unwrap().percent, 15.0);
        assert_eq!(pair.weekly.unwrap().percent, 40.0);
    }

    #[test]
    fn pick_requires_a_token_hit() {
        let candidates = harvest(&json!({"x": {"percent": 10}}), &none());
        assert!(pick(&candidates, SESSION_PREFERRED).is_none());
    }

    #[test]
    fn harvest_never_enters_excluded_paths() {
        let payload = json!({"spark_limits": {"session": {"percent": 90}}, "other": {"percent": 5}});
        let candidates = harvest(&payload, &spark());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].path, "other");
    }

    #[test]
    fn sub_scope_prefers_weekly() {
        let payload = json!({"additional_rate_limits": [{
            "limit_name": "codex-spark",
            "rate_limit": {
                "primary_window": {"used_percent": 90, "limit_window_seconds": 18000},
                "secondary_window": {"used_percent": 35, "limit_window_seconds": 604800}
            }
        }]});
        assert_eq!(sub_scope(&payload, "spark").unwrap().percent, 35.0);
        assert!(sub_scope(&payload, "sonnet").is_none());
    }
}
