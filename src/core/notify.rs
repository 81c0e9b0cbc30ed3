use std::collections::HashMap;
use std::io::Write;

use chrono::{DateTime, Duration, Utc};
use colored::Colorize;
use tracing::{debug, warn};

use crate::core::config::NotificationConfig;
use crate::core::models::usage::UsageSnapshot;
use crate::core::normalize::percent::display_percent;

/// Minimum gap between two alerts for the same key.
pub const COOLDOWN_MINUTES: i64 = 30;

/// Which way a threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStyle {
    /// Percentage used; fires at or above the threshold.
    Usage,
    /// Remaining balance; fires at or below the threshold.
    Balance,
}

impl AlertStyle {
    pub fn breached(self, value: f64, threshold: f64) -> bool {
        match self {
            AlertStyle::Usage => value >= threshold,
            AlertStyle::Balance => value <= threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub key: String,
    pub style: AlertStyle,
    pub value: f64,
    pub threshold: f64,
}

impl Alert {
    pub fn title(&self) -> String {
        format!("{} Usage Alert", self.key)
    }

    pub fn body(&self) -> String {
        match self.style {
            AlertStyle::Usage => format!("Usage at {:.0}% — approaching limit", self.value),
            AlertStyle::Balance => format!("Balance at ${:.2} — running low", self.value),
        }
    }
}

/// Outbound delivery of an alert.
pub trait Notifier: Send + Sync {
    fn deliver(&self, alert: &Alert) -> std::io::Result<()>;
}

/// Prints alerts to stderr so stdout stays machine-readable.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn deliver(&self, alert: &Alert) -> std::io::Result<()> {
        let mut stderr = std::io::stderr().lock();
        writeln!(
            stderr,
            "{} {}: {}",
            "!".yellow().bold(),
            alert.title().bold(),
            alert.body()
        )
    }
}

/// Per-key cooldown bookkeeping for threshold alerts.
#[derive(Debug)]
pub struct NotificationGate {
    cooldown: Duration,
    last_fired: HashMap<String, DateTime<Utc>>,
}

impl Default for NotificationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationGate {
    pub fn new() -> Self {
        Self {
            cooldown: Duration::minutes(COOLDOWN_MINUTES),
            last_fired: HashMap::new(),
        }
    }

    pub fn last_fired(&self, key: &str) -> Option<DateTime<Utc>> {
        self.last_fired.get(key).copied()
    }

    /// Decide whether `key` fires now. A firing alert stamps the key before
    /// delivery is attempted.
    pub fn check(
        &mut self,
        key: &str,
        value: f64,
        threshold: f64,
        style: AlertStyle,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        if !style.breached(value, threshold) {
            return None;
        }
        if let Some(last) = self.last_fired.get(key) {
            if now - *last < self.cooldown {
                debug!(key, "alert suppressed by cooldown");
                return None;
            }
        }
        self.last_fired.insert(key.to_string(), now);
        Some(Alert {
            key: key.to_string(),
            style,
            value,
            threshold,
        })
    }

    /// Evaluate every alertable figure of a fresh snapshot.
    pub fn evaluate(
        &mut self,
        snapshot: &UsageSnapshot,
        config: &NotificationConfig,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let provider = snapshot.provider;
        let name = provider.display_name();
        let mut alerts = Vec::new();

        if provider.is_credit_based() {
            if let Some(credits) = snapshot.remaining_credits {
                alerts.extend(self.check(
                    name,
                    credits,
                    config.openrouter_credit_threshold,
                    AlertStyle::Balance,
                    now,
                ));
            }
            return alerts;
        }

        let thresholds = config.thresholds_for(provider);
        let windows = [
            ("5h", snapshot.session_usage, thresholds.session),
            ("7d", snapshot.weekly_usage, thresholds.weekly),
        ];
        for (window, value, threshold) in windows {
            if let Some(value) = value {
                let key = format!("{name} {window}");
                alerts.extend(self.check(&key, display_percent(value), threshold, AlertStyle::Usage, now));
            }
        }
        alerts
    }
}

/// Hand alerts to a notifier. Delivery failures are logged and otherwise
/// ignored; the gate has already recorded the firing.
pub fn deliver_all(notifier: &dyn Notifier, alerts: &[Alert]) {
    for alert in alerts {
        if let Err(e) = notifier.deliver(alert) {
            warn!(key = %alert.key, error = %e, "failed to deliver notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::WindowThresholds;
    use crate::core::providers::Provider;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn usage_fires_at_or_above_threshold() {
        let mut gate = NotificationGate::new();
        assert!(gate.check("Claude 5h", 79.9, 80.0, AlertStyle::Usage, t0()).is_none());
        let alert = gate.check("Claude 5h", 80.0, 80.0, AlertStyle::Usage, t0()).unwrap();
        assert_eq!(alert.title(), "Claude 5h Usage Alert");
        assert_eq!(alert.body(), "Usage at 80% — approaching limit");
    }

    #[test]
    fn below_threshold_does_not_stamp() {
        let mut gate = NotificationGate::new();
        gate.check("Codex 7d", 10.0, 80.0, AlertStyle::Usage, t0());
        assert!(gate.last_fired("Codex 7d").is_none());
    }

    #[test]
    fn cooldown_of_thirty_minutes() {
        let mut gate = NotificationGate::new();
        let mut fired = 0;
        for at in [t0(), t0() + Duration::minutes(29)] {
            fired += gate.check("Claude 5h", 95.0, 80.0, AlertStyle::Usage, at).iter().count();
        }
        assert_eq!(fired, 1);

        let mut gate = NotificationGate::new();
        let mut fired = 0;
        for at in [t0(), t0() + Duration::minutes(31)] {
            fired += gate.check("Claude 5h", 95.0, 80.0, AlertStyle::Usage, at).iter().count();
        }
        assert_eq!(fired, 2);
    }

    #[test]
    fn keys_cool_down_independently() {
        let mut gate = NotificationGate::new();
        assert!(gate.check("Claude 5h", 90.0, 80.0, AlertStyle::Usage, t0()).is_some());
        assert!(gate.check("Claude 7d", 90.0, 80.0, AlertStyle::Usage, t0()).is_some());
        assert!(gate.check("Claude 5h", 90.0, 80.0, AlertStyle::Usage, t0()).is_none());
    }

    #[test]
    fn low_balance_alert() {
        let mut gate = NotificationGate::new();
        let snapshot = UsageSnapshot::at(Provider::OpenRouter, t0()).with_credits(Some(2.5));
        let alerts = gate.evaluate(&snapshot, &NotificationConfig::default(), t0());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].key, "OpenRouter");
        assert_eq!(alerts[0].style, AlertStyle::Balance);
        assert_eq!(alerts[0].body(), "Balance at $2.50 — running low");

        let healthy = UsageSnapshot::at(Provider::OpenRouter, t0()).with_credits(Some(40.0));
        let mut gate = NotificationGate::new();
        assert!(gate.evaluate(&healthy, &NotificationConfig::default(), t0()).is_empty());
    }

    #[test]
    fn snapshot_windows_use_provider_thresholds() {
        let mut config = NotificationConfig::default();
        config.thresholds.insert(
            "codex".into(),
            WindowThresholds {
                session: 50.0,
                weekly: 95.0,
            },
        );
        let snapshot = UsageSnapshot::at(Provider::Codex, t0())
            .with_session(Some(60.0), None)
            .with_weekly(Some(90.0), None);
        let mut gate = NotificationGate::new();
        let keys: Vec<String> = gate
            .evaluate(&snapshot, &config, t0())
            .into_iter()
            .map(|a| a.key)
            .collect();
        assert_eq!(keys, vec!["Codex 5h".to_string()]);
    }

    struct FailingNotifier {
        attempts: Mutex<usize>,
    }

    impl Notifier for FailingNotifier {
        fn deliver(&self, _alert: &Alert) -> std::io::Result<()> {
            *self.attempts.lock() += 1;
            Err(std::io::Error::other("notification center unavailable"))
        }
    }

    #[test]
    fn failed_delivery_still_counts_as_fired() {
        let notifier = FailingNotifier {
            attempts: Mutex::new(0),
        };
        let mut gate = NotificationGate::new();
        let snapshot = UsageSnapshot::at(Provider::Gemini, t0()).with_session(Some(99.0), None);

        let alerts = gate.evaluate(&snapshot, &NotificationConfig::default(), t0());
        deliver_all(&notifier, &alerts);
        let again = gate.evaluate(&snapshot, &NotificationConfig::default(), t0() + Duration::minutes(5));
        deliver_all(&notifier, &again);

        assert_eq!(*notifier.attempts.lock(), 1);
        assert_eq!(gate.last_fired("Gemini 5h"), Some(t0()));
    }
}
