use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::normalize::percent::sanitize_percent;
use crate::core::providers::Provider;

/// The normalized result of one provider fetch.
///
/// Percentages are always stored in `[0, 100]`; setters drop anything that
/// fails the sanity range instead of storing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_usage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_usage: Option<f64>,
    /// Sub-quota for a specific model tier (Claude "sonnet", Codex "spark").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_model_usage: Option<f64>,
    /// Absolute balance. Low is bad.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_credits: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_reset_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_reset_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_reset_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_secondary_only: Option<bool>,
    pub fetched_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn new(provider: Provider) -> Self {
        Self::at(provider, Utc::now())
    }

    /// Build an empty snapshot stamped with a fixed instant.
    pub fn at(provider: Provider, fetched_at: DateTime<Utc>) -> Self {
        Self {
            provider,
            session_usage: None,
            weekly_usage: None,
            secondary_model_usage: None,
            remaining_credits: None,
            reset_date: None,
            session_reset_date: None,
            weekly_reset_date: None,
            secondary_reset_date: None,
            is_secondary_only: None,
            fetched_at,
        }
    }

    pub fn with_session(mut self, percent: Option<f64>, resets_at: Option<DateTime<Utc>>) -> Self {
        self.session_usage = percent.and_then(sanitize_percent);
        self.session_reset_date = resets_at;
        self
    }

    pub fn with_weekly(mut self, percent: Option<f64>, resets_at: Option<DateTime<Utc>>) -> Self {
        self.weekly_usage = percent.and_then(sanitize_percent);
        self.weekly_reset_date = resets_at;
        self
    }

    pub fn with_secondary(mut self, percent: Option<f64>, resets_at: Option<DateTime<Utc>>) -> Self {
        self.secondary_model_usage = percent.and_then(sanitize_percent);
        self.secondary_reset_date = resets_at;
        self
    }

    pub fn with_credits(mut self, remaining: Option<f64>) -> Self {
        self.remaining_credits = remaining.filter(|v| v.is_finite());
        self
    }

    pub fn with_reset_date(mut self, resets_at: Option<DateTime<Utc>>) -> Self {
        self.reset_date = resets_at;
        self
    }

    /// True when the snapshot carries at least one usage or credit figure.
    pub fn has_usage(&self) -> bool {
        self.session_usage.is_some()
            || self.weekly_usage.is_some()
            || self.secondary_model_usage.is_some()
            || self.remaining_credits.is_some()
    }
}
