//! Schema-tolerant extraction of usage figures from provider responses.
//!
//! Body strategies run in a fixed order and each one only fills slots that
//! earlier strategies left empty:
//!
//! 1. known shapes (`five_hour`/`seven_day`, duration-keyed primary/secondary
//!    windows, window lists)
//! 2. alternate top-level keys
//! 3. label-token matching anywhere in the tree
//! 4. path-scored candidate harvesting (only when 1-3 found nothing)
//!
//! Header-derived usage is the last resort and is applied by the providers
//! that have headers to offer, see [`headers`].

pub mod dates;
pub mod headers;
pub mod percent;
pub mod values;
pub mod windows;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::models::usage::UsageSnapshot;
use crate::core::providers::Provider;

use windows::{Scope, WindowPair, WindowReading};

/// Everything the body strategies recovered from one payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageReading {
    pub session: Option<WindowReading>,
    pub weekly: Option<WindowReading>,
    pub secondary: Option<WindowReading>,
}

impl UsageReading {
    pub fn has_primary(&self) -> bool {
        self.session.is_some() || self.weekly.is_some()
    }

    /// Fill empty session / weekly slots from another source.
    pub fn fill_primary(&mut self, pair: WindowPair) {
        if self.session.is_none() {
            self.session = pair.session;
        }
        if self.weekly.is_none() {
            self.weekly = pair.weekly;
        }
    }

    pub fn into_snapshot(self, provider: Provider, fetched_at: DateTime<Utc>) -> UsageSnapshot {
        let session_reset = self.session.and_then(|r| r.resets_at);
        let weekly_reset = self.weekly.and_then(|r| r.resets_at);
        UsageSnapshot::at(provider, fetched_at)
            .with_session(self.session.map(|r| r.percent), session_reset)
            .with_weekly(self.weekly.map(|r| r.percent), weekly_reset)
            .with_secondary(
                self.secondary.map(|r| r.percent),
                self.secondary.and_then(|r| r.resets_at),
            )
            .with_reset_date(session_reset.or(weekly_reset))
    }
}

/// The body cascade, optionally fenced off from one named sub-scope that is
/// read separately into the secondary slot.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    secondary_scope: Option<String>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secondary_scope(scope: impl Into<String>) -> Self {
        Self {
            secondary_scope: Some(scope.into()),
        }
    }

    /// `None` when no strategy found a usable figure. Pure: the same payload
    /// always yields the same reading.
    pub fn normalize(&self, root: &Value) -> Option<UsageReading> {
        let scope = Scope::excluding(self.secondary_scope.iter());

        let mut pair = windows::known_shape(root, &scope);
        pair.fill_from(windows::synonyms(root));
        if pair.session.is_none() {
            pair.session = windows::label_match(root, windows::SESSION_LABEL_TOKENS, &scope);
        }
        if pair.weekly.is_none() {
            pair.weekly = windows::label_match(root, windows::WEEKLY_LABEL_TOKENS, &scope);
        }
        if pair.is_empty() {
            pair = windows::harvest_pair(root, &scope);
        }

        let secondary = self
            .secondary_scope
            .as_deref()
            .and_then(|token| windows::sub_scope(root, token));

        let reading = UsageReading {
            session: pair.session,
            weekly: pair.weekly,
            secondary,
        };
        if reading.has_primary() || reading.secondary.is_some() {
            Some(reading)
        } else {
            None
        }
    }
}
