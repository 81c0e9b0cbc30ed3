use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::core::error::ProviderError;
use crate::core::models::usage::UsageSnapshot;
use crate::core::normalize::percent::display_percent;
use crate::core::notify::{deliver_all, NotificationGate, Notifier};
use crate::core::providers::{FetchSettings, Provider, UsageProvider};

/// Upper bound on a single provider fetch, on top of the HTTP timeouts.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_CAPACITY: usize = 64;

/// Signals for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    DataChanged(Provider),
    LoadingChanged(bool),
    ErrorsChanged,
    CredentialsChanged,
}

/// What the store remembers about one provider between cycles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderRuntimeState {
    pub current: Option<UsageSnapshot>,
    pub previous: Option<UsageSnapshot>,
    pub last_error: Option<String>,
}

impl ProviderRuntimeState {
    fn record_success(&mut self, snapshot: UsageSnapshot) {
        if let Some(current) = self.current.take() {
            self.previous = Some(current);
        }
        self.current = Some(snapshot);
        self.last_error = None;
    }

    /// Failed fetches clear `current` so stale data is never shown as fresh.
    fn record_failure(&mut self, message: String) {
        self.previous = self.current.take();
        self.last_error = Some(message);
    }
}

/// One provider's row as shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    pub provider: Provider,
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_trend: Option<f64>,
}

/// Holds the latest snapshots and drives refresh cycles. Owned by a single
/// task; every mutation goes through `&mut self`.
pub struct UsageStore {
    providers: Vec<Arc<dyn UsageProvider>>,
    states: BTreeMap<Provider, ProviderRuntimeState>,
    gate: NotificationGate,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<StoreEvent>,
    fetch_timeout: Duration,
    is_loading: bool,
    last_updated_at: Option<DateTime<Utc>>,
}

impl UsageStore {
    pub fn new(providers: Vec<Arc<dyn UsageProvider>>, notifier: Arc<dyn Notifier>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            providers,
            states: BTreeMap::new(),
            gate: NotificationGate::new(),
            notifier,
            events,
            fetch_timeout: FETCH_TIMEOUT,
            is_loading: false,
            last_updated_at: None,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated_at
    }

    pub fn state(&self, provider: Provider) -> Option<&ProviderRuntimeState> {
        self.states.get(&provider)
    }

    /// Error messages from the last cycle, keyed by provider name.
    pub fn errors(&self) -> BTreeMap<&'static str, String> {
        self.states
            .iter()
            .filter_map(|(p, s)| s.last_error.clone().map(|e| (p.display_name(), e)))
            .collect()
    }

    /// Change in session usage between the last two successful snapshots,
    /// in percentage points. Balance-style providers have no trend.
    pub fn session_trend(&self, provider: Provider) -> Option<f64> {
        if provider.is_credit_based() {
            return None;
        }
        let state = self.states.get(&provider)?;
        let current = state.current.as_ref()?.session_usage?;
        let previous = state.previous.as_ref()?.session_usage?;
        Some(display_percent(current) - display_percent(previous))
    }

    pub fn report(&self, providers: &[Provider]) -> Vec<ProviderReport> {
        providers
            .iter()
            .map(|p| {
                let state = self.states.get(p);
                ProviderReport {
                    provider: *p,
                    name: p.display_name(),
                    usage: state.and_then(|s| s.current.clone()),
                    error: state.and_then(|s| s.last_error.clone()),
                    session_trend: self.session_trend(*p),
                }
            })
            .collect()
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_loading(&mut self, loading: bool) {
        if self.is_loading != loading {
            self.is_loading = loading;
            self.emit(StoreEvent::LoadingChanged(loading));
        }
    }

    /// One pass over every enabled provider. A failing or hanging provider
    /// only affects its own entry.
    pub async fn refresh(&mut self, config: &AppConfig) {
        self.set_loading(true);
        let errors_before = self.errors();
        let settings = config.fetch_settings();
        let providers = self.providers.clone();

        for provider in providers {
            let kind = provider.kind();
            if !config.is_enabled(kind) {
                if let Some(state) = self.states.get_mut(&kind) {
                    state.last_error = None;
                }
                continue;
            }

            debug!(provider = provider.name(), "fetching usage");
            let outcome = fetch_isolated(&provider, settings, self.fetch_timeout).await;
            let state = self.states.entry(kind).or_default();
            match outcome {
                Ok(snapshot) => {
                    info!(provider = provider.name(), "usage updated");
                    let alerts = if config.notifications.enabled {
                        self.gate.evaluate(&snapshot, &config.notifications, Utc::now())
                    } else {
                        Vec::new()
                    };
                    state.record_success(snapshot);
                    deliver_all(self.notifier.as_ref(), &alerts);
                }
                Err(e) => {
                    match e {
                        ProviderError::NotConfigured => {
                            debug!(provider = provider.name(), "provider not configured")
                        }
                        ref other => warn!(provider = provider.name(), error = %other, "fetch failed"),
                    }
                    state.record_failure(e.to_string());
                }
            }
            self.emit(StoreEvent::DataChanged(kind));
        }

        if self.errors() != errors_before {
            self.emit(StoreEvent::ErrorsChanged);
        }
        self.last_updated_at = Some(Utc::now());
        self.set_loading(false);
    }

    /// Stored credentials were edited: drop every cached credential and
    /// refresh right away.
    pub async fn credentials_changed(&mut self, config: &AppConfig) {
        info!("credentials changed, invalidating provider caches");
        for provider in &self.providers {
            provider.invalidate_cache();
        }
        self.emit(StoreEvent::CredentialsChanged);
        self.refresh(config).await;
    }
}

/// Run one fetch on its own task so a panic or a stuck future is contained.
async fn fetch_isolated(
    provider: &Arc<dyn UsageProvider>,
    settings: FetchSettings,
    limit: Duration,
) -> Result<UsageSnapshot, ProviderError> {
    let task = {
        let provider = Arc::clone(provider);
        tokio::spawn(async move { provider.fetch_usage(&settings).await })
    };
    let abort = task.abort_handle();
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ProviderError::NetworkError(format!("fetch task failed: {join}"))),
        Err(_) => {
            abort.abort();
            Err(ProviderError::NetworkError(format!(
                "timed out after {}s",
                limit.as_secs()
            )))
        }
    }
}
