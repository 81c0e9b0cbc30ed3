use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::core::auth::{oauth_blob, CredentialChain, CredentialSource, JsonExtractor};
use crate::core::error::ProviderError;
use crate::core::models::credential::Credential;
use crate::core::models::usage::UsageSnapshot;
use crate::core::normalize::Normalizer;
use crate::core::providers::fetch::{http_client, http_failure, send, HttpResponse, USAGE_TIMEOUT};
use crate::core::providers::refresh::{HttpTokenEndpoint, TokenEndpoint, TokenRefresher};
use crate::core::providers::{FetchSettings, Provider, ProviderContext, UsageProvider};
use crate::core::secrets::{SecretStore, CLAUDE_CREDENTIALS};

const USAGE_URL: &str = "https://api.anthropic.com/api/oauth/usage";

/// Session utilization at or above which the session quota is assumed to
/// have moved over to the secondary model.
pub const SECONDARY_ONLY_THRESHOLD: f64 = 80.0;

#[async_trait]
pub trait ClaudeUsageApi: Send + Sync {
    async fn usage(&self, access_token: &str) -> Result<HttpResponse, ProviderError>;
}

pub struct HttpClaudeApi {
    client: reqwest::Client,
}

impl HttpClaudeApi {
    pub fn new() -> Self {
        Self {
            client: http_client(USAGE_TIMEOUT),
        }
    }
}

impl Default for HttpClaudeApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClaudeUsageApi for HttpClaudeApi {
    async fn usage(&self, access_token: &str) -> Result<HttpResponse, ProviderError> {
        let request = self
            .client
            .get(USAGE_URL)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .header("anthropic-version", "2023-06-01")
            .header("anthropic-beta", "oauth-2025-04-20");
        send(request).await
    }
}

pub struct ClaudeProvider {
    chain: CredentialChain,
    store: Arc<dyn SecretStore>,
    api: Arc<dyn ClaudeUsageApi>,
    refresher: TokenRefresher,
    cached: Mutex<Option<Credential>>,
}

impl ClaudeProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self::with_api(ctx, Arc::new(HttpClaudeApi::new()), Arc::new(HttpTokenEndpoint::new()))
    }

    pub fn with_api(
        ctx: &ProviderContext,
        api: Arc<dyn ClaudeUsageApi>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        let claude_dir = ctx.home.join(".claude");
        let chain = CredentialChain::new()
            .source(CredentialSource::Env(&["CLAUDE_CODE_OAUTH_TOKEN"]))
            .source(CredentialSource::Secret {
                key: CLAUDE_CREDENTIALS,
                extract: Some(oauth_blob as JsonExtractor),
            })
            .json_files(
                [claude_dir.join(".credentials.json"), claude_dir.join("auth.json")],
                oauth_blob,
            );
        Self {
            chain,
            store: ctx.store.clone(),
            api,
            refresher: TokenRefresher::new(endpoint, ctx.store.clone()),
            cached: Mutex::new(None),
        }
    }

    async fn cached_or_resolve(&self) -> Result<Credential, ProviderError> {
        let cached = self.cached.lock().clone();
        match cached {
            Some(credential) => Ok(credential),
            None => self.resolve_fresh().await,
        }
    }

    async fn resolve_fresh(&self) -> Result<Credential, ProviderError> {
        let credential = self.chain.resolve(self.store.as_ref()).await?;
        *self.cached.lock() = Some(credential.clone());
        Ok(credential)
    }

    async fn call(&self, credential: &Credential) -> Result<UsageSnapshot, ProviderError> {
        let response = self.api.usage(&credential.access_token).await?;
        match response.status {
            401 | 403 => return Err(ProviderError::TokenExpired),
            _ if !response.is_success() => {
                return Err(ProviderError::NetworkError(http_failure(&response)))
            }
            _ => {}
        }
        let doc = response.json()?;
        parse_usage(&doc, Utc::now()).ok_or_else(|| {
            ProviderError::InvalidResponse(format!(
                "usage format is unsupported: {}",
                response.snippet()
            ))
        })
    }

    /// Second level: refresh once, otherwise drop the cache and run the
    /// whole credential chain once more.
    async fn recover(&self, stale: &Credential) -> Result<UsageSnapshot, ProviderError> {
        match self.refresher.refresh(stale).await {
            Ok(Some(fresh)) => {
                *self.cached.lock() = Some(fresh.clone());
                return self.call(&fresh).await;
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Claude token refresh failed"),
        }
        self.invalidate_cache();
        let fresh = self.resolve_fresh().await?;
        self.call(&fresh).await
    }
}

#[async_trait]
impl UsageProvider for ClaudeProvider {
    fn kind(&self) -> Provider {
        Provider::Claude
    }

    fn is_available(&self) -> bool {
        self.chain.is_present(self.store.as_ref())
    }

    async fn fetch_usage(&self, _settings: &FetchSettings) -> Result<UsageSnapshot, ProviderError> {
        let credential = self.cached_or_resolve().await?;
        if credential.is_expired() {
            debug!("cached Claude token is past its expiry margin");
            return self.recover(&credential).await;
        }
        match self.call(&credential).await {
            Err(ProviderError::TokenExpired) => self.recover(&credential).await,
            other => other,
        }
    }

    fn invalidate_cache(&self) {
        *self.cached.lock() = None;
    }
}

/// Whether the session quota counts as redirected to the secondary model.
pub fn is_secondary_only(session_usage: Option<f64>) -> Option<bool> {
    session_usage.map(|percent| percent >= SECONDARY_ONLY_THRESHOLD)
}

/// `five_hour` / `seven_day` / `seven_day_sonnet`, with the generic cascade
/// covering any other layout.
pub fn parse_usage(doc: &Value, now: DateTime<Utc>) -> Option<UsageSnapshot> {
    let reading = Normalizer::with_secondary_scope("sonnet").normalize(doc)?;
    if !reading.has_primary() {
        return None;
    }
    let mut snapshot = reading.into_snapshot(Provider::Claude, now);
    snapshot.is_secondary_only = is_secondary_only(snapshot.session_usage);
    Some(snapshot)
}
