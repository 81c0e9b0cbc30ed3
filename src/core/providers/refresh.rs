//! OAuth refresh for Claude credentials.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::core::error::ProviderError;
use crate::core::models::credential::{Credential, CredentialOrigin};
use crate::core::normalize::dates::after_secs;
use crate::core::normalize::values::{as_number, string};
use crate::core::providers::fetch::{http_client, send, HttpResponse, REFRESH_TIMEOUT};
use crate::core::secrets::{SecretStore, CLAUDE_CREDENTIALS};

const TOKEN_URL: &str = "https://platform.claude.com/v1/oauth/token";
const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const SCOPES: &str = "user:profile user:inference user:sessions:claude_code";

/// The remote half of a refresh: exchange a refresh token for a token
/// response.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange(&self, refresh_token: &str) -> Result<HttpResponse, ProviderError>;
}

pub struct HttpTokenEndpoint {
    client: reqwest::Client,
}

impl HttpTokenEndpoint {
    pub fn new() -> Self {
        Self {
            client: http_client(REFRESH_TIMEOUT),
        }
    }
}

impl Default for HttpTokenEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange(&self, refresh_token: &str) -> Result<HttpResponse, ProviderError> {
        let request = self
            .client
            .post(TOKEN_URL)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", CLIENT_ID),
                ("scope", SCOPES),
            ]);
        send(request).await
    }
}

pub struct TokenRefresher {
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn SecretStore>,
}

impl TokenRefresher {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, store: Arc<dyn SecretStore>) -> Self {
        Self { endpoint, store }
    }

    /// `Ok(None)` when the credential has no refresh token; the caller then
    /// re-resolves from scratch. A rejected refresh token is `TokenExpired`.
    pub async fn refresh(&self, expired: &Credential) -> Result<Option<Credential>, ProviderError> {
        let Some(refresh_token) = expired.refresh_token.as_deref() else {
            debug!("no refresh token available");
            return Ok(None);
        };

        debug!("refreshing Claude OAuth token");
        let response = self.endpoint.exchange(refresh_token).await?;
        if !response.is_success() {
            return Err(match response.status {
                400 | 401 | 403 => ProviderError::TokenExpired,
                _ => ProviderError::NetworkError(super::fetch::http_failure(&response)),
            });
        }

        let fresh = parse_token_response(&response.json()?, refresh_token, Utc::now())?;
        self.persist(&fresh);
        Ok(Some(fresh))
    }

    // Persistence is best effort: the refreshed token is still usable for
    // this process when the store rejects the write.
    fn persist(&self, credential: &Credential) {
        let payload = stored_payload(credential);
        if let Err(e) = self.store.save(&payload.to_string(), CLAUDE_CREDENTIALS) {
            warn!(error = %e, "could not persist refreshed Claude token");
        }
    }
}

fn parse_token_response(
    doc: &Value,
    previous_refresh: &str,
    now: DateTime<Utc>,
) -> Result<Credential, ProviderError> {
    let map = doc
        .as_object()
        .ok_or_else(|| ProviderError::InvalidResponse("token response is not an object".into()))?;
    let access = string(map, &["access_token"])
        .ok_or_else(|| ProviderError::InvalidResponse("token response has no access_token".into()))?;
    let refresh = string(map, &["refresh_token"]).unwrap_or(previous_refresh);
    let expires_at = map
        .get("expires_in")
        .and_then(as_number)
        .and_then(|secs| after_secs(now, secs));

    Ok(Credential::new(access, CredentialOrigin::SecretStore)
        .with_refresh_token(Some(refresh.to_string()))
        .with_expiry(expires_at))
}

/// The blob layout Claude's own tooling keeps in the secret store.
fn stored_payload(credential: &Credential) -> Value {
    let mut oauth = json!({ "accessToken": credential.access_token });
    if let Some(refresh) = &credential.refresh_token {
        oauth["refreshToken"] = json!(refresh);
    }
    if let Some(expires_at) = credential.expires_at {
        oauth["expiresAt"] = json!(expires_at.timestamp_millis());
    }
    json!({ "claudeAiOauth": oauth })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::auth::oauth_blob;
    use chrono::Duration;
    use crate::core::secrets::MemoryStore;
    use parking_lot::Mutex;

    /// Replays canned token responses and records the refresh tokens sent.
    pub(crate) struct FakeEndpoint {
        pub responses: Mutex<Vec<HttpResponse>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeEndpoint {
        pub(crate) fn replying(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TokenEndpoint for FakeEndpoint {
        async fn exchange(&self, refresh_token: &str) -> Result<HttpResponse, ProviderError> {
            self.calls.lock().push(refresh_token.to_string());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(ProviderError::NetworkError("no canned response".into()));
            }
            Ok(responses.remove(0))
        }
    }

    fn expired() -> Credential {
        Credential::new("old-access", CredentialOrigin::File)
            .with_refresh_token(Some("refresh-1".into()))
            .with_expiry(Some(Utc::now() - Duration::minutes(5)))
    }

    #[tokio::test]
    async fn missing_refresh_token_is_none() {
        let endpoint = FakeEndpoint::replying(vec![]);
        let refresher = TokenRefresher::new(endpoint.clone(), Arc::new(MemoryStore::new()));
        let bare = Credential::new("tok", CredentialOrigin::Environment);
        assert_eq!(refresher.refresh(&bare).await.unwrap(), None);
        assert!(endpoint.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn successful_refresh_is_persisted() {
        let endpoint = FakeEndpoint::replying(vec![HttpResponse::new(
            200,
            r#"{"access_token":"new-access","refresh_token":"refresh-2","expires_in":3600}"#,
        )]);
        let store = Arc::new(MemoryStore::new());
        let refresher = TokenRefresher::new(endpoint.clone(), store.clone());

        let fresh = refresher.refresh(&expired()).await.unwrap().unwrap();
        assert_eq!(fresh.access_token, "new-access");
        assert_eq!(fresh.refresh_token.as_deref(), Some("refresh-2"));
        assert!(!fresh.is_expired());
        assert_eq!(endpoint.calls.lock().as_slice(), ["refresh-1".to_string()]);

        let saved = store.read(CLAUDE_CREDENTIALS).unwrap().unwrap();
        let doc: Value = serde_json::from_str(&saved).unwrap();
        assert_eq!(doc["claudeAiOauth"]["accessToken"], "new-access");
        let reread = oauth_blob(&doc, Utc::now()).unwrap();
        assert_eq!(reread.refresh_token.as_deref(), Some("refresh-2"));
        assert!(reread.expires_at.is_some());
    }

    #[tokio::test]
    async fn old_refresh_token_is_kept_when_not_rotated() {
        let endpoint = FakeEndpoint::replying(vec![HttpResponse::new(200, r#"{"access_token":"a2"}"#)]);
        let refresher = TokenRefresher::new(endpoint, Arc::new(MemoryStore::new()));
        let fresh = refresher.refresh(&expired()).await.unwrap().unwrap();
        assert_eq!(fresh.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(fresh.expires_at, None);
    }

    #[tokio::test]
    async fn rejected_refresh_token_is_token_expired() {
        for status in [400, 401, 403] {
            let endpoint = FakeEndpoint::replying(vec![HttpResponse::new(status, "invalid_grant")]);
            let refresher = TokenRefresher::new(endpoint, Arc::new(MemoryStore::new()));
            assert_eq!(
                refresher.refresh(&expired()).await,
                Err(ProviderError::TokenExpired)
            );
        }
    }

    #[tokio::test]
    async fn server_errors_are_network_errors() {
        let endpoint = FakeEndpoint::replying(vec![HttpResponse::new(503, "down")]);
        let refresher = TokenRefresher::new(endpoint, Arc::new(MemoryStore::new()));
        assert_eq!(
            refresher.refresh(&expired()).await,
            Err(ProviderError::NetworkError("HTTP 503: down".into()))
        );
    }

    #[test]
    fn token_response_without_access_token_is_invalid() {
        let err = parse_token_response(&json!({"expires_in": 10}), "r", Utc::now()).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn absurd_expires_in_leaves_expiry_unknown() {
        let doc = json!({"access_token": "new-access", "expires_in": 1e300});
        let cred = parse_token_response(&doc, "refresh-1", Utc::now()).unwrap();
        assert_eq!(cred.access_token, "new-access");
        assert_eq!(cred.expires_at, None);
    }
}
