use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::auth::{bearer_field, CredentialChain, CredentialSource};
use crate::core::error::ProviderError;
use crate::core::models::credential::{Credential, CredentialOrigin};
use crate::core::models::usage::UsageSnapshot;
use crate::core::normalize::headers::{reset_from_headers, usage_from_headers, HeaderNames};
use crate::core::normalize::UsageReading;
use crate::core::providers::fetch::{http_client, send, status_error, HttpResponse, USAGE_TIMEOUT};
use crate::core::providers::{FetchSettings, Provider, ProviderContext, UsageProvider};
use crate::core::secrets::{SecretStore, GEMINI_API_KEY};

const MODELS_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// How a resolved Gemini credential is presented to the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeminiAuth {
    ApiKey(String),
    OAuth(String),
}

impl GeminiAuth {
    /// Tokens lifted from the Gemini CLI's OAuth files are bearer tokens;
    /// everything else is an API key.
    pub fn from_credential(credential: Credential) -> Self {
        match credential.origin {
            CredentialOrigin::File => GeminiAuth::OAuth(credential.access_token),
            _ => GeminiAuth::ApiKey(credential.access_token),
        }
    }
}

pub struct GeminiProvider {
    chain: CredentialChain,
    store: Arc<dyn SecretStore>,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        let gemini_dir = ctx.home.join(".gemini");
        let config_dir = ctx.home.join(".config").join("gemini");
        let chain = CredentialChain::new()
            .source(CredentialSource::Env(API_KEY_VARS))
            .source(CredentialSource::Secret {
                key: GEMINI_API_KEY,
                extract: None,
            })
            .json_files(
                [
                    gemini_dir.join("oauth_creds.json"),
                    config_dir.join("oauth_creds.json"),
                    gemini_dir.join("credentials.json"),
                ],
                bearer_field,
            )
            .source(CredentialSource::DotEnv {
                path: gemini_dir.join(".env"),
                keys: API_KEY_VARS,
            })
            .source(CredentialSource::DotEnv {
                path: config_dir.join(".env"),
                keys: API_KEY_VARS,
            });
        Self {
            chain,
            store: ctx.store.clone(),
            client: http_client(USAGE_TIMEOUT),
        }
    }

    async fn probe(&self, auth: &GeminiAuth) -> Result<HttpResponse, ProviderError> {
        let request = self.client.get(MODELS_URL).header("Accept", "application/json");
        let request = match auth {
            GeminiAuth::ApiKey(key) => request.query(&[("key", key.as_str())]),
            GeminiAuth::OAuth(token) => request.bearer_auth(token),
        };
        send(request).await
    }
}

#[async_trait]
impl UsageProvider for GeminiProvider {
    fn kind(&self) -> Provider {
        Provider::Gemini
    }

    fn is_available(&self) -> bool {
        self.chain.is_present(self.store.as_ref())
    }

    async fn fetch_usage(&self, _settings: &FetchSettings) -> Result<UsageSnapshot, ProviderError> {
        let credential = self.chain.resolve(self.store.as_ref()).await?;
        let auth = GeminiAuth::from_credential(credential);
        let response = self.probe(&auth).await?;
        interpret(&response, Utc::now())
    }
}

/// The models listing carries no usage body; quota comes from the rate-limit
/// headers alone. A reachable API without those headers yields an empty
/// snapshot rather than an error.
pub fn interpret(response: &HttpResponse, now: DateTime<Utc>) -> Result<UsageSnapshot, ProviderError> {
    if !response.is_success() {
        return Err(status_error(response));
    }
    let mut reading = UsageReading::default();
    reading.fill_primary(usage_from_headers(&response.headers, &HeaderNames::GOOGLE, now));
    let mut snapshot = reading.into_snapshot(Provider::Gemini, now);
    if snapshot.reset_date.is_none() {
        snapshot.reset_date = reset_from_headers(&response.headers, now);
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize::headers::ResponseHeaders;
    use crate::core::secrets::MemoryStore;
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn google_request_headers() {
        let headers: ResponseHeaders = [
            ("X-Goog-RateLimit-Limit-Requests", "60"),
            ("X-Goog-RateLimit-Remaining-Requests", "15"),
            ("retry-after", "20"),
        ]
        .into_iter()
        .collect();
        let snapshot = interpret(&HttpResponse::new(200, "{}").with_headers(headers), now()).unwrap();
        assert_eq!(snapshot.session_usage, Some(75.0));
        assert_eq!(snapshot.weekly_usage, Some(75.0));
        assert_eq!(snapshot.reset_date, Some(now() + Duration::seconds(20)));
    }

    #[test]
    fn no_headers_is_an_empty_snapshot() {
        let snapshot = interpret(&HttpResponse::new(200, r#"{"models": []}"#), now()).unwrap();
        assert!(!snapshot.has_usage());
        assert_eq!(snapshot.provider, Provider::Gemini);
    }

    #[test]
    fn rejected_key() {
        assert_eq!(
            interpret(&HttpResponse::new(403, "API key not valid"), now()),
            Err(ProviderError::AuthenticationFailed)
        );
    }

    #[test]
    fn auth_mode_follows_origin() {
        let file = Credential::new("ya29.token", CredentialOrigin::File);
        let env = Credential::new("AIzaKey", CredentialOrigin::Environment);
        let dotenv = Credential::new("AIzaKey", CredentialOrigin::CliConfig);
        assert_eq!(GeminiAuth::from_credential(file), GeminiAuth::OAuth("ya29.token".into()));
        assert_eq!(GeminiAuth::from_credential(env), GeminiAuth::ApiKey("AIzaKey".into()));
        assert_eq!(GeminiAuth::from_credential(dotenv), GeminiAuth::ApiKey("AIzaKey".into()));
    }

    #[test]
    fn oauth_file_beats_dotenv() {
        let home = tempfile::tempdir().unwrap();
        let dir = home.path().join(".gemini");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(".env"), "GEMINI_API_KEY=\"from-dotenv\"\n").unwrap();

        let ctx = ProviderContext::new(Arc::new(MemoryStore::new()))
            .with_home(PathBuf::from(home.path()));
        let gemini = GeminiProvider::new(&ctx);
        temp_env::with_vars_unset(API_KEY_VARS, || {
            let found = gemini.chain.resolve_local(gemini.store.as_ref(), now()).unwrap();
            assert_eq!(found.access_token, "from-dotenv");
            assert_eq!(found.origin, CredentialOrigin::CliConfig);

            std::fs::write(
                dir.join("oauth_creds.json"),
                r#"{"access_token": "ya29.a0AfH6SMBexampleexample", "token_type": "Bearer"}"#,
            )
            .unwrap();
            let found = gemini.chain.resolve_local(gemini.store.as_ref(), now()).unwrap();
            assert_eq!(
                GeminiAuth::from_credential(found),
                GeminiAuth::OAuth("ya29.a0AfH6SMBexampleexample".into())
            );
        });
    }

    #[test]
    fn secret_store_key_beats_files() {
        let store = MemoryStore::new().with_entry(GEMINI_API_KEY, "stored-key");
        let ctx = ProviderContext::new(Arc::new(store)).with_home(PathBuf::from("/nonexistent-home"));
        let gemini = GeminiProvider::new(&ctx);
        temp_env::with_vars_unset(API_KEY_VARS, || {
            assert!(gemini.is_available());
            let found = gemini.chain.resolve_local(gemini.store.as_ref(), now()).unwrap();
            assert_eq!(found.access_token, "stored-key");
            assert_eq!(found.origin, CredentialOrigin::SecretStore);
        });
    }
}
