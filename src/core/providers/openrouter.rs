use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::core::auth::{CredentialChain, CredentialSource};
use crate::core::error::ProviderError;
use crate::core::models::usage::UsageSnapshot;
use crate::core::normalize::percent::ratio_percent;
use crate::core::normalize::values::as_number;
use crate::core::providers::fetch::{http_client, send, status_error, HttpResponse, USAGE_TIMEOUT};
use crate::core::providers::{FetchSettings, Provider, ProviderContext, UsageProvider};
use crate::core::secrets::{SecretStore, OPENROUTER_API_KEY};

const CREDITS_URL: &str = "https://openrouter.ai/api/v1/credits";
const KEY_URL: &str = "https://openrouter.ai/api/v1/key";

/// Numbers may arrive as JSON numbers or numeric strings.
fn deserialize_loose_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(deserializer)?;
    Ok(as_number(&v))
}

#[derive(Deserialize)]
struct CreditsData {
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    total_credits: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    total_usage: Option<f64>,
}

#[derive(Deserialize)]
struct CreditsResponse {
    data: CreditsData,
}

#[derive(Deserialize)]
struct KeyData {
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    limit: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    usage: Option<f64>,
}

#[derive(Deserialize)]
struct KeyResponse {
    data: KeyData,
}

/// Share of a per-key spending limit already used. Keys without a positive
/// limit have no meaningful percentage.
fn key_usage_percent(key_data: &KeyData) -> Option<f64> {
    let limit = key_data.limit.filter(|l| *l > 0.0)?;
    ratio_percent(key_data.usage.unwrap_or(0.0), limit)
}

/// `total_credits - total_usage`. An overdrawn account reports a negative
/// balance as-is.
fn remaining_credits(response: &HttpResponse) -> Result<f64, ProviderError> {
    let parsed: CreditsResponse = serde_json::from_str(&response.body).map_err(|e| {
        ProviderError::InvalidResponse(format!("{e}: {}", response.snippet()))
    })?;
    match (parsed.data.total_credits, parsed.data.total_usage) {
        (Some(credits), Some(usage)) => Ok(credits - usage),
        _ => Err(ProviderError::InvalidResponse(format!(
            "credits response is missing totals: {}",
            response.snippet()
        ))),
    }
}

pub fn interpret(
    credits: &HttpResponse,
    key: Option<&HttpResponse>,
    now: DateTime<Utc>,
) -> Result<UsageSnapshot, ProviderError> {
    if !credits.is_success() {
        return Err(status_error(credits));
    }
    let balance = remaining_credits(credits)?;
    let key_percent = key
        .filter(|r| r.is_success())
        .and_then(|r| serde_json::from_str::<KeyResponse>(&r.body).ok())
        .and_then(|k| key_usage_percent(&k.data));

    Ok(UsageSnapshot::at(Provider::OpenRouter, now)
        .with_credits(Some(balance))
        .with_session(key_percent, None))
}

pub struct OpenRouterProvider {
    chain: CredentialChain,
    store: Arc<dyn SecretStore>,
    client: reqwest::Client,
}

impl OpenRouterProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        let chain = CredentialChain::new()
            .source(CredentialSource::Env(&["OPENROUTER_API_KEY"]))
            .source(CredentialSource::Secret {
                key: OPENROUTER_API_KEY,
                extract: None,
            });
        Self {
            chain,
            store: ctx.store.clone(),
            client: http_client(USAGE_TIMEOUT),
        }
    }

    async fn get(&self, url: &str, api_key: &str) -> Result<HttpResponse, ProviderError> {
        let request = self
            .client
            .get(url)
            .bearer_auth(api_key)
            .header("Accept", "application/json");
        send(request).await
    }
}

#[async_trait]
impl UsageProvider for OpenRouterProvider {
    fn kind(&self) -> Provider {
        Provider::OpenRouter
    }

    fn is_available(&self) -> bool {
        self.chain.is_present(self.store.as_ref())
    }

    async fn fetch_usage(&self, _settings: &FetchSettings) -> Result<UsageSnapshot, ProviderError> {
        let credential = self.chain.resolve(self.store.as_ref()).await?;
        let credits = self.get(CREDITS_URL, &credential.access_token).await?;

        // Key info is optional: any failure just leaves the percentage out.
        let key = if credits.is_success() {
            match self.get(KEY_URL, &credential.access_token).await {
                Ok(response) => Some(response),
                Err(e) => {
                    debug!(error = %e, "OpenRouter key info unavailable");
                    None
                }
            }
        } else {
            None
        };

        interpret(&credits, key.as_ref(), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::secrets::MemoryStore;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn remaining_balance() {
        let credits = HttpResponse::new(200, r#"{"data":{"total_credits":50,"total_usage":47.5}}"#);
        let snapshot = interpret(&credits, None, now()).unwrap();
        assert_eq!(snapshot.remaining_credits, Some(2.5));
        assert!(snapshot.session_usage.is_none());
        assert_eq!(snapshot.fetched_at, now());
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let credits = HttpResponse::new(200, r#"{"data":{"total_credits":"100","total_usage":"37.50"}}"#);
        let snapshot = interpret(&credits, None, now()).unwrap();
        assert_eq!(snapshot.remaining_credits, Some(62.5));
    }

    #[test]
    fn overdraft_is_not_clamped() {
        let credits = HttpResponse::new(200, r#"{"data":{"total_credits":10,"total_usage":15}}"#);
        assert_eq!(interpret(&credits, None, now()).unwrap().remaining_credits, Some(-5.0));
    }

    #[test]
    fn key_limit_becomes_session_usage() {
        let credits = HttpResponse::new(200, r#"{"data":{"total_credits":100,"total_usage":10}}"#);
        let key = HttpResponse::new(200, r#"{"data":{"label":"sk-or-v1-abc","limit":50.0,"usage":12.5}}"#);
        let snapshot = interpret(&credits, Some(&key), now()).unwrap();
        assert_eq!(snapshot.session_usage, Some(25.0));
    }

    #[test]
    fn key_without_limit_or_failed_key_call_is_ignored() {
        let credits = HttpResponse::new(200, r#"{"data":{"total_credits":1,"total_usage":0}}"#);
        let unlimited = HttpResponse::new(200, r#"{"data":{"limit":null,"usage":3}}"#);
        let failed = HttpResponse::new(500, "");
        assert!(interpret(&credits, Some(&unlimited), now()).unwrap().session_usage.is_none());
        assert!(interpret(&credits, Some(&failed), now()).unwrap().session_usage.is_none());
    }

    #[test]
    fn key_over_limit_caps_at_one_hundred() {
        let data = KeyData {
            limit: Some(10.0),
            usage: Some(15.0),
        };
        assert_eq!(key_usage_percent(&data), Some(150.0));
        let credits = HttpResponse::new(200, r#"{"data":{"total_credits":1,"total_usage":0}}"#);
        let key = HttpResponse::new(200, r#"{"data":{"limit":10,"usage":15}}"#);
        assert_eq!(interpret(&credits, Some(&key), now()).unwrap().session_usage, Some(100.0));
    }

    #[test]
    fn errors() {
        assert_eq!(
            interpret(&HttpResponse::new(401, ""), None, now()),
            Err(ProviderError::AuthenticationFailed)
        );
        let missing = HttpResponse::new(200, r#"{"data":{}}"#);
        assert!(matches!(
            interpret(&missing, None, now()),
            Err(ProviderError::InvalidResponse(_))
        ));
        let garbage = HttpResponse::new(200, "<html>");
        assert!(matches!(
            interpret(&garbage, None, now()),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn key_from_secret_store() {
        let store = MemoryStore::new().with_entry(OPENROUTER_API_KEY, "sk-or-v1-stored");
        let ctx = ProviderContext::new(Arc::new(store)).with_home(PathBuf::from("/nonexistent-home"));
        let provider = OpenRouterProvider::new(&ctx);
        temp_env::with_var_unset("OPENROUTER_API_KEY", || {
            assert!(provider.is_available());
            let found = provider.chain.resolve_local(provider.store.as_ref(), now()).unwrap();
            assert_eq!(found.access_token, "sk-or-v1-stored");
        });
    }
}
