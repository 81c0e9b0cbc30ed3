use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::auth::{codex_auth, codex_home, CredentialChain, CredentialSource};
use crate::core::error::ProviderError;
use crate::core::models::credential::Credential;
use crate::core::models::usage::UsageSnapshot;
use crate::core::normalize::headers::{reset_from_headers, usage_from_headers, HeaderNames};
use crate::core::normalize::Normalizer;
use crate::core::providers::fetch::{
    http_client, send, status_error, validate_endpoint, HttpResponse, USAGE_TIMEOUT,
};
use crate::core::providers::{FetchSettings, Provider, ProviderContext, UsageProvider};
use crate::core::secrets::{SecretStore, CODEX_ACCESS_TOKEN};

const STALE_AFTER_DAYS: i64 = 8;
const SECONDARY_SCOPE: &str = "spark";

// --- Config ---

#[derive(Deserialize, Default)]
struct CodexConfig {
    chatgpt_base_url: Option<String>,
}

fn read_codex_config(codex_home: &Path) -> CodexConfig {
    let path = codex_home.join("config.toml");
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return CodexConfig::default(),
    };
    toml::from_str(&content).unwrap_or_default()
}

/// Resolve the full usage URL from the optional configured base URL.
fn resolve_usage_url(base_url: Option<&str>) -> String {
    let base = base_url.unwrap_or("https://chatgpt.com/backend-api/");

    // chatgpt.com and chat.openai.com only serve usage under /backend-api
    let base = if (base.contains("chatgpt.com") || base.contains("chat.openai.com"))
        && !base.contains("backend-api")
    {
        let trimmed = base.trim_end_matches('/');
        format!("{}/backend-api/", trimmed)
    } else {
        base.to_string()
    };

    let base = if base.ends_with('/') {
        base
    } else {
        format!("{}/", base)
    };

    if base.contains("backend-api") {
        format!("{}wham/usage", base)
    } else {
        format!("{}api/codex/usage", base)
    }
}

// --- Provider ---

pub struct CodexProvider {
    chain: CredentialChain,
    store: Arc<dyn SecretStore>,
    codex_home: PathBuf,
    client: reqwest::Client,
}

impl CodexProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self::with_codex_home(ctx, codex_home(&ctx.home))
    }

    pub fn with_codex_home(ctx: &ProviderContext, codex_home: PathBuf) -> Self {
        let chain = CredentialChain::new()
            .source(CredentialSource::Env(&["CODEX_ACCESS_TOKEN"]))
            .source(CredentialSource::Secret {
                key: CODEX_ACCESS_TOKEN,
                extract: None,
            })
            .json_files([codex_home.join("auth.json")], codex_auth);
        Self {
            chain,
            store: ctx.store.clone(),
            codex_home,
            client: http_client(USAGE_TIMEOUT),
        }
    }

    fn usage_url(&self) -> Result<String, ProviderError> {
        let config = read_codex_config(&self.codex_home);
        let url = resolve_usage_url(config.chatgpt_base_url.as_deref());
        validate_endpoint(&url, "Codex").map_err(|e| ProviderError::NetworkError(e.to_string()))?;
        Ok(url)
    }
}

#[async_trait]
impl UsageProvider for CodexProvider {
    fn kind(&self) -> Provider {
        Provider::Codex
    }

    fn is_available(&self) -> bool {
        self.chain.is_present(self.store.as_ref())
    }

    async fn fetch_usage(&self, _settings: &FetchSettings) -> Result<UsageSnapshot, ProviderError> {
        let credential = self.chain.resolve(self.store.as_ref()).await?;
        let now = Utc::now();
        warn_if_stale(&credential, now);

        let url = self.usage_url()?;
        debug!(%url, "fetching Codex usage");
        let mut request = self
            .client
            .get(&url)
            .bearer_auth(&credential.access_token)
            .header("Accept", "application/json");
        if let Some(account_id) = &credential.account_id {
            request = request.header("ChatGPT-Account-Id", account_id);
        }

        let response = send(request).await?;
        interpret(&response, now)
    }
}

/// Whether the issuing CLI last refreshed this token too long ago.
pub fn is_stale(last_refresh: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last_refresh > Duration::days(STALE_AFTER_DAYS)
}

fn warn_if_stale(credential: &Credential, now: DateTime<Utc>) {
    if let Some(last_refresh) = credential.last_refresh {
        if is_stale(last_refresh, now) {
            warn!(
                days = (now - last_refresh).num_days(),
                "Codex token is stale, run `codex` to refresh it"
            );
        }
    }
}

/// Body cascade first, rate-limit headers second, then give up.
pub fn interpret(response: &HttpResponse, now: DateTime<Utc>) -> Result<UsageSnapshot, ProviderError> {
    if !response.is_success() {
        return Err(status_error(response));
    }

    let body = response.json_or_null();
    let mut reading = Normalizer::with_secondary_scope(SECONDARY_SCOPE)
        .normalize(&body)
        .unwrap_or_default();
    if !reading.has_primary() {
        debug!("no usage in Codex body, trying headers");
        reading.fill_primary(usage_from_headers(&response.headers, &HeaderNames::RATE_LIMIT, now));
    }
    if !reading.has_primary() {
        return Err(ProviderError::InvalidResponse(format!(
            "usage format is unsupported: {}",
            response.snippet()
        )));
    }

    let mut snapshot = reading.into_snapshot(Provider::Codex, now);
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
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 20, 8, 0, 0).unwrap()
    }

    #[test]
    fn resolve_url_default() {
        let url = resolve_usage_url(None);
        assert_eq!(url, "https://chatgpt.com/backend-api/wham/usage");
    }

    #[test]
    fn resolve_url_chatgpt_without_backend_api() {
        let url = resolve_usage_url(Some("https://chatgpt.com/"));
        assert_eq!(url, "https://chatgpt.com/backend-api/wham/usage");
    }

    #[test]
    fn resolve_url_with_backend_api_already() {
        let url = resolve_usage_url(Some("https://chatgpt.com/backend-api"));
        assert_eq!(url, "https://chatgpt.com/backend-api/wham/usage");
    }

    #[test]
    fn resolve_url_chat_openai() {
        let url = resolve_usage_url(Some("https://chat.openai.com"));
        assert_eq!(url, "https://chat.openai.com/backend-api/wham/usage");
    }

    #[test]
    fn resolve_url_custom_base() {
        let url = resolve_usage_url(Some("https://my.proxy.com/api/"));
        assert_eq!(url, "https://my.proxy.com/api/api/codex/usage");
    }

    #[test]
    fn config_base_url_must_be_https() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "model = \"o3\"\nchatgpt_base_url = \"http://proxy.local/\"\n",
        )
        .unwrap();
        let ctx = ProviderContext::new(Arc::new(MemoryStore::new()));
        let codex = CodexProvider::with_codex_home(&ctx, dir.path().to_path_buf());
        assert!(matches!(codex.usage_url(), Err(ProviderError::NetworkError(_))));

        std::fs::write(dir.path().join("config.toml"), "not toml [").unwrap();
        assert_eq!(
            codex.usage_url().unwrap(),
            "https://chatgpt.com/backend-api/wham/usage"
        );
    }

    #[test]
    fn availability_follows_auth_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ProviderContext::new(Arc::new(MemoryStore::new()));
        let codex = CodexProvider::with_codex_home(&ctx, dir.path().to_path_buf());
        temp_env::with_var_unset("CODEX_ACCESS_TOKEN", || {
            assert!(!codex.is_available());
            std::fs::write(
                dir.path().join("auth.json"),
                json!({"tokens": {"access_token": "x".repeat(40)}}).to_string(),
            )
            .unwrap();
            assert!(codex.is_available());
        });
    }

    #[test]
    fn wham_usage_body() {
        let body = json!({
            "plan_type": "plus",
            "rate_limit": {
                "primary_window": {"used_percent": 42, "reset_at": 1713600000, "limit_window_seconds": 18000},
                "secondary_window": {"used_percent": 15, "reset_at": 1714204800, "limit_window_seconds": 604800}
            },
            "additional_rate_limits": [{
                "limit_name": "GPT-5-Codex-Spark",
                "rate_limit": {
                    "primary_window": {"used_percent": 90, "limit_window_seconds": 18000},
                    "secondary_window": {"used_percent": 70, "limit_window_seconds": 604800}
                }
            }],
            "credits": {"has_credits": false, "balance": "0"}
        });
        let response = HttpResponse::new(200, body.to_string());
        let snapshot = interpret(&response, now()).unwrap();
        assert_eq!(snapshot.session_usage, Some(42.0));
        assert_eq!(snapshot.weekly_usage, Some(15.0));
        assert_eq!(snapshot.secondary_model_usage, Some(70.0));
        assert_eq!(snapshot.session_reset_date.unwrap().timestamp(), 1_713_600_000);
        assert_eq!(snapshot.reset_date, snapshot.session_reset_date);
    }

    #[test]
    fn legacy_usage_windows() {
        let body = json!({"usage_windows": [
            {"start_date": "2024-04-13T00:00:00Z", "end_date": "2024-04-20T00:00:00Z", "usage": 0.3},
            {"start_date": "2024-04-20T00:00:00Z", "end_date": "2024-04-27T00:00:00Z", "usage": 0.55}
        ]});
        let snapshot = interpret(&HttpResponse::new(200, body.to_string()), now()).unwrap();
        assert!((snapshot.weekly_usage.unwrap() - 55.0).abs() < 1e-9);
        assert!(snapshot.weekly_reset_date.is_some());
    }

    #[test]
    fn headers_when_body_has_nothing() {
        let headers: ResponseHeaders = [
            ("x-ratelimit-limit-requests", "100"),
            ("x-ratelimit-remaining-requests", "25"),
            ("x-ratelimit-reset-requests", "1h30m"),
        ]
        .into_iter()
        .collect();
        let response = HttpResponse::new(200, "{}").with_headers(headers);
        let snapshot = interpret(&response, now()).unwrap();
        assert_eq!(snapshot.session_usage, Some(75.0));
        assert_eq!(snapshot.weekly_usage, Some(75.0));
        assert_eq!(snapshot.reset_date, Some(now() + Duration::minutes(90)));
    }

    #[test]
    fn spark_only_body_still_falls_back_to_headers() {
        let headers: ResponseHeaders = [("x-ratelimit-limit", "10"), ("x-ratelimit-remaining", "9")]
            .into_iter()
            .collect();
        let body = json!({"spark": {"used_percent": 88}});
        let response = HttpResponse::new(200, body.to_string()).with_headers(headers);
        let snapshot = interpret(&response, now()).unwrap();
        assert_eq!(snapshot.session_usage, Some(10.0));
        assert_eq!(snapshot.secondary_model_usage, Some(88.0));
    }

    #[test]
    fn unsupported_body_reports_snippet() {
        let response = HttpResponse::new(200, "<html>\n  maintenance\n</html>");
        match interpret(&response, now()) {
            Err(ProviderError::InvalidResponse(msg)) => {
                assert!(msg.starts_with("usage format is unsupported"));
                assert!(msg.contains("<html> maintenance </html>"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            interpret(&HttpResponse::new(401, ""), now()),
            Err(ProviderError::AuthenticationFailed)
        );
        assert_eq!(
            interpret(&HttpResponse::new(403, ""), now()),
            Err(ProviderError::AuthenticationFailed)
        );
        assert_eq!(
            interpret(&HttpResponse::new(429, "slow down"), now()),
            Err(ProviderError::NetworkError("HTTP 429: slow down".into()))
        );
    }

    #[test]
    fn staleness() {
        assert!(!is_stale(now() - Duration::days(8), now()));
        assert!(is_stale(now() - Duration::days(8) - Duration::hours(1), now()));
    }
}
