use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::core::error::ProviderError;
use crate::core::models::credential::{Credential, CredentialOrigin};
use crate::core::normalize::dates::after_secs;
use crate::core::normalize::values::{as_date, as_number, find_date, find_string, string};
use crate::core::process::run_command;
use crate::core::secrets::SecretStore;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

static TOKEN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-.]{20,}$").expect("valid regex"));

/// Turns a parsed JSON document into a credential, given the current time for
/// relative expiries.
pub type JsonExtractor = fn(&Value, DateTime<Utc>) -> Option<Credential>;

/// One place a credential may live. Reading a source never fails: a missing
/// or unreadable source simply yields nothing.
#[derive(Clone)]
pub enum CredentialSource {
    Env(&'static [&'static str]),
    Secret {
        key: &'static str,
        extract: Option<JsonExtractor>,
    },
    JsonFile {
        path: PathBuf,
        extract: JsonExtractor,
    },
    DotEnv {
        path: PathBuf,
        keys: &'static [&'static str],
    },
    /// Line-oriented config with `prefix: token` lines (gh `hosts.yml`).
    TokenLines {
        path: PathBuf,
        prefix: &'static str,
    },
}

impl CredentialSource {
    fn read(&self, store: &dyn SecretStore, now: DateTime<Utc>) -> Option<Credential> {
        match self {
            CredentialSource::Env(keys) => keys.iter().find_map(|key| {
                std::env::var(key)
                    .ok()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .map(|v| Credential::new(v, CredentialOrigin::Environment))
            }),
            CredentialSource::Secret { key, extract } => {
                let raw = match store.read(key) {
                    Ok(value) => value?,
                    Err(e) => {
                        debug!(key = *key, error = %e, "secret store read failed");
                        return None;
                    }
                };
                let raw = raw.trim();
                if raw.is_empty() {
                    return None;
                }
                let credential = match extract {
                    Some(extract) => match serde_json::from_str::<Value>(raw) {
                        Ok(doc) => extract(&doc, now)?,
                        Err(_) => Credential::new(raw, CredentialOrigin::SecretStore),
                    },
                    None => Credential::new(raw, CredentialOrigin::SecretStore),
                };
                Some(with_origin(credential, CredentialOrigin::SecretStore))
            }
            CredentialSource::JsonFile { path, extract } => {
                let content = std::fs::read_to_string(path).ok()?;
                let doc: Value = serde_json::from_str(&content).ok()?;
                extract(&doc, now).map(|c| with_origin(c, CredentialOrigin::File))
            }
            CredentialSource::DotEnv { path, keys } => {
                let content = std::fs::read_to_string(path).ok()?;
                parse_dotenv(&content, keys).map(|v| Credential::new(v, CredentialOrigin::CliConfig))
            }
            CredentialSource::TokenLines { path, prefix } => {
                let content = std::fs::read_to_string(path).ok()?;
                parse_token_lines(&content, prefix)
                    .map(|v| Credential::new(v, CredentialOrigin::CliConfig))
            }
        }
    }

    /// Cheap local probe: no parsing beyond a secret-store lookup, no network.
    fn is_present(&self, store: &dyn SecretStore) -> bool {
        match self {
            CredentialSource::Env(keys) => keys
                .iter()
                .any(|key| std::env::var(key).is_ok_and(|v| !v.trim().is_empty())),
            CredentialSource::Secret { key, .. } => {
                matches!(store.read(key), Ok(Some(v)) if !v.trim().is_empty())
            }
            CredentialSource::JsonFile { path, .. }
            | CredentialSource::DotEnv { path, .. }
            | CredentialSource::TokenLines { path, .. } => path.is_file(),
        }
    }

    fn describe(&self) -> String {
        match self {
            CredentialSource::Env(keys) => format!("env {}", keys.join("/")),
            CredentialSource::Secret { key, .. } => format!("secret '{key}'"),
            CredentialSource::JsonFile { path, .. }
            | CredentialSource::DotEnv { path, .. }
            | CredentialSource::TokenLines { path, .. } => path.display().to_string(),
        }
    }
}

fn with_origin(mut credential: Credential, origin: CredentialOrigin) -> Credential {
    credential.origin = origin;
    credential
}

/// Ordered list of sources; the first one yielding a credential wins.
#[derive(Clone, Default)]
pub struct CredentialChain {
    sources: Vec<CredentialSource>,
    command: Option<(&'static str, &'static [&'static str])>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: CredentialSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn json_files<I>(mut self, paths: I, extract: JsonExtractor) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.sources.extend(
            paths
                .into_iter()
                .map(|path| CredentialSource::JsonFile { path, extract }),
        );
        self
    }

    /// Last-resort external command whose trimmed stdout is the token.
    pub fn command(mut self, program: &'static str, args: &'static [&'static str]) -> Self {
        self.command = Some((program, args));
        self
    }

    /// Walk every local source in order.
    pub fn resolve_local(&self, store: &dyn SecretStore, now: DateTime<Utc>) -> Option<Credential> {
        self.sources.iter().find_map(|source| {
            let found = source.read(store, now);
            if found.is_some() {
                debug!(source = %source.describe(), "credential resolved");
            }
            found
        })
    }

    pub async fn resolve(&self, store: &dyn SecretStore) -> Result<Credential, ProviderError> {
        if let Some(credential) = self.resolve_local(store, Utc::now()) {
            return Ok(credential);
        }
        if let Some((program, args)) = self.command {
            match run_command(program, args, COMMAND_TIMEOUT).await {
                Ok(output) if looks_like_token(&output) => {
                    debug!(program, "credential resolved from command");
                    return Ok(Credential::new(output, CredentialOrigin::Command));
                }
                Ok(_) => debug!(program, "command output is not a token"),
                Err(e) => debug!(error = %e, "credential command unavailable"),
            }
        }
        Err(ProviderError::NotConfigured)
    }

    /// Whether any local source currently exists. The command source is not
    /// consulted.
    pub fn is_present(&self, store: &dyn SecretStore) -> bool {
        self.sources.iter().any(|s| s.is_present(store))
    }
}

/// Loose token shape check: at least 20 characters, no whitespace.
pub fn looks_like_token(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.chars().count() < 20 || trimmed.chars().any(char::is_whitespace) {
        return false;
    }
    if ["github_pat_", "ghp_", "ghu_"].iter().any(|p| trimmed.starts_with(p)) {
        return true;
    }
    TOKEN_SHAPE.is_match(trimmed)
}

fn looks_like_bearer(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.chars().count() >= 20 && !trimmed.contains(' ')
}

/// `KEY=value` lines, `export` prefix and quotes tolerated.
pub fn parse_dotenv(content: &str, keys: &[&str]) -> Option<String> {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((name, value)) = line.split_once('=') else {
            continue;
        };
        if keys.contains(&name.trim()) {
            let value = value.trim_matches(|c| matches!(c, ' ' | '\t' | '"' | '\''));
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

pub fn parse_token_lines(content: &str, prefix: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let rest = line.trim().strip_prefix(prefix)?;
        let token = rest.trim().trim_matches(|c| c == '"' || c == '\'');
        looks_like_token(token).then(|| token.to_string())
    })
}

// --- JSON extractors ---

const ACCESS_KEYS: &[&str] = &["accessToken", "access_token", "token"];
const REFRESH_KEYS: &[&str] = &["refreshToken", "refresh_token"];
const EXPIRES_AT_KEYS: &[&str] = &["expiresAt", "expires_at", "expires"];
const EXPIRES_IN_KEYS: &[&str] = &["expiresIn", "expires_in"];

/// First object anywhere in the document carrying an OAuth access token,
/// together with its refresh token and expiry.
pub fn oauth_blob(doc: &Value, now: DateTime<Utc>) -> Option<Credential> {
    match doc {
        Value::Object(map) => {
            if let Some(token) = string(map, ACCESS_KEYS) {
                let refresh = string(map, REFRESH_KEYS).map(str::to_string);
                let expires_at = EXPIRES_AT_KEYS
                    .iter()
                    .find_map(|k| map.get(*k).and_then(as_date))
                    .or_else(|| {
                        EXPIRES_IN_KEYS.iter().find_map(|k| {
                            let secs = map.get(*k).and_then(as_number)?;
                            after_secs(now, secs)
                        })
                    });
                return Some(
                    Credential::new(token, CredentialOrigin::File)
                        .with_refresh_token(refresh)
                        .with_expiry(expires_at),
                );
            }
            map.values().find_map(|child| oauth_blob(child, now))
        }
        Value::Array(items) => items.iter().find_map(|child| oauth_blob(child, now)),
        _ => None,
    }
}

const CODEX_FALLBACK_KEYS: &[&str] = &["access_token", "accessToken", "token", "id_token", "auth_token"];
const CODEX_REFRESHED_KEYS: &[&str] = &[
    "last_refresh",
    "lastRefresh",
    "updated_at",
    "updatedAt",
    "created_at",
    "createdAt",
];

/// Codex `auth.json`: current `tokens` block, legacy top-level token,
/// `OPENAI_API_KEY`, then any token-ish key.
pub fn codex_auth(doc: &Value, _now: DateTime<Utc>) -> Option<Credential> {
    let map = doc.as_object()?;
    let tokens = map.get("tokens").and_then(Value::as_object);

    let access = tokens
        .and_then(|t| string(t, &["access_token"]))
        .or_else(|| string(map, &["access_token"]))
        .or_else(|| string(map, &["OPENAI_API_KEY"]))
        .or_else(|| find_string(doc, CODEX_FALLBACK_KEYS))?;

    let account_id = tokens
        .and_then(|t| string(t, &["account_id"]))
        .map(str::to_string)
        .or_else(|| {
            let id_token = tokens.and_then(|t| string(t, &["id_token"]))?;
            chatgpt_account_id(id_token)
        });

    Some(
        Credential::new(access, CredentialOrigin::File)
            .with_refresh_token(tokens.and_then(|t| string(t, &["refresh_token"])).map(str::to_string))
            .with_account_id(account_id)
            .with_last_refresh(find_date(doc, CODEX_REFRESHED_KEYS)),
    )
}

/// Any key containing "token" whose string value looks like a token.
pub fn token_field(doc: &Value, now: DateTime<Utc>) -> Option<Credential> {
    match doc {
        Value::Object(map) => map.iter().find_map(|(key, value)| {
            if key.to_lowercase().contains("token") {
                if let Some(token) = value.as_str().filter(|t| looks_like_token(t)) {
                    return Some(Credential::new(token.trim(), CredentialOrigin::File));
                }
            }
            token_field(value, now)
        }),
        Value::Array(items) => items.iter().find_map(|child| token_field(child, now)),
        _ => None,
    }
}

/// Gemini CLI OAuth files: `access_token|accessToken|token` anywhere.
pub fn bearer_field(doc: &Value, now: DateTime<Utc>) -> Option<Credential> {
    match doc {
        Value::Object(map) => ACCESS_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str).filter(|t| looks_like_bearer(t)))
            .map(|token| Credential::new(token.trim(), CredentialOrigin::File))
            .or_else(|| map.values().find_map(|child| bearer_field(child, now))),
        Value::Array(items) => items.iter().find_map(|child| bearer_field(child, now)),
        _ => None,
    }
}

// --- well-known locations ---

pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
}

/// `$CODEX_HOME`, or `~/.codex`.
pub fn codex_home(home: &Path) -> PathBuf {
    std::env::var("CODEX_HOME")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join(".codex"))
}

fn chatgpt_account_id(id_token: &str) -> Option<String> {
    let claims = decode_jwt_claims(id_token).ok()?;
    claims
        .get("https://api.openai.com/auth")
        .and_then(|auth| auth.get("chatgpt_account_id"))
        .or_else(|| claims.get("chatgpt_account_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Decode a JWT payload without signature verification.
/// Returns the decoded JSON claims as a serde_json::Value.
pub fn decode_jwt_claims(token: &str) -> Result<Value> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        anyhow::bail!("Invalid JWT: expected 3 parts, got {}", parts.len());
    }
    use base64::Engine;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .with_context(|| "Failed to base64url decode JWT payload")?;
    serde_json::from_slice(&decoded).with_context(|| "Failed to parse JWT payload as JSON")
}
