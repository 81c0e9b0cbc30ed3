use chrono::{DateTime, Duration, Utc};

/// Seconds before the literal expiry at which a token already counts as stale.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Where in a credential chain a value was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    Environment,
    SecretStore,
    File,
    CliConfig,
    Command,
}

/// A resolved access token. Transient: never persisted as-is.
#[derive(Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Account scope some APIs want alongside the token (ChatGPT workspaces).
    pub account_id: Option<String>,
    /// When the issuing tool last refreshed the token, if it records that.
    pub last_refresh: Option<DateTime<Utc>>,
    pub origin: CredentialOrigin,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, origin: CredentialOrigin) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            account_id: None,
            last_refresh: None,
            origin,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_account_id(mut self, account_id: Option<String>) -> Self {
        self.account_id = account_id.filter(|a| !a.is_empty());
        self
    }

    pub fn with_last_refresh(mut self, last_refresh: Option<DateTime<Utc>>) -> Self {
        self.last_refresh = last_refresh;
        self
    }

    /// A credential without expiry information never expires locally; the
    /// remote 401/403 is the authority in that case.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now
                .checked_add_signed(Duration::seconds(EXPIRY_MARGIN_SECS))
                .map_or(true, |edge| edge >= expires_at),
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// Tokens stay out of logs and panic messages.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("account_id", &self.account_id)
            .field("origin", &self.origin)
            .finish()
    }
}
