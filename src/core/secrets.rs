use std::collections::HashMap;

use parking_lot::Mutex;

pub const OPENROUTER_API_KEY: &str = "openrouter-api-key";
pub const COPILOT_ACCESS_TOKEN: &str = "copilot-access-token";
pub const GEMINI_API_KEY: &str = "gemini-api-key";
pub const CODEX_ACCESS_TOKEN: &str = "codex-access-token";
pub const CLAUDE_CREDENTIALS: &str = "Claude Code-credentials";

pub const KNOWN_KEYS: &[&str] = &[
    OPENROUTER_API_KEY,
    COPILOT_ACCESS_TOKEN,
    GEMINI_API_KEY,
    CODEX_ACCESS_TOKEN,
    CLAUDE_CREDENTIALS,
];

#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),
    #[error("Secret store operation failed for '{key}': {message}")]
    Failed { key: String, message: String },
}

/// Opaque scoped key-value store for long-lived secrets.
pub trait SecretStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, SecretStoreError>;
    fn save(&self, value: &str, key: &str) -> Result<(), SecretStoreError>;
    fn delete(&self, key: &str) -> Result<(), SecretStoreError>;
}

/// OS keychain through the `keyring` crate. Each key is stored with the key
/// as both service and account name.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl KeyringStore {
    fn entry(key: &str) -> Result<keyring::Entry, SecretStoreError> {
        keyring::Entry::new(key, key).map_err(|e| failed(key, e))
    }
}

fn failed(key: &str, err: keyring::Error) -> SecretStoreError {
    match err {
        keyring::Error::NoStorageAccess(inner) => SecretStoreError::Unavailable(inner.to_string()),
        keyring::Error::PlatformFailure(inner) => SecretStoreError::Unavailable(inner.to_string()),
        other => SecretStoreError::Failed {
            key: key.to_string(),
            message: other.to_string(),
        },
    }
}

impl SecretStore for KeyringStore {
    fn read(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        match Self::entry(key)?.get_password() {
            Ok(value) => Ok(Some(value).filter(|v| !v.trim().is_empty())),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(failed(key, e)),
        }
    }

    fn save(&self, value: &str, key: &str) -> Result<(), SecretStoreError> {
        Self::entry(key)?
            .set_password(value)
            .map_err(|e| failed(key, e))
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(failed(key, e)),
        }
    }
}

/// Process-local store, used with `--no-keyring` and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.entries.lock().insert(key.to_string(), value.to_string());
        self
    }
}

impl SecretStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, value: &str, key: &str) -> Result<(), SecretStoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
