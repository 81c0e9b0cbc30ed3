use thiserror::Error;

/// Failure kinds a provider fetch can surface.
///
/// `NotConfigured` is a configuration state rather than a fault: no credential
/// source produced a usable value. `TokenExpired` is recoverable and triggers
/// at most one refresh plus one full re-resolution before it is reported.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider is not configured")]
    NotConfigured,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Token expired")]
    TokenExpired,
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::NetworkError("request timed out".to_string())
        } else if err.is_connect() {
            ProviderError::NetworkError("connection failed".to_string())
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::InvalidResponse(err.to_string())
    }
}
