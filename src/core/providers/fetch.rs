use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use crate::core::error::ProviderError;
use crate::core::normalize::headers::ResponseHeaders;

pub const USAGE_TIMEOUT: Duration = Duration::from_secs(20);
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("umon/", env!("CARGO_PKG_VERSION"));
const SNIPPET_LEN: usize = 220;

/// Status, headers and raw body of a completed request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: ResponseHeaders,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: ResponseHeaders::default(),
            body: body.into(),
        }
    }

    pub fn with_headers(mut self, headers: ResponseHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as a JSON tree. An empty or non-JSON body is `Value::Null` so the
    /// header fallback still gets a chance.
    pub fn json_or_null(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    pub fn json(&self) -> Result<Value, ProviderError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ProviderError::InvalidResponse(format!("{e}: {}", response_snippet(&self.body)))
        })
    }

    pub fn snippet(&self) -> String {
        response_snippet(&self.body)
    }
}

/// Client with an explicit timeout. A builder failure (TLS backend
/// initialisation) falls back to the default client.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Send a request and read the whole body.
pub async fn send(request: reqwest::RequestBuilder) -> Result<HttpResponse, ProviderError> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let headers = ResponseHeaders::from_header_map(response.headers());
    let body = response.text().await?;
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Generic mapping of a non-2xx status: 401/403 reject the credential,
/// anything else is a transport-level failure carrying a body snippet.
pub fn status_error(response: &HttpResponse) -> ProviderError {
    match StatusCode::from_u16(response.status) {
        Ok(StatusCode::UNAUTHORIZED) | Ok(StatusCode::FORBIDDEN) => {
            ProviderError::AuthenticationFailed
        }
        _ => ProviderError::NetworkError(http_failure(response)),
    }
}

pub fn http_failure(response: &HttpResponse) -> String {
    let snippet = response.snippet();
    if snippet.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        format!("HTTP {}: {}", response.status, snippet)
    }
}

/// Whitespace-collapsed prefix of a body, for error messages.
pub fn response_snippet(body: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_LEN {
        collapsed
    } else {
        let mut cut: String = collapsed.chars().take(SNIPPET_LEN).collect();
        cut.push('…');
        cut
    }
}

/// Validate that a resolved endpoint URL uses HTTPS.
///
/// All providers that allow endpoint overrides must call this before sending
/// credentials, to prevent exfiltration over plain HTTP or other schemes.
pub fn validate_endpoint(url: &str, provider_name: &str) -> anyhow::Result<()> {
    if !url.starts_with("https://") {
        anyhow::bail!(
            "{}: endpoint must use HTTPS, got: {}",
            provider_name,
            url
        );
    }
    Ok(())
}
