pub mod claude;
pub mod codex;
pub mod copilot;
pub mod fetch;
pub mod gemini;
pub mod openrouter;
pub mod refresh;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::auth::home_dir;
use crate::core::error::ProviderError;
use crate::core::models::usage::UsageSnapshot;
use crate::core::secrets::SecretStore;

pub const DEFAULT_COPILOT_ALLOWANCE: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
    Copilot,
    Gemini,
    OpenRouter,
}

impl Provider {
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "claude" | "claude_code" | "claude-code" => Some(Self::Claude),
            "codex" | "chatgpt" => Some(Self::Codex),
            "copilot" | "github" | "github_copilot" | "github-copilot" => Some(Self::Copilot),
            "gemini" => Some(Self::Gemini),
            "openrouter" | "open_router" | "open-router" => Some(Self::OpenRouter),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Copilot => "copilot",
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Stable name used as the key for trends, thresholds and errors.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
            Self::Copilot => "Copilot",
            Self::Gemini => "Gemini",
            Self::OpenRouter => "OpenRouter",
        }
    }

    pub fn session_label(&self) -> &'static str {
        match self {
            Self::Copilot => "Today",
            Self::OpenRouter => "Key",
            _ => "5h",
        }
    }

    pub fn weekly_label(&self) -> &'static str {
        match self {
            Self::Copilot => "Week",
            _ => "7d",
        }
    }

    pub fn secondary_label(&self) -> &'static str {
        match self {
            Self::Claude => "Sonnet",
            Self::Codex => "Spark",
            _ => "Model",
        }
    }

    /// Balance-style providers report remaining credits, where low is bad.
    pub fn is_credit_based(&self) -> bool {
        matches!(self, Self::OpenRouter)
    }

    pub fn all() -> &'static [Provider] {
        &[
            Provider::Claude,
            Provider::Codex,
            Provider::Copilot,
            Provider::Gemini,
            Provider::OpenRouter,
        ]
    }

    pub fn auth_hint(&self) -> &'static str {
        match self {
            Self::Claude => "CLAUDE_CODE_OAUTH_TOKEN or ~/.claude/.credentials.json",
            Self::Codex => "CODEX_ACCESS_TOKEN or ~/.codex/auth.json",
            Self::Copilot => "GH_TOKEN, GITHUB_TOKEN or gh CLI",
            Self::Gemini => "GEMINI_API_KEY or ~/.gemini/oauth_creds.json",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Configuration values providers read at fetch time, resolved once per
/// refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchSettings {
    pub copilot_monthly_allowance: f64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            copilot_monthly_allowance: DEFAULT_COPILOT_ALLOWANCE,
        }
    }
}

#[async_trait]
pub trait UsageProvider: Send + Sync {
    fn kind(&self) -> Provider;

    fn name(&self) -> &'static str {
        self.kind().display_name()
    }

    /// Local-only probe: file existence or a secret-store lookup.
    fn is_available(&self) -> bool;

    async fn fetch_usage(&self, settings: &FetchSettings) -> Result<UsageSnapshot, ProviderError>;

    /// Drop any cached credential so the next fetch resolves from scratch.
    fn invalidate_cache(&self) {}
}

/// Where providers look for credentials.
#[derive(Clone)]
pub struct ProviderContext {
    pub home: PathBuf,
    pub store: Arc<dyn SecretStore>,
}

impl ProviderContext {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            home: home_dir(),
            store,
        }
    }

    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = home;
        self
    }
}

/// One instance of every provider, in display order.
pub fn registry(ctx: &ProviderContext) -> Vec<Arc<dyn UsageProvider>> {
    Provider::all().iter().map(|p| build(*p, ctx)).collect()
}

pub fn build(provider: Provider, ctx: &ProviderContext) -> Arc<dyn UsageProvider> {
    match provider {
        Provider::Claude => Arc::new(claude::ClaudeProvider::new(ctx)),
        Provider::Codex => Arc::new(codex::CodexProvider::new(ctx)),
        Provider::Copilot => Arc::new(copilot::CopilotProvider::new(ctx)),
        Provider::Gemini => Arc::new(gemini::GeminiProvider::new(ctx)),
        Provider::OpenRouter => Arc::new(openrouter::OpenRouterProvider::new(ctx)),
    }
}
