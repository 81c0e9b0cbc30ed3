use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::providers::{FetchSettings, Provider, DEFAULT_COPILOT_ALLOWANCE};

/// Refresh intervals the scheduler accepts, in seconds.
pub const REFRESH_INTERVALS: &[u64] = &[60, 300, 900];
pub const DEFAULT_REFRESH_SECS: u64 = 300;
pub const DEFAULT_USAGE_THRESHOLD: f64 = 80.0;
pub const DEFAULT_CREDIT_THRESHOLD: f64 = 5.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_format")]
    pub default_format: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_format() -> String {
    "text".to_string()
}
fn default_color() -> String {
    "auto".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_format: default_format(),
            color: default_color(),
        }
    }
}

/// Alert thresholds for the two percentage windows of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowThresholds {
    #[serde(default = "default_usage_threshold")]
    pub session: f64,
    #[serde(default = "default_usage_threshold")]
    pub weekly: f64,
}

fn default_usage_threshold() -> f64 {
    DEFAULT_USAGE_THRESHOLD
}

impl Default for WindowThresholds {
    fn default() -> Self {
        Self {
            session: DEFAULT_USAGE_THRESHOLD,
            weekly: DEFAULT_USAGE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_credit_threshold")]
    pub openrouter_credit_threshold: f64,
    /// Keyed by provider id. Providers without an entry use the defaults.
    #[serde(default)]
    pub thresholds: BTreeMap<String, WindowThresholds>,
}

fn default_credit_threshold() -> f64 {
    DEFAULT_CREDIT_THRESHOLD
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            openrouter_credit_threshold: DEFAULT_CREDIT_THRESHOLD,
            thresholds: BTreeMap::new(),
        }
    }
}

impl NotificationConfig {
    pub fn thresholds_for(&self, provider: Provider) -> WindowThresholds {
        self.thresholds
            .get(provider.id())
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopilotConfig {
    #[serde(default = "default_allowance")]
    pub monthly_allowance: f64,
}

fn default_allowance() -> f64 {
    DEFAULT_COPILOT_ALLOWANCE
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            monthly_allowance: DEFAULT_COPILOT_ALLOWANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_refresh_secs() -> u64 {
    DEFAULT_REFRESH_SECS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default = "default_refresh_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub copilot: CopilotConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            refresh_interval_secs: DEFAULT_REFRESH_SECS,
            notifications: NotificationConfig::default(),
            copilot: CopilotConfig::default(),
            providers: Provider::all()
                .iter()
                .map(|p| ProviderConfig {
                    id: p.id().to_string(),
                    enabled: matches!(p, Provider::Claude | Provider::Codex),
                })
                .collect(),
        }
    }
}

impl AppConfig {
    /// Get the config file path, respecting XDG_CONFIG_HOME
    pub fn config_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".config")
            });
        config_dir.join("umon").join("config.toml")
    }

    /// Load config from the default path, falling back to defaults if not found
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Serialize and write this config to the config file path.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// A config listing every provider, with only `enabled_ids` switched on.
    pub fn with_enabled(enabled_ids: &[String]) -> Self {
        let mut config = Self::default();
        config.set_enabled(enabled_ids);
        config
    }

    /// Update which providers are enabled, preserving everything else.
    /// Adds any providers missing from the current config.
    pub fn set_enabled(&mut self, enabled_ids: &[String]) {
        for provider in &mut self.providers {
            provider.enabled = enabled_ids.iter().any(|id| id == &provider.id);
        }

        for p in Provider::all() {
            if !self.providers.iter().any(|c| c.id == p.id()) {
                self.providers.push(ProviderConfig {
                    id: p.id().to_string(),
                    enabled: enabled_ids.iter().any(|id| id == p.id()),
                });
            }
        }
    }

    /// Enabled providers in registry order. Unknown ids are skipped.
    pub fn enabled_providers(&self) -> Vec<Provider> {
        Provider::all()
            .iter()
            .copied()
            .filter(|p| self.is_enabled(*p))
            .collect()
    }

    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.providers
            .iter()
            .any(|c| c.enabled && Provider::from_id(&c.id) == Some(provider))
    }

    /// The configured interval when it is one of the accepted values,
    /// otherwise the 5 minute default.
    pub fn refresh_interval(&self) -> Duration {
        let secs = if REFRESH_INTERVALS.contains(&self.refresh_interval_secs) {
            self.refresh_interval_secs
        } else {
            DEFAULT_REFRESH_SECS
        };
        Duration::from_secs(secs)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        let allowance = self.copilot.monthly_allowance;
        FetchSettings {
            copilot_monthly_allowance: if allowance.is_finite() && allowance > 0.0 {
                allowance
            } else {
                DEFAULT_COPILOT_ALLOWANCE
            },
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !["text", "json"].contains(&self.settings.default_format.as_str()) {
            issues.push(format!(
                "Invalid default_format: '{}' (must be 'text' or 'json')",
                self.settings.default_format
            ));
        }
        if !["auto", "always", "never"].contains(&self.settings.color.as_str()) {
            issues.push(format!(
                "Invalid color: '{}' (must be 'auto', 'always', or 'never')",
                self.settings.color
            ));
        }
        if !REFRESH_INTERVALS.contains(&self.refresh_interval_secs) {
            issues.push(format!(
                "Invalid refresh_interval_secs: {} (must be 60, 300 or 900; using {})",
                self.refresh_interval_secs, DEFAULT_REFRESH_SECS
            ));
        }
        if self.copilot.monthly_allowance <= 0.0 {
            issues.push(format!(
                "Invalid copilot.monthly_allowance: {} (must be positive; using {})",
                self.copilot.monthly_allowance, DEFAULT_COPILOT_ALLOWANCE
            ));
        }
        if self.notifications.openrouter_credit_threshold < 0.0 {
            issues.push(format!(
                "Invalid notifications.openrouter_credit_threshold: {}",
                self.notifications.openrouter_credit_threshold
            ));
        }
        for (id, t) in &self.notifications.thresholds {
            if Provider::from_id(id).is_none() {
                issues.push(format!("Thresholds for unknown provider ID: '{}'", id));
            }
            for (window, value) in [("session", t.session), ("weekly", t.weekly)] {
                if !(0.0..=100.0).contains(&value) {
                    issues.push(format!(
                        "Provider '{}': {} threshold {} is outside 0-100",
                        id, window, value
                    ));
                }
            }
        }
        for p in &self.providers {
            if Provider::from_id(&p.id).is_none() {
                issues.push(format!("Unknown provider ID: '{}'", p.id));
            }
        }
        issues
    }
}
