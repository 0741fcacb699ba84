//! Configuration for crcheck-runtime.
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration. Durations are written in humantime form (`"90s"`,
//! `"1m 30s"`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crcheck_core::RuleSources;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Rule source locations
    #[serde(default)]
    pub sources: RuleSources,

    /// Eligibility/categorization call
    #[serde(default = "ModelSettings::classification")]
    pub classification: ModelSettings,

    /// Report generation call
    #[serde(default = "ModelSettings::generation")]
    pub generation: ModelSettings,

    /// Generation retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Defaults used when classification or expansion yields nothing
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Truncate the article body to this many characters in prompts
    #[serde(default)]
    pub article_char_limit: Option<usize>,

    /// Provider endpoint and credentials
    #[serde(default)]
    pub provider: ProviderSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sources: RuleSources::default(),
            classification: ModelSettings::classification(),
            generation: ModelSettings::generation(),
            retry: RetryConfig::default(),
            fallback: FallbackConfig::default(),
            article_char_limit: None,
            provider: ProviderSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(ConfigError::Invalid(
                "retry.max_delay must not be shorter than retry.base_delay".to_string(),
            ));
        }
        if self.fallback.classification_categories.is_empty() {
            return Err(ConfigError::Invalid(
                "fallback.classification_categories must not be empty".to_string(),
            ));
        }
        if matches!(&self.fallback.issue_ids, Some(ids) if ids.is_empty()) {
            return Err(ConfigError::Invalid(
                "fallback.issue_ids must not be empty when set".to_string(),
            ));
        }
        if self.article_char_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "article_char_limit must be positive when set".to_string(),
            ));
        }
        for (name, settings) in [
            ("classification", &self.classification),
            ("generation", &self.generation),
        ] {
            if settings.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{}.model must be set", name)));
            }
            if settings.max_tokens == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}.max_tokens must be positive",
                    name
                )));
            }
        }
        let url = &self.provider.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid(
                "provider.base_url must start with http:// or https://".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for one of the two model calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    pub model: String,

    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    #[serde(with = "humantime_duration", default = "default_timeout")]
    pub timeout: Duration,

    /// Mark the system prompt for provider-side caching
    #[serde(default)]
    pub prompt_caching: bool,
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

impl ModelSettings {
    /// Small, cheap model for the eligibility call.
    pub fn classification() -> Self {
        Self {
            model: "claude-haiku-4-5".to_string(),
            max_tokens: 1000,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
            prompt_caching: false,
        }
    }

    /// Stronger model with a large output budget for report generation.
    pub fn generation() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 10000,
            temperature: 0.0,
            timeout: default_timeout(),
            prompt_caching: true,
        }
    }
}

/// Retry configuration for the generation stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry
    #[serde(with = "humantime_duration", default = "default_base_delay")]
    pub base_delay: Duration,

    /// Upper bound on any single delay
    #[serde(with = "humantime_duration", default = "default_max_delay")]
    pub max_delay: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

/// Defaults substituted when earlier stages produce nothing usable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackConfig {
    /// Categories assumed when the classification call fails
    #[serde(default = "default_classification_categories")]
    pub classification_categories: Vec<String>,

    /// Issue ids used when expansion resolves nothing. When unset, the
    /// rulebook picks the first subcategory of its first two categories.
    #[serde(default)]
    pub issue_ids: Option<Vec<String>>,
}

fn default_classification_categories() -> Vec<String> {
    vec!["1".to_string(), "2".to_string(), "3".to_string()]
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            classification_categories: default_classification_categories(),
            issue_ids: None,
        }
    }
}

/// Provider endpoint and credentials.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Falls back to `ANTHROPIC_API_KEY` when unset
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Serde adapter for humantime durations (`"1s"`, `"2m 30s"`).
mod humantime_duration {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}
