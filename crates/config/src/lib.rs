//! Configuration loading, validation, and management for Recurse.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides. Validates all settings before the loop starts.
//!
//! ```toml
//! [provider]
//! name = "openrouter"
//! model = "anthropic/claude-sonnet-4"
//! api_key = "sk-..."
//!
//! [runtime]
//! max_iterations = 30
//! exec_timeout_secs = 300
//!
//! [sub_query]
//! model = "openai/gpt-4o-mini"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The root configuration structure.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM backend settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Driver loop settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Sub-query overrides
    #[serde(default)]
    pub sub_query: SubQueryConfig,
}

/// Which backend to talk to and how.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider tag: "openrouter", "openai", "anthropic", "ollama", or a
    /// custom name paired with `base_url`
    #[serde(default = "default_provider")]
    pub name: String,

    /// Model for root calls
    #[serde(default = "default_model")]
    pub model: String,

    /// API key (also settable via `RECURSE_API_KEY`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Endpoint override for custom/self-hosted backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Token cap per root response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Driver loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum loop iterations before the final-request turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock budget per sandbox execution, in seconds
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,

    /// Extra progress logging
    #[serde(default)]
    pub verbose: bool,
}

/// Sub-query overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubQueryConfig {
    /// Model for `llm_query` calls (defaults to the root model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_iterations() -> u32 {
    30
}
fn default_exec_timeout_secs() -> u64 {
    300
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            exec_timeout_secs: default_exec_timeout_secs(),
            verbose: false,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("model", &self.model)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("runtime", &self.runtime)
            .field("sub_query", &self.sub_query)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from a file (when given), apply environment
    /// overrides, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no env overrides).
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("RECURSE_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("RECURSE_MODEL") {
            self.provider.model = model;
        }
        if let Ok(name) = std::env::var("RECURSE_PROVIDER") {
            self.provider.name = name;
        }
        if let Ok(base_url) = std::env::var("RECURSE_BASE_URL") {
            self.provider.base_url = Some(base_url);
        }
    }

    /// Check the configuration for values the driver would reject later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.name.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.name is empty".into()));
        }
        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.model is empty".into()));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::Invalid(format!(
                "provider.temperature {} is outside 0.0..=2.0",
                self.provider.temperature
            )));
        }
        if self.runtime.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "runtime.max_iterations must be at least 1".into(),
            ));
        }
        if self.runtime.exec_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "runtime.exec_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.name, "openrouter");
        assert_eq!(config.runtime.max_iterations, 30);
        assert_eq!(config.runtime.exec_timeout_secs, 300);
    }

    #[test]
    fn parses_a_full_file() {
        let config = AppConfig::from_toml(
            r#"
[provider]
name = "openai"
model = "gpt-4o"
api_key = "sk-test"
temperature = 0.2

[runtime]
max_iterations = 5
exec_timeout_secs = 60
verbose = true

[sub_query]
model = "gpt-4o-mini"
"#,
        )
        .unwrap();

        assert_eq!(config.provider.name, "openai");
        assert_eq!(config.provider.model, "gpt-4o");
        assert!((config.provider.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.runtime.max_iterations, 5);
        assert!(config.runtime.verbose);
        assert_eq!(config.sub_query.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let config = AppConfig::from_toml("[provider]\nmodel = \"gpt-4o\"\n").unwrap();
        assert_eq!(config.provider.name, "openrouter");
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.runtime.max_iterations, 30);
    }

    #[test]
    fn rejects_zero_iterations() {
        let result = AppConfig::from_toml("[runtime]\nmax_iterations = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let result = AppConfig::from_toml("[provider]\ntemperature = 3.5\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn debug_redacts_the_api_key() {
        let config = AppConfig::from_toml("[provider]\napi_key = \"sk-secret\"\n").unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
