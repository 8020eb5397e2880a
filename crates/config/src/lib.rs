//! Configuration loading, validation, and management for toolrelay.
//!
//! Loads configuration from `~/.toolrelay/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.toolrelay/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Hosted model settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool catalog fetch and dispatch settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Tool providers, in registration order
    #[serde(default = "default_tool_providers")]
    pub tool_providers: Vec<ToolProviderConfig>,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model backend; only "anthropic" is built in
    #[serde(default = "default_model_provider")]
    pub provider: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// API key (can be supplied through the environment instead)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override for the API base URL (proxies, tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Timeout for one model call, including a full stream
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Optional system prompt prepended to every run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_model_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-3-5-sonnet-20241022".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    300
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
            system_prompt: None,
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Turn budget when the caller does not supply one
    #[serde(default = "default_max_turns")]
    pub default_max_turns: u32,

    /// Largest turn budget a caller may ask for
    #[serde(default = "default_max_turns_limit")]
    pub max_turns_limit: u32,

    /// Dispatch the tool calls of one turn concurrently
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

fn default_max_turns() -> u32 {
    10
}
fn default_max_turns_limit() -> u32 {
    50
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_max_turns: default_max_turns(),
            max_turns_limit: default_max_turns_limit(),
            parallel_tool_calls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Per-provider timeout for `GET /tools`
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Per-call timeout for `POST /execute`
    #[serde(default = "default_execute_timeout")]
    pub execute_timeout_secs: u64,
}

fn default_fetch_timeout() -> u64 {
    10
}
fn default_execute_timeout() -> u64 {
    30
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            execute_timeout_secs: default_execute_timeout(),
        }
    }
}

/// One tool provider endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProviderConfig {
    pub name: String,
    pub url: String,
}

fn default_tool_providers() -> Vec<ToolProviderConfig> {
    vec![
        ToolProviderConfig {
            name: "filesystem".into(),
            url: "http://mcp-filesystem:3001".into(),
        },
        ToolProviderConfig {
            name: "calculator".into(),
            url: "http://mcp-calculator:3002".into(),
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.toolrelay/config.toml).
    ///
    /// Environment variables override the file:
    /// - `TOOLRELAY_API_KEY`, then `ANTHROPIC_API_KEY` (only when no key is configured)
    /// - `TOOLRELAY_MODEL`
    /// - `TOOLRELAY_BASE_URL`
    /// - `TOOLRELAY_TOOL_PROVIDERS` (`name=url,name=url`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from a specific path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.model.api_key.is_none() {
            self.model.api_key = lookup("TOOLRELAY_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY"));
        }

        if let Some(model) = lookup("TOOLRELAY_MODEL") {
            self.model.model = model;
        }

        if let Some(base_url) = lookup("TOOLRELAY_BASE_URL") {
            self.model.base_url = Some(base_url);
        }

        if let Some(spec) = lookup("TOOLRELAY_TOOL_PROVIDERS") {
            self.tool_providers = parse_tool_providers(&spec)?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolrelay")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 1.0".into(),
            ));
        }

        if self.model.max_tokens == 0 || self.model.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "model.max_tokens and model.request_timeout_secs must be > 0".into(),
            ));
        }

        if self.registry.fetch_timeout_secs == 0 || self.registry.execute_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "registry timeouts must be > 0".into(),
            ));
        }

        if self.agent.default_max_turns == 0
            || self.agent.default_max_turns > self.agent.max_turns_limit
        {
            return Err(ConfigError::ValidationError(
                "agent.default_max_turns must be between 1 and agent.max_turns_limit".into(),
            ));
        }

        for (i, provider) in self.tool_providers.iter().enumerate() {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "tool_providers[{i}] has an empty name"
                )));
            }
            if !provider.url.starts_with("http://") && !provider.url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "tool provider {} must use an http:// or https:// URL",
                    provider.name
                )));
            }
            if self.tool_providers[..i].iter().any(|p| p.name == provider.name) {
                return Err(ConfigError::ValidationError(format!(
                    "tool provider {} is configured twice",
                    provider.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.model.api_key.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            agent: AgentConfig::default(),
            registry: RegistryConfig::default(),
            tool_providers: default_tool_providers(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Parse `name=url,name=url` into provider entries.
pub fn parse_tool_providers(spec: &str) -> Result<Vec<ToolProviderConfig>, ConfigError> {
    spec.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, url) = entry.split_once('=').ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "tool provider entry '{entry}' must look like name=url"
                ))
            })?;
            Ok(ToolProviderConfig {
                name: name.trim().to_string(),
                url: url.trim().trim_end_matches('/').to_string(),
            })
        })
        .collect()
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
