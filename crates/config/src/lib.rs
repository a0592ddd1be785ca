//! Configuration loading, validation, and management for Marshal.
//!
//! Loads configuration from `~/.marshal/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.marshal/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default completion provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per completion
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Reasoning loop limits and timeouts
    #[serde(default)]
    pub agent: AgentConfig,

    /// Coordinator persona and clock
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Conversation store location
    #[serde(default)]
    pub store: StoreConfig,

    /// Local knowledge store location
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Credentials for third-party capability backends
    #[serde(default)]
    pub integrations: IntegrationsConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("coordinator", &self.coordinator)
            .field("store", &self.store)
            .field("knowledge", &self.knowledge)
            .field("integrations", &self.integrations)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Reasoning loop limits shared by the coordinator and its specialists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Iteration bound for the coordinator's loop
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Iteration bound for each specialist's loop
    #[serde(default = "default_specialist_max_iterations")]
    pub specialist_max_iterations: u32,

    /// Timeout for a single completion call
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_secs: u64,

    /// Timeout for a single leaf capability call
    #[serde(default = "default_capability_timeout")]
    pub capability_timeout_secs: u64,

    /// Timeout for a whole delegation to a specialist
    #[serde(default = "default_delegation_timeout")]
    pub delegation_timeout_secs: u64,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_specialist_max_iterations() -> u32 {
    6
}
fn default_completion_timeout() -> u64 {
    120
}
fn default_capability_timeout() -> u64 {
    30
}
fn default_delegation_timeout() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            specialist_max_iterations: default_specialist_max_iterations(),
            completion_timeout_secs: default_completion_timeout(),
            capability_timeout_secs: default_capability_timeout(),
            delegation_timeout_secs: default_delegation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_coordinator_name")]
    pub name: String,

    /// Persona line placed at the top of the coordinator's instruction
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Offset from UTC used for the "current time" line, in minutes
    #[serde(default)]
    pub timezone_offset_minutes: i32,
}

fn default_coordinator_name() -> String {
    "coordinator".into()
}
fn default_persona() -> String {
    "You are the Chief of Staff. Delegate tasks to your specialists and answer directly when no specialist is needed.".into()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: default_coordinator_name(),
            persona: default_persona(),
            timezone_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path; `sqlite::memory:` for an ephemeral store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

impl StoreConfig {
    /// The configured path, or `~/.marshal/history.db`.
    pub fn resolved_path(&self) -> String {
        self.path.clone().unwrap_or_else(|| {
            AppConfig::config_dir()
                .join("history.db")
                .to_string_lossy()
                .into_owned()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Whether the knowledge specialist is offered to the coordinator
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSONL chunk file; defaults to `~/.marshal/knowledge.jsonl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl KnowledgeConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("knowledge.jsonl"))
    }
}

/// Credentials for the capability backends. Any backend without
/// credentials is either replaced by a local stand-in or omitted.
#[derive(Clone, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    /// Tavily search API key; the search specialist is omitted without it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,

    /// OAuth access token with calendar and gmail scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_access_token: Option<String>,

    /// Use in-process calendar and mailbox when no Google token is set
    #[serde(default = "default_true")]
    pub local_fallback: bool,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            google_access_token: None,
            local_fallback: true,
        }
    }
}

impl std::fmt::Debug for IntegrationsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationsConfig")
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .field("google_access_token", &redact(&self.google_access_token))
            .field("local_fallback", &self.local_fallback)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.marshal/config.toml).
    ///
    /// Also checks environment variables:
    /// - `MARSHAL_API_KEY` (highest priority), `OPENAI_API_KEY`, `GROQ_API_KEY`
    /// - `MARSHAL_PROVIDER`, `MARSHAL_MODEL`
    /// - `TAVILY_API_KEY`, `GOOGLE_ACCESS_TOKEN`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("MARSHAL_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("GROQ_API_KEY"));
        }
        if let Some(provider) = lookup("MARSHAL_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("MARSHAL_MODEL") {
            self.default_model = model;
        }
        if self.integrations.tavily_api_key.is_none() {
            self.integrations.tavily_api_key = lookup("TAVILY_API_KEY");
        }
        if self.integrations.google_access_token.is_none() {
            self.integrations.google_access_token = lookup("GOOGLE_ACCESS_TOKEN");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".marshal")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 || self.agent.specialist_max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent iteration bounds must be at least 1".into(),
            ));
        }

        if self.agent.completion_timeout_secs == 0
            || self.agent.capability_timeout_secs == 0
            || self.agent.delegation_timeout_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "agent timeouts must be greater than zero".into(),
            ));
        }

        if self.coordinator.timezone_offset_minutes.abs() > 14 * 60 {
            return Err(ConfigError::ValidationError(
                "coordinator.timezone_offset_minutes must be within ±14h".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `marshal init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            coordinator: CoordinatorConfig::default(),
            store: StoreConfig::default(),
            knowledge: KnowledgeConfig::default(),
            integrations: IntegrationsConfig::default(),
            providers: HashMap::new(),
        }
    }
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
