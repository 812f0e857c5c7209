//! Configuration loading and validation for CoFinance.
//!
//! Loads configuration from `~/.cofinance/config.toml` with environment
//! variable overrides. Every field has a default, so a missing file or a
//! partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.cofinance/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub delegation: DelegationConfig,
}

/// Which model backs every agent on the team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend the host is expected to supply, e.g. "openai"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub id: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Upper bound on tool rounds within one agent run
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Ask the supervisor to expose its strategy analysis in `<think>` blocks
    #[serde(default)]
    pub thinking_mode: bool,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_tool_rounds() -> u32 {
    8
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            id: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_tool_rounds: default_max_tool_rounds(),
            thinking_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://agent_storage.db".into()
}
fn default_max_connections() -> u32 {
    4
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Per-turn retrieval of relevant context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Embedding dimension shared by every embedder
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// How many recent messages of the current session are indexed
    #[serde(default = "default_message_window")]
    pub message_window: usize,

    #[serde(default = "default_fact_limit")]
    pub fact_limit: usize,

    /// Other sessions sampled for cross-session recall
    #[serde(default = "default_cross_session_count")]
    pub cross_session_count: usize,

    /// Messages and facts taken from each sampled session
    #[serde(default = "default_cross_session_sample")]
    pub cross_session_sample: usize,

    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,

    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Provider embedding model; hashing embedder when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_dimension() -> usize {
    384
}
fn default_top_k() -> usize {
    3
}
fn default_message_window() -> usize {
    50
}
fn default_fact_limit() -> usize {
    100
}
fn default_cross_session_count() -> usize {
    2
}
fn default_cross_session_sample() -> usize {
    20
}
fn default_snippet_chars() -> usize {
    100
}
fn default_max_context_chars() -> usize {
    500
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dimension: default_dimension(),
            top_k: default_top_k(),
            message_window: default_message_window(),
            fact_limit: default_fact_limit(),
            cross_session_count: default_cross_session_count(),
            cross_session_sample: default_cross_session_sample(),
            snippet_chars: default_snippet_chars(),
            max_context_chars: default_max_context_chars(),
            embedding_model: None,
        }
    }
}

/// Summarize-and-replace of long session histories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Compact once a session holds more than this many messages
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Per-message truncation applied before summarizing
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

fn default_threshold() -> usize {
    10
}
fn default_keep_recent() -> usize {
    5
}
fn default_max_message_chars() -> usize {
    500
}
fn default_summary_max_tokens() -> u32 {
    200
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            keep_recent: default_keep_recent(),
            max_message_chars: default_max_message_chars(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Cap on specialist calls per turn; unlimited when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_calls_per_turn: Option<u32>,
}

impl AppConfig {
    /// Load configuration from the default location with env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
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

    fn apply_env_overrides(&mut self) {
        if let Ok(provider) = std::env::var("COFINANCE_PROVIDER") {
            self.model.provider = provider;
        }
        if let Ok(model) = std::env::var("COFINANCE_MODEL") {
            self.model.id = model;
        }
        if let Ok(url) = std::env::var("COFINANCE_DATABASE_URL") {
            self.memory.database_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cofinance")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.retrieval.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.dimension must be > 0".into(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError("retrieval.top_k must be > 0".into()));
        }
        if self.compaction.keep_recent >= self.compaction.threshold {
            return Err(ConfigError::ValidationError(format!(
                "compaction.keep_recent ({}) must be smaller than compaction.threshold ({})",
                self.compaction.keep_recent, self.compaction.threshold
            )));
        }
        if self.memory.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "memory.max_connections must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
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
