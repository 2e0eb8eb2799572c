//! Configuration loading, validation, and management for turnloop.
//!
//! Loads `turnloop.toml` from the working directory (or an explicit path)
//! with environment variable overrides. One immutable [`SessionConfig`] is
//! built at startup and handed to every component constructor.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "turnloop.toml";

/// Cacheable blocks the Anthropic API accepts in one request.
pub const PROVIDER_CACHE_BLOCK_LIMIT: usize = 4;

/// Cacheable blocks the provider itself spends on the tool list and the
/// system prompt.
pub const RESERVED_CACHE_BLOCKS: usize = 2;

/// Highest `cache.breakpoints` value that keeps a request within
/// [`PROVIDER_CACHE_BLOCK_LIMIT`].
pub const MAX_CACHE_BREAKPOINTS: usize = PROVIDER_CACHE_BLOCK_LIMIT - RESERVED_CACHE_BLOCKS;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous software agent working in a \
    local workspace. Use the bash tool to run commands and the edit tool to view, create and \
    modify files. Work step by step and report what you did when the task is complete.";

pub const DEFAULT_JOURNAL_SYSTEM_PROMPT: &str = "You keep a concise engineering journal. \
    Summarize the interaction you are given in a few sentences, focusing on what was attempted, \
    what changed and what remains.";

/// The root configuration structure.
///
/// Maps directly to `turnloop.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Anthropic API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Messages API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for the main sampling loop
    #[serde(default = "default_model")]
    pub model: String,

    /// Max tokens per main-loop response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Inline system prompt; takes precedence over `system_prompt_file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub images: ImagesConfig,

    #[serde(default)]
    pub summary: SummaryConfig,

    #[serde(default)]
    pub journal: JournalConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub session: SessionPaths,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_model() -> String {
    "claude-3-5-sonnet-latest".into()
}
fn default_aux_model() -> String {
    "claude-3-5-haiku-latest".into()
}
fn default_max_tokens() -> u32 {
    8000
}
fn default_request_timeout() -> u64 {
    300
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

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("system_prompt", &self.system_prompt)
            .field("system_prompt_file", &self.system_prompt_file)
            .field("cache", &self.cache)
            .field("images", &self.images)
            .field("summary", &self.summary)
            .field("journal", &self.journal)
            .field("tools", &self.tools)
            .field("session", &self.session)
            .finish()
    }
}

/// Prompt-cache breakpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How many trailing user turns carry a cache marker
    #[serde(default = "default_breakpoints")]
    pub breakpoints: usize,
}

fn default_breakpoints() -> usize {
    2
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            breakpoints: default_breakpoints(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_true")]
    pub prune: bool,

    /// Images kept across all tool results
    #[serde(default = "default_keep_images")]
    pub keep: usize,
}

fn default_keep_images() -> usize {
    2
}

impl ImagesConfig {
    /// The retention limit, or `None` when pruning is disabled.
    pub fn keep_limit(&self) -> Option<usize> {
        self.prune.then_some(self.keep)
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            prune: true,
            keep: default_keep_images(),
        }
    }
}

/// Context summarization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Summarize once the conversation holds more turns than this
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    #[serde(default = "default_aux_model")]
    pub model: String,

    #[serde(default = "default_summary_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_turns() -> usize {
    40
}
fn default_summary_max_tokens() -> u32 {
    6000
}

impl SummaryConfig {
    pub fn threshold(&self) -> Option<usize> {
        self.enabled.then_some(self.max_turns)
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_turns: default_max_turns(),
            model: default_aux_model(),
            max_tokens: default_summary_max_tokens(),
        }
    }
}

/// Interaction journal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_journal_path")]
    pub path: PathBuf,

    #[serde(default = "default_aux_model")]
    pub model: String,

    #[serde(default = "default_journal_max_tokens")]
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("journal").join("journal.log")
}
fn default_journal_max_tokens() -> u32 {
    1500
}

impl JournalConfig {
    /// The journal model's system prompt: the configured file if set,
    /// otherwise the built-in prompt.
    pub fn resolve_system_prompt(&self) -> Result<String, ConfigError> {
        match &self.system_prompt_file {
            Some(path) => read_prompt_file(path),
            None => Ok(DEFAULT_JOURNAL_SYSTEM_PROMPT.to_string()),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_journal_path(),
            model: default_aux_model(),
            max_tokens: default_journal_max_tokens(),
            system_prompt_file: None,
        }
    }
}

/// Built-in tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Run consecutive concurrency-safe tool calls together. Only tools that
    /// declare themselves concurrency-safe are batched; the built-in `bash`
    /// and `edit` tools both write to the workspace and always run alone.
    #[serde(default)]
    pub parallel: bool,

    /// Allowed first words for bash commands. Empty = any command.
    #[serde(default)]
    pub allowed_commands: Vec<String>,

    /// Working directory for tools. Defaults to the process directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    120
}

impl ToolsConfig {
    pub fn workspace(&self) -> PathBuf {
        self.workspace_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            allowed_commands: vec![],
            workspace_dir: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Where the binary looks for prompts and writes the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPaths {
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    #[serde(default = "default_transcript_path")]
    pub transcript_path: PathBuf,
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}
fn default_transcript_path() -> PathBuf {
    PathBuf::from("logs").join("transcript.txt")
}

impl Default for SessionPaths {
    fn default() -> Self {
        Self {
            prompts_dir: default_prompts_dir(),
            transcript_path: default_transcript_path(),
        }
    }
}

impl SessionConfig {
    /// Load `turnloop.toml` from the working directory, then apply
    /// environment overrides.
    ///
    /// Environment variables:
    /// - `TURNLOOP_API_KEY` (highest priority), then `ANTHROPIC_API_KEY`
    /// - `TURNLOOP_MODEL`
    /// - `TURNLOOP_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(Path::new(CONFIG_FILE_NAME))
    }

    /// Load from a specific path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
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

    /// Apply overrides from an environment lookup. An explicit
    /// `TURNLOOP_API_KEY` wins over the file; `ANTHROPIC_API_KEY` only fills
    /// a missing key.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("TURNLOOP_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = lookup("ANTHROPIC_API_KEY");
        }

        if let Some(model) = lookup("TURNLOOP_MODEL") {
            self.model = model;
        }

        if let Some(url) = lookup("TURNLOOP_BASE_URL") {
            self.base_url = url;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.breakpoints > MAX_CACHE_BREAKPOINTS {
            return Err(ConfigError::ValidationError(format!(
                "cache.breakpoints must be at most {MAX_CACHE_BREAKPOINTS} \
                 (the provider keeps {RESERVED_CACHE_BLOCKS} of {PROVIDER_CACHE_BLOCK_LIMIT} for tools and system prompt)"
            )));
        }

        if self.summary.max_turns < 2 {
            return Err(ConfigError::ValidationError(
                "summary.max_turns must be at least 2".into(),
            ));
        }

        for (field, value) in [
            ("max_tokens", self.max_tokens),
            ("summary.max_tokens", self.summary.max_tokens),
            ("journal.max_tokens", self.journal.max_tokens),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{field} must be > 0")));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// The main system prompt: inline text, then the prompt file, then the
    /// built-in default.
    pub fn resolve_system_prompt(&self) -> Result<String, ConfigError> {
        if let Some(prompt) = &self.system_prompt {
            return Ok(prompt.clone());
        }
        match &self.system_prompt_file {
            Some(path) => read_prompt_file(path),
            None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    /// Render the effective configuration as TOML with the key redacted.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.api_key.is_some() {
            shown.api_key = Some("[REDACTED]".into());
        }
        toml::to_string_pretty(&shown).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
            system_prompt: None,
            system_prompt_file: None,
            cache: CacheConfig::default(),
            images: ImagesConfig::default(),
            summary: SummaryConfig::default(),
            journal: JournalConfig::default(),
            tools: ToolsConfig::default(),
            session: SessionPaths::default(),
        }
    }
}

fn read_prompt_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to render configuration: {0}")]
    SerializeError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model, "claude-3-5-sonnet-latest");
        assert_eq!(config.max_tokens, 8000);
        assert_eq!(config.cache.breakpoints, 2);
        assert_eq!(config.images.keep_limit(), Some(2));
        assert_eq!(config.summary.threshold(), Some(40));
        assert_eq!(config.summary.model, "claude-3-5-haiku-latest");
        assert!(!config.journal.enabled);
        assert!(!config.tools.parallel);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = SessionConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.summary.max_turns, config.summary.max_turns);
        assert_eq!(parsed.journal.path, config.journal.path);
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: SessionConfig = toml::from_str(
            r#"
model = "claude-3-opus-latest"

[images]
prune = false

[summary]
max_turns = 10
"#,
        )
        .unwrap();
        assert_eq!(config.model, "claude-3-opus-latest");
        assert_eq!(config.images.keep_limit(), None);
        assert_eq!(config.summary.max_turns, 10);
        assert_eq!(config.summary.max_tokens, 6000);
        assert!(config.cache.enabled);
    }

    #[test]
    fn too_many_breakpoints_rejected() {
        let mut config = SessionConfig::default();
        config.cache.breakpoints = MAX_CACHE_BREAKPOINTS;
        assert!(config.validate().is_ok());

        // Turn markers plus the tool and system markers must fit the API limit.
        config.cache.breakpoints = 3;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache.breakpoints must be at most 2"));
    }

    #[test]
    fn tiny_summary_threshold_rejected() {
        let mut config = SessionConfig::default();
        config.summary.max_turns = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_tokens_rejected() {
        let mut config = SessionConfig::default();
        config.journal.max_tokens = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("journal.max_tokens"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = SessionConfig::load_from(Path::new("/nonexistent/turnloop.toml")).unwrap();
        assert_eq!(config.model, "claude-3-5-sonnet-latest");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "model = [").unwrap();
        let err = SessionConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn invalid_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[cache]\nbreakpoints = 9\n").unwrap();
        let err = SessionConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = SessionConfig::default();
        config.apply_env(env(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("TURNLOOP_MODEL", "claude-3-5-haiku-latest"),
            ("TURNLOOP_BASE_URL", "http://localhost:9000"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.model, "claude-3-5-haiku-latest");
        assert_eq!(config.base_url, "http://localhost:9000");
    }

    #[test]
    fn turnloop_key_beats_file_and_anthropic_key() {
        let mut config = SessionConfig {
            api_key: Some("from-file".into()),
            ..SessionConfig::default()
        };
        config.apply_env(env(&[("ANTHROPIC_API_KEY", "a"), ("TURNLOOP_API_KEY", "t")]));
        assert_eq!(config.api_key.as_deref(), Some("t"));

        let mut config = SessionConfig {
            api_key: Some("from-file".into()),
            ..SessionConfig::default()
        };
        config.apply_env(env(&[("ANTHROPIC_API_KEY", "a")]));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn blank_key_is_not_a_key() {
        let config = SessionConfig {
            api_key: Some("  ".into()),
            ..SessionConfig::default()
        };
        assert!(!config.has_api_key());
    }

    #[test]
    fn debug_redacts_key() {
        let config = SessionConfig {
            api_key: Some("sk-secret-value".into()),
            ..SessionConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));

        let shown = config.to_redacted_toml().unwrap();
        assert!(!shown.contains("sk-secret-value"));
    }

    #[test]
    fn system_prompt_resolution_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("system.md");
        std::fs::write(&file, "from file\n").unwrap();

        let mut config = SessionConfig::default();
        assert_eq!(config.resolve_system_prompt().unwrap(), DEFAULT_SYSTEM_PROMPT);

        config.system_prompt_file = Some(file);
        assert_eq!(config.resolve_system_prompt().unwrap(), "from file");

        config.system_prompt = Some("inline".into());
        assert_eq!(config.resolve_system_prompt().unwrap(), "inline");
    }

    #[test]
    fn missing_prompt_file_is_read_error() {
        let config = SessionConfig {
            system_prompt_file: Some(PathBuf::from("/nonexistent/system.md")),
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.resolve_system_prompt(),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
