//! TOML Configuration File Support
//!
//! Centralized configuration loading for the assistant, supporting a TOML
//! file at `~/.config/deepseek-assistant/assistant.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/deepseek-assistant/assistant.toml` for configuration
//! - `$XDG_DATA_HOME/deepseek-assistant/state.json` for persisted chat state
//!
//! # Example Configuration
//!
//! ```toml
//! [api]
//! endpoint = "https://api.deepseek.com/v1/chat/completions"
//! model = "deepseek-reasoner"
//! max_tokens = 2000
//!
//! [stream]
//! watchdog_timeout_secs = 20
//!
//! [history]
//! max_length = 200
//! max_project_files = 50
//!
//! [state]
//! path = "/home/me/.local/share/deepseek-assistant/state.json"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::DEFAULT_MAX_HISTORY;
use crate::persistence::default_state_path;
use crate::streaming::DEFAULT_WATCHDOG;

/// Default chat completions endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.deepseek.com/v1/chat/completions";

/// Default balance endpoint used for the API key check
pub const DEFAULT_BALANCE_ENDPOINT: &str = "https://api.deepseek.com/user/balance";

/// Default model
pub const DEFAULT_MODEL: &str = "deepseek-reasoner";

/// Default response token limit
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Default number of persisted project files
pub const DEFAULT_MAX_PROJECT_FILES: usize = 50;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// API section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiToml {
    /// Chat completions endpoint
    pub endpoint: Option<String>,

    /// Balance endpoint for the API key check
    pub balance_endpoint: Option<String>,

    /// API key (prefer `DEEPSEEK_API_KEY`)
    pub api_key: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
}

/// Stream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Seconds to wait for the first data line
    pub watchdog_timeout_secs: Option<u64>,
}

/// History section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryToml {
    /// Maximum conversation length
    pub max_length: Option<usize>,

    /// Maximum number of project files kept in saved state
    pub max_project_files: Option<usize>,
}

/// State section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateToml {
    /// State file location
    pub path: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantToml {
    /// API configuration section
    pub api: ApiToml,

    /// Streaming configuration section
    pub stream: StreamToml,

    /// History configuration section
    pub history: HistoryToml,

    /// Persisted state configuration section
    pub state: StateToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Effective assistant configuration
///
/// Use [`load_config`] to load it with proper priority handling.
#[derive(Clone)]
pub struct AssistantConfig {
    /// Chat completions endpoint
    pub endpoint: String,

    /// Balance endpoint for the API key check
    pub balance_endpoint: String,

    /// API key
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Maximum tokens per response
    pub max_tokens: u32,

    /// Watchdog window for the first data line
    pub watchdog_timeout: Duration,

    /// Maximum conversation length
    pub max_history: usize,

    /// Maximum number of project files kept in saved state
    pub max_project_files: usize,

    /// State file location (`None` keeps state in memory)
    pub state_path: Option<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl std::fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("endpoint", &self.endpoint)
            .field("balance_endpoint", &self.balance_endpoint)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("watchdog_timeout", &self.watchdog_timeout)
            .field("max_history", &self.max_history)
            .field("max_project_files", &self.max_project_files)
            .field("state_path", &self.state_path)
            .field("config_file_path", &self.config_file_path)
            .field("source", &self.source)
            .finish()
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            balance_endpoint: DEFAULT_BALANCE_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            watchdog_timeout: DEFAULT_WATCHDOG,
            max_history: DEFAULT_MAX_HISTORY,
            max_project_files: DEFAULT_MAX_PROJECT_FILES,
            state_path: default_state_path(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl AssistantConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "api.endpoint must not be empty".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "api.model must not be empty".to_string(),
            ));
        }
        if self.max_history == 0 {
            return Err(ConfigError::ValidationError(
                "history.max_length must be at least 1".to_string(),
            ));
        }
        if self.watchdog_timeout < Duration::from_secs(1) {
            return Err(ConfigError::ValidationError(
                "stream.watchdog_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/deepseek-assistant/assistant.toml` or
/// `~/.config/deepseek-assistant/assistant.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("deepseek-assistant").join("assistant.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] after.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged values fail validation. A missing config file is not an error.
pub fn load_config() -> Result<AssistantConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<AssistantConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<AssistantConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = AssistantConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: AssistantToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut AssistantConfig, toml: &AssistantToml) {
    // API settings
    if let Some(ref endpoint) = toml.api.endpoint {
        config.endpoint.clone_from(endpoint);
    }
    if let Some(ref endpoint) = toml.api.balance_endpoint {
        config.balance_endpoint.clone_from(endpoint);
    }
    if let Some(ref key) = toml.api.api_key {
        config.api_key.clone_from(key);
    }
    if let Some(ref model) = toml.api.model {
        config.model.clone_from(model);
    }
    if let Some(tokens) = toml.api.max_tokens {
        config.max_tokens = tokens;
    }

    // Stream settings
    if let Some(secs) = toml.stream.watchdog_timeout_secs {
        config.watchdog_timeout = Duration::from_secs(secs);
    }

    // History settings
    if let Some(len) = toml.history.max_length {
        config.max_history = len;
    }
    if let Some(files) = toml.history.max_project_files {
        config.max_project_files = files;
    }

    // State settings
    if let Some(ref path) = toml.state.path {
        config.state_path = Some(path.clone());
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut AssistantConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(endpoint) = env("DEEPSEEK_ENDPOINT") {
        config.endpoint = endpoint;
        config.source = ConfigSource::Env;
    }
    if let Some(endpoint) = env("DEEPSEEK_BALANCE_ENDPOINT") {
        config.balance_endpoint = endpoint;
        config.source = ConfigSource::Env;
    }
    if let Some(key) = env("DEEPSEEK_API_KEY") {
        config.api_key = key;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("DEEPSEEK_MODEL") {
        config.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(tokens) = env("DEEPSEEK_MAX_TOKENS") {
        if let Ok(n) = tokens.parse::<u32>() {
            config.max_tokens = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(secs) = env("ASSISTANT_WATCHDOG_SECS") {
        if let Ok(s) = secs.parse::<u64>() {
            config.watchdog_timeout = Duration::from_secs(s);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(len) = env("ASSISTANT_MAX_HISTORY") {
        if let Ok(n) = len.parse::<usize>() {
            config.max_history = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(path) = env("ASSISTANT_STATE_FILE") {
        config.state_path = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Model override
    pub model: Option<String>,

    /// Endpoint override
    pub endpoint: Option<String>,

    /// Max tokens override
    pub max_tokens: Option<u32>,

    /// State file override
    pub state_path: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set max tokens override
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set state file override
    #[must_use]
    pub fn with_state_path(mut self, path: PathBuf) -> Self {
        self.state_path = Some(path);
        self
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override produces an
    /// invalid configuration.
    pub fn apply(&self, config: &mut AssistantConfig) -> Result<(), ConfigError> {
        if self.model.is_some()
            || self.endpoint.is_some()
            || self.max_tokens.is_some()
            || self.state_path.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref model) = self.model {
            config.model.clone_from(model);
        }
        if let Some(ref endpoint) = self.endpoint {
            config.endpoint.clone_from(endpoint);
        }
        if let Some(tokens) = self.max_tokens {
            config.max_tokens = tokens;
        }
        if let Some(ref path) = self.state_path {
            config.state_path = Some(path.clone());
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = AssistantConfig::default();

        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.balance_endpoint, DEFAULT_BALANCE_ENDPOINT);
        assert_eq!(config.model, "deepseek-reasoner");
        assert_eq!(config.max_tokens, 2000);
        assert_eq!(config.watchdog_timeout, Duration::from_secs(20));
        assert_eq!(config.max_history, 200);
        assert_eq!(config.max_project_files, 50);
        assert!(config.api_key.is_empty());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("deepseek-assistant"));
            assert!(p.to_string_lossy().ends_with("assistant.toml"));
        }
    }

    #[test]
    fn test_debug_hides_api_key() {
        let mut config = AssistantConfig::default();
        config.api_key = "sk-secret".to_string();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("***"));
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = toml_file(
            r#"
[api]
endpoint = "http://localhost:8080/v1/chat/completions"
model = "deepseek-chat"
max_tokens = 512
api_key = "sk-file"

[stream]
watchdog_timeout_secs = 5

[history]
max_length = 40
max_project_files = 10

[state]
path = "/tmp/assistant-state.json"
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.model, "deepseek-chat");
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.api_key, "sk-file");
        assert_eq!(config.watchdog_timeout, Duration::from_secs(5));
        assert_eq!(config.max_history, 40);
        assert_eq!(config.max_project_files, 10);
        assert_eq!(
            config.state_path,
            Some(PathBuf::from("/tmp/assistant-state.json"))
        );
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = toml_file(
            r#"
[api]
model = "partial-model"
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.model, "partial-model");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.max_history, 200);
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/assistant.toml");
        let config = load_config_with_env(Some(path), no_env).unwrap();

        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = toml_file(
            r#"
[api
model = 3
"#,
        );

        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    // =========================================================================
    // Priority Ordering Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = toml_file(
            r#"
[api]
model = "file-model"
max_tokens = 100
"#,
        );

        let env = env_from(&[
            ("DEEPSEEK_MODEL", "env-model"),
            ("DEEPSEEK_API_KEY", "sk-env"),
            ("ASSISTANT_WATCHDOG_SECS", "7"),
        ]);
        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(config.model, "env-model");
        assert_eq!(config.api_key, "sk-env");
        assert_eq!(config.watchdog_timeout, Duration::from_secs(7));
        // Not overridden by env
        assert_eq!(config.max_tokens, 100);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_unparsable_env_value_ignored() {
        let env = env_from(&[("DEEPSEEK_MAX_TOKENS", "lots")]);
        let config = load_config_with_env(None, env).unwrap();

        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_env() {
        let env = env_from(&[("DEEPSEEK_MODEL", "env-model")]);
        let mut config = load_config_with_env(None, env).unwrap();

        ConfigOverrides::new()
            .with_model("cli-model".to_string())
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.model, "cli-model");
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = AssistantConfig::default();
        ConfigOverrides::new().apply(&mut config).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_zero_history_rejected() {
        let file = toml_file("[history]\nmax_length = 0\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_zero_watchdog_rejected() {
        let env = env_from(&[("ASSISTANT_WATCHDOG_SECS", "0")]);
        let result = load_config_with_env(None, env);
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_empty_model_override_rejected() {
        let mut config = AssistantConfig::default();
        let result = ConfigOverrides::new()
            .with_model("  ".to_string())
            .apply(&mut config);
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }
}
