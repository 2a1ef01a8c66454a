//! Configuration management for planner services.
//!
//! The gateway reads an optional JSON file at `~/.planner/config.json`
//! (or the path in `PLANNER_CONFIG`) and then applies environment overrides.
//!
//! A `.env` file in the working directory (or a parent) is read into the
//! process environment first; variables already set are not replaced.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PLANNER_HOST` → server.host
//! - `PORT` → server.port
//! - `REDIS_HOST` → redis.host
//! - `REDIS_PORT` → redis.port
//! - `GEMINI_API_KEY` → gemini.api_key
//! - `GEMINI_MODEL` → gemini.model
//! - `GEMINI_TEMPERATURE` → gemini.temperature
//! - `GEMINI_MAX_OUTPUT_TOKENS` → gemini.max_output_tokens
//! - `PLANNER_LOG_LEVEL` → observability.log_level

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result, ResultExt};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "PLANNER_CONFIG";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".planner"),
        |dirs| dirs.home_dir().join(".planner"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("config.json"))
}

// ============================================================================
// Sections
// ============================================================================

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Redis history cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Set to false to run without persisted history
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,
}

impl RedisConfig {
    /// Connection URL in the form the redis client expects.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_redis_host(),
            port: default_redis_port(),
        }
    }
}

/// Gemini generation service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key; generation is disabled when absent or empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// API base URL (without the `/v1beta` path)
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Sampling temperature; the API default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Cap on generated tokens; the API default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,
}

impl GeminiConfig {
    /// The API key, if one is configured and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
            temperature: None,
            max_output_tokens: None,
        }
    }
}

/// Web search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on results fed into a prompt
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// DuckDuckGo HTML endpoint
    #[serde(default = "default_search_base_url")]
    pub base_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: default_max_results(),
            base_url: default_search_base_url(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Read `.env` from the working directory or its parents into the process
/// environment. Returns the file that was read, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Read a specific env file into the process environment. Variables that
/// are already set keep their values.
pub fn load_dotenv_from(path: &Path) -> Result<()> {
    dotenvy::from_path(path)
        .map_err(|e| Error::Config(e.to_string()))
        .context(format!("Failed to read env file {}", path.display()))
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Unparsable numeric values are ignored and the previous value is kept.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PLANNER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            if let Ok(p) = port.trim().parse() {
                self.server.port = p;
            }
        }

        if let Some(host) = lookup("REDIS_HOST") {
            self.redis.host = host;
        }
        if let Some(port) = lookup("REDIS_PORT") {
            if let Ok(p) = port.trim().parse() {
                self.redis.port = p;
            }
        }

        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.gemini.api_key = Some(key);
        }
        if let Some(model) = lookup("GEMINI_MODEL") {
            if !model.trim().is_empty() {
                self.gemini.model = model;
            }
        }
        if let Some(temperature) = lookup("GEMINI_TEMPERATURE") {
            if let Ok(t) = temperature.trim().parse() {
                self.gemini.temperature = Some(t);
            }
        }
        if let Some(max_tokens) = lookup("GEMINI_MAX_OUTPUT_TOKENS") {
            if let Ok(n) = max_tokens.trim().parse() {
                self.gemini.max_output_tokens = Some(n);
            }
        }

        if let Some(level) = lookup("PLANNER_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("server.port must be between 1 and 65535".into()));
        }
        if self.redis.enabled && self.redis.port == 0 {
            return Err(Error::Config("redis.port must be between 1 and 65535".into()));
        }
        if self.gemini.model.trim().is_empty() {
            return Err(Error::Config("gemini.model must not be empty".into()));
        }
        if let Some(t) = self.gemini.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Config("gemini.temperature must be between 0.0 and 2.0".into()));
            }
        }
        if self.gemini.max_output_tokens.is_some_and(|n| n < 1) {
            return Err(Error::Config("gemini.max_output_tokens must be at least 1".into()));
        }
        if self.search.enabled && self.search.max_results == 0 {
            return Err(Error::Config("search.max_results must be at least 1".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}
fn default_redis_host() -> String {
    "redis".into()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_gemini_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_max_results() -> usize {
    6
}
fn default_search_base_url() -> String {
    "https://html.duckduckgo.com/html/".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.redis.host, "redis");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.gemini.model, "gemini-1.5-flash");
        assert!(config.gemini.api_key().is_none());
        assert_eq!(config.search.max_results, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_url() {
        let redis = RedisConfig {
            host: "cache.local".into(),
            port: 6380,
            ..Default::default()
        };
        assert_eq!(redis.url(), "redis://cache.local:6380/");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("REDIS_HOST", "localhost"),
            ("REDIS_PORT", "6390"),
            ("GEMINI_API_KEY", "abc"),
            ("GEMINI_MODEL", "gemini-2.0-flash"),
            ("PORT", "8080"),
        ]));

        assert_eq!(config.redis.host, "localhost");
        assert_eq!(config.redis.port, 6390);
        assert_eq!(config.gemini.api_key(), Some("abc"));
        assert_eq!(config.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_bad_numeric_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("REDIS_PORT", "not-a-port"), ("PORT", "")]));
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_empty_api_key_counts_as_missing() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("GEMINI_API_KEY", "  ")]));
        assert!(config.gemini.api_key().is_none());
    }

    #[test]
    fn test_dotenv_file_feeds_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(
            &path,
            "PLANNER_DOTENV_TEST_KEY=from-dotenv\nPLANNER_DOTENV_TEST_KEPT=from-dotenv\n",
        )
        .unwrap();
        std::env::set_var("PLANNER_DOTENV_TEST_KEPT", "from-shell");

        load_dotenv_from(&path).unwrap();

        assert_eq!(
            std::env::var("PLANNER_DOTENV_TEST_KEY").as_deref(),
            Ok("from-dotenv")
        );
        assert_eq!(
            std::env::var("PLANNER_DOTENV_TEST_KEPT").as_deref(),
            Ok("from-shell")
        );
    }

    #[test]
    fn test_missing_dotenv_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dotenv_from(&dir.path().join(".env")).unwrap_err();
        assert!(err.to_string().starts_with("Failed to read env file"));
    }

    #[test]
    fn test_generation_overrides() {
        let mut config = Config::default();
        assert!(config.gemini.temperature.is_none());
        assert!(config.gemini.max_output_tokens.is_none());

        config.apply_overrides(lookup_from(&[
            ("GEMINI_TEMPERATURE", "0.4"),
            ("GEMINI_MAX_OUTPUT_TOKENS", "nope"),
        ]));
        assert_eq!(config.gemini.temperature, Some(0.4));
        assert!(config.gemini.max_output_tokens.is_none());

        config.apply_overrides(lookup_from(&[("GEMINI_MAX_OUTPUT_TOKENS", "512")]));
        assert_eq!(config.gemini.max_output_tokens, Some(512));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_wins_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"redis": {{"host": "from-file", "port": 7000}}, "gemini": {{"model": "file-model"}}}}"#
        )
        .unwrap();

        let mut config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.redis.host, "from-file");
        assert_eq!(config.redis.port, 7000);
        assert_eq!(config.gemini.model, "file-model");
        // Untouched sections keep their defaults
        assert_eq!(config.server.port, 5000);

        config.apply_overrides(lookup_from(&[("REDIS_HOST", "from-env")]));
        assert_eq!(config.redis.host, "from-env");
        assert_eq!(config.redis.port, 7000);
    }

    #[test]
    fn test_load_from_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
        assert!(matches!(
            err,
            Error::WithContext { ref source, .. } if matches!(**source, Error::Json(_))
        ));
    }

    #[test]
    fn test_load_from_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().starts_with("Failed to read config from"));
        assert!(matches!(
            err,
            Error::WithContext { ref source, .. } if matches!(**source, Error::Io(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.gemini.model = " ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.max_results = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gemini.temperature = Some(3.5);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.gemini.max_output_tokens = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_observability_aliases() {
        let parsed: ObservabilityConfig =
            serde_json::from_str(r#"{"level": "debug", "format": "json"}"#).unwrap();
        assert_eq!(parsed.log_level, "debug");
        assert_eq!(parsed.log_format, "json");
    }
}
