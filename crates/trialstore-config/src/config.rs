// crates/trialstore-config/src/config.rs
// ============================================================================
// Module: Trialstore Configuration
// Description: Configuration loading and validation for trialstore.
// Purpose: Parse storage and logging settings with strict input limits.
// Dependencies: serde, thiserror, toml, trialstore-sqlite
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file resolved from an explicit path,
//! the `TRIALSTORE_CONFIG` environment variable, or `trialstore.toml` in the
//! working directory. Files larger than 1 MiB, non-UTF-8 content, and
//! overlong paths are rejected before parsing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use trialstore_sqlite::SqliteJournalMode;
use trialstore_sqlite::SqliteStorageConfig;
use trialstore_sqlite::SqliteSyncMode;
use trialstore_sqlite::store::DEFAULT_BUSY_TIMEOUT_MS;
use trialstore_sqlite::store::MIN_BOUND_PARAMETERS;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "trialstore.toml";
/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "TRIALSTORE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of one path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum storage URL length.
pub(crate) const MAX_URL_LENGTH: usize = 4096;
/// Upper bound for the busy timeout.
pub(crate) const MAX_BUSY_TIMEOUT_MS: u64 = 600_000;
/// Log levels accepted in `[logging] level`.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Top-level trialstore configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrialstoreConfig {
    /// Storage connection settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TrialstoreConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        Self::load_resolved(&resolved)
    }

    /// Loads configuration when a file is available, otherwise defaults.
    ///
    /// An explicit path or `TRIALSTORE_CONFIG` must point at a readable file;
    /// only the implicit `trialstore.toml` may be absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        let implicit = path.is_none() && env::var_os(CONFIG_ENV_VAR).is_none();
        if implicit && !resolved.exists() {
            return Ok(Self::default());
        }
        Self::load_resolved(&resolved)
    }

    /// Parses a configuration from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        self.logging.validate()
    }

    /// Reads and validates one resolved file.
    fn load_resolved(resolved: &Path) -> Result<Self, ConfigError> {
        validate_path(resolved)?;
        let bytes = fs::read(resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }
}

/// `[storage]` section.
///
/// # Invariants
/// - `url`, when set, is non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Connection string; the CLI `--storage` flag overrides it.
    #[serde(default)]
    pub url: Option<String>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Connection liveness check; unset picks the dialect default.
    #[serde(default)]
    pub pre_ping: Option<bool>,
    /// Optional cap on bound parameters per statement.
    #[serde(default)]
    pub max_bound_parameters: Option<usize>,
    /// Skips the schema compatibility check when opening storage.
    #[serde(default)]
    pub skip_compatibility_check: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            pre_ping: None,
            max_bound_parameters: None,
            skip_compatibility_check: false,
        }
    }
}

impl StorageConfig {
    /// Validates storage settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.url {
            validate_url(url)?;
        }
        if self.busy_timeout_ms == 0 || self.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "storage.busy_timeout_ms must be between 1 and {MAX_BUSY_TIMEOUT_MS}"
            )));
        }
        if let Some(limit) = self.max_bound_parameters
            && limit < MIN_BOUND_PARAMETERS
        {
            return Err(ConfigError::Invalid(format!(
                "storage.max_bound_parameters must be at least {MIN_BOUND_PARAMETERS}"
            )));
        }
        Ok(())
    }

    /// Builds the storage engine config, preferring `override_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no URL is available.
    pub fn to_storage_config(
        &self,
        override_url: Option<&str>,
    ) -> Result<SqliteStorageConfig, ConfigError> {
        let url = match (override_url, self.url.as_deref()) {
            (Some(url), _) | (None, Some(url)) => url,
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "no storage url configured; pass --storage or set storage.url".to_string(),
                ));
            }
        };
        validate_url(url)?;
        Ok(SqliteStorageConfig {
            url: url.to_string(),
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
            pre_ping: self.pre_ping,
            max_bound_parameters: self.max_bound_parameters,
            skip_compatibility_check: self.skip_compatibility_check,
        })
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Validates the log level.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.level.trim().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the default busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default log level.
fn default_log_level() -> String {
    "info".to_string()
}

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a storage URL string.
fn validate_url(url: &str) -> Result<(), ConfigError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid("storage.url must be non-empty".to_string()));
    }
    if trimmed.len() > MAX_URL_LENGTH {
        return Err(ConfigError::Invalid("storage.url exceeds max length".to_string()));
    }
    if !trimmed.contains("://") {
        return Err(ConfigError::Invalid(
            "storage.url must look like dialect[+driver]://...".to_string(),
        ));
    }
    Ok(())
}
