//! Configuration module for the telemetry pipeline.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//! Every component receives its section at construction; nothing reads a
//! process-wide singleton.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instrumentation key stamped on every item, if set.
    pub instrumentation_key: Option<String>,
    pub persistence: PersistenceConfig,
    pub channel: ChannelConfig,
    pub crash: CrashConfig,
    pub logging: LoggingConfig,
}

/// Bundle storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Root directory holding one sub-directory per persistence type.
    pub directory: PathBuf,
    /// Maximum number of bundle files that may exist on disk at once.
    pub max_file_count: usize,
}

/// In-memory batching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Queue length that triggers an immediate flush.
    pub max_batch_count: usize,
    /// Seconds between periodic flushes.
    pub batch_interval_secs: u64,
}

impl ChannelConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval_secs)
    }
}

/// Crash reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    /// Whether the crash reporter is installed at startup.
    pub enabled: bool,
    /// Replace user home components in image paths with `USER`.
    pub anonymize_paths: bool,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit pipeline logs at all.
    pub debug_log_enabled: bool,
    /// Silences logging regardless of `debug_log_enabled`.
    pub app_store_environment: bool,
}

impl LoggingConfig {
    /// Whether any pipeline log output should be produced.
    pub fn is_enabled(&self) -> bool {
        self.debug_log_enabled && !self.app_store_environment
    }
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/appinsights/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("appinsights")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default cap on bundle files.
pub const DEFAULT_MAX_FILE_COUNT: usize = 50;

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("appinsights")
                .join("bundles"),
            max_file_count: DEFAULT_MAX_FILE_COUNT,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_batch_count: 100,
            batch_interval_secs: 15,
        }
    }
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anonymize_paths: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug_log_enabled: false,
            app_store_environment: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"channel.max_batch_count"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- persistence ---
        if self.persistence.max_file_count == 0 {
            errors.push(ValidationError {
                field: "persistence.max_file_count".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.persistence.directory.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "persistence.directory".into(),
                message: "must not be empty".into(),
            });
        }

        // --- channel ---
        if self.channel.max_batch_count == 0 {
            errors.push(ValidationError {
                field: "channel.max_batch_count".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.channel.batch_interval_secs == 0 {
            errors.push(ValidationError {
                field: "channel.batch_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        // --- instrumentation key ---
        if let Some(key) = &self.instrumentation_key {
            if key.trim().is_empty() {
                errors.push(ValidationError {
                    field: "instrumentation_key".into(),
                    message: "must not be blank when set".into(),
                });
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use appinsights_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .persistence_directory(PathBuf::from("/tmp/bundles"))
///     .persistence_max_file_count(10)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder pre-populated with defaults.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn instrumentation_key(mut self, key: impl Into<String>) -> Self {
        self.config.instrumentation_key = Some(key.into());
        self
    }

    // --- persistence ---

    pub fn persistence_directory(mut self, directory: PathBuf) -> Self {
        self.config.persistence.directory = directory;
        self
    }

    pub fn persistence_max_file_count(mut self, n: usize) -> Self {
        self.config.persistence.max_file_count = n;
        self
    }

    // --- channel ---

    pub fn channel_max_batch_count(mut self, n: usize) -> Self {
        self.config.channel.max_batch_count = n;
        self
    }

    pub fn channel_batch_interval_secs(mut self, seconds: u64) -> Self {
        self.config.channel.batch_interval_secs = seconds;
        self
    }

    // --- crash ---

    pub fn crash_enabled(mut self, enabled: bool) -> Self {
        self.config.crash.enabled = enabled;
        self
    }

    pub fn crash_anonymize_paths(mut self, anonymize: bool) -> Self {
        self.config.crash.anonymize_paths = anonymize;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_debug_log_enabled(mut self, enabled: bool) -> Self {
        self.config.logging.debug_log_enabled = enabled;
        self
    }

    pub fn logging_app_store_environment(mut self, app_store: bool) -> Self {
        self.config.logging.app_store_environment = app_store;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
