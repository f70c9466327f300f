//! Configuration loading, validation, and management for Agentry.
//!
//! Loads configuration from `~/.agentry/config.toml` (or the file named by
//! `AGENTRY_CONFIG`) with environment variable overrides. Validates all
//! settings before a manager is built from them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "AGENTRY_CONFIG";
/// Environment variable overriding `pool.lanes`.
pub const POOL_LANES_ENV: &str = "AGENTRY_POOL_LANES";
/// Environment variable overriding `events.enabled`.
pub const EVENTS_ENABLED_ENV: &str = "AGENTRY_EVENTS_ENABLED";

/// Upper bound on pool lanes accepted by validation.
pub const MAX_POOL_LANES: usize = 256;

/// The root configuration structure.
///
/// Maps directly to `~/.agentry/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Shared worker pool
    #[serde(default)]
    pub pool: PoolConfig,

    /// Dispatcher thread
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Lifecycle event bus
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of shared serial lanes
    #[serde(default = "default_lanes")]
    pub lanes: usize,

    /// Pool lane threads are named `{prefix}-{index}`
    #[serde(default = "default_pool_prefix")]
    pub thread_name_prefix: String,

    /// Solo lane threads are named `{prefix}-{n}`
    #[serde(default = "default_solo_prefix")]
    pub solo_thread_prefix: String,
}

fn default_lanes() -> usize {
    4
}
fn default_pool_prefix() -> String {
    "agentry-pool".into()
}
fn default_solo_prefix() -> String {
    "agentry-solo".into()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
            thread_name_prefix: default_pool_prefix(),
            solo_thread_prefix: default_solo_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_dispatcher_name")]
    pub thread_name: String,
}

fn default_dispatcher_name() -> String {
    "agentry-dispatcher".into()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: default_dispatcher_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Broadcast buffer; slow subscribers lag past this many events
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_true() -> bool {
    true
}
fn default_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from `AGENTRY_CONFIG` or the default path
    /// (`~/.agentry/config.toml`), then apply environment overrides:
    /// - `AGENTRY_POOL_LANES`
    /// - `AGENTRY_EVENTS_ENABLED`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));

        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
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

    /// Apply overrides from a variable lookup (the process environment in
    /// [`RuntimeConfig::load`]). Re-validates afterwards.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(lanes) = lookup(POOL_LANES_ENV) {
            self.pool.lanes = lanes.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "{POOL_LANES_ENV} must be a positive integer, got '{lanes}'"
                ))
            })?;
        }

        if let Some(enabled) = lookup(EVENTS_ENABLED_ENV) {
            self.events.enabled = match enabled.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "{EVENTS_ENABLED_ENV} must be a boolean, got '{other}'"
                    )));
                }
            };
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentry")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.lanes == 0 || self.pool.lanes > MAX_POOL_LANES {
            return Err(ConfigError::ValidationError(format!(
                "pool.lanes must be between 1 and {MAX_POOL_LANES}"
            )));
        }
        if self.pool.thread_name_prefix.trim().is_empty()
            || self.pool.solo_thread_prefix.trim().is_empty()
            || self.dispatcher.thread_name.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "thread names must not be empty".into(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "events.capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Render the defaults as TOML (for `agentry config --default`).
    pub fn default_toml() -> String {
        Self::default().to_toml()
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
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

impl From<ConfigError> for agentry_core::Error {
    fn from(err: ConfigError) -> Self {
        agentry_core::Error::Config {
            message: err.to_string(),
        }
    }
}
