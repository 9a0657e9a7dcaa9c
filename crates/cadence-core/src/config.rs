//! Configuration loading and typed config structures for the storage core.
//!
//! The canonical configuration lives in `cadence-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror the
//! YAML structure and a loader that reads and validates the file. Every
//! field has a default, so an empty file (or no file at all) yields a
//! working local setup except for the replica credentials, which must be
//! supplied either in YAML or through the environment.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `cadence-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CadenceConfig {
    /// Store locations and pool sizes.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Guild cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Values returned when a guild has no override.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Vote and premium durations.
    #[serde(default)]
    pub premium: PremiumConfig,

    /// Playback statistics window.
    #[serde(default)]
    pub stats: StatsConfig,

    /// Full resync tuning.
    #[serde(default)]
    pub resync: ResyncConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CadenceConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values for the stores:
    /// - `CADENCE_PRIMARY_PATH` overrides `storage.primary.path`
    /// - `CADENCE_REPLICA_URL` overrides `storage.replica.url`
    /// - `CADENCE_REPLICA_TOKEN` overrides `storage.replica.auth_token`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::from_env());
        }
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.storage.apply_env_overrides();
        Ok(config)
    }

    /// Built-in defaults with environment overrides, for running without a
    /// configuration file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.storage.apply_env_overrides();
        config
    }

    /// Check every section. Called once at boot, before any store is
    /// opened.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.replica.validate()?;
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be at least 1".to_owned()));
        }
        if self.defaults.volume > MAX_VOLUME {
            return Err(ConfigError::Invalid(format!(
                "defaults.volume must be at most {MAX_VOLUME}"
            )));
        }
        if self.defaults.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("defaults.prefix must not be empty".to_owned()));
        }
        if self.premium.vote_duration_hours == 0 {
            return Err(ConfigError::Invalid(
                "premium.vote_duration_hours must be at least 1".to_owned(),
            ));
        }
        if self.stats.window_days == 0 {
            return Err(ConfigError::Invalid("stats.window_days must be at least 1".to_owned()));
        }
        if self.resync.batch_size == 0 {
            return Err(ConfigError::Invalid("resync.batch_size must be at least 1".to_owned()));
        }
        Ok(())
    }
}

/// Highest playback volume a guild may store.
pub const MAX_VOLUME: u8 = 200;

/// Store locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// The embedded primary.
    #[serde(default)]
    pub primary: PrimaryConfig,

    /// The networked replica.
    #[serde(default)]
    pub replica: ReplicaConfig,
}

impl StorageConfig {
    /// Override store locations with environment variables when set.
    ///
    /// Keeps the replica token out of the YAML file in deployments.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CADENCE_PRIMARY_PATH") {
            self.primary.path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CADENCE_REPLICA_URL") {
            self.replica.url = val;
        }
        if let Ok(val) = std::env::var("CADENCE_REPLICA_TOKEN") {
            self.replica.auth_token = val;
        }
    }
}

/// Embedded primary store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrimaryConfig {
    /// SQLite database file; created if missing.
    #[serde(default = "default_primary_path")]
    pub path: PathBuf,

    /// Pooled connections to the file.
    #[serde(default = "default_primary_max_connections")]
    pub max_connections: u32,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            path: default_primary_path(),
            max_connections: default_primary_max_connections(),
        }
    }
}

/// Networked replica store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplicaConfig {
    /// Connection URL (`postgresql://...`).
    #[serde(default)]
    pub url: String,

    /// Credential applied as the connection password.
    #[serde(default)]
    pub auth_token: String,

    /// Pooled connections to the replica.
    #[serde(default = "default_replica_max_connections")]
    pub max_connections: u32,

    /// How long to wait for a replica connection, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ReplicaConfig {
    /// Require both the URL and the token.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if either is missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.replica.url is required (or set CADENCE_REPLICA_URL)".to_owned(),
            ));
        }
        if self.auth_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.replica.auth_token is required (or set CADENCE_REPLICA_TOKEN)".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: String::new(),
            max_connections: default_replica_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Guild cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Guilds kept before the oldest-inserted one is evicted.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

/// Values returned when a guild has no override stored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DefaultsConfig {
    /// Command prefix.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Locale tag.
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Playback volume.
    #[serde(default = "default_volume")]
    pub volume: u8,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            locale: default_locale(),
            volume: default_volume(),
        }
    }
}

/// Vote and premium durations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PremiumConfig {
    /// How long a bot-list vote grants premium.
    #[serde(default = "default_vote_duration_hours")]
    pub vote_duration_hours: u32,
}

impl Default for PremiumConfig {
    fn default() -> Self {
        Self {
            vote_duration_hours: default_vote_duration_hours(),
        }
    }
}

/// Playback statistics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatsConfig {
    /// Rolling window; rows older than this are deleted on the next write.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
        }
    }
}

/// Full resync tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResyncConfig {
    /// Rows inserted per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_primary_path() -> PathBuf {
    PathBuf::from("data/cadence.db")
}

const fn default_primary_max_connections() -> u32 {
    4
}

const fn default_replica_max_connections() -> u32 {
    10
}

const fn default_connect_timeout_ms() -> u64 {
    5000
}

const fn default_cache_capacity() -> usize {
    10_000
}

fn default_prefix() -> String {
    "s!".to_owned()
}

fn default_locale() -> String {
    "en-US".to_owned()
}

const fn default_volume() -> u8 {
    100
}

const fn default_vote_duration_hours() -> u32 {
    12
}

const fn default_window_days() -> u32 {
    14
}

const fn default_batch_size() -> usize {
    cadence_db::RESYNC_BATCH_SIZE
}

fn default_log_level() -> String {
    "info".to_owned()
}
