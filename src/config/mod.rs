//! Configuration management
//!
//! This module handles loading and parsing configuration for sessionward.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest token length accepted, in random bytes (128 bits)
pub const MIN_TOKEN_BYTES: usize = 16;

/// Largest token length accepted, in random bytes
pub const MAX_TOKEN_BYTES: usize = 64;

/// Longest accepted session TTL (ten years)
pub const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 3600;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Credential hashing configuration
    #[serde(default)]
    pub hash: HashConfig,
    /// Credential policy
    #[serde(default)]
    pub credential: CredentialPolicy,
    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// Session cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Login throttling configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/sessionward.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Argon2id work factor and pepper.
///
/// Defaults follow the argon2 crate's recommended parameters
/// (19 MiB, 2 passes, 1 lane).
#[derive(Clone, Serialize, Deserialize)]
pub struct HashConfig {
    /// Memory cost in KiB
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    /// Number of passes
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Degree of parallelism
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    /// Application-wide secret mixed into every hash
    #[serde(default, skip_serializing)]
    pub pepper: Option<String>,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
            pepper: None,
        }
    }
}

impl fmt::Debug for HashConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashConfig")
            .field("memory_kib", &self.memory_kib)
            .field("iterations", &self.iterations)
            .field("parallelism", &self.parallelism)
            .field("pepper", &self.pepper.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn default_memory_kib() -> u32 {
    19 * 1024
}

fn default_iterations() -> u32 {
    2
}

fn default_parallelism() -> u32 {
    1
}

/// Minimum policy a plaintext credential must satisfy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialPolicy {
    /// Minimum length in characters
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    /// Maximum length in characters
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_length: default_max_length(),
        }
    }
}

impl CredentialPolicy {
    /// Check a plaintext credential against the policy.
    ///
    /// The returned message never echoes the credential.
    pub fn check(&self, plaintext: &str) -> Result<(), String> {
        if plaintext.is_empty() {
            return Err("Credential cannot be empty".to_string());
        }

        let length = plaintext.chars().count();
        if length < self.min_length {
            return Err(format!(
                "Credential must be at least {} characters",
                self.min_length
            ));
        }
        if length > self.max_length {
            return Err(format!(
                "Credential must be at most {} characters",
                self.max_length
            ));
        }

        Ok(())
    }
}

fn default_min_length() -> usize {
    1
}

fn default_max_length() -> usize {
    256
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session time-to-live in seconds (default: 7 days)
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
    /// Fixed or sliding expiry
    #[serde(default)]
    pub expiry: ExpiryPolicy,
    /// Random bytes per token
    #[serde(default = "default_token_bytes")]
    pub token_bytes: usize,
    /// How many fresh tokens to try when a collision occurs
    #[serde(default = "default_max_issue_attempts")]
    pub max_issue_attempts: u32,
    /// Interval between expiry sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
            expiry: ExpiryPolicy::default(),
            token_bytes: default_token_bytes(),
            max_issue_attempts: default_max_issue_attempts(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl SessionConfig {
    /// TTL as a chrono duration, capped at [`MAX_TTL_SECONDS`]
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_seconds.min(MAX_TTL_SECONDS) as i64)
    }

    /// Check token length, TTL and retry bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_TOKEN_BYTES..=MAX_TOKEN_BYTES).contains(&self.token_bytes) {
            return Err(ConfigError::ValidationError(format!(
                "session.token_bytes must be between {} and {} (got {})",
                MIN_TOKEN_BYTES, MAX_TOKEN_BYTES, self.token_bytes
            )));
        }
        if self.ttl_seconds == 0 || self.ttl_seconds > MAX_TTL_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "session.ttl_seconds must be between 1 and {} (got {})",
                MAX_TTL_SECONDS, self.ttl_seconds
            )));
        }
        if self.max_issue_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_issue_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_session_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_token_bytes() -> usize {
    32
}

fn default_max_issue_attempts() -> u32 {
    3
}

fn default_sweep_interval() -> u64 {
    300
}

/// Session expiry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryPolicy {
    /// Expiry set once at issuance (default)
    #[default]
    Fixed,
    /// Expiry pushed forward on every successful resolution
    Sliding,
}

/// Session cache configuration
///
/// The cache is process-local. Leave it disabled when several processes
/// share one database, since a revoke in one process cannot reach the
/// cache of another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the in-process session cache
    #[serde(default)]
    pub enabled: bool,
    /// Maximum number of cached sessions
    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,
    /// Cache entry TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: default_cache_capacity(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_cache_ttl() -> u64 {
    300
}

/// Login throttling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Failed attempts allowed per login key inside the window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_seconds: default_window_seconds(),
        }
    }
}

fn default_max_attempts() -> usize {
    5
}

fn default_window_seconds() -> i64 {
    900
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides,
    /// then validate the result.
    ///
    /// Environment variables follow the pattern:
    /// - SESSIONWARD_DATABASE_DRIVER
    /// - SESSIONWARD_DATABASE_URL
    /// - SESSIONWARD_HASH_MEMORY_KIB
    /// - SESSIONWARD_HASH_ITERATIONS
    /// - SESSIONWARD_HASH_PARALLELISM
    /// - SESSIONWARD_HASH_PEPPER
    /// - SESSIONWARD_SESSION_TTL_SECONDS
    /// - SESSIONWARD_SESSION_EXPIRY
    /// - SESSIONWARD_SESSION_TOKEN_BYTES
    /// - SESSIONWARD_CACHE_ENABLED
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(driver) = std::env::var("SESSIONWARD_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("SESSIONWARD_DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(memory) = env_parse("SESSIONWARD_HASH_MEMORY_KIB") {
            self.hash.memory_kib = memory;
        }
        if let Some(iterations) = env_parse("SESSIONWARD_HASH_ITERATIONS") {
            self.hash.iterations = iterations;
        }
        if let Some(parallelism) = env_parse("SESSIONWARD_HASH_PARALLELISM") {
            self.hash.parallelism = parallelism;
        }
        if let Ok(pepper) = std::env::var("SESSIONWARD_HASH_PEPPER") {
            self.hash.pepper = Some(pepper);
        }

        if let Some(ttl) = env_parse("SESSIONWARD_SESSION_TTL_SECONDS") {
            self.session.ttl_seconds = ttl;
        }
        if let Ok(expiry) = std::env::var("SESSIONWARD_SESSION_EXPIRY") {
            match expiry.to_lowercase().as_str() {
                "fixed" => self.session.expiry = ExpiryPolicy::Fixed,
                "sliding" => self.session.expiry = ExpiryPolicy::Sliding,
                _ => {}
            }
        }
        if let Some(bytes) = env_parse("SESSIONWARD_SESSION_TOKEN_BYTES") {
            self.session.token_bytes = bytes;
        }

        if let Some(enabled) = env_parse("SESSIONWARD_CACHE_ENABLED") {
            self.cache.enabled = enabled;
        }
    }

    /// Reject settings that would weaken tokens or break hashing
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        if self.credential.min_length == 0 || self.credential.min_length > self.credential.max_length {
            return Err(ConfigError::ValidationError(format!(
                "credential length bounds are inconsistent (min {}, max {})",
                self.credential.min_length, self.credential.max_length
            )));
        }
        argon2::Params::new(
            self.hash.memory_kib,
            self.hash.iterations,
            self.hash.parallelism,
            None,
        )
        .map_err(|e| ConfigError::ValidationError(format!("invalid hash parameters: {}", e)))?;

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
