//! Predikt Configuration Management
//!
//! Handles configuration from environment variables and config files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Run configuration and credential database locations
    pub storage: StorageConfig,

    /// Token and password hashing settings
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variables on top of this configuration
    ///
    /// Every variable that is set wins over the current value, including one
    /// set to the built-in default.
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env("API_PORT")? {
            self.server.port = port;
        }

        // Storage
        if let Ok(path) = std::env::var("RUN_CONFIG_PATH") {
            self.storage.run_config_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            self.storage.default_database_path = PathBuf::from(path);
        }
        if let Some(max) = parse_env("DATABASE_MAX_CONNECTIONS")? {
            self.storage.max_connections = max;
        }

        // Tokens
        if let Some(ttl) = parse_env("TOKEN_TTL_SECS")? {
            self.auth.token_ttl_secs = ttl;
        }
        if let Ok(issuer) = std::env::var("TOKEN_ISSUER") {
            self.auth.issuer = issuer;
        }

        // Password hashing
        if let Some(memory_cost) = parse_env("PASSWORD_MEMORY_COST")? {
            self.auth.password.memory_cost = memory_cost;
        }
        if let Some(time_cost) = parse_env("PASSWORD_TIME_COST")? {
            self.auth.password.time_cost = time_cost;
        }
        if let Some(parallelism) = parse_env("PASSWORD_PARALLELISM")? {
            self.auth.password.parallelism = parallelism;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("LOG_JSON")? {
            self.logging.json_format = json;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject settings that would make the service unsafe to run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.token_ttl_secs == 0 || self.auth.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(ConfigError::InvalidValue {
                key: "TOKEN_TTL_SECS".to_string(),
                value: self.auth.token_ttl_secs.to_string(),
            });
        }
        if self.auth.secret_length_bytes < MIN_SECRET_LENGTH_BYTES {
            return Err(ConfigError::InvalidValue {
                key: "auth.secret_length_bytes".to_string(),
                value: self.auth.secret_length_bytes.to_string(),
            });
        }
        if self.auth.issuer.trim().is_empty() {
            return Err(ConfigError::MissingRequired("TOKEN_ISSUER".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// TOML file holding the persisted signing secret and database location
    pub run_config_path: PathBuf,

    /// Database file used when the run configuration has no location yet
    pub default_database_path: PathBuf,

    /// SQLite connection pool size
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            run_config_path: PathBuf::from("config/run.toml"),
            default_database_path: PathBuf::from("data/predikt.sqlite3"),
            max_connections: 5,
        }
    }
}

/// Longest token lifetime the service accepts (one year)
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Smallest signing secret the service accepts, in bytes
pub const MIN_SECRET_LENGTH_BYTES: usize = 32;

/// Token and credential settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of issued tokens in seconds
    pub token_ttl_secs: u64,

    /// Issuer claim written into and required from every token
    pub issuer: String,

    /// Random bytes drawn when a signing secret has to be generated
    pub secret_length_bytes: usize,

    /// Argon2 cost parameters
    pub password: PasswordParams,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 86_400, // 24 hours
            issuer: "predikt".to_string(),
            secret_length_bytes: 64,
            password: PasswordParams::default(),
        }
    }
}

/// Argon2id cost parameters
///
/// Increasing memory or iterations improves resistance to offline
/// guessing but slows down every registration and login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordParams {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Iterations
    pub time_cost: u32,
    /// Lanes
    pub parallelism: u32,
}

impl Default for PasswordParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
