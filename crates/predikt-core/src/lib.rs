//! Predikt Core - configuration and storage contracts
//!
//! This crate defines what the credential service needs from its
//! surroundings:
//! - Configuration management
//! - The configuration store and credential store contracts
//! - File and in-memory run configuration storage

pub mod config;
pub mod run_config;
pub mod store;

pub use config::{
    AppConfig, AuthConfig, ConfigError, LoggingConfig, PasswordParams, ServerConfig,
    StorageConfig, MAX_TOKEN_TTL_SECS, MIN_SECRET_LENGTH_BYTES,
};
pub use run_config::{locate_database, FileConfigStore, MemoryConfigStore};
pub use store::{
    ConfigKey, ConfigStore, CredentialStore, PublicProfile, StoreError, StoredCredential,
};
