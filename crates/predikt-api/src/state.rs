//! Application state management
//!
//! [`AppState::bootstrap`] is the startup barrier: the signing secret is
//! provisioned before the credential store is opened and before the router
//! exists, so no request can reach token issuance or validation earlier.

use crate::auth::{
    AuthError, AuthService, MemoryCredentialStore, PasswordHasher, SecretProvisioner, SecretSlot,
    SigningSecret, SqliteCredentialStore, TokenConfig, TokenService,
};
use predikt_core::config::AppConfig;
use predikt_core::{
    locate_database, ConfigError, ConfigStore, CredentialStore, FileConfigStore, StoreError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Reasons the service refuses to start
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("No signing secret could be loaded or persisted at {0}")]
    SecretUnavailable(PathBuf),

    #[error("Credential storage unavailable: {0}")]
    Storage(#[from] StoreError),

    #[error("Password hasher failed to initialise: {0}")]
    Hasher(#[from] AuthError),
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Registration, login and token validation
    pub auth: Arc<AuthService>,
    /// Signing secret, shared with the token service
    pub secrets: Arc<SecretSlot>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Assemble state from an already provisioned slot and an open store
    pub fn new(
        config: AppConfig,
        store: Arc<dyn CredentialStore>,
        secrets: Arc<SecretSlot>,
    ) -> Self {
        let tokens = TokenService::new(TokenConfig::from(&config.auth), secrets.clone());
        let hasher = PasswordHasher::new(config.auth.password);

        Self {
            auth: Arc::new(AuthService::new(store, hasher, tokens)),
            config,
            secrets,
            start_time: Instant::now(),
        }
    }

    /// Run the startup sequence
    ///
    /// 1. Validate configuration
    /// 2. Provision the signing secret (failure aborts)
    /// 3. Locate the credential database
    /// 4. Open it and ensure its schema
    pub async fn bootstrap(config: AppConfig) -> Result<Self, StartupError> {
        config.validate()?;

        let run_config = FileConfigStore::new(&config.storage.run_config_path);
        let run_config_path = run_config.path().to_path_buf();
        let run_config: Arc<dyn ConfigStore> = Arc::new(run_config);

        let secrets = Arc::new(SecretSlot::new());
        let provisioner = SecretProvisioner::new(
            run_config.clone(),
            secrets.clone(),
            config.auth.secret_length_bytes,
        );
        if !provisioner.provision().await {
            return Err(StartupError::SecretUnavailable(run_config_path));
        }

        let database =
            locate_database(run_config.as_ref(), &config.storage.default_database_path).await?;
        let store = SqliteCredentialStore::open(&database, config.storage.max_connections).await?;
        store.ensure_schema().await?;

        let state = Self::new(config, Arc::new(store), secrets);
        state.auth.warm_up().await?;

        tracing::info!(
            run_config = %run_config_path.display(),
            database = %database.display(),
            "Startup sequence complete"
        );
        Ok(state)
    }

    /// State backed by an in-memory store and a fixed secret
    pub fn in_memory(config: AppConfig, secret: SigningSecret) -> Self {
        Self::new(
            config,
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(SecretSlot::preloaded(secret)),
        )
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Ready once the signing secret is installed
    pub fn is_ready(&self) -> bool {
        self.secrets.is_provisioned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use predikt_core::{ConfigKey, PasswordParams};
    use uuid::Uuid;

    fn temp_config() -> (AppConfig, PathBuf) {
        let dir = std::env::temp_dir().join(format!("predikt-state-{}", Uuid::new_v4().simple()));
        let mut config = AppConfig::default();
        config.storage.run_config_path = dir.join("run.toml");
        config.storage.default_database_path = dir.join("users.sqlite3");
        config.auth.password = PasswordParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        };
        (config, dir)
    }

    #[tokio::test]
    async fn test_bootstrap_provisions_and_records_locations() {
        let (config, dir) = temp_config();
        let run_config_path = config.storage.run_config_path.clone();

        let state = AppState::bootstrap(config).await.unwrap();
        assert!(state.is_ready());

        let stored = FileConfigStore::new(&run_config_path);
        let secret = stored.get(ConfigKey::TokenSecret).await.unwrap().unwrap();
        assert_eq!(state.secrets.get().unwrap().as_bytes(), secret.as_bytes());
        assert!(stored
            .get(ConfigKey::DatabaseLocation)
            .await
            .unwrap()
            .is_some());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_restart_reuses_secret() {
        let (config, dir) = temp_config();

        let first = AppState::bootstrap(config.clone()).await.unwrap();
        let first_secret = first.secrets.get().unwrap().as_bytes().to_vec();
        let registration = first
            .auth
            .register_user(&serde_json::json!({
                "firstname": "Ada",
                "lastname": "Lovelace",
                "email": "ada@x.com",
                "password": "s3cret"
            }))
            .await
            .unwrap();
        drop(first);

        let second = AppState::bootstrap(config).await.unwrap();
        assert_eq!(second.secrets.get().unwrap().as_bytes(), &first_secret[..]);
        // Tokens from before the restart still validate
        assert!(second
            .auth
            .authenticate_request(&registration.token)
            .is_ok());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_invalid_config_aborts() {
        let (mut config, _) = temp_config();
        config.auth.token_ttl_secs = 0;

        let result = AppState::bootstrap(config).await;
        assert!(matches!(result, Err(StartupError::Config(_))));
    }

    #[test]
    fn test_in_memory_state_is_ready() {
        let state = AppState::in_memory(
            AppConfig::default(),
            SigningSecret::new(b"in-memory-state-secret-0123456789".to_vec()),
        );
        assert!(state.is_ready());
        assert_eq!(state.uptime_secs(), 0);
    }
}
