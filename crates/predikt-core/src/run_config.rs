//! Run configuration storage
//!
//! Holds the values the service persists for itself between restarts:
//! the token signing secret and the location of the credential database.

use crate::store::{ConfigKey, ConfigStore, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// On-disk layout of the run configuration file
#[derive(Debug, Default, Serialize, Deserialize)]
struct RunConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    token_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_location: Option<String>,
}

impl RunConfigFile {
    fn slot(&mut self, key: ConfigKey) -> &mut Option<String> {
        match key {
            ConfigKey::TokenSecret => &mut self.token_secret,
            ConfigKey::DatabaseLocation => &mut self.database_location,
        }
    }
}

/// TOML file backed configuration storage
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// reader sees either the old file or the new one.
pub struct FileConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<RunConfigFile, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                StoreError::Corrupt(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RunConfigFile::default()),
            Err(e) => Err(StoreError::Unavailable(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write_file(&self, file: &RunConfigFile) -> Result<(), StoreError> {
        let content =
            toml::to_string(file).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", tmp.display())))?;

        // The file carries the signing secret
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", tmp.display())))?;
        }

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Unavailable(format!(
                "{}: {e}",
                self.path.display()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get(&self, key: ConfigKey) -> Result<Option<String>, StoreError> {
        let mut file = self.read_file().await?;
        Ok(file.slot(key).take())
    }

    async fn set(&self, key: ConfigKey, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        *file.slot(key) = Some(value.to_string());
        self.write_file(&file).await?;
        tracing::debug!(key = %key, path = %self.path.display(), "Run configuration updated");
        Ok(())
    }
}

/// In-memory configuration storage for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryConfigStore {
    values: RwLock<HashMap<ConfigKey, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds one value
    pub fn with_value(key: ConfigKey, value: impl Into<String>) -> Self {
        let mut values = HashMap::new();
        values.insert(key, value.into());
        Self {
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: ConfigKey) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().await.get(&key).cloned())
    }

    async fn set(&self, key: ConfigKey, value: &str) -> Result<(), StoreError> {
        self.values.write().await.insert(key, value.to_string());
        Ok(())
    }
}

/// Resolve where the credential database lives
///
/// Uses the location recorded in configuration storage. When none is
/// recorded yet, `default` is persisted and returned so later runs agree.
pub async fn locate_database(
    store: &dyn ConfigStore,
    default: &Path,
) -> Result<PathBuf, StoreError> {
    if let Some(location) = store.get(ConfigKey::DatabaseLocation).await? {
        if !location.trim().is_empty() {
            tracing::debug!(location = %location, "Using recorded database location");
            return Ok(PathBuf::from(location));
        }
    }

    let location = default.to_string_lossy();
    store.set(ConfigKey::DatabaseLocation, &location).await?;
    tracing::info!(location = %location, "Recorded default database location");

    Ok(default.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("predikt-test-{}", Uuid::new_v4().simple()))
            .join("run.toml")
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_absent() {
        let store = FileConfigStore::new(temp_path());
        assert_eq!(store.get(ConfigKey::TokenSecret).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_keeps_other_keys() {
        let path = temp_path();
        let store = FileConfigStore::new(&path);

        store.set(ConfigKey::TokenSecret, "s1").await.unwrap();
        store
            .set(ConfigKey::DatabaseLocation, "/var/lib/predikt.db")
            .await
            .unwrap();

        // A fresh handle reads what the first one wrote
        let reopened = FileConfigStore::new(&path);
        assert_eq!(
            reopened.get(ConfigKey::TokenSecret).await.unwrap().as_deref(),
            Some("s1")
        );
        assert_eq!(
            reopened
                .get(ConfigKey::DatabaseLocation)
                .await
                .unwrap()
                .as_deref(),
            Some("/var/lib/predikt.db")
        );

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "token_secret = [not toml").unwrap();

        let store = FileConfigStore::new(&path);
        let result = store.get(ConfigKey::TokenSecret).await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_memory_store_with_value() {
        let store = MemoryConfigStore::with_value(ConfigKey::TokenSecret, "abc");
        let value = tokio_test::block_on(store.get(ConfigKey::TokenSecret)).unwrap();
        assert_eq!(value.as_deref(), Some("abc"));
        let missing = tokio_test::block_on(store.get(ConfigKey::DatabaseLocation)).unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_locate_database_persists_default() {
        let store = MemoryConfigStore::new();
        let default = Path::new("data/predikt.sqlite3");

        let located = locate_database(&store, default).await.unwrap();
        assert_eq!(located, default);
        assert_eq!(
            store
                .get(ConfigKey::DatabaseLocation)
                .await
                .unwrap()
                .as_deref(),
            Some("data/predikt.sqlite3")
        );
    }

    #[tokio::test]
    async fn test_locate_database_prefers_recorded_location() {
        let store = MemoryConfigStore::with_value(ConfigKey::DatabaseLocation, "/srv/users.db");

        let located = locate_database(&store, Path::new("data/predikt.sqlite3"))
            .await
            .unwrap();
        assert_eq!(located, PathBuf::from("/srv/users.db"));
    }
}
