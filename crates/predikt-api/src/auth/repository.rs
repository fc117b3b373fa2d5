//! Credential store implementations
//!
//! This module provides the storage side of identity records:
//! - SQLite via sqlx for the running service
//! - An in-memory map for tests and ephemeral runs
//!
//! Both reject a second record with an already registered email.

use async_trait::async_trait;
use predikt_core::{CredentialStore, PublicProfile, StoreError, StoredCredential};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::RwLock;

const CREATE_USERS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id          TEXT PRIMARY KEY,
        firstname   TEXT NOT NULL,
        lastname    TEXT NOT NULL,
        email       TEXT NOT NULL UNIQUE,
        password    TEXT NOT NULL
    )
"#;

/// Credential row from database
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    firstname: String,
    lastname: String,
    email: String,
    password: String,
}

impl From<UserRow> for StoredCredential {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            firstname: row.firstname,
            lastname: row.lastname,
            email: row.email,
            password_hash: row.password,
        }
    }
}

/// Public profile row from database
#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    email: String,
    firstname: String,
    lastname: String,
}

fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        other @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => {
            StoreError::Corrupt(other.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}

/// SQLite credential store
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    /// Open (creating if needed) the database file at `path`
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        tracing::info!(path = %path.display(), "Credential database opened");
        Ok(Self { pool })
    }

    /// A private in-memory database, gone when the store is dropped
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(map_sqlx_error)?;

        // Every connection to :memory: is a separate database, keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the users table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_USERS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn insert(&self, credential: StoredCredential) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, firstname, lastname, email, password) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&credential.id)
        .bind(&credential.firstname)
        .bind(&credential.lastname)
        .bind(&credential.email)
        .bind(&credential.password_hash)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, firstname, lastname, email, password FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(StoredCredential::from))
    }

    async fn find_public_fields_by_id(
        &self,
        id: &str,
    ) -> Result<Option<PublicProfile>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT email, firstname, lastname FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| PublicProfile {
            email: row.email,
            firstname: row.firstname,
            lastname: row.lastname,
        }))
    }
}

/// In-memory credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<MemoryTables>,
}

#[derive(Default)]
struct MemoryTables {
    by_id: HashMap<String, StoredCredential>,
    /// email -> id
    by_email: HashMap<String, String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn insert(&self, credential: StoredCredential) -> Result<(), StoreError> {
        let mut tables = self.inner.write().await;

        if tables.by_id.contains_key(&credential.id)
            || tables.by_email.contains_key(&credential.email)
        {
            return Err(StoreError::Conflict);
        }

        tables
            .by_email
            .insert(credential.email.clone(), credential.id.clone());
        tables.by_id.insert(credential.id.clone(), credential);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables
            .by_email
            .get(email)
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn find_public_fields_by_id(
        &self,
        id: &str,
    ) -> Result<Option<PublicProfile>, StoreError> {
        Ok(self.inner.read().await.by_id.get(id).map(|c| PublicProfile {
            email: c.email.clone(),
            firstname: c.firstname.clone(),
            lastname: c.lastname.clone(),
        }))
    }
}
