//! Storage contracts
//!
//! The auth core talks to persistence only through the two traits in this
//! module. Implementations live next to their storage engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage errors shared by configuration and credential stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write collides with an existing record (duplicate email or id)
    #[error("Record already exists")]
    Conflict,

    /// The backing store could not be reached or refused the operation
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The store returned data that cannot be interpreted
    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
}

/// Named values kept in configuration storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Application-wide token signing secret
    TokenSecret,
    /// Location of the credential database
    DatabaseLocation,
}

impl ConfigKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenSecret => "token_secret",
            Self::DatabaseLocation => "database_location",
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent key/value configuration storage
///
/// Reads report `None` when a value was never written. A concurrent write
/// must never expose a half-written value to readers.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a named value
    async fn get(&self, key: ConfigKey) -> Result<Option<String>, StoreError>;

    /// Write a named value, replacing any previous one
    async fn set(&self, key: ConfigKey, value: &str) -> Result<(), StoreError>;
}

/// A credential row as persisted
///
/// `email` is always stored lowercased. `password_hash` is an opaque digest
/// string and never the plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub password_hash: String,
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("id", &self.id)
            .field("firstname", &self.firstname)
            .field("lastname", &self.lastname)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

/// Public profile fields returned by id lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicProfile {
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

/// Persistence for identity records
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new credential
    ///
    /// Returns `StoreError::Conflict` when the id or email is already taken.
    async fn insert(&self, credential: StoredCredential) -> Result<(), StoreError>;

    /// Look up a credential by its (lowercased) email
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, StoreError>;

    /// Fetch the public profile for an id
    async fn find_public_fields_by_id(
        &self,
        id: &str,
    ) -> Result<Option<PublicProfile>, StoreError>;
}
