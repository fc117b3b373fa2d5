//! Authentication module
//!
//! - Password hashing with Argon2
//! - Signing secret provisioning
//! - Token issuance and validation
//! - Identity records and their validation
//! - Credential stores (SQLite and in-memory)
//! - Request gate middleware

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod secret;
pub mod service;

pub use jwt::{
    Claims, IdentityClaims, IssuedToken, TokenConfig, TokenError, TokenRejection, TokenService,
};
pub use middleware::{require_token, AuthenticatedUser, GateError};
pub use models::{user_envelope, Credential, IdentityRecord, PublicIdentity, ValidationError};
pub use password::{PasswordError, PasswordHasher};
pub use repository::{MemoryCredentialStore, SqliteCredentialStore};
pub use secret::{ProvisionError, SecretProvisioner, SecretSlot, SigningSecret};
pub use service::{AuthError, AuthService, Registration, Session};
