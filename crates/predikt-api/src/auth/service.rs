//! Authentication service layer
//!
//! Provides the business logic behind registration, login and request
//! authentication. Suspends only at the credential store and on the
//! password hashing pool.

use super::jwt::{Claims, IdentityClaims, TokenError, TokenRejection, TokenService};
use super::models::{Credential, IdentityRecord, PublicIdentity, ValidationError};
use super::password::{PasswordError, PasswordHasher};
use predikt_core::{CredentialStore, PublicProfile, StoreError, StoredCredential};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use utoipa::ToSchema;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Failures of the authentication service
///
/// A wrong password is not an error: it is reported as `Ok(None)`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Persistence fault: {0}")]
    PersistenceFault(#[from] StoreError),

    #[error("Hashing fault: {0}")]
    HashingFault(#[from] PasswordError),

    #[error("Configuration fault: {0}")]
    ConfigurationFault(String),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        AuthError::ConfigurationFault(err.to_string())
    }
}

/// Result of a successful registration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Registration {
    pub id: String,
    pub token: String,
    /// Token expiry (Unix epoch seconds)
    pub expires_at: u64,
}

/// Result of a successful login
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub token: String,
    /// Token expiry (Unix epoch seconds)
    pub expires_at: u64,
    pub user: PublicIdentity,
}

/// Authentication service
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    tokens: TokenService,
    /// Verified against when an email is unknown, so both failure paths
    /// cost one Argon2 verification
    decoy_hash: OnceCell<String>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: PasswordHasher,
        tokens: TokenService,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            decoy_hash: OnceCell::new(),
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Compute the decoy digest ahead of the first login
    pub async fn warm_up(&self) -> Result<(), AuthError> {
        self.decoy_hash().await.map(|_| ())
    }

    async fn decoy_hash(&self) -> Result<String, AuthError> {
        let hash = self
            .decoy_hash
            .get_or_try_init(|| async {
                self.hasher
                    .hash_offloaded(Zeroizing::new(Uuid::new_v4().to_string()))
                    .await
            })
            .await?;
        Ok(hash.clone())
    }

    /// Store a validated identity
    ///
    /// The plaintext password is moved out of `record` before hashing, so it
    /// is gone whether or not the insert succeeds. On success the record
    /// carries the new id and digest.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The new identity id
    /// * `Err(AuthError::PersistenceFault)` - The store rejected the insert,
    ///   including `StoreError::Conflict` for an already registered email
    pub async fn register(&self, record: &mut IdentityRecord) -> Result<String, AuthError> {
        let password = record
            .take_password()
            .ok_or(ValidationError::PasswordAlreadyConsumed)?;
        let password_hash = self.hasher.hash_offloaded(password).await?;

        let id = Uuid::new_v4().to_string();
        self.store
            .insert(StoredCredential {
                id: id.clone(),
                firstname: record.firstname.clone(),
                lastname: record.lastname.clone(),
                email: record.email().to_lowercase(),
                password_hash: password_hash.clone(),
            })
            .await?;

        record.mark_stored(id.clone(), password_hash);
        tracing::debug!(user_id = %id, "Identity stored");
        Ok(id)
    }

    /// Check an email/password pair
    ///
    /// # Returns
    ///
    /// * `Ok(Some(PublicIdentity))` - Credentials match
    /// * `Ok(None)` - Unknown email or wrong password, deliberately
    ///   indistinguishable
    /// * `Err(AuthError)` - Store or digest failure
    pub async fn authenticate(
        &self,
        credential: Credential,
    ) -> Result<Option<PublicIdentity>, AuthError> {
        let (email, password) = credential.into_parts();
        let email = email.to_lowercase();

        let Some(stored) = self.store.find_by_email(&email).await? else {
            let decoy = self.decoy_hash().await?;
            self.hasher.verify_offloaded(password, decoy).await?;
            return Ok(None);
        };

        let matched = self
            .hasher
            .verify_offloaded(password, stored.password_hash)
            .await?;

        if !matched {
            return Ok(None);
        }

        Ok(Some(PublicIdentity {
            id: stored.id,
            firstname: stored.firstname,
            lastname: stored.lastname,
        }))
    }

    /// Register from an untrusted payload and issue a first token
    ///
    /// Input is validated, and the signing secret checked, before anything
    /// is written.
    pub async fn register_user(&self, raw: &Value) -> Result<Registration, AuthError> {
        let mut record = IdentityRecord::from_untrusted(raw)?;
        self.ensure_signing_ready()?;

        let id = self.register(&mut record).await?;
        let issued = self.tokens.issue(&IdentityClaims {
            subject: id.clone(),
            firstname: record.firstname.clone(),
            lastname: record.lastname.clone(),
        })?;

        Ok(Registration {
            id,
            token: issued.value,
            expires_at: issued.expires_at,
        })
    }

    /// Verify credentials and issue a token
    ///
    /// `Ok(None)` means the credentials did not match.
    pub async fn login(&self, credential: Credential) -> Result<Option<Session>, AuthError> {
        self.ensure_signing_ready()?;

        let Some(user) = self.authenticate(credential).await? else {
            return Ok(None);
        };

        let issued = self.tokens.issue(&IdentityClaims {
            subject: user.id.clone(),
            firstname: user.firstname.clone(),
            lastname: user.lastname.clone(),
        })?;

        Ok(Some(Session {
            token: issued.value,
            expires_at: issued.expires_at,
            user,
        }))
    }

    /// Validate a token presented with a request
    pub fn authenticate_request(&self, token: &str) -> Result<Claims, TokenRejection> {
        self.tokens.validate(token)
    }

    /// Public profile of an identity
    pub async fn profile(&self, id: &str) -> Result<Option<PublicProfile>, AuthError> {
        Ok(self.store.find_public_fields_by_id(id).await?)
    }

    fn ensure_signing_ready(&self) -> Result<(), AuthError> {
        if self.tokens.is_ready() {
            Ok(())
        } else {
            Err(TokenError::ConfigurationFault.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::jwt::TokenConfig;
    use super::super::repository::MemoryCredentialStore;
    use super::super::secret::{SecretSlot, SigningSecret};
    use super::*;
    use async_trait::async_trait;
    use predikt_core::PasswordParams;
    use serde_json::json;

    const LIGHT: PasswordParams = PasswordParams {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
    };

    fn service_with(store: Arc<dyn CredentialStore>, slot: SecretSlot) -> AuthService {
        AuthService::new(
            store,
            PasswordHasher::new(LIGHT),
            TokenService::new(TokenConfig::default(), Arc::new(slot)),
        )
    }

    fn service() -> (AuthService, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let slot = SecretSlot::preloaded(SigningSecret::new(
            b"unit-test-signing-secret-0123456789".to_vec(),
        ));
        (service_with(store.clone(), slot), store)
    }

    fn ada() -> Value {
        json!({
            "firstname": "Ada",
            "lastname": "Lovelace",
            "email": "Ada@X.com",
            "password": "s3cret"
        })
    }

    /// Store whose every call fails
    struct DownStore;

    #[async_trait]
    impl CredentialStore for DownStore {
        async fn insert(&self, _: StoredCredential) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn find_by_email(&self, _: &str) -> Result<Option<StoredCredential>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn find_public_fields_by_id(
            &self,
            _: &str,
        ) -> Result<Option<PublicProfile>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_register_then_authenticate() {
        let (service, store) = service();
        let mut record = IdentityRecord::from_untrusted(&ada()).unwrap();

        let id = service.register(&mut record).await.unwrap();

        assert_eq!(record.id(), Some(id.as_str()));
        assert!(!record.has_plaintext());
        assert!(record.password_hash().unwrap().starts_with("$argon2id$"));
        assert_eq!(store.len().await, 1);

        let stored = store.find_by_email("ada@x.com").await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "s3cret");

        let matched = service
            .authenticate(Credential::new("ada@x.com", "s3cret"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matched.id, id);
        assert_eq!(matched.firstname, "Ada");
        assert_eq!(matched.lastname, "Lovelace");
    }

    #[tokio::test]
    async fn test_unknown_email_and_wrong_password_look_alike() {
        let (service, _) = service();
        service.register_user(&ada()).await.unwrap();

        let unknown = service
            .authenticate(Credential::new("nobody@x.com", "s3cret"))
            .await
            .unwrap();
        let wrong = service
            .authenticate(Credential::new("ada@x.com", "wrong"))
            .await
            .unwrap();

        assert_eq!(unknown, None);
        assert_eq!(wrong, None);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected() {
        let (service, store) = service();
        service.register_user(&ada()).await.unwrap();

        let mut again = ada();
        again["email"] = json!("ADA@x.com");
        again["password"] = json!("different");
        let mut record = IdentityRecord::from_untrusted(&again).unwrap();

        let result = service.register(&mut record).await;
        assert!(matches!(
            result,
            Err(AuthError::PersistenceFault(StoreError::Conflict))
        ));
        // Plaintext is cleared even though the insert failed
        assert!(!record.has_plaintext());
        assert_eq!(record.id(), None);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_requires_plaintext() {
        let (service, _) = service();
        let mut record = IdentityRecord::from_untrusted(&ada()).unwrap();
        service.register(&mut record).await.unwrap();

        let result = service.register(&mut record).await;
        assert!(matches!(
            result,
            Err(AuthError::Validation(ValidationError::PasswordAlreadyConsumed))
        ));
    }

    #[tokio::test]
    async fn test_invalid_payload_writes_nothing() {
        let (service, store) = service();

        let result = service
            .register_user(&json!({"firstname": "Ada", "email": "ada@x.com"}))
            .await;

        assert!(matches!(result, Err(AuthError::Validation(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupt_digest_is_hashing_fault() {
        let (service, store) = service();
        store
            .insert(StoredCredential {
                id: "legacy".to_string(),
                firstname: "Old".to_string(),
                lastname: "Record".to_string(),
                email: "old@x.com".to_string(),
                password_hash: "5f4dcc3b5aa765d61d8327deb882cf99".to_string(),
            })
            .await
            .unwrap();

        let result = service
            .authenticate(Credential::new("old@x.com", "password"))
            .await;
        assert!(matches!(result, Err(AuthError::HashingFault(_))));
    }

    #[tokio::test]
    async fn test_store_failures_propagate() {
        let slot = SecretSlot::preloaded(SigningSecret::new(b"k".repeat(40)));
        let service = service_with(Arc::new(DownStore), slot);

        let login = service
            .authenticate(Credential::new("ada@x.com", "s3cret"))
            .await;
        assert!(matches!(
            login,
            Err(AuthError::PersistenceFault(StoreError::Unavailable(_)))
        ));

        let register = service.register_user(&ada()).await;
        assert!(matches!(register, Err(AuthError::PersistenceFault(_))));
    }

    #[tokio::test]
    async fn test_unprovisioned_secret_blocks_before_writes() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = service_with(store.clone(), SecretSlot::new());

        let result = service.register_user(&ada()).await;
        assert!(matches!(result, Err(AuthError::ConfigurationFault(_))));
        assert!(store.is_empty().await);

        let login = service.login(Credential::new("ada@x.com", "s3cret")).await;
        assert!(matches!(login, Err(AuthError::ConfigurationFault(_))));
    }

    #[tokio::test]
    async fn test_profile_lookup() {
        let (service, _) = service();
        let registration = service.register_user(&ada()).await.unwrap();

        let profile = service.profile(&registration.id).await.unwrap().unwrap();
        assert_eq!(profile.email, "ada@x.com");
        assert_eq!(profile.firstname, "Ada");

        assert!(service.profile("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_ada() {
        let (service, _) = service();

        let registration = service.register_user(&ada()).await.unwrap();
        assert!(!registration.id.is_empty());
        let claims = service.authenticate_request(&registration.token).unwrap();
        assert_eq!(claims.sub, registration.id);

        // Email match is case-insensitive
        let session = service
            .login(Credential::new("ada@x.com", "s3cret"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.user.id, registration.id);

        let wrong = service
            .login(Credential::new("ada@x.com", "wrong"))
            .await
            .unwrap();
        assert!(wrong.is_none());

        // Flip one character of the signature
        let (head, signature) = session.token.rsplit_once('.').unwrap();
        let flipped = if signature.starts_with('A') { "B" } else { "A" };
        let tampered = format!("{head}.{flipped}{}", &signature[1..]);
        assert_eq!(
            service.authenticate_request(&tampered).unwrap_err(),
            TokenRejection::Forged
        );

        // Once the TTL has elapsed
        let after_ttl = session.expires_at + 1;
        assert_eq!(
            service
                .tokens()
                .validate_at(&session.token, after_ttl)
                .unwrap_err(),
            TokenRejection::Expired
        );
    }

    #[tokio::test]
    async fn test_warm_up_caches_decoy() {
        let (service, _) = service();
        service.warm_up().await.unwrap();

        let first = service.decoy_hash().await.unwrap();
        let second = service.decoy_hash().await.unwrap();
        assert_eq!(first, second);
    }
}
