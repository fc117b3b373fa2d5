/// Password hashing and verification using Argon2id
///
/// Digests are PHC strings (`$argon2id$v=19$m=..,t=..,p=..$salt$hash`), so
/// the algorithm, cost parameters and the per-call random salt travel with
/// the digest and verification needs nothing else.
///
/// Hashing is deliberately slow. Request paths use the `*_offloaded`
/// variants, which run on the tokio blocking pool.
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Argon2, Params,
};
use predikt_core::PasswordParams;
use thiserror::Error;
use zeroize::Zeroizing;

/// Output length of the Argon2 digest in bytes
const OUTPUT_LEN: usize = 32;

/// Password hashing and verification errors
///
/// None of the variants carry the plaintext.
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,

    #[error("Password worker failed: {0}")]
    WorkerFailed(String),
}

/// Argon2id hasher configured with fixed cost parameters
#[derive(Debug, Clone, Default)]
pub struct PasswordHasher {
    params: PasswordParams,
}

impl PasswordHasher {
    pub fn new(params: PasswordParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> PasswordParams {
        self.params
    }

    fn argon2(&self) -> Result<Argon2<'static>, PasswordError> {
        let params = Params::new(
            self.params.memory_cost,
            self.params.time_cost,
            self.params.parallelism,
            Some(OUTPUT_LEN),
        )
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }

    /// Hash a plaintext password
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - PHC string format hash, safe to store
    /// * `Err(PasswordError)` - Empty input or invalid cost parameters
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        if password.is_empty() {
            return Err(PasswordError::EmptyPassword);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

        Ok(password_hash.to_string())
    }

    /// Verify a plaintext password against a stored hash
    ///
    /// Uses the parameters embedded in `hash`, not the hasher's own, so
    /// digests produced under older cost settings still verify. The digest
    /// comparison inside `argon2` is constant time.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Password matches
    /// * `Ok(false)` - Password does not match
    /// * `Err(PasswordError)` - The stored hash is corrupt or unsupported
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
        }
    }

    /// [`hash`](Self::hash) on the blocking pool
    ///
    /// Takes ownership of the plaintext; it is wiped when the worker drops it.
    pub async fn hash_offloaded(
        &self,
        password: Zeroizing<String>,
    ) -> Result<String, PasswordError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| PasswordError::WorkerFailed(e.to_string()))?
    }

    /// [`verify`](Self::verify) on the blocking pool
    pub async fn verify_offloaded(
        &self,
        password: Zeroizing<String>,
        hash: String,
    ) -> Result<bool, PasswordError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| PasswordError::WorkerFailed(e.to_string()))?
    }
}
