//! Signing secret provisioning
//!
//! The token signing secret is the only process-wide mutable state in the
//! auth core. It lives in a [`SecretSlot`] that is created explicitly and
//! shared by `Arc` with the [`TokenService`](super::jwt::TokenService).
//! The slot is written once by [`SecretProvisioner::provision`] at startup
//! and only read afterwards.

use crate::audit::{audit_log, AuditEvent, SecretSource};
use base64::Engine;
use predikt_core::{ConfigKey, ConfigStore, StoreError};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

/// Stored secrets shorter than this are replaced
pub const MIN_STORED_SECRET_CHARS: usize = 32;

/// HMAC key material for token signatures
pub struct SigningSecret(Zeroizing<Vec<u8>>);

impl SigningSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

/// Write-once holder for the signing secret
///
/// Reads are lock free. Concurrent initialisers are serialised by the
/// underlying `OnceCell`, so only one secret is ever installed.
#[derive(Debug, Default)]
pub struct SecretSlot {
    cell: OnceCell<SigningSecret>,
}

impl SecretSlot {
    /// An empty slot, to be filled by a [`SecretProvisioner`]
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot that already holds `secret`
    pub fn preloaded(secret: SigningSecret) -> Self {
        Self {
            cell: OnceCell::new_with(Some(secret)),
        }
    }

    pub fn get(&self) -> Option<&SigningSecret> {
        self.cell.get()
    }

    pub fn is_provisioned(&self) -> bool {
        self.cell.initialized()
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to persist generated signing secret: {0}")]
    Persist(#[source] StoreError),
}

/// Loads or creates the signing secret and installs it in a [`SecretSlot`]
pub struct SecretProvisioner {
    store: Arc<dyn ConfigStore>,
    slot: Arc<SecretSlot>,
    secret_len: usize,
}

impl SecretProvisioner {
    /// `secret_len` is the number of random bytes drawn when a secret has
    /// to be generated.
    pub fn new(store: Arc<dyn ConfigStore>, slot: Arc<SecretSlot>, secret_len: usize) -> Self {
        Self {
            store,
            slot,
            secret_len,
        }
    }

    pub fn slot(&self) -> &Arc<SecretSlot> {
        &self.slot
    }

    /// Make a signing secret available
    ///
    /// Returns `true` once a secret is in memory, whether it was read from
    /// configuration storage or generated and written back. Returns `false`
    /// only when no usable secret could be read and a generated one could
    /// not be persisted. Calls after a successful one are no-ops.
    pub async fn provision(&self) -> bool {
        match self
            .slot
            .cell
            .get_or_try_init(|| self.load_or_generate())
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "Signing secret could not be provisioned");
                false
            }
        }
    }

    async fn load_or_generate(&self) -> Result<SigningSecret, ProvisionError> {
        match self.store.get(ConfigKey::TokenSecret).await {
            Ok(Some(stored)) => {
                let stored = Zeroizing::new(stored);
                if stored.len() >= MIN_STORED_SECRET_CHARS {
                    audit_log(&AuditEvent::SecretProvisioned {
                        source: SecretSource::Stored,
                    });
                    return Ok(SigningSecret::new(stored.as_bytes()));
                }
                tracing::warn!("Stored signing secret is too short, generating a new one");
            }
            Ok(None) => tracing::debug!("No signing secret stored, generating one"),
            Err(e) => {
                tracing::warn!(error = %e, "Signing secret could not be read, generating one")
            }
        }

        let encoded = generate_secret(self.secret_len);
        self.store
            .set(ConfigKey::TokenSecret, &encoded)
            .await
            .map_err(ProvisionError::Persist)?;

        audit_log(&AuditEvent::SecretProvisioned {
            source: SecretSource::Generated,
        });
        Ok(SigningSecret::new(encoded.as_bytes()))
    }
}

/// Draw `len` bytes from the OS RNG, encoded as unpadded URL-safe base64
fn generate_secret(len: usize) -> Zeroizing<String> {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut bytes);
    Zeroizing::new(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&*bytes))
}
