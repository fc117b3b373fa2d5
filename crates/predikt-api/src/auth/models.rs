//! Data structures for identities and credentials
//!
//! Untrusted payloads are only turned into these types after every required
//! field has been checked. Plaintext passwords are held in zeroizing buffers
//! and never serialized.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;
use zeroize::Zeroizing;

/// Rejection of malformed untrusted input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("Request body must contain a `{0}` object")]
    MissingEnvelope(&'static str),

    #[error("Field `{0}` must be a non-empty string")]
    InvalidField(&'static str),

    #[error("Identity has no password to hash")]
    PasswordAlreadyConsumed,
}

/// Read `field` from `object` as a non-empty string
fn required_string(
    object: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<String, ValidationError> {
    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(ValidationError::InvalidField(field)),
    }
}

/// Unwrap the `{"user": {...}}` envelope registration and login bodies use
pub fn user_envelope(body: &Value) -> Result<&Value, ValidationError> {
    body.as_object()
        .ok_or(ValidationError::NotAnObject)?
        .get("user")
        .ok_or(ValidationError::MissingEnvelope("user"))
}

/// A validated user, before and after it is stored
///
/// Built from untrusted input with [`IdentityRecord::from_untrusted`]. The
/// plaintext password is moved out for hashing by registration, after which
/// the record only holds the digest.
pub struct IdentityRecord {
    id: Option<String>,
    pub firstname: String,
    pub lastname: String,
    email: String,
    password: Option<Zeroizing<String>>,
    password_hash: Option<String>,
}

impl IdentityRecord {
    /// Validate an arbitrary JSON payload
    ///
    /// Succeeds only if `firstname`, `lastname`, `email` and `password` are
    /// all non-empty strings. The email is lowercased, everything else is
    /// copied verbatim.
    pub fn from_untrusted(raw: &Value) -> Result<Self, ValidationError> {
        let object = raw.as_object().ok_or(ValidationError::NotAnObject)?;

        let firstname = required_string(object, "firstname")?;
        let lastname = required_string(object, "lastname")?;
        let email = required_string(object, "email")?;
        let password = Zeroizing::new(required_string(object, "password")?);

        Ok(Self {
            id: None,
            firstname,
            lastname,
            email: email.to_lowercase(),
            password: Some(password),
            password_hash: None,
        })
    }

    /// Identity id, set once the record has been stored
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    pub fn has_plaintext(&self) -> bool {
        self.password.is_some()
    }

    /// Move the plaintext out of the record, leaving nothing behind
    pub(crate) fn take_password(&mut self) -> Option<Zeroizing<String>> {
        self.password.take()
    }

    pub(crate) fn mark_stored(&mut self, id: String, password_hash: String) {
        self.id = Some(id);
        self.password_hash = Some(password_hash);
    }
}

impl std::fmt::Debug for IdentityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRecord")
            .field("id", &self.id)
            .field("firstname", &self.firstname)
            .field("lastname", &self.lastname)
            .field("email", &self.email)
            .field("has_plaintext", &self.password.is_some())
            .field("has_hash", &self.password_hash.is_some())
            .finish()
    }
}

/// Email and plaintext password for a single verification
pub struct Credential {
    email: String,
    password: Zeroizing<String>,
}

impl Credential {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Validate an untrusted login payload
    pub fn from_untrusted(raw: &Value) -> Result<Self, ValidationError> {
        let object = raw.as_object().ok_or(ValidationError::NotAnObject)?;
        let email = required_string(object, "email")?;
        let password = required_string(object, "password")?;
        Ok(Self::new(email, password))
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub(crate) fn into_parts(self) -> (String, Zeroizing<String>) {
        (self.email, self.password)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Public fields of an authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PublicIdentity {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
}
