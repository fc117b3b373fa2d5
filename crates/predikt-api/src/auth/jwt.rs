//! JWT token generation and validation
//!
//! Implements JWT-based authentication with HMAC-SHA256 signing. The key is
//! the provisioned [`SigningSecret`](super::secret::SigningSecret), read
//! from the shared [`SecretSlot`]. Tokens carry the subject id and public
//! profile fields only, never credential material.

use super::secret::SecretSlot;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use predikt_core::AuthConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Identity a token is issued for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Identity id
    pub subject: String,
    pub firstname: String,
    pub lastname: String,
}

/// JWT Claims structure
///
/// These claims are embedded in the token and returned by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - identity id
    pub sub: String,
    /// JWT ID - unique per issued token
    pub jti: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    pub firstname: String,
    pub lastname: String,
}

impl Claims {
    /// The identity these claims were issued for
    pub fn identity(&self) -> IdentityClaims {
        IdentityClaims {
            subject: self.sub.clone(),
            firstname: self.firstname.clone(),
            lastname: self.lastname.clone(),
        }
    }
}

/// A freshly issued token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Encoded token
    pub value: String,
    /// Expiration timestamp (Unix epoch)
    pub expires_at: u64,
}

/// Token issuance errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Signing secret has not been provisioned")]
    ConfigurationFault,

    #[error("Token lifetime of {ttl_secs}s overflows the expiry timestamp")]
    ExpiryOverflow { ttl_secs: u64 },

    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

/// Reasons a presented token is refused
///
/// Kept distinct so that forgery attempts can be told apart from benign
/// expiry in responses and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenRejection {
    #[error("Token is malformed")]
    Malformed,

    #[error("Token signature is invalid")]
    Forged,

    #[error("Token has expired")]
    Expired,

    /// Only reachable if requests are served before provisioning
    #[error("Signing secret has not been provisioned")]
    Unconfigured,
}

impl TokenRejection {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed => "TOKEN_MALFORMED",
            Self::Forged => "TOKEN_FORGED",
            Self::Expired => "TOKEN_EXPIRED",
            Self::Unconfigured => "SERVICE_UNCONFIGURED",
        }
    }
}

/// Token settings
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Token lifetime in seconds
    pub ttl_secs: u64,
    /// Token issuer identifier
    pub issuer: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for TokenConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            ttl_secs: config.token_ttl_secs,
            issuer: config.issuer.clone(),
        }
    }
}

/// Issues and validates signed, expiring tokens
#[derive(Debug, Clone)]
pub struct TokenService {
    config: TokenConfig,
    secret: Arc<SecretSlot>,
}

impl TokenService {
    pub fn new(config: TokenConfig, secret: Arc<SecretSlot>) -> Self {
        Self { config, secret }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Whether a signing secret is installed
    pub fn is_ready(&self) -> bool {
        self.secret.is_provisioned()
    }

    /// Issue a token for `identity`, valid for the configured TTL
    pub fn issue(&self, identity: &IdentityClaims) -> Result<IssuedToken, TokenError> {
        self.issue_at(identity, unix_now()?)
    }

    /// Issue a token as if the current time were `now`
    pub fn issue_at(&self, identity: &IdentityClaims, now: u64) -> Result<IssuedToken, TokenError> {
        let secret = self.secret.get().ok_or(TokenError::ConfigurationFault)?;
        let exp = now
            .checked_add(self.config.ttl_secs)
            .ok_or(TokenError::ExpiryOverflow {
                ttl_secs: self.config.ttl_secs,
            })?;

        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: identity.subject.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp,
            firstname: identity.firstname.clone(),
            lastname: identity.lastname.clone(),
        };

        let value = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;

        Ok(IssuedToken {
            value,
            expires_at: claims.exp,
        })
    }

    /// Validate a presented token against the current secret and clock
    pub fn validate(&self, token: &str) -> Result<Claims, TokenRejection> {
        // A clock before the epoch is a host misconfiguration
        let now = unix_now().map_err(|_| TokenRejection::Unconfigured)?;
        self.validate_at(token, now)
    }

    /// Validate a presented token as if the current time were `now`
    ///
    /// The signature is checked before the expiry, so a forged token is
    /// reported as forged even when it is also stale.
    pub fn validate_at(&self, token: &str, now: u64) -> Result<Claims, TokenRejection> {
        let secret = self.secret.get().ok_or(TokenRejection::Unconfigured)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        // Expiry is checked below against the caller's clock
        validation.validate_exp = false;
        validation.leeway = 0;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenRejection::Forged,
            _ => TokenRejection::Malformed,
        })?;

        if now > token_data.claims.exp {
            return Err(TokenRejection::Expired);
        }

        Ok(token_data.claims)
    }
}

fn unix_now() -> Result<u64, std::time::SystemTimeError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

#[cfg(test)]
mod tests {
    use super::super::secret::SigningSecret;
    use super::*;

    fn service_with_secret(secret: &str) -> TokenService {
        let slot = SecretSlot::preloaded(SigningSecret::new(secret.as_bytes()));
        TokenService::new(TokenConfig::default(), Arc::new(slot))
    }

    fn service() -> TokenService {
        service_with_secret("test-signing-secret-of-reasonable-length")
    }

    fn ada() -> IdentityClaims {
        IdentityClaims {
            subject: Uuid::new_v4().to_string(),
            firstname: "Ada".to_string(),
            lastname: "Lovelace".to_string(),
        }
    }

    /// Swap one character of the signature segment for a different one
    fn tamper_signature(token: &str) -> String {
        let (head, signature) = token.rsplit_once('.').unwrap();
        let mut chars: Vec<char> = signature.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        format!("{head}.{}", chars.into_iter().collect::<String>())
    }

    #[test]
    fn test_issue_and_validate_token() {
        let service = service();
        let identity = ada();

        let issued = service.issue(&identity).expect("Failed to issue token");
        let claims = service
            .validate(&issued.value)
            .expect("Failed to validate token");

        assert_eq!(claims.identity(), identity);
        assert_eq!(claims.exp, issued.expires_at);
        assert_eq!(claims.exp - claims.iat, 86_400);
        assert_eq!(claims.iss, "predikt");
    }

    #[test]
    fn test_tokens_for_same_subject_differ() {
        let service = service();
        let identity = ada();

        let first = service.issue_at(&identity, 1_000).unwrap();
        let second = service.issue_at(&identity, 1_000).unwrap();
        let later = service.issue_at(&identity, 2_000).unwrap();

        let signature = |token: &IssuedToken| token.value.rsplit_once('.').unwrap().1.to_string();
        assert_ne!(signature(&first), signature(&second));
        assert_ne!(signature(&first), signature(&later));
    }

    #[test]
    fn test_tampered_signature_is_forged() {
        let service = service();
        let issued = service.issue(&ada()).unwrap();

        let result = service.validate(&tamper_signature(&issued.value));
        assert_eq!(result, Err(TokenRejection::Forged));
    }

    #[test]
    fn test_tampered_payload_is_forged() {
        use base64::Engine;

        let service = service();
        let issued = service.issue(&ada()).unwrap();
        let mut parts: Vec<&str> = issued.value.split('.').collect();

        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let mut claims: serde_json::Value =
            serde_json::from_slice(&engine.decode(parts[1]).unwrap()).unwrap();
        claims["sub"] = serde_json::json!("someone-else");
        let forged_payload = engine.encode(serde_json::to_vec(&claims).unwrap());
        parts[1] = &forged_payload;

        let result = service.validate(&parts.join("."));
        assert_eq!(result, Err(TokenRejection::Forged));
    }

    #[test]
    fn test_wrong_secret_is_forged() {
        let issuer = service_with_secret("secret-one-secret-one-secret-one!");
        let verifier = service_with_secret("secret-two-secret-two-secret-two!");

        let issued = issuer.issue(&ada()).unwrap();
        assert_eq!(
            verifier.validate(&issued.value),
            Err(TokenRejection::Forged)
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let service = service();

        for token in ["", "invalid.token.here", "not-a-jwt", "a.b"] {
            assert_eq!(
                service.validate(token),
                Err(TokenRejection::Malformed),
                "token: {token:?}"
            );
        }
    }

    #[test]
    fn test_expired_token() {
        let service = service();
        let issued = service.issue_at(&ada(), 1_000).unwrap();

        // Still valid on the expiry second, rejected after it
        assert!(service.validate_at(&issued.value, issued.expires_at).is_ok());
        assert_eq!(
            service.validate_at(&issued.value, issued.expires_at + 1),
            Err(TokenRejection::Expired)
        );
        assert_eq!(
            service.validate(&issued.value),
            Err(TokenRejection::Expired)
        );
    }

    #[test]
    fn test_forged_and_expired_reports_forged() {
        let service = service();
        let issued = service.issue_at(&ada(), 1_000).unwrap();

        let result = service.validate(&tamper_signature(&issued.value));
        assert_eq!(result, Err(TokenRejection::Forged));
    }

    #[test]
    fn test_foreign_issuer_is_malformed() {
        let slot = Arc::new(SecretSlot::preloaded(SigningSecret::new(
            b"shared-secret-shared-secret-shared".to_vec(),
        )));
        let other = TokenService::new(
            TokenConfig {
                issuer: "someone-else".to_string(),
                ..Default::default()
            },
            slot.clone(),
        );
        let ours = TokenService::new(TokenConfig::default(), slot);

        let issued = other.issue(&ada()).unwrap();
        assert_eq!(ours.validate(&issued.value), Err(TokenRejection::Malformed));
    }

    #[test]
    fn test_unprovisioned_secret() {
        let service = TokenService::new(TokenConfig::default(), Arc::new(SecretSlot::new()));

        assert!(matches!(
            service.issue(&ada()),
            Err(TokenError::ConfigurationFault)
        ));
        assert_eq!(
            service.validate("a.b.c"),
            Err(TokenRejection::Unconfigured)
        );
    }

    #[test]
    fn test_oversized_ttl_is_an_error() {
        let slot = SecretSlot::preloaded(SigningSecret::new(
            b"test-signing-secret-of-reasonable-length".to_vec(),
        ));
        let service = TokenService::new(
            TokenConfig {
                ttl_secs: u64::MAX,
                ..Default::default()
            },
            Arc::new(slot),
        );

        assert!(matches!(
            service.issue(&ada()),
            Err(TokenError::ExpiryOverflow { ttl_secs: u64::MAX })
        ));
    }

    #[test]
    fn test_default_config_follows_auth_defaults() {
        let defaults = AuthConfig::default();
        let config = TokenConfig::default();
        assert_eq!(config.ttl_secs, defaults.token_ttl_secs);
        assert_eq!(config.issuer, defaults.issuer);
    }

    #[test]
    fn test_claims_do_not_leak_credentials() {
        let service = service();
        let issued = service.issue(&ada()).unwrap();
        let claims = service.validate(&issued.value).unwrap();

        let json = serde_json::to_value(&claims).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert!(!keys.iter().any(|k| k.contains("password") || k.contains("hash")));
    }
}
