/// Request gate for protected routes
///
/// Reads the token from `Authorization: Bearer <token>` or, failing that,
/// the `x-access-token` header, and validates it with the shared
/// [`AuthService`]. On success the decoded identity is added to request
/// extensions as [`AuthenticatedUser`].
use super::jwt::{Claims, TokenRejection};
use super::service::AuthService;
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Alternative header carrying a bare token
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Authenticated identity extracted from a token
///
/// Handlers read it with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub firstname: String,
    pub lastname: String,
    /// Token expiry (Unix epoch seconds)
    pub expires_at: u64,
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            firstname: claims.firstname,
            lastname: claims.lastname,
            expires_at: claims.exp,
        }
    }
}

/// Gate rejections
#[derive(Debug, Error)]
pub enum GateError {
    #[error("No access token presented")]
    MissingToken,

    #[error("Invalid Authorization header format")]
    InvalidHeader,

    #[error(transparent)]
    Rejected(#[from] TokenRejection),
}

impl GateError {
    pub fn code(&self) -> &'static str {
        match self {
            GateError::MissingToken => "MISSING_TOKEN",
            GateError::InvalidHeader => "TOKEN_MALFORMED",
            GateError::Rejected(rejection) => rejection.code(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GateError::Rejected(TokenRejection::Unconfigured) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });

        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Pull the raw token out of the request headers
fn presented_token(headers: &HeaderMap) -> Result<&str, GateError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| GateError::InvalidHeader)?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or(GateError::InvalidHeader)?
            .trim();
        if token.is_empty() {
            return Err(GateError::MissingToken);
        }
        return Ok(token);
    }

    match headers.get(ACCESS_TOKEN_HEADER) {
        Some(value) => {
            let token = value.to_str().map_err(|_| GateError::InvalidHeader)?.trim();
            if token.is_empty() {
                Err(GateError::MissingToken)
            } else {
                Ok(token)
            }
        }
        None => Err(GateError::MissingToken),
    }
}

/// Middleware that requires a valid token
///
/// # Usage
///
/// ```ignore
/// use axum::{middleware, routing::get, Router};
/// use predikt_api::auth::middleware::require_token;
///
/// let app = Router::new()
///     .route("/user/info", get(user_info))
///     .route_layer(middleware::from_fn_with_state(auth.clone(), require_token));
/// ```
pub async fn require_token(
    State(auth): State<Arc<AuthService>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, GateError> {
    let outcome = presented_token(request.headers())
        .and_then(|token| auth.authenticate_request(token).map_err(GateError::from));

    let claims = match outcome {
        Ok(claims) => claims,
        Err(e) => {
            audit_log(&AuditEvent::InvalidToken {
                ip_address: extract_ip_address(request.headers()),
                user_agent: extract_user_agent(request.headers()),
                reason: e.code().to_string(),
            });
            return Err(e);
        }
    };

    request
        .extensions_mut()
        .insert(AuthenticatedUser::from(claims));

    Ok(next.run(request).await)
}
