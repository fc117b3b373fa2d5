//! User API handlers
//!
//! Registration and login bodies use the `{"user": {...}}` envelope.
//! Payloads are taken as raw JSON and validated by the auth core, so a
//! malformed body is a validation error rather than an extractor rejection.

use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::auth::{user_envelope, AuthenticatedUser, Credential, Registration, Session};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;

/// Registration request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub user: NewUser,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewUser {
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub password: String,
}

/// Login request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub user: LoginCredentials,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Profile of the authenticated user
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    body.map(|Json(value)| value)
        .map_err(|e| AppError::Validation(e.body_text()))
}

/// Best-effort email for audit records, before validation
fn claimed_email(body: &Value) -> Option<String> {
    body.get("user")?
        .get("email")?
        .as_str()
        .map(|email| email.to_lowercase())
}

/// Register a new user
///
/// # Responses
///
/// * `201 Created` - User stored, first token issued
/// * `409 Conflict` - Email already registered
/// * `422 Unprocessable Entity` - Missing or empty field
#[utoipa::path(
    post,
    path = "/user",
    tag = "user",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = Registration),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
        (status = 422, description = "Invalid input", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
        (status = 503, description = "Signing secret not provisioned", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);

    let body = json_body(body)?;
    let email = claimed_email(&body);

    let outcome = match user_envelope(&body) {
        Ok(user) => state.auth.register_user(user).await,
        Err(e) => Err(e.into()),
    };

    match outcome {
        Ok(registration) => {
            audit_log(&AuditEvent::RegistrationSuccess {
                user_id: registration.id.clone(),
                email: email.unwrap_or_default(),
                ip_address,
                user_agent,
            });
            Ok((StatusCode::CREATED, Json(registration)))
        }
        Err(e) => {
            audit_log(&AuditEvent::RegistrationFailure {
                email,
                reason: e.to_string(),
                ip_address,
                user_agent,
            });
            Err(e.into())
        }
    }
}

/// Login with email and password
///
/// Unknown email and wrong password produce the same response.
#[utoipa::path(
    post,
    path = "/user/login",
    tag = "user",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = Session),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 422, description = "Invalid input", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Session>, AppError> {
    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);

    let body = json_body(body)?;
    let credential = Credential::from_untrusted(user_envelope(&body)?)?;
    let email = credential.email().to_lowercase();

    match state.auth.login(credential).await? {
        Some(session) => {
            audit_log(&AuditEvent::LoginSuccess {
                user_id: session.user.id.clone(),
                email,
                ip_address,
                user_agent,
            });
            Ok(Json(session))
        }
        None => {
            audit_log(&AuditEvent::LoginFailure {
                email: Some(email),
                reason: "invalid_credentials".to_string(),
                ip_address,
                user_agent,
            });
            Err(AppError::InvalidCredentials)
        }
    }
}

/// Profile of the token holder
#[utoipa::path(
    get,
    path = "/user/info",
    tag = "user",
    responses(
        (status = 200, description = "Current user profile", body = UserInfo),
        (status = 401, description = "Missing, malformed, forged or expired token", body = crate::error::ApiError),
        (status = 404, description = "User no longer exists", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn user_info_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UserInfo>, AppError> {
    let profile = state
        .auth
        .profile(&user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

    Ok(Json(UserInfo {
        id: user.user_id,
        email: profile.email,
        firstname: profile.firstname,
        lastname: profile.lastname,
    }))
}
