//! Predikt API - credential and session token service
//!
//! Registers users with Argon2-hashed passwords, verifies logins and issues
//! HMAC-signed expiring tokens. The router is only built from a bootstrapped
//! [`AppState`](state::AppState), after the signing secret is provisioned.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::user_info_handler,
    ),
    components(schemas(
        error::ApiError,
        handlers::auth::RegisterRequest,
        handlers::auth::NewUser,
        handlers::auth::LoginRequest,
        handlers::auth::LoginCredentials,
        handlers::auth::UserInfo,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        handlers::health::ReadinessChecks,
        auth::Registration,
        auth::Session,
        auth::PublicIdentity,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "user", description = "Registration, login and profile"),
        (name = "health", description = "Liveness and readiness probes"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .merge(routes::user_routes(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub use state::AppState;
