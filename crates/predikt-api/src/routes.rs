//! API route definitions

use crate::auth::middleware::require_token;
use crate::handlers::auth;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create user routes
pub fn user_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/user", post(auth::register_handler))
        .route("/user/login", post(auth::login_handler));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/user/info", get(auth::user_info_handler))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_token,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}
