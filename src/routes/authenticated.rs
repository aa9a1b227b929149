use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Routes for any signed-in user, regardless of role. Every handler here
/// relies on the `AuthUser` extractor middleware layered above this module,
/// which guarantees a validated principal resolved from the stored record.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /me
        // The authenticated user's profile and effective permissions.
        .route("/me", get(handlers::get_me))
        // POST /session/login
        // Consumes the remembered post-login target after the identity
        // provider completes a sign-in.
        .route("/session/login", post(handlers::login_complete))
}
