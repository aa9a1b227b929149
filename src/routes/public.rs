use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without authentication. The view gate lives here
/// because it must serve anonymous visitors too — it resolves the session
/// itself, per request, and decides render vs redirect.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Unauthenticated endpoint for monitoring and load balancer checks.
        .route("/health", get(|| async { "ok" }))
        // POST /register
        // New user creation via the external identity provider, mirrored
        // into the local profiles and claims tables.
        .route("/register", post(handlers::register_user))
        // GET /views/{*path}
        // The dashboard route guard: renders a view descriptor or redirects
        // (login, unauthorized, stored target).
        .route("/views/{*path}", get(handlers::view_gate))
        // GET /session/denied-origin
        // One-shot read of where the last denial happened ("go back").
        .route("/session/denied-origin", get(handlers::denied_origin))
        // POST /session/logout
        // Drops this portal session's redirect memory.
        .route("/session/logout", post(handlers::logout))
}
