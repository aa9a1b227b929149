use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Admin Router Module
///
/// Routes exclusively for users whose *stored* role is admin. The handlers
/// enforce the role through the same `RequireBy` predicate the view gate
/// uses, after the authentication layer above has resolved the principal.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/users
        // The full user listing. Non-admin callers are rejected with a
        // permission-denied error, never served a filtered list.
        .route("/users", get(handlers::list_users))
        // PUT /admin/users/{id}/role
        // Changes a user's stored role and its claims mirror atomically.
        .route("/users/{id}/role", put(handlers::update_user_role))
}
