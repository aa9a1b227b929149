use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    auth::AuthUser,
    error::PrivilegedOperationError,
    gate::{
        self, GateOutcome, HOME_PATH, RequireBy, UNAUTHORIZED_PATH, evaluate, evaluate_entry,
    },
    memory::{RedirectKey, RedirectStore},
    models::{
        DeniedOrigin, RedirectTarget, RegisterUserRequest, Role, UpdateRoleRequest, UserProfile,
        UserRecord, ViewDescriptor,
    },
    session::SessionState,
};

/// Cookie naming the anonymous portal session. It scopes redirect memory, so
/// a visitor's intended destination survives the round trip through login.
const SID_COOKIE: &str = "relief_sid";

/// AuthProviderResponse
///
/// Minimal struct to deserialize the external identity provider's signup
/// response, capturing the newly created user's UUID.
#[derive(Deserialize)]
struct AuthProviderResponse {
    id: Uuid,
}

// --- Session cookie helpers ---

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SID_COOKIE).then(|| value.to_string())
    })
}

/// The SPA-space path behind the /views mount.
fn view_location(path: &str) -> String {
    format!("/views{path}")
}

// --- Handlers ---

/// view_gate
///
/// [Public Route] The server rendition of the dashboard's route guard: every
/// navigable path goes through here, and the gate decides render vs redirect.
/// Entry pages (login, register, logout) run the unauthenticated-only gate;
/// everything else is looked up in the route-requirement table.
#[utoipa::path(
    get,
    path = "/views/{path}",
    params(("path" = String, Path, description = "Dashboard path")),
    responses(
        (status = 200, description = "Render", body = ViewDescriptor),
        (status = 303, description = "Redirect"),
        (status = 404, description = "Unknown view")
    )
)]
pub async fn view_gate(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let requested = format!("/{path}");

    // Resolve (or mint) the portal session id scoping redirect memory.
    let existing_sid = session_cookie(&headers);
    let sid = existing_sid
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let memory = state.redirects.for_session(&sid);

    // The extractor already resolved the session synchronously for this
    // request, so the gate sees an initialized snapshot.
    let principal = auth.map(|a| a.principal);
    let role = principal.as_ref().map(|p| p.role);
    let session = SessionState::resolved(principal);

    let outcome = if gate::is_auth_flow_path(&requested)
        || gate::is_allow_through_path(&requested)
    {
        evaluate_entry(&session, &requested, memory.as_ref())
    } else if requested == UNAUTHORIZED_PATH {
        // The denial landing page renders for anyone; its "go back" target
        // comes from /session/denied-origin.
        GateOutcome::Render
    } else {
        match state.views.lookup(&requested) {
            Some(requirement) => evaluate(
                &session,
                requirement,
                &requested,
                memory.as_ref(),
                state.resolver.as_ref(),
            ),
            None => return StatusCode::NOT_FOUND.into_response(),
        }
    };

    let mut response = match outcome {
        GateOutcome::Render => Json(ViewDescriptor {
            path: requested,
            role,
        })
        .into_response(),
        GateOutcome::RedirectToLogin => {
            Redirect::to(&view_location(gate::LOGIN_PATH)).into_response()
        }
        GateOutcome::RedirectToUnauthorized => {
            Redirect::to(&view_location(UNAUTHORIZED_PATH)).into_response()
        }
        GateOutcome::RedirectToStored(target) => {
            Redirect::to(&view_location(&target)).into_response()
        }
        GateOutcome::SessionFailed(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Your session could not be resolved. Please retry.",
        )
            .into_response(),
        // The request-scoped snapshot above is always initialized.
        GateOutcome::Loading => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };

    if existing_sid.is_none() {
        if let Ok(cookie) =
            format!("{SID_COOKIE}={sid}; Path=/; HttpOnly; SameSite=Lax").parse()
        {
            response.headers_mut().insert(header::SET_COOKIE, cookie);
        }
    }
    response
}

/// login_complete
///
/// [Authenticated Route] Called by the client once the identity provider has
/// signed the user in: consumes the remembered post-login target and tells
/// the client where to navigate. The slot is cleared by this read.
#[utoipa::path(
    post,
    path = "/session/login",
    responses((status = 200, description = "Where to go next", body = RedirectTarget))
)]
pub async fn login_complete(
    _auth: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<RedirectTarget> {
    let redirect_to = match session_cookie(&headers) {
        Some(sid) => state
            .redirects
            .for_session(&sid)
            .take_and_clear(RedirectKey::PostLoginTarget, HOME_PATH),
        None => HOME_PATH.to_string(),
    };
    Json(RedirectTarget { redirect_to })
}

/// denied_origin
///
/// [Public Route] The unauthorized page's "go back" affordance: consumes the
/// remembered origin of the last denial. One-shot, like the login target.
#[utoipa::path(
    get,
    path = "/session/denied-origin",
    responses((status = 200, description = "Where the denial happened", body = DeniedOrigin))
)]
pub async fn denied_origin(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<DeniedOrigin> {
    let origin = match session_cookie(&headers) {
        Some(sid) => state
            .redirects
            .for_session(&sid)
            .take_and_clear(RedirectKey::UnauthorizedOrigin, HOME_PATH),
        None => HOME_PATH.to_string(),
    };
    Json(DeniedOrigin { origin })
}

/// logout
///
/// [Public Route] Tears down the portal session's redirect memory, so no
/// stored navigation intent can leak into another user's sign-in on the same
/// browser.
#[utoipa::path(
    post,
    path = "/session/logout",
    responses((status = 204, description = "Session memory dropped"))
)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(sid) = session_cookie(&headers) {
        state.redirects.drop_session(&sid);
    }
    StatusCode::NO_CONTENT
}

/// get_me
///
/// [Authenticated Route] The authenticated user's profile, including the
/// effective permission names the resolver grants them.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Profile", body = UserProfile))
)]
pub async fn get_me(
    AuthUser { principal }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, StatusCode> {
    let user = state
        .repo
        .get_user(principal.id)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(Json(UserProfile {
        id: user.id,
        email: user.email,
        role: user.role,
        permissions: gate::effective_permissions(&principal),
    }))
}

/// register_user
///
/// [Public Route] Initial user registration via the external identity
/// provider, then mirroring of the profile (and its claims row) into the
/// local database so primary keys stay synchronized.
///
/// Self-signup may only pick one of the field roles; admin and staff are
/// assigned through the privileged role-mutation endpoint.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterUserRequest,
    responses(
        (status = 200, description = "Registered", body = UserRecord),
        (status = 400, description = "Invalid role or rejected signup")
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<Json<UserRecord>, PrivilegedOperationError> {
    let role: Role = payload
        .role
        .parse()
        .map_err(|e: crate::models::RoleParseError| {
            PrivilegedOperationError::InvalidArgument(e.to_string())
        })?;
    if !role.self_assignable() {
        return Err(PrivilegedOperationError::InvalidArgument(format!(
            "role '{role}' cannot be chosen at signup"
        )));
    }

    // Step 1: provision the identity with the external provider.
    let client = reqwest::Client::new();
    let signup_url = format!("{}/auth/v1/signup", state.config.auth_provider_url);

    let response = client
        .post(signup_url)
        .header("apikey", &state.config.auth_provider_key)
        .header("Content-Type", "application/json")
        .json(&serde_json::json!({ "email": payload.email, "password": payload.password }))
        .send()
        .await
        .map_err(|e| {
            PrivilegedOperationError::Internal(format!("identity provider call failed: {e}"))
        })?;

    if !response.status().is_success() {
        // Provider-side rejection: email already exists, weak password.
        return Err(PrivilegedOperationError::InvalidArgument(
            "the identity provider rejected the signup".to_string(),
        ));
    }

    // Step 2: extract the canonical user id from the provider response.
    let provider_user = response.json::<AuthProviderResponse>().await.map_err(|e| {
        PrivilegedOperationError::Internal(format!("unreadable provider response: {e}"))
    })?;

    // Step 3: mirror the profile and claims into the local database.
    let created = state
        .repo
        .create_user(UserRecord {
            id: provider_user.id,
            email: payload.email,
            role,
            created_at: Utc::now(),
        })
        .await
        .map_err(PrivilegedOperationError::Internal)?;

    Ok(Json(created))
}

/// list_users
///
/// [Admin Route] The full set of user records. Non-admin callers get a
/// permission-denied error, never a filtered list.
#[utoipa::path(
    get,
    path = "/admin/users",
    responses(
        (status = 200, description = "All users", body = [UserRecord]),
        (status = 403, description = "Caller is not admin")
    )
)]
pub async fn list_users(
    AuthUser { principal }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserRecord>>, PrivilegedOperationError> {
    gate::require(
        &RequireBy::roles([Role::Admin]),
        &principal,
        state.resolver.as_ref(),
    )?;
    Ok(Json(state.repo.list_users().await))
}

/// update_user_role
///
/// [Admin Route] Changes a user's stored role and its claims mirror in one
/// transaction. The caller's admin role comes from their *stored* record (the
/// extractor re-reads it per request), never from a client-asserted value.
#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "Target user id")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Updated", body = UserRecord),
        (status = 400, description = "Bad role value or unknown user"),
        (status = 403, description = "Caller is not admin"),
        (status = 500, description = "Claims mirror failure, change rolled back")
    )
)]
pub async fn update_user_role(
    AuthUser { principal }: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<UserRecord>, PrivilegedOperationError> {
    gate::require(
        &RequireBy::roles([Role::Admin]),
        &principal,
        state.resolver.as_ref(),
    )?;

    let new_role: Role = payload
        .new_role
        .parse()
        .map_err(|e: crate::models::RoleParseError| {
            PrivilegedOperationError::InvalidArgument(e.to_string())
        })?;

    let updated = state
        .repo
        .set_user_role(user_id, new_role)
        .await
        .map_err(|e| match e {
            crate::repository::RoleUpdateError::UserNotFound => {
                PrivilegedOperationError::InvalidArgument(
                    "no user record for the given id".to_string(),
                )
            }
            other => PrivilegedOperationError::Internal(other.to_string()),
        })?;

    tracing::info!(
        target_user = %updated.id,
        new_role = %updated.role,
        changed_by = %principal.id,
        "role updated"
    );
    Ok(Json(updated))
}
