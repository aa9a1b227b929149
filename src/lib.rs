use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core access-control components.
pub mod error;
pub mod gate;
pub mod memory;
pub mod session;

// Application services.
pub mod auth;
pub mod config;
pub mod handlers;
pub mod models;
pub mod repository;

// Routing segregation (Public, Authenticated, Admin, Views).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

// Core state types for the main entry point and tests.
pub use config::AppConfig;
pub use gate::{ResolverState, RolePermissionResolver, RouteTable};
pub use memory::RedirectRegistry;
pub use repository::{MockRepository, PostgresRepository, RepositoryState};
pub use session::SessionHub;

/// ApiDoc
///
/// Auto-generates the OpenAPI documentation for the application, aggregating
/// every handler and schema decorated with the utoipa macros. Served at
/// `/api-docs/openapi.json` and browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::view_gate, handlers::login_complete, handlers::denied_origin,
        handlers::logout, handlers::get_me, handlers::register_user,
        handlers::list_users, handlers::update_user_role,
    ),
    components(
        schemas(
            models::Role, models::UserRecord, models::UserProfile,
            models::RegisterUserRequest, models::UpdateRoleRequest,
            models::ViewDescriptor, models::RedirectTarget, models::DeniedOrigin,
            error::ErrorBody,
        )
    ),
    tags(
        (name = "relief-portal", description = "Humanitarian-aid logistics portal API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, thread-safe container holding all application services and
/// configuration, shared across all incoming requests.
#[derive(Clone)]
pub struct AppState {
    /// Repository layer: profile records, grants, claims mirror.
    pub repo: RepositoryState,
    /// The loaded, immutable environment configuration.
    pub config: AppConfig,
    /// Authorization answers for the gate and the privileged handlers.
    pub resolver: ResolverState,
    /// Per-portal-session redirect memory.
    pub redirects: Arc<RedirectRegistry>,
    /// The startup-registered view requirement table.
    pub views: Arc<RouteTable>,
}

impl AppState {
    /// Assembles the state with the portal's standard resolver, a fresh
    /// redirect registry, and the declared view requirements.
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        Self {
            repo,
            config,
            resolver: Arc::new(RolePermissionResolver),
            redirects: Arc::new(RedirectRegistry::new()),
            views: Arc::new(routes::views::view_requirements()),
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

// Let extractors pull individual components out of the shared AppState.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for ResolverState {
    fn from_ref(app_state: &AppState) -> ResolverState {
        app_state.resolver.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the authenticated route set by running the
/// `AuthUser` extractor. A failed extraction rejects with 401 before the
/// handler executes; a successful one lets the request through (handlers
/// re-extract the principal they need).
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the application's routing structure, applies global and scoped
/// middleware, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for request correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        // Auto-generated API documentation.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public routes: no middleware applied.
        .merge(public::public_routes())
        // Authenticated routes: protected by the auth middleware.
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        // Admin routes, nested under '/admin'. The admin role check runs
        // inside the handlers, through the gate predicate, against the
        // caller's stored record.
        .nest("/admin", admin::admin_routes())
        .with_state(state);

    // Observability and correlation layers, applied outermost.
    base_router
        .layer(
            ServiceBuilder::new()
                // Generate a unique id for every incoming request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // Wrap the request/response lifecycle in a tracing span
                // carrying that id.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // Return the generated id to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Customizes the `TraceLayer` span: includes the `x-request-id` header (if
/// present) alongside the HTTP method and URI, so every log line for a single
/// request is correlated by a unique id.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
