use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{PrivilegedOperationError, SessionError};
use crate::memory::{RedirectKey, RedirectStore};
use crate::models::{Principal, Role};
use crate::session::{SessionSource, SessionState, Subscription};

// Well-known dashboard paths the gate special-cases.
pub const HOME_PATH: &str = "/home";
pub const LOGIN_PATH: &str = "/login";
pub const REGISTER_PATH: &str = "/register";
pub const LOGOUT_PATH: &str = "/logout";
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

/// Paths belonging to the authentication flow itself. A denied visitor on one
/// of these must not have it recorded as a post-login target, or the login
/// page would become its own destination.
pub fn is_auth_flow_path(path: &str) -> bool {
    path == LOGIN_PATH || path == REGISTER_PATH
}

/// Entry paths an authenticated principal may still pass through, so a
/// sign-out in progress never bounces between the entry gate and the
/// protected routes.
pub fn is_allow_through_path(path: &str) -> bool {
    path == LOGOUT_PATH
}

// --- Authorization predicate ---

/// PermissionResolver
///
/// Answers authorization questions about a principal. Side-effect free from
/// the gate's perspective; implementations may cache internally.
pub trait PermissionResolver: Send + Sync {
    fn has_permission(&self, principal: &Principal, permission: &str) -> bool;
    fn role_of(&self, principal: &Principal) -> Role;
}

/// ResolverState
///
/// The concrete type used to share the permission resolver across the
/// application state.
pub type ResolverState = Arc<dyn PermissionResolver>;

/// Default permission names each role holds without an explicit grant.
fn role_defaults(role: Role) -> &'static [&'static str] {
    match role {
        Role::Admin => &[
            "manage-users",
            "manage-inventory",
            "record-distributions",
            "manage-beneficiaries",
            "view-analytics",
            "view-donations",
        ],
        Role::Staff => &[
            "manage-inventory",
            "record-distributions",
            "manage-beneficiaries",
            "view-analytics",
        ],
        Role::Volunteer => &["record-distributions"],
        Role::Donor => &["view-donations"],
        Role::Beneficiary => &[],
        Role::Guest => &[],
    }
}

/// RolePermissionResolver
///
/// The portal's resolver: a principal holds a permission if it was granted
/// explicitly (`user_permissions` rows loaded into the principal) or if it is
/// a default of their role.
#[derive(Debug, Default, Clone)]
pub struct RolePermissionResolver;

impl PermissionResolver for RolePermissionResolver {
    fn has_permission(&self, principal: &Principal, permission: &str) -> bool {
        if let Some(grants) = &principal.permissions {
            if grants.contains(permission) {
                return true;
            }
        }
        role_defaults(principal.role).contains(&permission)
    }

    fn role_of(&self, principal: &Principal) -> Role {
        principal.role
    }
}

/// Effective permission names for a principal: explicit grants plus role
/// defaults, deduplicated and sorted.
pub fn effective_permissions(principal: &Principal) -> Vec<String> {
    let mut set: BTreeSet<String> = role_defaults(principal.role)
        .iter()
        .map(|s| s.to_string())
        .collect();
    if let Some(grants) = &principal.permissions {
        set.extend(grants.iter().cloned());
    }
    set.into_iter().collect()
}

/// RequireBy
///
/// A route's authorization requirement: either a named permission or a set of
/// admissible roles. One tagged type parameterizes the single gate state
/// machine for both kinds, so the two cannot drift apart. An empty role list
/// means "any authenticated principal".
#[derive(Debug, Clone, PartialEq)]
pub enum RequireBy {
    Permission(String),
    Roles(Vec<Role>),
}

impl RequireBy {
    pub fn permission(name: impl Into<String>) -> Self {
        RequireBy::Permission(name.into())
    }

    pub fn roles(roles: impl IntoIterator<Item = Role>) -> Self {
        RequireBy::Roles(roles.into_iter().collect())
    }

    /// Authenticated is sufficient; no denial path can trigger.
    pub fn authenticated() -> Self {
        RequireBy::Roles(Vec::new())
    }

    pub fn satisfied_by(
        &self,
        principal: &Principal,
        resolver: &dyn PermissionResolver,
    ) -> bool {
        match self {
            RequireBy::Permission(name) => resolver.has_permission(principal, name),
            RequireBy::Roles(roles) => {
                roles.is_empty() || roles.contains(&resolver.role_of(principal))
            }
        }
    }
}

/// Server-side form of the same predicate, used by the privileged handlers so
/// the admin checks flow through the identical `RequireBy` logic as the view
/// gate.
pub fn require(
    requirement: &RequireBy,
    principal: &Principal,
    resolver: &dyn PermissionResolver,
) -> Result<(), PrivilegedOperationError> {
    if requirement.satisfied_by(principal, resolver) {
        Ok(())
    } else {
        Err(PrivilegedOperationError::PermissionDenied)
    }
}

// --- The gate state machine ---

/// GateOutcome
///
/// The mutually exclusive result of one gate evaluation. The host router
/// converts these into rendering or navigation; the gate itself never throws
/// an authorization decision.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Session has not resolved yet; render a placeholder.
    Loading,
    /// Principal present and authorized; render the target view.
    Render,
    /// No principal; the intended path (if any) has been remembered.
    RedirectToLogin,
    /// Principal present but the requirement failed; the origin has been
    /// remembered for the "go back" affordance.
    RedirectToUnauthorized,
    /// Entry gate only: an authenticated principal is sent back to the
    /// consumed post-login target.
    RedirectToStored(String),
    /// The session source itself failed. Rendered as an error with a retry
    /// affordance, never as a login redirect.
    SessionFailed(SessionError),
}

/// evaluate
///
/// One evaluation of a protected route. Reads the given session snapshot
/// (callers take it synchronously at decision time), writes redirect memory
/// as a side effect, and returns the decision.
///
/// Order of checks: initialization, session failure, authentication, then the
/// authorization predicate. `initialized` gates everything — no memory write
/// happens while the session is still resolving.
pub fn evaluate(
    session: &SessionState,
    requirement: &RequireBy,
    requested_path: &str,
    memory: &dyn RedirectStore,
    resolver: &dyn PermissionResolver,
) -> GateOutcome {
    if !session.initialized || session.loading {
        return GateOutcome::Loading;
    }

    let Some(principal) = &session.principal else {
        // A provider outage with no resolved principal is an outage, not a
        // sign-out.
        if let Some(error) = &session.last_error {
            return GateOutcome::SessionFailed(error.clone());
        }
        if !is_auth_flow_path(requested_path) {
            memory.set(RedirectKey::PostLoginTarget, requested_path);
        }
        return GateOutcome::RedirectToLogin;
    };

    if !requirement.satisfied_by(principal, resolver) {
        tracing::debug!(
            path = requested_path,
            role = %principal.role,
            "gate denied"
        );
        memory.set(RedirectKey::UnauthorizedOrigin, requested_path);
        return GateOutcome::RedirectToUnauthorized;
    }

    GateOutcome::Render
}

/// evaluate_entry
///
/// The unauthenticated-only gate protecting entry points (login, register).
/// An authenticated principal is bounced back to the consumed post-login
/// target — except on allow-through paths, where a principal mid-sign-out
/// must still see the page.
pub fn evaluate_entry(
    session: &SessionState,
    requested_path: &str,
    memory: &dyn RedirectStore,
) -> GateOutcome {
    if !session.initialized {
        return GateOutcome::Loading;
    }

    if session.principal.is_some() && !is_allow_through_path(requested_path) {
        let target = memory.take_and_clear(RedirectKey::PostLoginTarget, HOME_PATH);
        return GateOutcome::RedirectToStored(target);
    }

    GateOutcome::Render
}

// --- Route requirement registry ---

/// RouteTable
///
/// The declaration surface for per-path requirements: registered once at
/// startup, read-only thereafter. Lookup is exact-match first, then the
/// nearest registered ancestor ("/admin/users/42" falls back to
/// "/admin/users", then "/admin").
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, RequireBy>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder {
            routes: HashMap::new(),
        }
    }

    pub fn lookup(&self, path: &str) -> Option<&RequireBy> {
        if let Some(requirement) = self.routes.get(path) {
            return Some(requirement);
        }
        let mut prefix = path;
        while let Some(cut) = prefix.rfind('/') {
            if cut == 0 {
                break;
            }
            prefix = &prefix[..cut];
            if let Some(requirement) = self.routes.get(prefix) {
                return Some(requirement);
            }
        }
        None
    }
}

pub struct RouteTableBuilder {
    routes: HashMap<String, RequireBy>,
}

impl RouteTableBuilder {
    pub fn route(mut self, path: impl Into<String>, requirement: RequireBy) -> Self {
        self.routes.insert(path.into(), requirement);
        self
    }

    pub fn build(self) -> RouteTable {
        RouteTable {
            routes: self.routes,
        }
    }
}

// --- Router glue ---

/// RouteGate
///
/// Binds one route evaluation to a session source: every emission re-runs the
/// gate against the freshest snapshot and hands the outcome to the host
/// router's callback. Dropping the gate unsubscribes, so an evaluation torn
/// down mid-resolution performs no late memory write.
pub struct RouteGate {
    _subscription: Subscription,
}

impl RouteGate {
    pub fn mount(
        source: &dyn SessionSource,
        requirement: RequireBy,
        requested_path: impl Into<String>,
        memory: Arc<dyn RedirectStore>,
        resolver: Arc<dyn PermissionResolver>,
        on_outcome: impl Fn(GateOutcome) + Send + Sync + 'static,
    ) -> Self {
        let path = requested_path.into();
        let subscription = source.subscribe(Box::new(move |state| {
            let outcome = evaluate(state, &requirement, &path, memory.as_ref(), resolver.as_ref());
            on_outcome(outcome);
        }));
        Self {
            _subscription: subscription,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SessionRedirectMemory;
    use crate::session::SessionHub;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn resolved(principal: Option<Principal>) -> SessionState {
        SessionState::resolved(principal)
    }

    fn volunteer() -> Principal {
        Principal::new(Uuid::new_v4(), Role::Volunteer)
    }

    #[test]
    fn unresolved_session_is_loading_for_both_requirement_kinds() {
        let memory = SessionRedirectMemory::new();
        let resolver = RolePermissionResolver;
        let session = SessionState::default();

        for requirement in [
            RequireBy::permission("manage-inventory"),
            RequireBy::roles([Role::Admin]),
        ] {
            assert_eq!(
                evaluate(&session, &requirement, "/inventory", &memory, &resolver),
                GateOutcome::Loading
            );
        }
        // No memory write before the session has resolved.
        assert_eq!(
            memory.take_and_clear(RedirectKey::PostLoginTarget, "/none"),
            "/none"
        );
    }

    #[test]
    fn loading_session_is_loading_even_after_initialization() {
        let memory = SessionRedirectMemory::new();
        let mut session = resolved(None);
        session.loading = true;

        assert_eq!(
            evaluate(
                &session,
                &RequireBy::authenticated(),
                "/home",
                &memory,
                &RolePermissionResolver
            ),
            GateOutcome::Loading
        );
    }

    #[test]
    fn anonymous_visitor_is_sent_to_login_and_the_path_is_remembered() {
        let memory = SessionRedirectMemory::new();
        let session = resolved(None);

        let outcome = evaluate(
            &session,
            &RequireBy::permission("manage-inventory"),
            "/inventory",
            &memory,
            &RolePermissionResolver,
        );

        assert_eq!(outcome, GateOutcome::RedirectToLogin);
        assert_eq!(
            memory.take_and_clear(RedirectKey::PostLoginTarget, "/home"),
            "/inventory"
        );
    }

    #[test]
    fn auth_flow_paths_are_never_recorded_as_targets() {
        let memory = SessionRedirectMemory::new();
        memory.set(RedirectKey::PostLoginTarget, "/inventory");
        let session = resolved(None);

        let outcome = evaluate(
            &session,
            &RequireBy::authenticated(),
            LOGIN_PATH,
            &memory,
            &RolePermissionResolver,
        );

        assert_eq!(outcome, GateOutcome::RedirectToLogin);
        // The earlier intent survives untouched.
        assert_eq!(
            memory.take_and_clear(RedirectKey::PostLoginTarget, "/home"),
            "/inventory"
        );
    }

    #[test]
    fn missing_permission_redirects_to_unauthorized_with_origin() {
        let memory = SessionRedirectMemory::new();
        let session = resolved(Some(volunteer()));

        let outcome = evaluate(
            &session,
            &RequireBy::permission("manage-inventory"),
            "/inventory",
            &memory,
            &RolePermissionResolver,
        );

        assert_eq!(outcome, GateOutcome::RedirectToUnauthorized);
        assert_eq!(
            memory.take_and_clear(RedirectKey::UnauthorizedOrigin, "/home"),
            "/inventory"
        );
    }

    #[test]
    fn volunteer_is_denied_on_a_staff_only_role_route() {
        let memory = SessionRedirectMemory::new();
        let session = resolved(Some(volunteer()));

        let outcome = evaluate(
            &session,
            &RequireBy::roles([Role::Admin, Role::Staff]),
            "/analytics",
            &memory,
            &RolePermissionResolver,
        );

        assert_eq!(outcome, GateOutcome::RedirectToUnauthorized);
        assert_eq!(
            memory.take_and_clear(RedirectKey::UnauthorizedOrigin, "/home"),
            "/analytics"
        );
    }

    #[test]
    fn empty_role_set_admits_any_authenticated_principal() {
        let memory = SessionRedirectMemory::new();
        for role in Role::ALL {
            let session = resolved(Some(Principal::new(Uuid::new_v4(), role)));
            assert_eq!(
                evaluate(
                    &session,
                    &RequireBy::authenticated(),
                    "/home",
                    &memory,
                    &RolePermissionResolver
                ),
                GateOutcome::Render
            );
        }
    }

    #[test]
    fn explicit_grant_beats_role_defaults() {
        let memory = SessionRedirectMemory::new();
        let principal = volunteer().with_permissions(["manage-inventory"]);
        let session = resolved(Some(principal));

        assert_eq!(
            evaluate(
                &session,
                &RequireBy::permission("manage-inventory"),
                "/inventory",
                &memory,
                &RolePermissionResolver
            ),
            GateOutcome::Render
        );
    }

    #[test]
    fn provider_outage_is_not_masked_as_unauthenticated() {
        let memory = SessionRedirectMemory::new();
        let mut session = resolved(None);
        session.last_error = Some(SessionError::ProviderUnavailable("down".to_string()));

        let outcome = evaluate(
            &session,
            &RequireBy::authenticated(),
            "/inventory",
            &memory,
            &RolePermissionResolver,
        );

        assert!(matches!(outcome, GateOutcome::SessionFailed(_)));
        // And no login target was recorded for a navigation that never was a
        // real denial.
        assert_eq!(
            memory.take_and_clear(RedirectKey::PostLoginTarget, "/none"),
            "/none"
        );
    }

    #[test]
    fn entry_gate_bounces_an_authenticated_principal_to_the_stored_target() {
        let memory = SessionRedirectMemory::new();
        memory.set(RedirectKey::PostLoginTarget, "/inventory");
        let session = resolved(Some(volunteer()));

        let outcome = evaluate_entry(&session, LOGIN_PATH, &memory);
        assert_eq!(
            outcome,
            GateOutcome::RedirectToStored("/inventory".to_string())
        );
        // One-shot: the slot is gone.
        assert_eq!(
            memory.take_and_clear(RedirectKey::PostLoginTarget, HOME_PATH),
            HOME_PATH
        );
    }

    #[test]
    fn entry_gate_defaults_to_home_without_a_stored_target() {
        let memory = SessionRedirectMemory::new();
        let session = resolved(Some(volunteer()));

        assert_eq!(
            evaluate_entry(&session, REGISTER_PATH, &memory),
            GateOutcome::RedirectToStored(HOME_PATH.to_string())
        );
    }

    #[test]
    fn entry_gate_lets_a_signing_out_principal_through() {
        let memory = SessionRedirectMemory::new();
        let session = resolved(Some(volunteer()));

        assert_eq!(
            evaluate_entry(&session, LOGOUT_PATH, &memory),
            GateOutcome::Render
        );
    }

    #[test]
    fn entry_gate_renders_for_anonymous_visitors() {
        let memory = SessionRedirectMemory::new();
        assert_eq!(
            evaluate_entry(&resolved(None), LOGIN_PATH, &memory),
            GateOutcome::Render
        );
        assert_eq!(
            evaluate_entry(&SessionState::default(), LOGIN_PATH, &memory),
            GateOutcome::Loading
        );
    }

    #[test]
    fn require_mirrors_the_predicate_for_handlers() {
        let admin = Principal::new(Uuid::new_v4(), Role::Admin);
        let resolver = RolePermissionResolver;
        let requirement = RequireBy::roles([Role::Admin]);

        assert!(require(&requirement, &admin, &resolver).is_ok());
        assert!(matches!(
            require(&requirement, &volunteer(), &resolver),
            Err(PrivilegedOperationError::PermissionDenied)
        ));
    }

    #[test]
    fn route_table_prefers_exact_matches_then_ancestors() {
        let table = RouteTable::builder()
            .route("/admin", RequireBy::roles([Role::Admin]))
            .route("/admin/users", RequireBy::permission("manage-users"))
            .build();

        assert_eq!(
            table.lookup("/admin/users"),
            Some(&RequireBy::permission("manage-users"))
        );
        assert_eq!(
            table.lookup("/admin/users/42"),
            Some(&RequireBy::permission("manage-users"))
        );
        assert_eq!(
            table.lookup("/admin/audit"),
            Some(&RequireBy::roles([Role::Admin]))
        );
        assert_eq!(table.lookup("/nowhere"), None);
    }

    #[test]
    fn mounted_gate_re_evaluates_on_session_emissions() {
        let hub = SessionHub::new();
        let memory: Arc<SessionRedirectMemory> = Arc::new(SessionRedirectMemory::new());
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();

        let _gate = RouteGate::mount(
            &hub,
            RequireBy::permission("manage-inventory"),
            "/inventory",
            memory.clone(),
            Arc::new(RolePermissionResolver),
            move |outcome| sink.lock().unwrap().push(outcome),
        );

        hub.begin_resolve();
        hub.resolve(Some(Principal::new(Uuid::new_v4(), Role::Staff)));

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(
            *outcomes,
            vec![GateOutcome::Loading, GateOutcome::Loading, GateOutcome::Render]
        );
    }

    #[test]
    fn torn_down_gate_writes_nothing_after_unmount() {
        let hub = SessionHub::new();
        let memory: Arc<SessionRedirectMemory> = Arc::new(SessionRedirectMemory::new());

        let gate = RouteGate::mount(
            &hub,
            RequireBy::permission("manage-inventory"),
            "/inventory",
            memory.clone(),
            Arc::new(RolePermissionResolver),
            |_| {},
        );
        // Navigation away before the session ever resolves.
        drop(gate);

        hub.resolve(None);
        assert_eq!(
            memory.take_and_clear(RedirectKey::PostLoginTarget, "/none"),
            "/none"
        );
    }
}
