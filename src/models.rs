use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Core Identity Schemas ---

/// Role
///
/// The closed set of coarse-grained access categories. Every stored profile
/// carries exactly one of these; anything outside the set is rejected at the
/// boundary (registration, role mutation) rather than stored and interpreted
/// later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Admin,
    Staff,
    Volunteer,
    Donor,
    Beneficiary,
    #[default]
    Guest,
}

impl Role {
    /// Every member of the enumeration, used for closed-set validation.
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Staff,
        Role::Volunteer,
        Role::Donor,
        Role::Beneficiary,
        Role::Guest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Volunteer => "volunteer",
            Role::Donor => "donor",
            Role::Beneficiary => "beneficiary",
            Role::Guest => "guest",
        }
    }

    /// Roles a visitor may pick for themselves at signup. Admin and staff are
    /// only assignable through the admin role-mutation endpoint, and guest is
    /// the unauthenticated state, not a stored choice.
    pub fn self_assignable(&self) -> bool {
        matches!(self, Role::Volunteer | Role::Donor | Role::Beneficiary)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RoleParseError
///
/// Raised when a stored or submitted role string is outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct RoleParseError(pub String);

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            "volunteer" => Ok(Role::Volunteer),
            "donor" => Ok(Role::Donor),
            "beneficiary" => Ok(Role::Beneficiary),
            "guest" => Ok(Role::Guest),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}

// Row mapping decodes the TEXT column through the closed set.
impl TryFrom<String> for Role {
    type Error = RoleParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Principal
///
/// The resolved identity for one session: who the user is, their role, and
/// any explicitly granted permission names on top of the role defaults.
/// Immutable for the lifetime of a session; a role change by an administrator
/// only takes effect through a re-fetch of the stored record, never by
/// mutating a live principal in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    /// Per-user grants from the `user_permissions` table. `None` means the
    /// grants were not loaded and only role defaults apply.
    pub permissions: Option<HashSet<String>>,
}

impl Principal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self {
            id,
            role,
            permissions: None,
        }
    }

    pub fn with_permissions<I, S>(mut self, grants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = Some(grants.into_iter().map(Into::into).collect());
        self
    }
}

/// UserRecord
///
/// The canonical profile row from `public.profiles`. The `role` column is the
/// stored record privileged checks are made against; the claims mirror in
/// `auth_claims` must always agree with it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterUserRequest
///
/// Input payload for the public registration endpoint (POST /register).
/// The password only passes through to the external identity provider and is
/// never persisted or logged here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterUserRequest {
    pub email: String,
    pub password: String,
    /// Requested role; must be one of the self-assignable roles.
    pub role: String,
}

/// UpdateRoleRequest
///
/// Input payload for the admin role-mutation endpoint
/// (PUT /admin/users/{id}/role). The target user id travels in the path.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateRoleRequest {
    /// Validated against the closed role enumeration before any write.
    pub new_role: String,
}

// --- Response Schemas (Output) ---

/// UserProfile
///
/// Output schema for the authenticated user's own profile (GET /me), including
/// the effective permission names the resolver grants them.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub permissions: Vec<String>,
}

/// ViewDescriptor
///
/// What a successful gate evaluation renders: the dashboard path that was
/// admitted and the role it was admitted under (absent for entry pages shown
/// to anonymous visitors).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ViewDescriptor {
    pub path: String,
    pub role: Option<Role>,
}

/// RedirectTarget
///
/// Response of POST /session/login: where the client should navigate after a
/// completed sign-in. The underlying memory slot is consumed by this read.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RedirectTarget {
    pub redirect_to: String,
}

/// DeniedOrigin
///
/// Response of GET /session/denied-origin: the path the user was denied on,
/// for the unauthorized page's "go back" affordance. One-shot, like
/// `RedirectTarget`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct DeniedOrigin {
    pub origin: String,
}
