use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Role, UserRecord};

/// RoleUpdateError
///
/// Failure modes of the role-mutation write. The profile row and the claims
/// mirror move together or not at all; `ClaimsOutOfSync` means the
/// transaction was rolled back because the mirror row did not update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleUpdateError {
    #[error("no user record for the given id")]
    UserNotFound,

    #[error("claims mirror did not update; role change rolled back")]
    ClaimsOutOfSync,

    #[error("database error: {0}")]
    Database(String),
}

/// Repository Trait
///
/// Abstract contract for all persistence operations, so handlers interact
/// with the data layer without knowing the implementation (Postgres, Mock).
///
/// `Send + Sync + async_trait` make the trait object (`Arc<dyn Repository>`)
/// shareable across Axum's asynchronous task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    /// The stored profile record, the source of truth for every privileged
    /// role check.
    async fn get_user(&self, id: Uuid) -> Option<UserRecord>;

    /// Explicit per-user permission grants, on top of role defaults.
    async fn get_permissions(&self, user_id: Uuid) -> Vec<String>;

    /// Admin access: the full set of user records.
    async fn list_users(&self) -> Vec<UserRecord>;

    /// Mirrors a freshly provisioned identity into `profiles` and seeds its
    /// claims row.
    async fn create_user(&self, user: UserRecord) -> Result<UserRecord, String>;

    /// Updates the stored role and the claims mirror in one transaction.
    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<UserRecord, RoleUpdateError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the
/// application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by
/// PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: Uuid) -> Option<UserRecord> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, role, created_at FROM profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_user error: {:?}", e);
            None
        })
    }

    async fn get_permissions(&self, user_id: Uuid) -> Vec<String> {
        sqlx::query_scalar::<_, String>(
            "SELECT permission FROM user_permissions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_permissions error: {:?}", e);
            vec![]
        })
    }

    async fn list_users(&self) -> Vec<UserRecord> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, role, created_at FROM profiles ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("list_users error: {:?}", e);
            vec![]
        })
    }

    /// Inserts the profile and its claims row in one transaction so a profile
    /// can never exist without a claims mirror.
    async fn create_user(&self, user: UserRecord) -> Result<UserRecord, String> {
        let mut tx = self.pool.begin().await.map_err(|e| e.to_string())?;

        let created = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO profiles (id, email, role, created_at) VALUES ($1, $2, $3, NOW()) \
             RETURNING id, email, role, created_at",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(user.role.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.to_string())?;

        sqlx::query("INSERT INTO auth_claims (user_id, role) VALUES ($1, $2)")
            .bind(created.id)
            .bind(created.role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| e.to_string())?;

        tx.commit().await.map_err(|e| e.to_string())?;
        Ok(created)
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<UserRecord, RoleUpdateError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RoleUpdateError::Database(e.to_string()))?;

        let updated = sqlx::query_as::<_, UserRecord>(
            "UPDATE profiles SET role = $2 WHERE id = $1 \
             RETURNING id, email, role, created_at",
        )
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RoleUpdateError::Database(e.to_string()))?
        .ok_or(RoleUpdateError::UserNotFound)?;

        let claims = sqlx::query("UPDATE auth_claims SET role = $2 WHERE user_id = $1")
            .bind(id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| RoleUpdateError::Database(e.to_string()))?;

        if claims.rows_affected() == 0 {
            // Dropping the transaction without commit rolls the profile
            // update back.
            tracing::error!(user_id = %id, "claims mirror row missing during role update");
            return Err(RoleUpdateError::ClaimsOutOfSync);
        }

        tx.commit()
            .await
            .map_err(|e| RoleUpdateError::Database(e.to_string()))?;
        Ok(updated)
    }
}

// --- The Mock Implementation (For Tests) ---

/// MockRepository
///
/// In-memory implementation of `Repository` used by unit and integration
/// tests, so handler logic can be exercised without a database.
#[derive(Default)]
pub struct MockRepository {
    users: Mutex<HashMap<Uuid, UserRecord>>,
    grants: Mutex<HashMap<Uuid, Vec<String>>>,
    /// When true, role updates fail on the claims side, simulating a
    /// partially unavailable auth backend.
    fail_claims: bool,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing_claims() -> Self {
        Self {
            fail_claims: true,
            ..Self::default()
        }
    }

    pub fn with_user(self, user: UserRecord) -> Self {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.id, user);
        self
    }

    pub fn with_grant(self, user_id: Uuid, permission: &str) -> Self {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default()
            .push(permission.to_string());
        self
    }
}

#[async_trait]
impl Repository for MockRepository {
    async fn get_user(&self, id: Uuid) -> Option<UserRecord> {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    async fn get_permissions(&self, user_id: Uuid) -> Vec<String> {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn list_users(&self) -> Vec<UserRecord> {
        let mut users: Vec<UserRecord> = self
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        users
    }

    async fn create_user(&self, user: UserRecord) -> Result<UserRecord, String> {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(&user.id) {
            return Err("duplicate user id".to_string());
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<UserRecord, RoleUpdateError> {
        if self.fail_claims {
            return Err(RoleUpdateError::ClaimsOutOfSync);
        }
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        let user = users.get_mut(&id).ok_or(RoleUpdateError::UserNotFound)?;
        user.role = role;
        Ok(user.clone())
    }
}
