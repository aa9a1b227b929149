use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

/// SessionError
///
/// A failure of the session source itself, as opposed to a missing or
/// unauthorized principal. Carried inside `SessionState.last_error` so the
/// host page can render a retry affordance; the gate never converts one of
/// these into a login redirect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The identity provider could not be reached.
    #[error("identity provider unreachable: {0}")]
    ProviderUnavailable(String),

    /// The provider answered but session resolution still failed.
    #[error("session resolution failed: {0}")]
    Resolution(String),
}

/// PrivilegedOperationError
///
/// Failure taxonomy for the admin endpoints (role mutation, user listing).
/// Each kind maps to a distinct status and a stable `error` code so the
/// client can show a distinct message; internal causes are logged, never
/// echoed to the caller.
#[derive(Debug, Error)]
pub enum PrivilegedOperationError {
    /// The caller's stored role is not admin.
    #[error("caller lacks the required role")]
    PermissionDenied,

    /// A bad role value or an unknown target user id.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A downstream failure (database, claims mirror). The payload is the
    /// internal detail and must only reach the logs.
    #[error("internal failure: {0}")]
    Internal(String),
}

/// ErrorBody
///
/// The JSON error shape every failed privileged call returns.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ErrorBody {
    /// Stable machine-readable code: "permission-denied", "invalid-argument"
    /// or "internal".
    pub error: String,
    pub message: String,
}

impl IntoResponse for PrivilegedOperationError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            PrivilegedOperationError::PermissionDenied => (
                StatusCode::FORBIDDEN,
                "permission-denied",
                "You do not have permission to perform this operation.".to_string(),
            ),
            PrivilegedOperationError::InvalidArgument(detail) => {
                (StatusCode::BAD_REQUEST, "invalid-argument", detail.clone())
            }
            PrivilegedOperationError::Internal(detail) => {
                tracing::error!("privileged operation failed: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "The operation could not be completed. Please try again.".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorBody {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}
