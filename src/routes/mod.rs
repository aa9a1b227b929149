/// Router Module Index
///
/// Organizes the application's routing logic into security-segregated
/// modules, so access control is applied explicitly at the module level (via
/// Axum layers) and protected endpoints cannot be exposed by accident.

/// Routes accessible to any client, including the view gate itself (which
/// performs its own session resolution per request).
pub mod public;

/// Routes protected by the `AuthUser` extractor middleware.
pub mod authenticated;

/// Routes restricted to users whose stored role is admin.
pub mod admin;

/// The dashboard's navigable paths and their access requirements.
pub mod views;
