use crate::gate::{RequireBy, RouteTable};
use crate::models::Role;

/// view_requirements
///
/// The route-requirement declaration surface: every navigable dashboard path
/// and what it takes to see it, registered once at startup and read-only
/// afterwards. Each path declares either a named permission or a role set,
/// never both; an empty role set means any signed-in user.
///
/// The entry pages (/login, /register, /logout) and /unauthorized are not
/// listed here — they go through the unauthenticated-only gate instead.
pub fn view_requirements() -> RouteTable {
    RouteTable::builder()
        // The landing dashboard is visible to every signed-in user.
        .route("/home", RequireBy::authenticated())
        // Stock management: staff capability, independent of exact role.
        .route("/inventory", RequireBy::permission("manage-inventory"))
        // Field operations: distribution runs and their beneficiaries.
        .route("/distributions", RequireBy::permission("record-distributions"))
        .route("/beneficiaries", RequireBy::permission("manage-beneficiaries"))
        // Reporting views are role-gated rather than permission-gated.
        .route("/analytics", RequireBy::roles([Role::Admin, Role::Staff]))
        .route(
            "/donations",
            RequireBy::roles([Role::Admin, Role::Staff, Role::Donor]),
        )
        // User administration, including everything nested below it.
        .route("/admin/users", RequireBy::roles([Role::Admin]))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_admin_paths_inherit_the_admin_requirement() {
        let table = view_requirements();
        assert_eq!(
            table.lookup("/admin/users/some-id"),
            Some(&RequireBy::roles([Role::Admin]))
        );
    }

    #[test]
    fn entry_pages_are_not_protected_routes() {
        let table = view_requirements();
        assert_eq!(table.lookup("/login"), None);
        assert_eq!(table.lookup("/register"), None);
    }
}
