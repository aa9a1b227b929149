use relief_portal::{
    AppState, MockRepository, create_router,
    config::AppConfig,
    error::ErrorBody,
    models::{Role, UserProfile, UserRecord},
    repository::{Repository, RepositoryState},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

struct TestApp {
    address: String,
    repo: Arc<MockRepository>,
}

async fn spawn_app(repo: MockRepository) -> TestApp {
    let repo = Arc::new(repo);
    // AppConfig::default() runs in Env::Local, which enables the x-user-id
    // bypass the tests authenticate with.
    let state = AppState::new(repo.clone() as RepositoryState, AppConfig::default());
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp { address, repo }
}

fn client() -> reqwest::Client {
    // Redirects stay visible to the assertions.
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn user(role: Role) -> UserRecord {
    UserRecord {
        id: Uuid::new_v4(),
        email: format!("{}@relief.example", role),
        role,
        created_at: chrono::Utc::now(),
    }
}

fn sid_from(response: &reqwest::Response) -> String {
    let cookie = response
        .headers()
        .get("set-cookie")
        .expect("view gate should issue a session cookie")
        .to_str()
        .unwrap();
    cookie.split(';').next().unwrap().trim().to_string()
}

#[tokio::test]
async fn health_check_works() {
    let app = spawn_app(MockRepository::new()).await;
    let response = client()
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
}

// --- Admin endpoints ---

#[tokio::test]
async fn admin_sees_the_full_user_listing() {
    let admin = user(Role::Admin);
    let staff = user(Role::Staff);
    let app = spawn_app(
        MockRepository::new()
            .with_user(admin.clone())
            .with_user(staff.clone()),
    )
    .await;

    let response = client()
        .get(format!("{}/admin/users", app.address))
        .header("x-user-id", admin.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let users: Vec<UserRecord> = response.json().await.unwrap();
    assert_eq!(users.len(), 2);
}

#[tokio::test]
async fn non_admin_listing_is_denied_not_filtered() {
    let staff = user(Role::Staff);
    let app = spawn_app(MockRepository::new().with_user(staff.clone())).await;

    let response = client()
        .get(format!("{}/admin/users", app.address))
        .header("x-user-id", staff.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.error, "permission-denied");
}

#[tokio::test]
async fn staff_caller_cannot_change_roles_and_the_record_stays_put() {
    let staff = user(Role::Staff);
    let target = user(Role::Volunteer);
    let app = spawn_app(
        MockRepository::new()
            .with_user(staff.clone())
            .with_user(target.clone()),
    )
    .await;

    let response = client()
        .put(format!("{}/admin/users/{}/role", app.address, target.id))
        .header("x-user-id", staff.id.to_string())
        .json(&serde_json::json!({ "new_role": "staff" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.error, "permission-denied");

    // The target's stored role is unchanged.
    let stored = app.repo.get_user(target.id).await.unwrap();
    assert_eq!(stored.role, Role::Volunteer);
}

#[tokio::test]
async fn role_values_outside_the_closed_set_are_rejected() {
    let admin = user(Role::Admin);
    let target = user(Role::Volunteer);
    let app = spawn_app(
        MockRepository::new()
            .with_user(admin.clone())
            .with_user(target.clone()),
    )
    .await;

    let response = client()
        .put(format!("{}/admin/users/{}/role", app.address, target.id))
        .header("x-user-id", admin.id.to_string())
        .json(&serde_json::json!({ "new_role": "superuser" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.error, "invalid-argument");
}

#[tokio::test]
async fn unknown_target_user_is_an_invalid_argument() {
    let admin = user(Role::Admin);
    let app = spawn_app(MockRepository::new().with_user(admin.clone())).await;

    let response = client()
        .put(format!(
            "{}/admin/users/{}/role",
            app.address,
            Uuid::new_v4()
        ))
        .header("x-user-id", admin.id.to_string())
        .json(&serde_json::json!({ "new_role": "staff" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn claims_mirror_failure_is_internal_and_leaks_nothing() {
    let admin = user(Role::Admin);
    let app = spawn_app(MockRepository::new_failing_claims().with_user(admin.clone())).await;

    let response = client()
        .put(format!("{}/admin/users/{}/role", app.address, admin.id))
        .header("x-user-id", admin.id.to_string())
        .json(&serde_json::json!({ "new_role": "staff" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.error, "internal");
    assert!(!body.message.contains("claims"));

    // Rolled back: the stored role did not change.
    let stored = app.repo.get_user(admin.id).await.unwrap();
    assert_eq!(stored.role, Role::Admin);
}

#[tokio::test]
async fn admin_role_update_round_trips() {
    let admin = user(Role::Admin);
    let target = user(Role::Volunteer);
    let app = spawn_app(
        MockRepository::new()
            .with_user(admin.clone())
            .with_user(target.clone()),
    )
    .await;

    let response = client()
        .put(format!("{}/admin/users/{}/role", app.address, target.id))
        .header("x-user-id", admin.id.to_string())
        .json(&serde_json::json!({ "new_role": "staff" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let updated: UserRecord = response.json().await.unwrap();
    assert_eq!(updated.role, Role::Staff);
    assert_eq!(app.repo.get_user(target.id).await.unwrap().role, Role::Staff);
}

// --- View gate navigation ---

#[tokio::test]
async fn anonymous_navigation_is_redirected_to_login_and_remembered() {
    let admin = user(Role::Admin);
    let app = spawn_app(MockRepository::new().with_user(admin.clone())).await;
    let client = client();

    // Anonymous visitor aims at the inventory view.
    let response = client
        .get(format!("{}/views/inventory", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
    assert_eq!(response.headers()["location"], "/views/login");
    let sid = sid_from(&response);

    // After sign-in, the client asks where to go: the remembered target.
    let response = client
        .post(format!("{}/session/login", app.address))
        .header("x-user-id", admin.id.to_string())
        .header("Cookie", &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["redirect_to"], "/inventory");

    // The slot was consumed: a second completion falls back to home.
    let response = client
        .post(format!("{}/session/login", app.address))
        .header("x-user-id", admin.id.to_string())
        .header("Cookie", &sid)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["redirect_to"], "/home");
}

#[tokio::test]
async fn denied_navigation_records_the_origin_for_go_back() {
    let volunteer = user(Role::Volunteer);
    let app = spawn_app(MockRepository::new().with_user(volunteer.clone())).await;
    let client = client();

    let response = client
        .get(format!("{}/views/analytics", app.address))
        .header("x-user-id", volunteer.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
    assert_eq!(response.headers()["location"], "/views/unauthorized");
    let sid = sid_from(&response);

    // The unauthorized page renders for the denied principal.
    let response = client
        .get(format!("{}/views/unauthorized", app.address))
        .header("x-user-id", volunteer.id.to_string())
        .header("Cookie", &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // And its "go back" affordance reads the consumed origin once.
    let response = client
        .get(format!("{}/session/denied-origin", app.address))
        .header("Cookie", &sid)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["origin"], "/analytics");

    let response = client
        .get(format!("{}/session/denied-origin", app.address))
        .header("Cookie", &sid)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["origin"], "/home");
}

#[tokio::test]
async fn authorized_navigation_renders_the_view() {
    let staff = user(Role::Staff);
    let app = spawn_app(MockRepository::new().with_user(staff.clone())).await;

    let response = client()
        .get(format!("{}/views/inventory", app.address))
        .header("x-user-id", staff.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["path"], "/inventory");
    assert_eq!(body["role"], "staff");
}

#[tokio::test]
async fn signed_in_visitor_is_bounced_off_the_login_page() {
    let staff = user(Role::Staff);
    let app = spawn_app(MockRepository::new().with_user(staff.clone())).await;

    let response = client()
        .get(format!("{}/views/login", app.address))
        .header("x-user-id", staff.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
    // No stored target, so the default landing page.
    assert_eq!(response.headers()["location"], "/views/home");
}

#[tokio::test]
async fn logout_drops_the_remembered_target() {
    let admin = user(Role::Admin);
    let app = spawn_app(MockRepository::new().with_user(admin.clone())).await;
    let client = client();

    let response = client
        .get(format!("{}/views/inventory", app.address))
        .send()
        .await
        .unwrap();
    let sid = sid_from(&response);

    let response = client
        .post(format!("{}/session/logout", app.address))
        .header("Cookie", &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    // Memory for this portal session is gone.
    let response = client
        .post(format!("{}/session/login", app.address))
        .header("x-user-id", admin.id.to_string())
        .header("Cookie", &sid)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["redirect_to"], "/home");
}

#[tokio::test]
async fn unknown_views_are_not_found() {
    let app = spawn_app(MockRepository::new()).await;
    let response = client()
        .get(format!("{}/views/never-registered", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

// --- Profile ---

#[tokio::test]
async fn profile_reports_effective_permissions() {
    let volunteer = user(Role::Volunteer);
    let app = spawn_app(
        MockRepository::new()
            .with_user(volunteer.clone())
            .with_grant(volunteer.id, "manage-inventory"),
    )
    .await;

    let response = client()
        .get(format!("{}/me", app.address))
        .header("x-user-id", volunteer.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let profile: UserProfile = response.json().await.unwrap();
    assert_eq!(profile.role, Role::Volunteer);
    // The explicit grant and the role default are both effective.
    assert!(profile.permissions.contains(&"manage-inventory".to_string()));
    assert!(
        profile
            .permissions
            .contains(&"record-distributions".to_string())
    );
}

#[tokio::test]
async fn unauthenticated_profile_request_is_rejected() {
    let app = spawn_app(MockRepository::new()).await;
    let response = client()
        .get(format!("{}/me", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}
