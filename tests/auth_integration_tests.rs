use async_trait::async_trait;
use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{HeaderMap, Method, Request, StatusCode, Uri, header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use site_access::{
    AppState,
    access::AccessContext,
    auth::{AuthError, AuthUser, Authenticator, Claims, JwtAuthenticator},
    config::{AppConfig, Env},
    models::User,
    preview::{DRAFT_COOKIE, issue_draft_token},
    repository::InMemoryRepository,
    create_router,
    roles::{Role, RoleHierarchy},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::SystemTime,
};
use tower::ServiceExt;
use uuid::Uuid;

// --- Helper Functions ---

const TEST_SECRET: &str = "test-secret-value-1234567890";
const TEST_USER_ID: Uuid = Uuid::from_u128(1);

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Signs a session token; a negative offset produces an already expired one.
fn create_token(user_id: Uuid, exp_offset: i64, secret: &str) -> String {
    let now = now_secs() as i64;
    let claims = Claims {
        sub: user_id,
        iat: now as usize,
        exp: (now + exp_offset) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

fn editor() -> User {
    let now = Utc::now();
    User {
        id: TEST_USER_ID,
        email: "editor@example.com".to_string(),
        name: "Ed".to_string(),
        role: Some(Role::Editor),
        created_at: now,
        updated_at: now,
    }
}

async fn create_app_state(env: Env, users: Vec<User>) -> AppState {
    let repo = InMemoryRepository::new();
    for user in users {
        repo.seed_user(user).await;
    }
    let repo = Arc::new(repo);

    let config = AppConfig {
        env,
        payload_secret: TEST_SECRET.to_string(),
        ..AppConfig::default()
    };

    AppState {
        auth: Arc::new(JwtAuthenticator::new(repo.clone(), config.clone())),
        repo,
        config,
        roles: RoleHierarchy::default(),
    }
}

fn get_request_parts(method: Method, uri: Uri) -> Parts {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let (parts, _) = request.into_parts();
    parts
}

fn with_header(mut parts: Parts, name: header::HeaderName, value: &str) -> Parts {
    parts
        .headers
        .insert(name, header::HeaderValue::from_str(value).unwrap());
    parts
}

/// Always yields the editor and counts how often it was asked.
struct CountingAuthenticator {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Authenticator for CountingAuthenticator {
    async fn authenticate(&self, _headers: &HeaderMap) -> Result<Option<User>, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(editor()))
    }
}

// --- AuthUser ---

#[tokio::test]
async fn test_auth_success_with_bearer_token() {
    let state = create_app_state(Env::Production, vec![editor()]).await;
    let token = create_token(TEST_USER_ID, 3600, TEST_SECRET);

    let mut parts = with_header(
        get_request_parts(Method::GET, "/".parse().unwrap()),
        header::AUTHORIZATION,
        &format!("Bearer {token}"),
    );

    let user = AuthUser::from_request_parts(&mut parts, &state).await.unwrap();
    assert_eq!(user.id, TEST_USER_ID);
    assert_eq!(user.role, Some(Role::Editor));
}

#[tokio::test]
async fn test_auth_success_with_jwt_scheme_and_cookie() {
    let state = create_app_state(Env::Production, vec![editor()]).await;
    let token = create_token(TEST_USER_ID, 3600, TEST_SECRET);

    let mut parts = with_header(
        get_request_parts(Method::GET, "/".parse().unwrap()),
        header::AUTHORIZATION,
        &format!("JWT {token}"),
    );
    assert!(AuthUser::from_request_parts(&mut parts, &state).await.is_ok());

    let mut parts = with_header(
        get_request_parts(Method::GET, "/".parse().unwrap()),
        header::COOKIE,
        &format!("payload-token={token}"),
    );
    assert!(AuthUser::from_request_parts(&mut parts, &state).await.is_ok());
}

#[tokio::test]
async fn test_auth_failure_with_missing_header() {
    let state = create_app_state(Env::Production, vec![editor()]).await;
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());

    let rejection = AuthUser::from_request_parts(&mut parts, &state)
        .await
        .unwrap_err();
    assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_failure_with_expired_token() {
    let state = create_app_state(Env::Production, vec![editor()]).await;
    // Well past the default validation leeway.
    let token = create_token(TEST_USER_ID, -600, TEST_SECRET);

    let mut parts = with_header(
        get_request_parts(Method::GET, "/".parse().unwrap()),
        header::AUTHORIZATION,
        &format!("Bearer {token}"),
    );

    let rejection = AuthUser::from_request_parts(&mut parts, &state)
        .await
        .unwrap_err();
    assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_failure_with_foreign_signature() {
    let state = create_app_state(Env::Production, vec![editor()]).await;
    let token = create_token(TEST_USER_ID, 3600, "some-other-secret");

    let mut parts = with_header(
        get_request_parts(Method::GET, "/".parse().unwrap()),
        header::AUTHORIZATION,
        &format!("Bearer {token}"),
    );

    assert!(AuthUser::from_request_parts(&mut parts, &state).await.is_err());
}

#[tokio::test]
async fn test_auth_failure_for_deleted_user() {
    let state = create_app_state(Env::Production, vec![]).await;
    let token = create_token(TEST_USER_ID, 3600, TEST_SECRET);

    let mut parts = with_header(
        get_request_parts(Method::GET, "/".parse().unwrap()),
        header::AUTHORIZATION,
        &format!("Bearer {token}"),
    );

    let rejection = AuthUser::from_request_parts(&mut parts, &state)
        .await
        .unwrap_err();
    assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_local_bypass_success() {
    let state = create_app_state(Env::Local, vec![editor()]).await;
    let mut parts = with_header(
        get_request_parts(Method::GET, "/".parse().unwrap()),
        header::HeaderName::from_static("x-user-id"),
        &TEST_USER_ID.to_string(),
    );

    let user = AuthUser::from_request_parts(&mut parts, &state).await.unwrap();
    assert_eq!(user.id, TEST_USER_ID);
}

#[tokio::test]
async fn test_local_bypass_disabled_in_prod() {
    let state = create_app_state(Env::Production, vec![editor()]).await;
    let mut parts = with_header(
        get_request_parts(Method::GET, "/".parse().unwrap()),
        header::HeaderName::from_static("x-user-id"),
        &TEST_USER_ID.to_string(),
    );

    let rejection = AuthUser::from_request_parts(&mut parts, &state)
        .await
        .unwrap_err();
    assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
}

// --- AccessContext ---

#[tokio::test]
async fn test_access_context_degrades_to_anonymous_on_bad_credentials() {
    let state = create_app_state(Env::Production, vec![editor()]).await;
    let mut parts = with_header(
        get_request_parts(Method::GET, "/pages".parse().unwrap()),
        header::AUTHORIZATION,
        "Bearer not-a-jwt",
    );

    let ctx = AccessContext::from_request_parts(&mut parts, &state)
        .await
        .unwrap();
    assert!(ctx.user.is_none());
    assert!(!ctx.draft.is_enabled());
}

#[tokio::test]
async fn test_access_context_carries_user_and_draft_flag() {
    let state = create_app_state(Env::Production, vec![editor()]).await;
    let session = create_token(TEST_USER_ID, 3600, TEST_SECRET);
    let draft = issue_draft_token(TEST_USER_ID, TEST_SECRET, 600).unwrap();

    let parts = with_header(
        get_request_parts(Method::GET, "/pages".parse().unwrap()),
        header::AUTHORIZATION,
        &format!("Bearer {session}"),
    );
    let mut parts = with_header(
        parts,
        header::COOKIE,
        &format!("{DRAFT_COOKIE}={draft}"),
    );

    let ctx = AccessContext::from_request_parts(&mut parts, &state)
        .await
        .unwrap();
    assert_eq!(ctx.user.map(|u| u.role), Some(Some(Role::Editor)));
    assert!(ctx.draft.is_enabled());
}

#[tokio::test]
async fn test_forged_draft_cookie_is_ignored() {
    let state = create_app_state(Env::Production, vec![]).await;
    let forged = issue_draft_token(TEST_USER_ID, "attacker-secret", 600).unwrap();

    for value in [forged.as_str(), "1", "true"] {
        let mut parts = with_header(
            get_request_parts(Method::GET, "/pages".parse().unwrap()),
            header::COOKIE,
            &format!("{DRAFT_COOKIE}={value}"),
        );
        let ctx = AccessContext::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(!ctx.draft.is_enabled(), "cookie {value:?} enabled drafts");
    }
}

#[tokio::test]
async fn test_draft_cookie_of_unknown_user_is_ignored() {
    let state = create_app_state(Env::Production, vec![]).await;
    // Correctly signed, but its subject no longer exists.
    let draft = issue_draft_token(TEST_USER_ID, TEST_SECRET, 600).unwrap();

    let mut parts = with_header(
        get_request_parts(Method::GET, "/pages".parse().unwrap()),
        header::COOKIE,
        &format!("{DRAFT_COOKIE}={draft}"),
    );
    let ctx = AccessContext::from_request_parts(&mut parts, &state)
        .await
        .unwrap();
    assert!(!ctx.draft.is_enabled());
}

// --- Router ---

#[tokio::test]
async fn test_authenticated_route_resolves_identity_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut state = create_app_state(Env::Production, vec![editor()]).await;
    state.auth = Arc::new(CountingAuthenticator {
        calls: calls.clone(),
    });
    let app = create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/users")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
