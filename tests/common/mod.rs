#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use site_access::{
    AppState, create_router,
    auth::JwtAuthenticator,
    config::AppConfig,
    models::{Page, PageStatus, User},
    repository::InMemoryRepository,
    roles::{Role, RoleHierarchy},
};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const PAYLOAD_SECRET: &str = "integration-payload-secret";
pub const PREVIEW_SECRET: &str = "integration-preview-secret";

pub const ADMIN: Uuid = Uuid::from_u128(0xA);
pub const EDITOR: Uuid = Uuid::from_u128(0xE);
pub const CONTRIBUTOR: Uuid = Uuid::from_u128(0xC);
pub const READER: Uuid = Uuid::from_u128(0x1);

pub const PUBLISHED_PAGE: Uuid = Uuid::from_u128(0x100);
pub const DRAFT_PAGE: Uuid = Uuid::from_u128(0x200);
pub const LEGACY_PAGE: Uuid = Uuid::from_u128(0x300);

fn user(id: Uuid, email: &str, role: Role) -> User {
    let now = Utc::now();
    User {
        id,
        email: email.to_string(),
        name: role.as_str().to_string(),
        role: Some(role),
        created_at: now,
        updated_at: now,
    }
}

fn page(id: Uuid, slug: &str, status: Option<PageStatus>) -> Page {
    let now = Utc::now();
    Page {
        id,
        title: slug.to_string(),
        slug: slug.to_string(),
        status,
        published_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        payload_secret: PAYLOAD_SECRET.to_string(),
        preview_secret: PREVIEW_SECRET.to_string(),
        server_url: "https://site.example".to_string(),
        ..AppConfig::default()
    }
}

/// Router over an in-memory store holding one user per role and three pages:
/// `home` (published), `secret-plan` (draft) and `legacy` (no status).
/// `AppConfig::default()` is local, so `x-user-id` authenticates.
pub async fn test_app() -> Router {
    let repo = InMemoryRepository::new();
    repo.seed_user(user(ADMIN, "admin@example.com", Role::Admin)).await;
    repo.seed_user(user(EDITOR, "editor@example.com", Role::Editor)).await;
    repo.seed_user(user(CONTRIBUTOR, "contributor@example.com", Role::Contributor))
        .await;
    repo.seed_user(user(READER, "reader@example.com", Role::Reader)).await;
    repo.seed_page(page(PUBLISHED_PAGE, "home", Some(PageStatus::Published)))
        .await;
    repo.seed_page(page(DRAFT_PAGE, "secret-plan", Some(PageStatus::Draft)))
        .await;
    repo.seed_page(page(LEGACY_PAGE, "legacy", None)).await;

    let repo = Arc::new(repo);
    let config = test_config();
    create_router(AppState {
        auth: Arc::new(JwtAuthenticator::new(repo.clone(), config.clone())),
        repo,
        config,
        roles: RoleHierarchy::default(),
    })
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// Every `Set-Cookie` header, in order.
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }
}

pub struct TestRequest {
    method: Method,
    uri: String,
    headers: Vec<(header::HeaderName, String)>,
    body: Option<Value>,
}

impl TestRequest {
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            headers: vec![],
            body: None,
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn as_user(self, id: Uuid) -> Self {
        self.header(header::HeaderName::from_static("x-user-id"), &id.to_string())
    }

    pub fn cookie(self, cookie: &str) -> Self {
        self.header(header::COOKIE, cookie)
    }

    pub fn header(mut self, name: header::HeaderName, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub async fn send(self, app: &Router) -> TestResponse {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        let request = match self.body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Slugs of a JSON page list, sorted.
pub fn slugs(body: &Value) -> Vec<String> {
    let mut slugs: Vec<String> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["slug"].as_str().unwrap().to_string())
        .collect();
    slugs.sort();
    slugs
}
