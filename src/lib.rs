use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
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

// Access model.
pub mod access;
pub mod collections;
pub mod query;
pub mod roles;

// Services and HTTP surface.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod preview;
pub mod repository;

// Public, authenticated and preview routers.
pub mod routes;
use auth::AuthUser;
use routes::{authenticated, preview as preview_routes, public};

// --- Public Re-exports ---

pub use access::{AccessContext, AccessDecision, Predicate};
pub use auth::{AuthState, Authenticator, JwtAuthenticator};
pub use config::AppConfig;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use roles::{Role, RoleHierarchy};

/// ApiDoc
///
/// OpenAPI document for every endpoint, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_pages, handlers::get_page_by_slug, handlers::create_page,
        handlers::update_page, handlers::delete_page, handlers::get_page_preview_url,
        handlers::list_users, handlers::get_me, handlers::get_user, handlers::create_user,
        handlers::update_user, handlers::delete_user, handlers::list_media,
        handlers::create_media, handlers::update_media, handlers::delete_media,
        handlers::get_access, preview::preview_init, preview::preview_exit
    ),
    components(
        schemas(
            roles::Role, models::User, models::Page, models::PageStatus, models::Media,
            models::CreateUserRequest, models::UpdateUserRequest, models::CreatePageRequest,
            models::UpdatePageRequest, models::CreateMediaRequest, models::UpdateMediaRequest,
            handlers::PreviewUrlResponse,
        )
    ),
    tags(
        (name = "site-access", description = "Role-based access and draft preview API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Shared across all requests. Collaborators sit behind trait objects so tests can
/// swap in the in-memory repository and a stub authenticator.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub auth: AuthState,
    pub config: AppConfig,
    /// Injected ordering used by every role check.
    pub roles: RoleHierarchy,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(app_state: &AppState) -> AuthState {
        app_state.auth.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects with 401 before the handler runs when `AuthUser` cannot be extracted.
/// The resolved user is stored in the request extensions so the handler's extractors
/// do not authenticate a second time. Role checks happen afterwards, in the handlers.
async fn auth_middleware(auth_user: AuthUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// create_router
///
/// Assembles the routers, the auth layer, Swagger UI and the tracing stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .nest("/preview", preview_routes::preview_routes())
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// Span for every request, correlated by `x-request-id`.
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
