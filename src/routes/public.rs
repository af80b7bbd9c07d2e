use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Reachable without credentials. Anonymous page reads only ever see published (or
/// unversioned) pages unless the request carries a valid draft cookie.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        .route("/health", get(|| async { "ok" }))
        // GET /access
        // What the current caller may do, per collection and operation.
        .route("/access", get(handlers::get_access))
        // GET /pages?slug=...
        .route("/pages", get(handlers::list_pages))
        // GET /pages/{slug}
        // Shares its parameter name with the authenticated `/pages/{id}` routes, the
        // router allows only one name per segment.
        .route("/pages/{id}", get(handlers::get_page_by_slug))
        // GET /media
        .route("/media", get(handlers::list_media))
}
