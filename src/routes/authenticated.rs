use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, post},
};

/// Authenticated Router Module
///
/// Every route here sits behind the `AuthUser` layer, so anonymous callers get 401.
/// Handlers then evaluate the collection predicate: 403 on deny, and filtered
/// decisions scope the storage call so a non-matching target is a 404.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Pages ---
        .route("/pages", post(handlers::create_page))
        .route(
            "/pages/{id}",
            patch(handlers::update_page).delete(handlers::delete_page),
        )
        // GET /pages/{id}/preview-url
        // Preview link for editors; carries the preview secret.
        .route("/pages/{id}/preview-url", get(handlers::get_page_preview_url))
        // --- Users ---
        .route("/users", get(handlers::list_users).post(handlers::create_user))
        // GET /users/me
        .route("/users/me", get(handlers::get_me))
        .route(
            "/users/{id}",
            get(handlers::get_user)
                .patch(handlers::update_user)
                .delete(handlers::delete_user),
        )
        // --- Media ---
        .route("/media", post(handlers::create_media))
        .route(
            "/media/{id}",
            patch(handlers::update_media).delete(handlers::delete_media),
        )
}
