use crate::{AppState, preview};
use axum::{Router, routing::get};

/// Preview Router Module
///
/// Nested under `/preview`. Init does its own authentication because a failed
/// attempt must also clear the draft cookie; exit needs none.
pub fn preview_routes() -> Router<AppState> {
    Router::new()
        // GET /preview/init?path=..&collection=..&slug=..&previewSecret=..
        .route("/init", get(preview::preview_init))
        // GET /preview/exit
        .route("/exit", get(preview::preview_exit))
}
