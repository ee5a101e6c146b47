//! HTTP/WebSocket route assembly.

pub mod media;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Full application router: media websocket plus liveness probe.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(media::create_media_router())
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
