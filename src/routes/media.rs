//! Carrier media-stream route configuration.
//!
//! # Endpoint
//!
//! `GET /media?to=<number>` - WebSocket upgrade for a carrier media stream.
//!
//! The `to` query parameter carries the dialed destination number and is
//! required; an absent or invalid value is rejected with a plain-text 400
//! before any upgrade happens. After the upgrade the carrier speaks its
//! media-stream protocol: a `start` event opens the call session, `media`
//! events carry base64 companded audio, `stop` ends the call.

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::media::media_ws_handler;
use crate::state::AppState;

/// Create the media websocket router.
pub fn create_media_router() -> Router<AppState> {
    Router::new()
        .route("/media", get(media_ws_handler))
        .layer(TraceLayer::new_for_http())
}
