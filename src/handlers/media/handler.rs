//! Carrier websocket upgrade and pre-start handshake.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::messages::CarrierFrame;
use crate::session::call;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    /// Dialed destination number, used to resolve the business.
    to: Option<String>,
}

/// A plausible dialed number: optional leading `+`, then digits only.
fn valid_destination(raw: &str) -> bool {
    let digits = raw.strip_prefix('+').unwrap_or(raw);
    !digits.is_empty() && digits.len() <= 20 && digits.chars().all(|c| c.is_ascii_digit())
}

/// Upgrade handler for the carrier media stream. The destination number is
/// validated before the upgrade so a bad request gets a plain 400 and no
/// socket.
pub async fn media_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<MediaQuery>,
    State(state): State<AppState>,
) -> Response {
    let destination = match query.to {
        Some(to) if valid_destination(&to) => to,
        other => {
            warn!(?other, "Rejecting media upgrade with missing or invalid 'to'");
            return (
                StatusCode::BAD_REQUEST,
                "missing or invalid 'to' query parameter",
            )
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| accept_media_socket(socket, destination, state))
}

/// Read frames until the carrier's start event, buffering any media that
/// arrives early, then hand everything to exactly one call session.
async fn accept_media_socket(mut socket: WebSocket, destination: String, state: AppState) {
    let mut buffered: Vec<Bytes> = Vec::new();

    loop {
        let message = match socket.recv().await {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!("Carrier socket error before start: {e}");
                return;
            }
            None => {
                debug!("Carrier socket closed before start");
                return;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return,
            _ => continue,
        };

        match serde_json::from_str::<CarrierFrame>(&text) {
            Ok(CarrierFrame::Start { stream_sid, start }) => {
                info!(call_sid = %start.call_sid, stream_sid = %stream_sid, "Media stream started");
                call::run(socket, destination, stream_sid, start, buffered, state).await;
                return;
            }
            Ok(CarrierFrame::Media { media }) => {
                if let Some(audio) = media.decode() {
                    buffered.push(audio);
                }
            }
            Ok(CarrierFrame::Stop) => {
                debug!("Carrier stopped before start");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Unparseable pre-start frame: {e}");
            }
        }
    }
}
