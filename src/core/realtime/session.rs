//! Outbound realtime websocket leg.
//!
//! One [`RealtimeSession`] per call, exclusively owned by that call's
//! session. Connection tries each candidate URL in order; a handshake
//! rejection carrying a redirect is followed exactly once per unique URL
//! (visited set), and exhausting every candidate produces one aggregate
//! error with all underlying causes.
//!
//! After connection a single spawned task services both directions: a
//! channel feeds the sink with audio and control frames, and inbound frames
//! are normalized (see [`super::events`]) onto the session's event channel.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::header::{HeaderValue, AUTHORIZATION, LOCATION};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use super::events::{normalize_text_frame, AiEvent};
use crate::core::tools::ToolResponse;
use crate::errors::{RealtimeError, RealtimeResult};

/// Channel capacity for outbound frames.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Control frames sent to the provider.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ClientFrame {
    /// Close the caller's input segment: the turn is over.
    #[serde(rename = "input_audio_buffer.commit")]
    Commit {},
    /// Ask the assistant to respond to the committed input.
    #[serde(rename = "response.create")]
    ResponseCreate {},
    /// Interrupt the in-flight assistant response (barge-in).
    #[serde(rename = "response.cancel")]
    ResponseCancel {},
    /// Result envelope for a dispatched tool call.
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(flatten)]
        response: ToolResponse,
    },
}

/// Frames queued for the sink task.
enum Outbound {
    Audio(Bytes),
    Control(ClientFrame),
    Close,
}

/// Live session on the AI leg.
pub struct RealtimeSession {
    provider_call_id: String,
    closed: Arc<AtomicBool>,
    outbound: mpsc::Sender<Outbound>,
    task: JoinHandle<()>,
}

impl RealtimeSession {
    /// Attempt each candidate URL in order and return a connected session.
    pub async fn connect(
        provider_call_id: String,
        candidates: Vec<String>,
        api_key: String,
        events_tx: mpsc::Sender<AiEvent>,
    ) -> RealtimeResult<Self> {
        let mut queue: VecDeque<String> = candidates.into();
        let mut visited: HashSet<String> = HashSet::new();
        let mut causes: Vec<String> = Vec::new();
        let mut connected = None;

        while let Some(url) = queue.pop_front() {
            if !visited.insert(url.clone()) {
                continue;
            }

            let mut request = match url.as_str().into_client_request() {
                Ok(r) => r,
                Err(e) => {
                    causes.push(format!("{url}: invalid URL: {e}"));
                    continue;
                }
            };
            match HeaderValue::from_str(&format!("Bearer {api_key}")) {
                Ok(header) => {
                    request.headers_mut().insert(AUTHORIZATION, header);
                }
                Err(e) => {
                    causes.push(format!("{url}: invalid credentials header: {e}"));
                    continue;
                }
            }

            match tokio_tungstenite::connect_async(request).await {
                Ok((stream, _)) => {
                    info!(provider_call_id = %provider_call_id, url = %url, "Realtime session connected");
                    connected = Some(stream);
                    break;
                }
                Err(tungstenite::Error::Http(response)) => {
                    causes.push(format!(
                        "{url}: handshake rejected with {}",
                        response.status()
                    ));
                    if let Some(target) = redirect_target(&response) {
                        if visited.contains(&target) {
                            debug!(url = %target, "Ignoring already-visited redirect target");
                        } else {
                            debug!(url = %target, "Following handshake redirect");
                            queue.push_front(target);
                        }
                    }
                }
                Err(e) => causes.push(format!("{url}: {e}")),
            }
        }

        let Some(stream) = connected else {
            return Err(RealtimeError::AllCandidatesFailed { causes });
        };

        let closed = Arc::new(AtomicBool::new(false));
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CHANNEL_CAPACITY);
        let (mut sink, mut source) = stream.split();
        let task_closed = closed.clone();
        let task_call_id = provider_call_id.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_out = outbound_rx.recv() => match maybe_out {
                        Some(Outbound::Audio(audio)) => {
                            if let Err(e) = sink.send(Message::Binary(audio)).await {
                                warn!(provider_call_id = %task_call_id, "Audio send failed: {e}");
                                break;
                            }
                        }
                        Some(Outbound::Control(frame)) => {
                            let json = match serde_json::to_string(&frame) {
                                Ok(j) => j,
                                Err(e) => {
                                    error!("Failed to serialize control frame: {e}");
                                    continue;
                                }
                            };
                            if let Err(e) = sink.send(Message::Text(json.into())).await {
                                warn!(provider_call_id = %task_call_id, "Control send failed: {e}");
                                break;
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },

                    maybe_in = source.next() => match maybe_in {
                        Some(Ok(Message::Binary(audio))) => {
                            if events_tx.send(AiEvent::Audio(audio)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = normalize_text_frame(&text) {
                                if events_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(provider_call_id = %task_call_id, "Realtime socket closed by provider");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(provider_call_id = %task_call_id, "Realtime socket error: {e}");
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }

            task_closed.store(true, Ordering::SeqCst);
            let _ = events_tx.send(AiEvent::SessionClosed).await;
        });

        Ok(Self {
            provider_call_id,
            closed,
            outbound: outbound_tx,
            task,
        })
    }

    /// Provider-side identifier for this session.
    pub fn provider_call_id(&self) -> &str {
        &self.provider_call_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Forward raw companded carrier audio unmodified.
    pub async fn send_audio(&self, audio: Bytes) -> RealtimeResult<()> {
        self.send(Outbound::Audio(audio)).await
    }

    /// Signal end-of-turn: commit the input buffer and request a response.
    pub async fn commit_turn(&self) -> RealtimeResult<()> {
        self.send(Outbound::Control(ClientFrame::Commit {})).await?;
        self.send(Outbound::Control(ClientFrame::ResponseCreate {}))
            .await
    }

    /// Interrupt an in-flight assistant response.
    pub async fn cancel_response(&self) -> RealtimeResult<()> {
        self.send(Outbound::Control(ClientFrame::ResponseCancel {}))
            .await
    }

    /// Return a tool result correlated to its call id.
    pub async fn submit_tool_result(&self, response: ToolResponse) -> RealtimeResult<()> {
        self.send(Outbound::Control(ClientFrame::ToolResult { response }))
            .await
    }

    /// Close the session. Idempotent: later calls are no-ops.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close).await;
        }
    }

    async fn send(&self, frame: Outbound) -> RealtimeResult<()> {
        if self.is_closed() {
            return Err(RealtimeError::Closed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| RealtimeError::Closed)
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        // The socket task must not outlive its owning call
        self.task.abort();
    }
}

/// Pull a redirect target from a rejected handshake response: `Location`
/// header first, then a `location` field in a JSON body.
fn redirect_target(response: &http::Response<Option<Vec<u8>>>) -> Option<String> {
    if let Some(location) = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
    {
        return Some(location.to_string());
    }

    let body = response.body().as_deref()?;
    let parsed: serde_json::Value = serde_json::from_slice(body).ok()?;
    parsed
        .get("location")
        .and_then(serde_json::Value::as_str)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tools::ToolOutcome;
    use serde_json::json;

    #[test]
    fn test_control_frame_wire_shapes() {
        let commit = serde_json::to_value(ClientFrame::Commit {}).unwrap();
        assert_eq!(commit, json!({"type": "input_audio_buffer.commit"}));

        let create = serde_json::to_value(ClientFrame::ResponseCreate {}).unwrap();
        assert_eq!(create, json!({"type": "response.create"}));

        let result = serde_json::to_value(ClientFrame::ToolResult {
            response: ToolResponse {
                id: "tc_4".into(),
                outcome: ToolOutcome::ok(json!({"transferred": true})),
            },
        })
        .unwrap();
        assert_eq!(result["type"], json!("tool_result"));
        assert_eq!(result["id"], json!("tc_4"));
        assert_eq!(result["success"], json!(true));
    }

    #[test]
    fn test_redirect_target_prefers_location_header() {
        let response = http::Response::builder()
            .status(302)
            .header(LOCATION, "wss://next.example/ws")
            .body(Some(b"{\"location\": \"wss://body.example/ws\"}".to_vec()))
            .unwrap();
        assert_eq!(
            redirect_target(&response),
            Some("wss://next.example/ws".to_string())
        );
    }

    #[test]
    fn test_redirect_target_from_json_body() {
        let response = http::Response::builder()
            .status(409)
            .body(Some(b"{\"location\": \"wss://body.example/ws\"}".to_vec()))
            .unwrap();
        assert_eq!(
            redirect_target(&response),
            Some("wss://body.example/ws".to_string())
        );
    }

    #[test]
    fn test_redirect_target_absent() {
        let response = http::Response::builder()
            .status(403)
            .body(Some(b"forbidden".to_vec()))
            .unwrap();
        assert_eq!(redirect_target(&response), None);

        let empty = http::Response::builder().status(500).body(None).unwrap();
        assert_eq!(redirect_target(&empty), None);
    }

    fn detached_session() -> (RealtimeSession, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(4);
        let session = RealtimeSession {
            provider_call_id: "rc_1".into(),
            closed: Arc::new(AtomicBool::new(false)),
            outbound,
            task: tokio::spawn(async {}),
        };
        (session, rx)
    }

    #[tokio::test]
    async fn test_close_twice_sends_one_close_frame() {
        let (session, mut rx) = detached_session();

        session.close().await;
        session.close().await;

        assert!(session.is_closed());
        assert!(matches!(rx.recv().await, Some(Outbound::Close)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sends_after_close_are_refused() {
        let (session, _rx) = detached_session();
        session.close().await;

        let result = session.send_audio(Bytes::from_static(b"\xff\xff")).await;
        assert!(matches!(result, Err(RealtimeError::Closed)));
        assert!(matches!(
            session.commit_turn().await,
            Err(RealtimeError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connect_with_no_candidates_aggregates() {
        let (events_tx, _events_rx) = mpsc::channel(4);
        let result =
            RealtimeSession::connect("rc_0".into(), vec![], "key".into(), events_tx).await;
        match result {
            Err(RealtimeError::AllCandidatesFailed { causes }) => assert!(causes.is_empty()),
            Err(other) => panic!("expected aggregate error, got {other:?}"),
            Ok(_) => panic!("connect succeeded with no candidates"),
        }
    }

    #[tokio::test]
    async fn test_connect_records_cause_per_bad_candidate() {
        let (events_tx, _events_rx) = mpsc::channel(4);
        let result = RealtimeSession::connect(
            "rc_0".into(),
            vec!["not a url".into(), "also bad".into()],
            "key".into(),
            events_tx,
        )
        .await;
        match result {
            Err(RealtimeError::AllCandidatesFailed { causes }) => assert_eq!(causes.len(), 2),
            Err(other) => panic!("expected aggregate error, got {other:?}"),
            Ok(_) => panic!("connect succeeded against invalid candidates"),
        }
    }
}
