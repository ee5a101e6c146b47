//! Per-call session: the state machine that owns both socket legs.
//!
//! One [`run`] invocation per carrier socket. The session resolves the
//! business for the dialed number, opens the AI realtime leg, then streams:
//! carrier audio is forwarded raw to the AI leg while a local copy is decoded
//! only for energy measurement and turn detection; AI audio comes back as
//! base64 media frames, with a correlation mark before the first chunk of
//! each spoken turn. Tool calls are queued to a per-call worker task so
//! collaborator latency never stalls the audio path. Teardown releases
//! everything and is idempotent.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::audio::mulaw_frame_energy;
use crate::core::realtime::{AiEvent, RealtimeGateway, RealtimeSession};
use crate::core::tools::{CallBinding, ToolCall, ToolResponse};
use crate::core::vad::{FrameVerdict, TurnDetector};
use crate::handlers::media::messages::{CarrierFrame, OutboundFrame, StartMeta};
use crate::session::registry::{SessionCommand, SessionHandle};
use crate::state::AppState;

/// Carrier-leg keepalive ping period. Each tick also refreshes the
/// registry TTL.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Pending tool calls one session may have queued at once.
const TOOL_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Stop,
}

/// What one caller audio frame demands beyond forwarding. Pure decision,
/// separated from the I/O that carries it out.
#[derive(Debug, PartialEq)]
struct FramePlan {
    barge_in: bool,
    commit: bool,
}

fn plan_frame(
    was_speaking: bool,
    now_speaking: bool,
    assistant_speaking: bool,
    verdict: FrameVerdict,
) -> FramePlan {
    FramePlan {
        barge_in: !was_speaking && now_speaking && assistant_speaking,
        commit: verdict == FrameVerdict::Commit,
    }
}

/// What a carrier frame means to a session that is already live. A repeated
/// `start` maps to [`CarrierAction::Nothing`]: the stream it would begin is
/// the one we are already on.
#[derive(Debug, PartialEq)]
enum CarrierAction {
    Forward(Bytes),
    MarkAck(String),
    BadPayload,
    Stop,
    Nothing,
}

fn carrier_action(frame: CarrierFrame) -> CarrierAction {
    match frame {
        CarrierFrame::Media { media } => match media.decode() {
            Some(audio) => CarrierAction::Forward(audio),
            None => CarrierAction::BadPayload,
        },
        CarrierFrame::Mark { mark } => CarrierAction::MarkAck(mark.name),
        CarrierFrame::Stop => CarrierAction::Stop,
        CarrierFrame::Start { .. }
        | CarrierFrame::Connected
        | CarrierFrame::Dtmf
        | CarrierFrame::Unknown => CarrierAction::Nothing,
    }
}

/// Run collaborator dispatch on its own task. A single worker per call keeps
/// responses in arrival order while the session loop stays free to relay
/// audio; results come back on `results` for submission to the AI leg.
fn spawn_tool_worker(
    gateway: Arc<RealtimeGateway>,
    call_id: String,
    results: mpsc::Sender<ToolResponse>,
) -> (mpsc::Sender<ToolCall>, JoinHandle<()>) {
    let (queue_tx, mut queue_rx) = mpsc::channel::<ToolCall>(TOOL_QUEUE_CAPACITY);
    let worker = tokio::spawn(async move {
        while let Some(call) = queue_rx.recv().await {
            let response = gateway.dispatcher().dispatch(&call_id, &call).await;
            if results.send(response).await.is_err() {
                break;
            }
        }
    });
    (queue_tx, worker)
}

/// Drive one call to completion. Returns when the call is fully torn down.
pub async fn run(
    socket: WebSocket,
    destination: String,
    stream_sid: String,
    start: StartMeta,
    buffered: Vec<Bytes>,
    state: AppState,
) {
    let call_id = Uuid::new_v4().to_string();
    let call_sid = start.call_sid.clone();
    info!(call_id = %call_id, call_sid = %call_sid, destination = %destination, "Call session starting");

    let (mut carrier_tx, carrier_rx) = socket.split();

    let profile = match state
        .collaborators
        .directory
        .lookup_by_number(&destination)
        .await
    {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            warn!(destination = %destination, "No business registered for dialed number");
            let _ = carrier_tx.close().await;
            return;
        }
        Err(e) => {
            error!(destination = %destination, "Company lookup failed: {e}");
            let _ = carrier_tx.close().await;
            return;
        }
    };

    // No audio may reach the caller unless the AI leg opened
    let (ai, events_rx) = match state.gateway.open_session(&profile).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(call_id = %call_id, "AI session open failed, aborting call: {e}");
            let _ = carrier_tx.close().await;
            return;
        }
    };

    state.gateway.dispatcher().bind_call(
        &call_id,
        CallBinding {
            profile,
            call_sid: call_sid.clone(),
        },
    );

    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    state.registry.register(SessionHandle::new(
        call_id.clone(),
        Some(call_sid.clone()),
        cmd_tx,
    ));
    state.registry.bind_ai_session(&call_id, ai.provider_call_id());

    let (tool_results_tx, tool_results_rx) = mpsc::channel(TOOL_QUEUE_CAPACITY);
    let (tool_tx, tool_worker) =
        spawn_tool_worker(state.gateway.clone(), call_id.clone(), tool_results_tx);

    let detector = TurnDetector::new(state.vad);
    let mut session = CallSession {
        call_id,
        stream_sid,
        state,
        ai,
        carrier_tx,
        detector,
        assistant_speaking: false,
        turn_counter: 0,
        torn_down: false,
        tool_tx,
        tool_worker,
    };

    // Frames the carrier sent before its start event
    for frame in buffered {
        if session.on_caller_audio(frame).await == Flow::Stop {
            session.teardown().await;
            return;
        }
    }

    session
        .stream(carrier_rx, events_rx, cmd_rx, tool_results_rx)
        .await;
    session.teardown().await;
}

struct CallSession {
    call_id: String,
    stream_sid: String,
    state: AppState,
    ai: RealtimeSession,
    carrier_tx: SplitSink<WebSocket, Message>,
    detector: TurnDetector,
    assistant_speaking: bool,
    turn_counter: u64,
    torn_down: bool,
    tool_tx: mpsc::Sender<ToolCall>,
    tool_worker: JoinHandle<()>,
}

impl CallSession {
    async fn stream(
        &mut self,
        mut carrier_rx: SplitStream<WebSocket>,
        mut events_rx: mpsc::Receiver<AiEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut tool_results: mpsc::Receiver<ToolResponse>,
    ) {
        let mut keepalive = interval(KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = carrier_rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if self.on_carrier_frame(&text).await == Flow::Stop {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(call_id = %self.call_id, "Carrier socket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(call_id = %self.call_id, "Carrier socket error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                },

                event = events_rx.recv() => match event {
                    Some(event) => {
                        if self.on_ai_event(event).await == Flow::Stop {
                            break;
                        }
                    }
                    None => break,
                },

                result = tool_results.recv() => match result {
                    Some(response) => {
                        if self.ai.submit_tool_result(response).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },

                command = commands.recv() => match command {
                    Some(SessionCommand::Hangup) => {
                        info!(call_id = %self.call_id, "Hangup requested");
                        break;
                    }
                    // Closed channel means the registry replaced this session
                    None => break,
                },

                _ = keepalive.tick() => {
                    if self.carrier_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                    self.state.registry.touch(&self.call_id);
                }
            }
        }
    }

    async fn on_carrier_frame(&mut self, text: &str) -> Flow {
        let frame: CarrierFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                warn!(call_id = %self.call_id, "Unparseable carrier frame: {e}");
                return Flow::Continue;
            }
        };

        match carrier_action(frame) {
            CarrierAction::Forward(audio) => self.on_caller_audio(audio).await,
            CarrierAction::BadPayload => {
                warn!(call_id = %self.call_id, "Dropping media frame with bad payload");
                Flow::Continue
            }
            CarrierAction::MarkAck(name) => {
                debug!(call_id = %self.call_id, mark = %name, "Playback mark acknowledged");
                Flow::Continue
            }
            CarrierAction::Stop => {
                info!(call_id = %self.call_id, "Carrier signalled stop");
                Flow::Stop
            }
            CarrierAction::Nothing => Flow::Continue,
        }
    }

    /// One companded caller frame: forward raw, measure energy, act on the
    /// detector's verdict.
    async fn on_caller_audio(&mut self, audio: Bytes) -> Flow {
        let energy = mulaw_frame_energy(&audio);

        if self.ai.send_audio(audio).await.is_err() {
            warn!(call_id = %self.call_id, "AI leg refused audio, tearing down");
            return Flow::Stop;
        }

        let was_speaking = self.detector.speaking();
        let verdict = self.detector.push_frame(energy);
        let plan = plan_frame(
            was_speaking,
            self.detector.speaking(),
            self.assistant_speaking,
            verdict,
        );

        if plan.barge_in {
            debug!(call_id = %self.call_id, "Caller barge-in, interrupting assistant");
            if self.send_to_carrier(&OutboundFrame::clear(&self.stream_sid)).await == Flow::Stop {
                return Flow::Stop;
            }
            let _ = self.ai.cancel_response().await;
            self.assistant_speaking = false;
        }

        if plan.commit {
            debug!(call_id = %self.call_id, "Turn committed");
            if self.ai.commit_turn().await.is_err() {
                return Flow::Stop;
            }
        } else if verdict == FrameVerdict::Discard {
            debug!(call_id = %self.call_id, "Segment discarded as noise");
        }

        Flow::Continue
    }

    async fn on_ai_event(&mut self, event: AiEvent) -> Flow {
        match event {
            AiEvent::Audio(audio) => {
                if !self.assistant_speaking {
                    self.assistant_speaking = true;
                    self.turn_counter += 1;
                    let mark = OutboundFrame::mark(
                        &self.stream_sid,
                        format!("turn-{}", self.turn_counter),
                    );
                    if self.send_to_carrier(&mark).await == Flow::Stop {
                        return Flow::Stop;
                    }
                }
                self.send_to_carrier(&OutboundFrame::media(&self.stream_sid, &audio))
                    .await
            }
            AiEvent::TextDelta(text) => {
                debug!(call_id = %self.call_id, "Assistant transcript: {text}");
                Flow::Continue
            }
            AiEvent::TurnComplete => {
                self.assistant_speaking = false;
                Flow::Continue
            }
            AiEvent::ToolCalls(calls) => {
                // Hand off to the worker; dispatch must not hold up audio
                for call in calls {
                    if self.tool_tx.send(call).await.is_err() {
                        warn!(call_id = %self.call_id, "Tool worker gone, tearing down");
                        return Flow::Stop;
                    }
                }
                Flow::Continue
            }
            AiEvent::ProviderError(message) => {
                warn!(call_id = %self.call_id, "Provider error event: {message}");
                Flow::Continue
            }
            AiEvent::SessionClosed => {
                info!(call_id = %self.call_id, "AI session closed");
                Flow::Stop
            }
        }
    }

    async fn send_to_carrier<T: Serialize>(&mut self, frame: &T) -> Flow {
        let json = match serde_json::to_string(frame) {
            Ok(j) => j,
            Err(e) => {
                error!(call_id = %self.call_id, "Failed to serialize carrier frame: {e}");
                return Flow::Continue;
            }
        };
        match self.carrier_tx.send(Message::Text(json.into())).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(call_id = %self.call_id, "Carrier send failed: {e}");
                Flow::Stop
            }
        }
    }

    /// Release every resource the call holds. Safe to call repeatedly.
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.tool_worker.abort();
        self.ai.close().await;
        self.state.registry.unregister(&self.call_id);
        self.state.gateway.dispatcher().unbind_call(&self.call_id);
        self.detector.reset();
        let _ = self.carrier_tx.send(Message::Close(None)).await;
        info!(call_id = %self.call_id, "Call session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use crate::collaborators::{
        self, CalendarService, CallTransferService, CompanyProfile, EventRequest,
    };
    use crate::core::realtime::ProviderSettings;
    use crate::errors::CollaboratorResult;

    #[test]
    fn test_repeated_start_changes_nothing_midstream() {
        let frame: CarrierFrame = serde_json::from_str(
            r#"{"event":"start","streamSid":"MZ1","start":{"callSid":"CA1"}}"#,
        )
        .unwrap();
        assert_eq!(carrier_action(frame), CarrierAction::Nothing);
    }

    #[test]
    fn test_connected_and_dtmf_are_tolerated_midstream() {
        for raw in [r#"{"event":"connected"}"#, r#"{"event":"dtmf"}"#] {
            let frame: CarrierFrame = serde_json::from_str(raw).unwrap();
            assert_eq!(carrier_action(frame), CarrierAction::Nothing);
        }
    }

    #[test]
    fn test_media_and_stop_keep_their_meaning() {
        let media: CarrierFrame =
            serde_json::from_str(r#"{"event":"media","media":{"payload":"//8A"}}"#).unwrap();
        assert!(matches!(carrier_action(media), CarrierAction::Forward(_)));

        let stop: CarrierFrame = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert_eq!(carrier_action(stop), CarrierAction::Stop);
    }

    struct SlowTransfer;

    #[async_trait]
    impl CallTransferService for SlowTransfer {
        async fn transfer(&self, _call_id: &str, _phone_number: &str) -> CollaboratorResult<Value> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!({ "transferred": true }))
        }
    }

    struct InstantCalendar;

    #[async_trait]
    impl CalendarService for InstantCalendar {
        async fn create_event(
            &self,
            _company_id: &str,
            _event: &EventRequest,
        ) -> CollaboratorResult<Value> {
            Ok(json!({}))
        }

        async fn cancel_event(
            &self,
            _company_id: &str,
            _event_id: &str,
        ) -> CollaboratorResult<Value> {
            Ok(json!({ "cancelled": true }))
        }
    }

    fn worker_gateway() -> Arc<RealtimeGateway> {
        let mut collaborators = collaborators::unconfigured();
        collaborators.transfer = Arc::new(SlowTransfer);
        collaborators.calendar = Arc::new(InstantCalendar);

        let gateway = Arc::new(RealtimeGateway::new(
            ProviderSettings {
                base_url: "http://localhost:0".into(),
                api_key: "test-key".into(),
            },
            collaborators,
        ));
        gateway.dispatcher().bind_call(
            "call-1",
            CallBinding {
                profile: CompanyProfile {
                    company_id: "co_1".into(),
                    company_name: "Acme Plumbing".into(),
                    instructions: "Be helpful".into(),
                    scheduling_context: None,
                    calendar_enabled: true,
                    voice: None,
                },
                call_sid: "CA100".into(),
            },
        );
        gateway
    }

    fn tool(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            args: args.as_object().cloned().unwrap_or_else(Map::new),
        }
    }

    #[tokio::test]
    async fn test_tool_worker_keeps_order_without_blocking_the_queue() {
        let (results_tx, mut results) = mpsc::channel(8);
        let (queue, worker) = spawn_tool_worker(worker_gateway(), "call-1".into(), results_tx);

        let slow = tool("tc-slow", "transfer_call", json!({"phoneNumber": "+15550000000"}));
        let fast = tool("tc-fast", "cancel_calendar_event", json!({"eventId": "ev_1"}));

        // Enqueueing returns while the first dispatch is still in flight
        queue.send(slow).await.unwrap();
        queue.send(fast).await.unwrap();
        assert!(results.try_recv().is_err());

        // A single worker drains in arrival order even when the first
        // collaborator is the slow one
        let first = results.recv().await.unwrap();
        assert_eq!(first.id, "tc-slow");
        assert!(first.outcome.is_success());

        let second = results.recv().await.unwrap();
        assert_eq!(second.id, "tc-fast");
        assert!(second.outcome.is_success());

        worker.abort();
    }

    #[tokio::test]
    async fn test_tool_worker_stops_when_results_side_hangs_up() {
        let (results_tx, results) = mpsc::channel(1);
        let (queue, worker) = spawn_tool_worker(worker_gateway(), "call-1".into(), results_tx);
        drop(results);

        queue
            .send(tool("tc-1", "cancel_calendar_event", json!({"eventId": "ev_1"})))
            .await
            .unwrap();

        // The worker exits on its own once nobody reads results
        worker.await.unwrap();
    }

    #[test]
    fn test_barge_in_requires_onset_during_assistant_speech() {
        // speech onset while the assistant is speaking interrupts it
        let plan = plan_frame(false, true, true, FrameVerdict::Accumulating);
        assert!(plan.barge_in);

        // already speaking: no repeated interruption
        let plan = plan_frame(true, true, true, FrameVerdict::Accumulating);
        assert!(!plan.barge_in);

        // onset while the assistant is quiet: nothing to interrupt
        let plan = plan_frame(false, true, false, FrameVerdict::Accumulating);
        assert!(!plan.barge_in);
    }

    #[test]
    fn test_only_commit_verdict_commits() {
        assert!(plan_frame(true, false, false, FrameVerdict::Commit).commit);
        assert!(!plan_frame(true, false, false, FrameVerdict::Discard).commit);
        assert!(!plan_frame(true, true, false, FrameVerdict::Accumulating).commit);
        assert!(!plan_frame(false, false, false, FrameVerdict::Idle).commit);
    }
}
