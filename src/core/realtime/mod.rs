//! AI realtime session gateway.
//!
//! Owns everything on the AI-provider side of a call:
//!
//! - [`provider`]: HTTP client for assistant and realtime-call resources.
//! - [`provisioning`]: idempotent cached, then update, then lookup, then
//!   create resolution of the per-company assistant.
//! - [`events`]: normalization of inbound protocol frames, including the
//!   historical tool-call wire shapes, into canonical events.
//! - [`session`]: the outbound websocket leg: candidate-URL connection with
//!   bounded redirect retry, channel-fed send loop, normalized event stream.
//!
//! Per-call tool configuration is stored in the shared
//! [`crate::core::tools::ToolDispatcher`], keyed by call id, so concurrent
//! calls for different businesses never share state.

pub mod events;
pub mod provider;
pub mod provisioning;
pub mod session;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::collaborators::{Collaborators, CompanyProfile};
use crate::core::tools::ToolDispatcher;
use crate::errors::{RealtimeError, RealtimeResult};

pub use events::AiEvent;
pub use provider::{AssistantResource, CallTransport, ProviderClient, ProviderSettings};
pub use provisioning::AssistantProvisioner;
pub use session::RealtimeSession;

/// Channel capacity for normalized inbound events per session.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Facade wiring provisioning, session establishment, and tool dispatch.
pub struct RealtimeGateway {
    client: Arc<ProviderClient>,
    provisioner: AssistantProvisioner,
    dispatcher: ToolDispatcher,
}

impl RealtimeGateway {
    pub fn new(settings: ProviderSettings, collaborators: Collaborators) -> Self {
        let client = Arc::new(ProviderClient::new(settings));
        Self {
            provisioner: AssistantProvisioner::new(client.clone()),
            dispatcher: ToolDispatcher::new(collaborators),
            client,
        }
    }

    /// Tool dispatcher shared across sessions.
    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// Provision the company's assistant and open a realtime session for one
    /// call. Normalized events arrive on the returned receiver; the session
    /// handle sends audio and control frames.
    pub async fn open_session(
        &self,
        profile: &CompanyProfile,
    ) -> RealtimeResult<(RealtimeSession, mpsc::Receiver<AiEvent>)> {
        let assistant_id = self.provisioner.ensure_assistant(profile).await?;
        let call = self
            .client
            .create_realtime_call(&assistant_id, CallTransport::mulaw_8k())
            .await?;

        let candidates = call.candidate_urls();
        if candidates.is_empty() {
            return Err(RealtimeError::MalformedResponse(
                "call resource carried no connection URLs".to_string(),
            ));
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let session = RealtimeSession::connect(
            call.id.clone(),
            candidates,
            self.client.settings().api_key.clone(),
            events_tx,
        )
        .await?;

        Ok((session, events_rx))
    }
}
