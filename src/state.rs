//! Shared application state.

use std::sync::Arc;

use crate::collaborators::Collaborators;
use crate::config::ServerConfig;
use crate::core::realtime::{ProviderSettings, RealtimeGateway};
use crate::core::vad::VadTuning;
use crate::session::registry::SessionRegistry;

/// Everything a handler needs, cheaply clonable.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<RealtimeGateway>,
    pub registry: Arc<SessionRegistry>,
    pub collaborators: Collaborators,
    pub vad: VadTuning,
}

impl AppState {
    pub fn new(config: &ServerConfig, collaborators: Collaborators) -> Self {
        let settings = ProviderSettings {
            base_url: config.provider.base_url.clone(),
            api_key: config.provider.api_key.clone(),
        };
        let registry = Arc::new(SessionRegistry::new(
            config.worker_id.clone(),
            config.worker_address.clone(),
            config.session_ttl,
        ));

        Self {
            gateway: Arc::new(RealtimeGateway::new(settings, collaborators.clone())),
            registry,
            collaborators,
            vad: config.vad,
        }
    }
}
