//! Idempotent assistant provisioning.
//!
//! Each company needs exactly one remote assistant resource. Resolution is a
//! cached-id → update → lookup-by-name → create fallback chain expressed as a
//! pure decision over `(cached update result, lookup result)`, so re-running
//! it can never mint a duplicate while a valid assistant exists.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::json;
use tracing::{debug, info, warn};

use super::provider::{AssistantResource, AssistantSpec, ProviderClient};
use crate::collaborators::CompanyProfile;
use crate::errors::RealtimeResult;

/// How long a resolved assistant id stays cached per company.
const ASSISTANT_CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
/// Upper bound on cached companies per worker.
const ASSISTANT_CACHE_CAPACITY: u64 = 10_000;

/// Outcome of the pure resolution decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    /// A known-good assistant id exists; use it.
    Use(String),
    /// Nothing usable exists remotely; create a fresh assistant.
    Create,
}

/// Decide from the evidence already gathered. `refreshed` is the cached id
/// if the remote update against it succeeded; `lookup` is the by-name search
/// result when one was needed.
pub(crate) fn decide(
    refreshed: Option<&str>,
    lookup: Option<&AssistantResource>,
) -> Decision {
    if let Some(id) = refreshed {
        return Decision::Use(id.to_string());
    }
    if let Some(existing) = lookup {
        return Decision::Use(existing.id.clone());
    }
    Decision::Create
}

/// Resolves and caches the assistant id for each company.
pub struct AssistantProvisioner {
    client: Arc<ProviderClient>,
    /// company id -> assistant id
    cache: Cache<String, String>,
}

impl AssistantProvisioner {
    pub fn new(client: Arc<ProviderClient>) -> Self {
        Self {
            client,
            cache: Cache::builder()
                .max_capacity(ASSISTANT_CACHE_CAPACITY)
                .time_to_live(ASSISTANT_CACHE_TTL)
                .build(),
        }
    }

    /// Return the id of a live assistant configured for this company,
    /// creating one only when neither the cache nor a by-name lookup
    /// produces a usable resource.
    pub async fn ensure_assistant(&self, profile: &CompanyProfile) -> RealtimeResult<String> {
        let spec = assistant_spec(profile);

        // Stage 1: cached id, refreshed with the current profile. An update
        // failure means the remote resource is gone or stale; fall through.
        let refreshed = match self.cache.get(&profile.company_id).await {
            Some(cached_id) => match self.client.update_assistant(&cached_id, &spec).await {
                Ok(_) => Some(cached_id),
                Err(e) => {
                    warn!(
                        company_id = %profile.company_id,
                        "Cached assistant {cached_id} rejected update, re-resolving: {e}"
                    );
                    self.cache.invalidate(&profile.company_id).await;
                    None
                }
            },
            None => None,
        };

        // Stage 2: by-name lookup, only when the cache path failed.
        let lookup = if refreshed.is_none() {
            self.client.find_assistant_by_name(&spec.name).await?
        } else {
            None
        };

        let assistant_id = match decide(refreshed.as_deref(), lookup.as_ref()) {
            Decision::Use(id) => {
                debug!(company_id = %profile.company_id, assistant_id = %id, "Reusing assistant");
                id
            }
            Decision::Create => {
                let created = self.client.create_assistant(&spec).await?;
                info!(
                    company_id = %profile.company_id,
                    assistant_id = %created.id,
                    "Created assistant"
                );
                created.id
            }
        };

        self.cache
            .insert(profile.company_id.clone(), assistant_id.clone())
            .await;
        Ok(assistant_id)
    }
}

/// Deterministic assistant name so by-name lookup always finds a previously
/// provisioned resource for the same company.
fn assistant_name(profile: &CompanyProfile) -> String {
    format!("callbridge-{}", profile.company_id)
}

/// Build the remote assistant configuration from a company profile.
fn assistant_spec(profile: &CompanyProfile) -> AssistantSpec {
    let mut instructions = profile.instructions.clone();
    if let Some(context) = &profile.scheduling_context {
        instructions.push_str("\n\nScheduling context:\n");
        instructions.push_str(context);
    }

    let mut tools = vec![json!({
        "type": "function",
        "name": "transfer_call",
        "description": "Transfer the caller to a human at the given phone number",
        "parameters": {
            "type": "object",
            "properties": { "phoneNumber": { "type": "string" } },
            "required": ["phoneNumber"]
        }
    })];

    if profile.calendar_enabled {
        tools.push(json!({
            "type": "function",
            "name": "check_calendar_availability",
            "description": "List open appointment slots for a date",
            "parameters": {
                "type": "object",
                "properties": {
                    "date": { "type": "string" },
                    "hours": { "type": "string" }
                },
                "required": ["date"]
            }
        }));
        tools.push(json!({
            "type": "function",
            "name": "create_calendar_event",
            "description": "Book an appointment for the caller",
            "parameters": {
                "type": "object",
                "properties": {
                    "start": { "type": "string" },
                    "name": { "type": "string" },
                    "phone": { "type": "string" },
                    "notes": { "type": "string" }
                },
                "required": ["start", "name"]
            }
        }));
        tools.push(json!({
            "type": "function",
            "name": "cancel_calendar_event",
            "description": "Cancel a previously booked appointment",
            "parameters": {
                "type": "object",
                "properties": { "eventId": { "type": "string" } },
                "required": ["eventId"]
            }
        }));
    }

    AssistantSpec {
        name: assistant_name(profile),
        instructions,
        voice: profile.voice.clone(),
        tools,
    }
}
