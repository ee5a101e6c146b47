//! Business collaborator interfaces.
//!
//! The gateway treats company lookup, scheduling, calendar persistence, and
//! call transfer as external systems reached through these trait seams.
//! Implementations live outside this crate; deployments inject them through
//! [`crate::state::AppState`]. The `unconfigured` set returns
//! [`CollaboratorError::Unavailable`] for everything and exists so the binary
//! can start without wiring.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{CollaboratorError, CollaboratorResult};

/// Immutable per-company configuration snapshot, resolved from the dialed
/// destination number when a call starts and held for the call's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    /// Stable company identifier
    pub company_id: String,
    /// Display name used in assistant instructions
    pub company_name: String,
    /// Reply style / system instructions for the assistant
    pub instructions: String,
    /// Free-form scheduling context (business hours, timezone, services)
    #[serde(default)]
    pub scheduling_context: Option<String>,
    /// Whether the company's calendar integration is connected
    #[serde(default)]
    pub calendar_enabled: bool,
    /// Voice identifier for the AI leg
    #[serde(default)]
    pub voice: Option<String>,
}

/// A bookable opening returned by the scheduling collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotWindow {
    /// ISO-8601 start time
    pub start: String,
    /// ISO-8601 end time
    pub end: String,
}

/// Calendar event creation request built from validated tool arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRequest {
    /// ISO-8601 start time
    pub start: String,
    /// Attendee / caller name
    pub name: String,
    /// Callback phone number
    #[serde(default)]
    pub phone: Option<String>,
    /// Purpose of the appointment
    #[serde(default)]
    pub notes: Option<String>,
}

/// Maps dialed numbers to company profiles.
#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    /// Resolve a destination number; `Ok(None)` means no company owns it.
    async fn lookup_by_number(&self, number: &str) -> CollaboratorResult<Option<CompanyProfile>>;
}

/// Availability queries against the company's schedule.
#[async_trait]
pub trait SchedulingService: Send + Sync {
    async fn available_slots(
        &self,
        company_id: &str,
        date: &str,
        hours: Option<&str>,
    ) -> CollaboratorResult<Vec<SlotWindow>>;
}

/// Calendar event persistence.
#[async_trait]
pub trait CalendarService: Send + Sync {
    async fn create_event(
        &self,
        company_id: &str,
        event: &EventRequest,
    ) -> CollaboratorResult<Value>;

    async fn cancel_event(&self, company_id: &str, event_id: &str) -> CollaboratorResult<Value>;
}

/// Live-call transfer through the carrier.
#[async_trait]
pub trait CallTransferService: Send + Sync {
    async fn transfer(&self, call_id: &str, phone_number: &str) -> CollaboratorResult<Value>;
}

/// Bundle of collaborator handles shared across all calls.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn CompanyDirectory>,
    pub scheduling: Arc<dyn SchedulingService>,
    pub calendar: Arc<dyn CalendarService>,
    pub transfer: Arc<dyn CallTransferService>,
}

/// Collaborator set whose every call fails with `Unavailable`.
///
/// Lets the gateway binary boot and serve health checks in environments
/// where the business systems are not wired yet.
pub fn unconfigured() -> Collaborators {
    let stub = Arc::new(Unconfigured);
    Collaborators {
        directory: stub.clone(),
        scheduling: stub.clone(),
        calendar: stub.clone(),
        transfer: stub,
    }
}

struct Unconfigured;

#[async_trait]
impl CompanyDirectory for Unconfigured {
    async fn lookup_by_number(&self, _number: &str) -> CollaboratorResult<Option<CompanyProfile>> {
        Err(CollaboratorError::Unavailable("company directory"))
    }
}

#[async_trait]
impl SchedulingService for Unconfigured {
    async fn available_slots(
        &self,
        _company_id: &str,
        _date: &str,
        _hours: Option<&str>,
    ) -> CollaboratorResult<Vec<SlotWindow>> {
        Err(CollaboratorError::Unavailable("scheduling"))
    }
}

#[async_trait]
impl CalendarService for Unconfigured {
    async fn create_event(
        &self,
        _company_id: &str,
        _event: &EventRequest,
    ) -> CollaboratorResult<Value> {
        Err(CollaboratorError::Unavailable("calendar"))
    }

    async fn cancel_event(&self, _company_id: &str, _event_id: &str) -> CollaboratorResult<Value> {
        Err(CollaboratorError::Unavailable("calendar"))
    }
}

#[async_trait]
impl CallTransferService for Unconfigured {
    async fn transfer(&self, _call_id: &str, _phone_number: &str) -> CollaboratorResult<Value> {
        Err(CollaboratorError::Unavailable("call transfer"))
    }
}
