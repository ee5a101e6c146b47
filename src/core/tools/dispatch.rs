//! Tool dispatch against business collaborators.
//!
//! One dispatcher instance is shared by all calls. Per-call company
//! configuration is keyed by call id so concurrent calls for different
//! businesses never observe each other's state; a `current` fallback slot
//! exists only for single-session embedding and is never consulted when the
//! call id has its own binding.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::collaborators::{Collaborators, CompanyProfile, EventRequest};
use crate::core::tools::{ToolCall, ToolKind, ToolOutcome, ToolResponse};

/// Per-call configuration captured when the session starts.
#[derive(Debug, Clone)]
pub struct CallBinding {
    /// Company snapshot for the dialed destination
    pub profile: CompanyProfile,
    /// Carrier call identifier, passed through to the transfer collaborator
    pub call_sid: String,
}

/// Routes normalized tool calls to collaborator handlers.
pub struct ToolDispatcher {
    collaborators: Collaborators,
    bindings: DashMap<String, CallBinding>,
    /// Single-session fallback; only read when no binding exists for the id
    current: RwLock<Option<CallBinding>>,
}

impl ToolDispatcher {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            bindings: DashMap::new(),
            current: RwLock::new(None),
        }
    }

    /// Install the binding for a call. Idempotent upsert.
    pub fn bind_call(&self, call_id: &str, binding: CallBinding) {
        *self.current.write() = Some(binding.clone());
        self.bindings.insert(call_id.to_string(), binding);
    }

    /// Drop a call's binding at teardown.
    pub fn unbind_call(&self, call_id: &str) {
        self.bindings.remove(call_id);
    }

    /// Number of live bindings (test/introspection).
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    fn binding_for(&self, call_id: &str) -> Option<CallBinding> {
        if let Some(entry) = self.bindings.get(call_id) {
            return Some(entry.value().clone());
        }
        self.current.read().clone()
    }

    /// Execute one tool call. Never fails: every error becomes a structured
    /// envelope correlated to the originating call id.
    pub async fn dispatch(&self, call_id: &str, call: &ToolCall) -> ToolResponse {
        let outcome = self.execute(call_id, call).await;
        if !outcome.is_success() {
            warn!(call_id, tool = %call.name, "Tool call failed: {:?}", outcome);
        }
        ToolResponse {
            id: call.id.clone(),
            outcome,
        }
    }

    async fn execute(&self, call_id: &str, call: &ToolCall) -> ToolOutcome {
        let Some(kind) = ToolKind::from_name(&call.name) else {
            return ToolOutcome::err(format!("unknown tool: {}", call.name));
        };

        let Some(binding) = self.binding_for(call_id) else {
            return ToolOutcome::err(format!("no configuration bound for call {call_id}"));
        };

        if kind.needs_calendar() && !binding.profile.calendar_enabled {
            // Short-circuit: no collaborator may be touched
            return ToolOutcome::err(format!(
                "calendar integration is not available for {}",
                binding.profile.company_name
            ));
        }

        debug!(call_id, tool = kind.canonical_name(), "Dispatching tool call");

        match kind {
            ToolKind::TransferCall => self.transfer_call(&binding, &call.args).await,
            ToolKind::CheckCalendarAvailability => {
                self.check_availability(&binding, &call.args).await
            }
            ToolKind::CreateCalendarEvent => self.create_event(&binding, &call.args).await,
            ToolKind::CancelCalendarEvent => self.cancel_event(&binding, &call.args).await,
        }
    }

    async fn transfer_call(&self, binding: &CallBinding, args: &Map<String, Value>) -> ToolOutcome {
        let phone_number = match require_str(args, "phoneNumber") {
            Ok(v) => v,
            Err(outcome) => return outcome,
        };

        match self
            .collaborators
            .transfer
            .transfer(&binding.call_sid, phone_number)
            .await
        {
            Ok(data) => ToolOutcome::ok(data),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }

    async fn check_availability(
        &self,
        binding: &CallBinding,
        args: &Map<String, Value>,
    ) -> ToolOutcome {
        let date = match require_str(args, "date") {
            Ok(v) => v,
            Err(outcome) => return outcome,
        };
        let hours = args.get("hours").and_then(Value::as_str);

        match self
            .collaborators
            .scheduling
            .available_slots(&binding.profile.company_id, date, hours)
            .await
        {
            Ok(slots) => ToolOutcome::ok(json!({ "slots": slots })),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }

    async fn create_event(&self, binding: &CallBinding, args: &Map<String, Value>) -> ToolOutcome {
        let missing: Vec<&str> = ["start", "name"]
            .into_iter()
            .filter(|key| args.get(*key).and_then(Value::as_str).is_none())
            .collect();
        if !missing.is_empty() {
            return ToolOutcome::err_with_details("missing required arguments", json!(missing));
        }

        let event = EventRequest {
            start: args["start"].as_str().unwrap_or_default().to_string(),
            name: args["name"].as_str().unwrap_or_default().to_string(),
            phone: args.get("phone").and_then(Value::as_str).map(String::from),
            notes: args.get("notes").and_then(Value::as_str).map(String::from),
        };

        match self
            .collaborators
            .calendar
            .create_event(&binding.profile.company_id, &event)
            .await
        {
            Ok(data) => ToolOutcome::ok(data),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }

    async fn cancel_event(&self, binding: &CallBinding, args: &Map<String, Value>) -> ToolOutcome {
        let event_id = match require_str(args, "eventId") {
            Ok(v) => v,
            Err(outcome) => return outcome,
        };

        match self
            .collaborators
            .calendar
            .cancel_event(&binding.profile.company_id, event_id)
            .await
        {
            Ok(data) => ToolOutcome::ok(data),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

/// Pull a required non-empty string argument, or produce the descriptive
/// error envelope. Missing fields are never guessed.
fn require_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolOutcome> {
    match args.get(key).and_then(Value::as_str) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ToolOutcome::err_with_details(
            "missing required arguments",
            json!([key]),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators;
    use serde_json::json;

    fn profile(calendar_enabled: bool) -> CompanyProfile {
        CompanyProfile {
            company_id: "co_1".into(),
            company_name: "Acme Plumbing".into(),
            instructions: "Be helpful".into(),
            scheduling_context: None,
            calendar_enabled,
            voice: None,
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "tc_1".into(),
            name: name.into(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    fn dispatcher(calendar_enabled: bool) -> ToolDispatcher {
        let d = ToolDispatcher::new(collaborators::unconfigured());
        d.bind_call(
            "CA1",
            CallBinding {
                profile: profile(calendar_enabled),
                call_sid: "CA1".into(),
            },
        );
        d
    }

    #[tokio::test]
    async fn test_unknown_tool_is_structured_error() {
        let d = dispatcher(true);
        let response = d.dispatch("CA1", &call("send_email", json!({}))).await;
        assert_eq!(response.id, "tc_1");
        match response.outcome {
            ToolOutcome::Failure { error, .. } => assert!(error.contains("unknown tool")),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_calendar_disabled_short_circuits() {
        let d = dispatcher(false);
        let response = d
            .dispatch("CA1", &call("check_calendar_availability", json!({"date": "2026-09-01"})))
            .await;
        match response.outcome {
            ToolOutcome::Failure { error, .. } => {
                assert!(error.contains("not available"), "got: {error}")
            }
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_missing_required_argument_named_in_details() {
        let d = dispatcher(true);
        let response = d.dispatch("CA1", &call("transfer_call", json!({}))).await;
        match response.outcome {
            ToolOutcome::Failure { details, .. } => {
                assert_eq!(details, Some(json!(["phoneNumber"])));
            }
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_unbound_call_without_fallback_errors() {
        let d = ToolDispatcher::new(collaborators::unconfigured());
        let response = d
            .dispatch("CA404", &call("transfer_call", json!({"phoneNumber": "+15550000000"})))
            .await;
        assert!(!response.outcome.is_success());
    }

    #[tokio::test]
    async fn test_current_fallback_serves_unknown_id() {
        // Single-session compatibility: the most recent binding answers for
        // ids with no explicit entry
        let d = dispatcher(false);
        let response = d
            .dispatch("CA-other", &call("create_calendar_event", json!({})))
            .await;
        match response.outcome {
            ToolOutcome::Failure { error, .. } => assert!(error.contains("not available")),
            _ => panic!("expected calendar-disabled failure via fallback"),
        }
    }

    #[tokio::test]
    async fn test_unbind_removes_binding() {
        let d = dispatcher(true);
        assert_eq!(d.binding_count(), 1);
        d.unbind_call("CA1");
        assert_eq!(d.binding_count(), 0);
    }
}
