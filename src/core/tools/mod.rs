//! Tool-call contract types.
//!
//! The AI leg asks the host to perform side effects through "tool calls".
//! After normalization (see [`crate::core::realtime::events`]) every call is
//! a canonical `{id, name, args}` record; execution produces a structured
//! `{success, data | error, details?}` envelope correlated by id. Handlers
//! never raise: every failure mode becomes an envelope.

pub mod dispatch;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use dispatch::{CallBinding, ToolDispatcher};

/// Canonical, normalized tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the response
    pub id: String,
    /// Tool name as received (canonical or legacy alias)
    pub name: String,
    /// String-keyed argument map; defensively parsed, may be empty
    pub args: Map<String, Value>,
}

/// The fixed set of tools this gateway executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    TransferCall,
    CheckCalendarAvailability,
    CreateCalendarEvent,
    CancelCalendarEvent,
}

impl ToolKind {
    /// Map a wire name to a tool, accepting canonical snake_case names plus
    /// the camelCase and shorthand aliases older assistant revisions emit.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "transfer_call" | "transferCall" | "transfer" => Some(Self::TransferCall),
            "check_calendar_availability"
            | "checkCalendarAvailability"
            | "check_availability"
            | "checkAvailability" => Some(Self::CheckCalendarAvailability),
            "create_calendar_event"
            | "createCalendarEvent"
            | "book_appointment"
            | "bookAppointment" => Some(Self::CreateCalendarEvent),
            "cancel_calendar_event"
            | "cancelCalendarEvent"
            | "cancel_appointment"
            | "cancelAppointment" => Some(Self::CancelCalendarEvent),
            _ => None,
        }
    }

    /// Whether this tool requires the company's calendar integration.
    pub fn needs_calendar(&self) -> bool {
        !matches!(self, Self::TransferCall)
    }

    /// Canonical name used in logs and assistant definitions.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::TransferCall => "transfer_call",
            Self::CheckCalendarAvailability => "check_calendar_availability",
            Self::CreateCalendarEvent => "create_calendar_event",
            Self::CancelCalendarEvent => "cancel_calendar_event",
        }
    }
}

/// Structured result envelope for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutcome {
    Success {
        success: bool, // always true
        data: Value,
    },
    Failure {
        success: bool, // always false
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self::Success {
            success: true,
            data,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self::Failure {
            success: false,
            error: error.into(),
            details: None,
        }
    }

    pub fn err_with_details(error: impl Into<String>, details: Value) -> Self {
        Self::Failure {
            success: false,
            error: error.into(),
            details: Some(details),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A completed tool call: outcome correlated back to the originating id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}
