//! Crate-wide error types.
//!
//! Each subsystem gets its own `thiserror` enum; `main` composes them with
//! `anyhow`. Per-call failures must never escape their call, so most of these
//! are logged and converted into teardown or structured tool responses rather
//! than propagated upward.

use thiserror::Error;

/// Errors raised on the AI realtime leg.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Provisioning or call-resource HTTP request failed
    #[error("Provider request failed: {0}")]
    ProviderRequest(String),

    /// The provider response was missing a required field
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// Every candidate connection URL was exhausted
    #[error("All connection candidates failed: [{}]", .causes.join("; "))]
    AllCandidatesFailed {
        /// One cause per attempted URL, in attempt order
        causes: Vec<String>,
    },

    /// WebSocket error on an established session
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization of an outbound control frame failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The session is closed or was never opened
    #[error("Session closed")]
    Closed,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Errors surfaced by business collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The collaborator is not wired into this deployment
    #[error("Collaborator not configured: {0}")]
    Unavailable(&'static str),

    /// The collaborator rejected the request
    #[error("{0}")]
    Rejected(String),

    /// Transport-level failure reaching the collaborator
    #[error("Collaborator I/O error: {0}")]
    Io(String),
}

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Configuration loading/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is absent
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    /// A value was present but could not be parsed
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_error_lists_causes() {
        let err = RealtimeError::AllCandidatesFailed {
            causes: vec!["dns failure".into(), "403 rejected".into()],
        };
        let text = err.to_string();
        assert!(text.contains("dns failure"));
        assert!(text.contains("403 rejected"));
    }

    #[test]
    fn test_collaborator_unavailable_display() {
        let err = CollaboratorError::Unavailable("calendar");
        assert!(err.to_string().contains("calendar"));
    }
}
