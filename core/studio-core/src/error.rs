//! Error types for the reminder engine.
//! Variants follow the operational taxonomy: what aborts a run, what skips
//! one item, and what is rejected without mutation.

use crate::types::SessionState;
use studio_protocol::{Actor, SessionEvent};

/// All errors that can occur in studio-core operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ─────────────────────────────────────────────────────────────────────
    // Fatal for a whole trigger run
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration error: {context}: {details}")]
    Configuration { context: String, details: String },

    #[error("Storage error: {0}")]
    Storage(String),

    // ─────────────────────────────────────────────────────────────────────
    // Per-item failures (skip and continue)
    // ─────────────────────────────────────────────────────────────────────
    #[error("No phone number for client: {client_name}")]
    RecipientNotFound { client_name: String },

    #[error("Delivery to {recipient} failed: {details}")]
    DeliveryFailure { recipient: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Rejected requests (no mutation)
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid transition for session {session_id}: {event:?} by {actor:?} from {from:?}")]
    InvalidTransition {
        session_id: String,
        from: SessionState,
        event: TransitionRequest,
        actor: Actor,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Malformed inbound payload: {0}")]
    MalformedInboundPayload(String),

    #[error("Malformed session title: {0:?}")]
    MalformedTitle(String),
}

/// What was asked of the state machine when a transition was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRequest {
    Event(SessionEvent),
    Reactivate,
}

impl EngineError {
    pub fn configuration(context: impl Into<String>, details: impl Into<String>) -> Self {
        EngineError::Configuration {
            context: context.into(),
            details: details.into(),
        }
    }

    /// Stable machine-readable code, used on the daemon wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Configuration { .. } => "configuration_error",
            EngineError::Storage(_) => "storage_error",
            EngineError::RecipientNotFound { .. } => "recipient_not_found",
            EngineError::DeliveryFailure { .. } => "delivery_failure",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::SessionNotFound(_) => "session_not_found",
            EngineError::MalformedInboundPayload(_) => "malformed_inbound_payload",
            EngineError::MalformedTitle(_) => "malformed_title",
        }
    }
}

/// Convenience type alias for Results using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<EngineError> for String {
    fn from(err: EngineError) -> String {
        err.to_string()
    }
}
