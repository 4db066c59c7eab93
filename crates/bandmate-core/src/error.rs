//! Error types shared by the bus, agents, and handlers.

use thiserror::Error;

use crate::{bus::SessionState, message::AgentId};

/// Errors raised by the session-scoped bus.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Session is not running (state: {state})")]
    SessionNotRunning { state: SessionState },
}

/// Payload encoding or decoding failure.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Expected a {expected} payload, got {actual}")]
    KindMismatch { expected: String, actual: String },
    #[error("Payload must be a JSON object")]
    NotAnObject,
    #[error("Payload decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure inside an agent's `on_context` or `on_message`.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Build a free-form handler failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// A single failed delivery. Never fatal to the session.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Recipient not found: {0}")]
    RecipientNotFound(AgentId),
    #[error("Agent {agent} failed: {source}")]
    Handler {
        agent: AgentId,
        #[source]
        source: HandlerError,
    },
}

impl DeliveryError {
    /// The agent the failed delivery was aimed at.
    #[must_use]
    pub const fn agent(&self) -> &AgentId {
        match self {
            Self::RecipientNotFound(agent) | Self::Handler { agent, .. } => agent,
        }
    }
}
