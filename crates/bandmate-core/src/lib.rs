//! Core abstractions for the bandmate message bus.
//!
//! This crate provides the building blocks shared by sessions and agents:
//! - `Message` - Immutable envelope with a type tag and string-keyed payload
//! - `MusicalContext` - Tempo, key, and position snapshot written by the session
//! - `Agent` / `Bandmate` - Agent contract and handler-table composition
//! - `Bus` / `Outbox` - Session-scoped queue and the per-agent send capability
//! - `TopicRegistry` - Ordered topic subscriptions
//! - `OutputStore` - Broadcast + history of notes for external collaborators

pub mod agent;
pub mod bus;
pub mod context;
pub mod error;
pub mod message;
pub mod output;
pub mod protocol;
pub mod topics;

pub use agent::{Agent, AgentProfile, Bandmate, HandlerTable, Policy};
pub use bus::{Bus, Outbox, OutboxError, SessionState};
pub use context::{MusicalContext, TimeSignature};
pub use error::{BusError, DeliveryError, HandlerError, PayloadError};
pub use message::{AgentId, Destination, Message, MessageId, MessageType, Payload};
pub use output::{Collaborator, CollaboratorError, Note, OutputEvent, OutputStore, TracingCollaborator};
pub use protocol::TypedPayload;
pub use topics::TopicRegistry;
