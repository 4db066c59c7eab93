//! The agent contract and the handler-table based [`Bandmate`] agent.

use std::{any::Any, collections::HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    bus::Outbox,
    context::MusicalContext,
    error::{BusError, HandlerError},
    message::{AgentId, Message, MessageId, MessageType, Payload},
};

/// Identity and temperament of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    /// Instrument or role, e.g. "drums".
    pub agent_type: String,
    /// How eagerly the agent reacts, in `[0, 1]`.
    pub responsiveness: f64,
}

impl AgentProfile {
    pub fn new(id: impl Into<AgentId>, agent_type: impl Into<String>, responsiveness: f64) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            responsiveness: responsiveness.clamp(0.0, 1.0),
        }
    }
}

/// What the session needs from every participant.
///
/// Calls are synchronous and must not block; anything slow belongs to an
/// output collaborator.
pub trait Agent: Any + Send {
    fn profile(&self) -> &AgentProfile;

    /// Called once at registration with this agent's send capability.
    fn attach(&mut self, outbox: Outbox);

    /// React to the context for the current tick.
    ///
    /// # Errors
    /// Errors are logged by the session and do not affect other agents.
    fn on_context(&mut self, context: &MusicalContext) -> Result<(), HandlerError>;

    /// Handle a delivered message.
    ///
    /// # Errors
    /// Errors are logged by the session and do not affect other agents.
    fn on_message(&mut self, message: &Message) -> Result<(), HandlerError>;

    fn as_any(&self) -> &dyn Any;

    fn id(&self) -> &AgentId {
        &self.profile().id
    }
}

/// Handler invoked for one message type.
pub type Handler<S> =
    Box<dyn FnMut(&mut S, &Message, &Outbox) -> Result<(), HandlerError> + Send>;

/// Per-agent dispatch table keyed by message type.
pub struct HandlerTable<S> {
    handlers: HashMap<MessageType, Handler<S>>,
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> HandlerTable<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the handler for `kind`.
    pub fn register<F>(&mut self, kind: MessageType, handler: F)
    where
        F: FnMut(&mut S, &Message, &Outbox) -> Result<(), HandlerError> + Send + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
    }

    #[must_use]
    pub fn handles(&self, kind: &MessageType) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Run the handler for `message`, if any.
    ///
    /// Returns `Ok(false)` when no handler is registered; unknown types are
    /// ignored rather than treated as errors.
    ///
    /// # Errors
    /// Propagates the handler's error.
    pub fn dispatch(&mut self, state: &mut S, message: &Message, outbox: &Outbox) -> Result<bool, HandlerError> {
        let Some(handler) = self.handlers.get_mut(message.kind()) else {
            return Ok(false);
        };
        handler(state, message, outbox)?;
        Ok(true)
    }
}

/// Musical decision-making injected into a [`Bandmate`].
pub trait Policy: Send + 'static {
    /// Install default message handlers.
    fn install(handlers: &mut HandlerTable<Self>)
    where
        Self: Sized,
    {
        let _ = handlers;
    }

    /// Per-tick reaction.
    ///
    /// # Errors
    /// Returns error if the policy cannot react to this context.
    fn on_context(
        &mut self,
        profile: &AgentProfile,
        context: &MusicalContext,
        outbox: &Outbox,
    ) -> Result<(), HandlerError>;
}

const fn detached() -> BusError {
    BusError::SessionNotRunning {
        state: crate::bus::SessionState::Idle,
    }
}

/// An agent built from a profile, a policy, and a handler table.
pub struct Bandmate<P: Policy> {
    profile: AgentProfile,
    policy: P,
    handlers: HandlerTable<P>,
    outbox: Option<Outbox>,
}

impl<P: Policy> Bandmate<P> {
    pub fn new(profile: AgentProfile, policy: P) -> Self {
        let mut handlers = HandlerTable::new();
        P::install(&mut handlers);
        Self {
            profile,
            policy,
            handlers,
            outbox: None,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &P {
        &self.policy
    }

    pub const fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Install or replace a handler.
    pub fn register_handler<F>(&mut self, kind: MessageType, handler: F)
    where
        F: FnMut(&mut P, &Message, &Outbox) -> Result<(), HandlerError> + Send + 'static,
    {
        self.handlers.register(kind, handler);
    }

    fn outbox(&self) -> Result<&Outbox, BusError> {
        self.outbox.as_ref().ok_or_else(detached)
    }

    /// Send a direct message.
    ///
    /// # Errors
    /// Returns error if the agent is not registered with a running session.
    pub fn send(&self, recipient: &AgentId, kind: MessageType, payload: Payload) -> Result<MessageId, BusError> {
        self.outbox()?.send(recipient, kind, payload)
    }

    /// Publish to a topic.
    ///
    /// # Errors
    /// Returns error if the agent is not registered with a running session.
    pub fn publish(&self, topic: &str, kind: MessageType, payload: Payload) -> Result<MessageId, BusError> {
        self.outbox()?.publish(topic, kind, payload)
    }
}

impl<P: Policy> Agent for Bandmate<P> {
    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn attach(&mut self, outbox: Outbox) {
        self.outbox = Some(outbox);
    }

    fn on_context(&mut self, context: &MusicalContext) -> Result<(), HandlerError> {
        let outbox = self.outbox.as_ref().ok_or_else(detached)?;
        self.policy.on_context(&self.profile, context, outbox)
    }

    fn on_message(&mut self, message: &Message) -> Result<(), HandlerError> {
        let outbox = self.outbox.as_ref().ok_or_else(detached)?;
        let handled = self.handlers.dispatch(&mut self.policy, message, outbox)?;
        if !handled {
            tracing::trace!(
                agent = %self.profile.id,
                kind = %message.kind(),
                "No handler for message type, ignoring"
            );
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
