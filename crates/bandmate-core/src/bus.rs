//! Session-scoped bus state and the per-agent outbox capability.
//!
//! Agents never touch the router or directory. Each registered agent gets an
//! [`Outbox`] that stamps and enqueues messages on the session's [`Bus`]; the
//! session drains that queue after every agent call, so a handler that sends
//! a reply is never re-entered while it is still running.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::{
    error::{BusError, PayloadError},
    message::{AgentId, Message, MessageId, MessageType, Payload},
    output::{OutputEvent, OutputStore},
    protocol::TypedPayload,
    topics::TopicRegistry,
};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed, not ticking yet.
    Idle,
    /// Tick loop active.
    Running,
    /// Terminal.
    Stopped,
}

impl SessionState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopped => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// State shared between a session and the outboxes of its agents.
pub struct Bus {
    state: AtomicU8,
    tick: AtomicU64,
    queue: Mutex<VecDeque<Message>>,
    topics: Mutex<TopicRegistry>,
    outputs: Arc<OutputStore>,
    wake: Notify,
}

impl Bus {
    #[must_use]
    pub fn new(outputs: Arc<OutputStore>) -> Self {
        Self {
            state: AtomicU8::new(SessionState::Idle.as_u8()),
            tick: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
            topics: Mutex::new(TopicRegistry::new()),
            outputs,
            wake: Notify::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Move from `from` to `to`; returns false if the state was not `from`.
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let moved = self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            self.wake.notify_waiters();
        }
        moved
    }

    /// Fail unless the session is running.
    ///
    /// # Errors
    /// Returns [`BusError::SessionNotRunning`] otherwise.
    pub fn ensure_running(&self) -> Result<(), BusError> {
        match self.state() {
            SessionState::Running => Ok(()),
            state => Err(BusError::SessionNotRunning { state }),
        }
    }

    /// Current logical tick, used as message timestamp.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    pub fn set_tick(&self, tick: u64) {
        self.tick.store(tick, Ordering::SeqCst);
    }

    /// Resolves when the state changes.
    pub async fn state_changed(&self) {
        self.wake.notified().await;
    }

    pub fn enqueue(&self, message: Message) {
        lock(&self.queue).push_back(message);
    }

    /// Pop the oldest pending message.
    pub fn dequeue(&self) -> Option<Message> {
        lock(&self.queue).pop_front()
    }

    /// Drop everything still queued, returning how many were discarded.
    pub fn discard_pending(&self) -> usize {
        let mut queue = lock(&self.queue);
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Run `f` with the topic registry locked. Do not deliver inside `f`.
    pub fn with_topics<R>(&self, f: impl FnOnce(&mut TopicRegistry) -> R) -> R {
        f(&mut lock(&self.topics))
    }

    #[must_use]
    pub const fn outputs(&self) -> &Arc<OutputStore> {
        &self.outputs
    }
}

/// Send/publish capability handed to an agent at registration.
#[derive(Clone)]
pub struct Outbox {
    agent_id: AgentId,
    bus: Arc<Bus>,
}

impl fmt::Debug for Outbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbox")
            .field("agent_id", &self.agent_id)
            .field("state", &self.bus.state())
            .finish()
    }
}

impl Outbox {
    #[must_use]
    pub const fn new(agent_id: AgentId, bus: Arc<Bus>) -> Self {
        Self { agent_id, bus }
    }

    #[must_use]
    pub const fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Current logical tick.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.bus.tick()
    }

    fn post(&self, message: Message) -> Result<MessageId, BusError> {
        self.bus.ensure_running()?;
        let id = message.id();
        tracing::trace!(
            sender = %self.agent_id,
            kind = %message.kind(),
            message_id = %id,
            "Enqueued message"
        );
        self.bus.enqueue(message);
        Ok(id)
    }

    /// Send a direct message to `recipient`.
    ///
    /// # Errors
    /// Returns [`BusError::SessionNotRunning`] outside the running state.
    pub fn send(
        &self,
        recipient: &AgentId,
        kind: MessageType,
        payload: Payload,
    ) -> Result<MessageId, BusError> {
        self.post(Message::direct(
            self.agent_id.clone(),
            recipient.clone(),
            kind,
            payload,
            self.bus.tick(),
        ))
    }

    /// Publish to the subscribers of `topic`.
    ///
    /// # Errors
    /// Returns [`BusError::SessionNotRunning`] outside the running state.
    pub fn publish(&self, topic: &str, kind: MessageType, payload: Payload) -> Result<MessageId, BusError> {
        self.post(Message::topic(
            self.agent_id.clone(),
            topic,
            kind,
            payload,
            self.bus.tick(),
        ))
    }

    /// Send to every other registered agent.
    ///
    /// # Errors
    /// Returns [`BusError::SessionNotRunning`] outside the running state.
    pub fn broadcast(&self, kind: MessageType, payload: Payload) -> Result<MessageId, BusError> {
        self.post(Message::broadcast(
            self.agent_id.clone(),
            kind,
            payload,
            self.bus.tick(),
        ))
    }

    /// Send a typed protocol payload to `recipient`.
    ///
    /// # Errors
    /// Returns error if the payload cannot be encoded or the session is not running.
    pub fn send_typed<T: TypedPayload>(
        &self,
        recipient: &AgentId,
        value: &T,
    ) -> Result<MessageId, OutboxError> {
        Ok(self.send(recipient, T::KIND, Payload::from_typed(value)?)?)
    }

    /// Broadcast a typed protocol payload.
    ///
    /// # Errors
    /// Returns error if the payload cannot be encoded or the session is not running.
    pub fn broadcast_typed<T: TypedPayload>(&self, value: &T) -> Result<MessageId, OutboxError> {
        Ok(self.broadcast(T::KIND, Payload::from_typed(value)?)?)
    }

    /// Publish a typed protocol payload to `topic`.
    ///
    /// # Errors
    /// Returns error if the payload cannot be encoded or the session is not running.
    pub fn publish_typed<T: TypedPayload>(&self, topic: &str, value: &T) -> Result<MessageId, OutboxError> {
        Ok(self.publish(topic, T::KIND, Payload::from_typed(value)?)?)
    }

    /// Subscribe this agent to `topic`. Takes effect immediately.
    pub fn subscribe(&self, topic: &str) {
        self.bus.with_topics(|topics| topics.subscribe(&self.agent_id, topic));
    }

    /// Unsubscribe this agent from `topic`.
    pub fn unsubscribe(&self, topic: &str) {
        self.bus.with_topics(|topics| topics.unsubscribe(&self.agent_id, topic));
    }

    /// Hand an output event to external collaborators without waiting.
    pub fn emit(&self, event: OutputEvent) {
        self.bus.outputs().push(event);
    }
}

/// Failure of a typed outbox call.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl From<OutboxError> for crate::error::HandlerError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::Payload(e) => Self::Payload(e),
            OutboxError::Bus(e) => Self::Bus(e),
        }
    }
}
