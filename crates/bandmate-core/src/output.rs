//! Musical output fan-out to external collaborators.
//!
//! Agents push finished decisions (notes, animation gestures) here without
//! waiting; collaborators such as a MIDI bridge or an avatar renderer read
//! them from a broadcast channel on their own tasks.

use std::{
    collections::VecDeque,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::message::AgentId;

/// Default number of events kept for late subscribers.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// A note decision. Turning it into MIDI bytes is the collaborator's job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub duration_beats: f64,
    pub channel: u8,
}

/// Output produced by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    /// Notes to sound at `tick`.
    Notes {
        agent: AgentId,
        tick: u64,
        notes: Vec<Note>,
    },
    /// Animation intent for the agent's avatar.
    Animation {
        agent: AgentId,
        tick: u64,
        gesture: String,
        intensity: f64,
    },
}

impl OutputEvent {
    #[must_use]
    pub const fn agent(&self) -> &AgentId {
        match self {
            Self::Notes { agent, .. } | Self::Animation { agent, .. } => agent,
        }
    }
}

/// Broadcast + bounded history of output events.
pub struct OutputStore {
    history: RwLock<VecDeque<OutputEvent>>,
    limit: usize,
    sender: broadcast::Sender<OutputEvent>,
}

impl Default for OutputStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl OutputStore {
    /// Create a store keeping at most `limit` events of history.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(limit.max(16));
        Self {
            history: RwLock::new(VecDeque::with_capacity(limit.min(256))),
            limit,
            sender,
        }
    }

    /// Push an event to live listeners and history. Never blocks on readers.
    pub fn push(&self, event: OutputEvent) {
        let _ = self.sender.send(event.clone()); // no listeners is fine

        let mut history = self
            .history
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while history.len() >= self.limit.max(1) {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of retained history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<OutputEvent> {
        self.history
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live events.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, OutputEvent> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Stream of note batches for one agent.
    #[must_use]
    pub fn note_stream(&self, agent: AgentId) -> futures::stream::BoxStream<'static, Vec<Note>> {
        self.history_plus_stream()
            .filter_map(move |event| {
                let notes = match event {
                    OutputEvent::Notes { agent: from, notes, .. } if from == agent => Some(notes),
                    _ => None,
                };
                async move { notes }
            })
            .boxed()
    }

    /// Forward live events to a collaborator on its own task.
    ///
    /// Collaborator failures are logged and do not stop the forwarder.
    pub fn spawn_collaborator(
        self: Arc<Self>,
        collaborator: Arc<dyn Collaborator>,
    ) -> tokio::task::JoinHandle<()> {
        let stream = BroadcastStream::new(self.subscribe());
        tokio::spawn(async move {
            tokio::pin!(stream);

            while let Some(next) = stream.next().await {
                match next {
                    Ok(event) => {
                        if let Err(e) = collaborator.receive(&event).await {
                            tracing::warn!(collaborator = collaborator.name(), error = %e, "Collaborator rejected output");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(collaborator = collaborator.name(), error = %e, "Collaborator lagged");
                    }
                }
            }
        })
    }
}

/// Collaborator error.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable")]
    Unavailable,
    #[error("Collaborator failed: {0}")]
    Failed(String),
}

/// External consumer of agent output (MIDI bridge, animation controller).
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Handle one output event.
    async fn receive(&self, event: &OutputEvent) -> Result<(), CollaboratorError>;
}

/// Collaborator that only logs what it receives.
#[derive(Debug, Default, Clone)]
pub struct TracingCollaborator;

#[async_trait]
impl Collaborator for TracingCollaborator {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn receive(&self, event: &OutputEvent) -> Result<(), CollaboratorError> {
        match event {
            OutputEvent::Notes { agent, tick, notes } => {
                tracing::info!(%agent, tick, count = notes.len(), "notes");
            }
            OutputEvent::Animation {
                agent,
                tick,
                gesture,
                intensity,
            } => {
                tracing::info!(%agent, tick, gesture, intensity, "animation");
            }
        }
        Ok(())
    }
}
