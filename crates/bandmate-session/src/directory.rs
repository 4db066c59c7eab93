//! Agent directory: id to live agent, in registration order.

use bandmate_core::{Agent, AgentId};

use crate::error::SessionError;

/// Registered agents of one session.
///
/// Broadcast and tick order both follow registration order.
#[derive(Default)]
pub struct Directory {
    agents: Vec<Box<dyn Agent>>,
}

impl Directory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent.
    ///
    /// # Errors
    /// Returns [`SessionError::DuplicateAgent`] if the id is taken; the
    /// existing registration is left untouched.
    pub fn register(&mut self, agent: Box<dyn Agent>) -> Result<(), SessionError> {
        if self.contains(agent.id()) {
            return Err(SessionError::DuplicateAgent(agent.id().clone()));
        }
        self.agents.push(agent);
        Ok(())
    }

    /// Remove an agent, returning it if it was registered.
    pub fn unregister(&mut self, id: &AgentId) -> Option<Box<dyn Agent>> {
        let index = self.agents.iter().position(|a| a.id() == id)?;
        Some(self.agents.remove(index))
    }

    #[must_use]
    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.iter().any(|a| a.id() == id)
    }

    #[must_use]
    pub fn get(&self, id: &AgentId) -> Option<&dyn Agent> {
        self.agents.iter().find(|a| a.id() == id).map(|agent| &**agent)
    }

    pub fn get_mut(&mut self, id: &AgentId) -> Option<&mut Box<dyn Agent>> {
        self.agents.iter_mut().find(|a| a.id() == id)
    }

    /// Snapshot of ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|a| a.id().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
