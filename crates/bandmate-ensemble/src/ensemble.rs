//! Build a band from configuration.

use std::collections::HashSet;

use bandmate_core::{Agent, AgentId, AgentProfile};
use bandmate_session::{AgentKind, AgentSpec, BandConfig, SessionAuthority, SessionError};
use thiserror::Error;

use crate::{
    bass::Bassist,
    drums::{Drummer, FillPlan},
};

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("Agent {agent} refers to unknown peer {peer}")]
    UnknownPeer { agent: String, peer: String },
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Agents built from `[[agents]]`, in file order.
pub struct Ensemble {
    agents: Vec<Box<dyn Agent>>,
}

impl Ensemble {
    /// Build every enabled agent.
    ///
    /// # Errors
    /// Returns [`EnsembleError::UnknownPeer`] if a listener or groove partner
    /// names an agent that is not enabled.
    pub fn from_config(config: &BandConfig) -> Result<Self, EnsembleError> {
        let enabled: HashSet<&str> = config.enabled_agents().map(|a| a.id.as_str()).collect();

        let mut agents = Vec::new();
        for spec in config.enabled_agents() {
            for peer in spec.listeners.iter().chain(&spec.groove_partner) {
                if !enabled.contains(peer.as_str()) {
                    return Err(EnsembleError::UnknownPeer {
                        agent: spec.id.clone(),
                        peer: peer.clone(),
                    });
                }
            }
            agents.push(build_agent(spec, config.expectations.expiry_bars));
        }
        Ok(Self { agents })
    }

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

    /// Register every agent with `session`, in order.
    ///
    /// # Errors
    /// Stops at the first registration error, e.g. a duplicate id.
    pub fn join(self, session: &mut SessionAuthority) -> Result<(), EnsembleError> {
        for agent in self.agents {
            session.register_agent(agent)?;
        }
        Ok(())
    }
}

fn build_agent(spec: &AgentSpec, expiry_bars: u64) -> Box<dyn Agent> {
    let agent_type = match spec.kind {
        AgentKind::Drums => "drums",
        AgentKind::Bass => "bass",
    };
    let profile = AgentProfile::new(spec.id.as_str(), agent_type, spec.responsiveness);
    match spec.kind {
        AgentKind::Drums => Box::new(Drummer::agent(
            profile,
            FillPlan::default(),
            spec.listeners.iter().map(|id| AgentId::from(id.as_str())).collect(),
        )),
        AgentKind::Bass => Box::new(Bassist::agent(
            profile,
            expiry_bars,
            spec.groove_partner.as_deref().map(AgentId::from),
        )),
    }
}

#[cfg(test)]
mod tests {
    use bandmate_core::Bandmate;

    use super::*;

    const BAND: &str = r#"
        [[agents]]
        id = "drummer"
        kind = "drums"
        listeners = ["bassist"]

        [[agents]]
        id = "bassist"
        kind = "bass"
        responsiveness = 0.8
        groove_partner = "drummer"

        [[agents]]
        id = "sub"
        kind = "bass"
        enabled = false
    "#;

    #[test]
    fn test_builds_enabled_agents_in_order() {
        let config = BandConfig::from_toml_str(BAND).unwrap();
        let ensemble = Ensemble::from_config(&config).unwrap();
        assert_eq!(ensemble.ids(), [AgentId::from("drummer"), AgentId::from("bassist")]);

        let mut session = SessionAuthority::from_config(&config);
        ensemble.join(&mut session).unwrap();
        let bassist = session.inspect::<Bandmate<Bassist>>(&"bassist".into()).unwrap();
        assert_eq!(bassist.profile().responsiveness, 0.8);
        assert!(session.inspect::<Bandmate<Drummer>>(&"drummer".into()).is_some());
    }

    #[test]
    fn test_unknown_peer_rejected() {
        let config = BandConfig::from_toml_str(
            r#"
            [[agents]]
            id = "bassist"
            kind = "bass"
            groove_partner = "sub"
        "#,
        )
        .unwrap();
        assert!(matches!(
            Ensemble::from_config(&config),
            Err(EnsembleError::UnknownPeer { peer, .. }) if peer == "sub"
        ));
    }

    #[test]
    fn test_joining_twice_is_a_duplicate() {
        let config = BandConfig::from_toml_str(BAND).unwrap();
        let mut session = SessionAuthority::from_config(&config);
        Ensemble::from_config(&config).unwrap().join(&mut session).unwrap();

        let err = Ensemble::from_config(&config).unwrap().join(&mut session).unwrap_err();
        assert!(matches!(
            err,
            EnsembleError::Session(SessionError::DuplicateAgent(id)) if id == "drummer"
        ));
    }
}
