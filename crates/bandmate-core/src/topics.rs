//! Topic name to subscriber mapping.

use std::collections::HashMap;

use crate::message::AgentId;

/// Ordered, duplicate-free subscriber lists keyed by topic.
///
/// Topics appear on first subscribe and stay registered once empty.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<String, Vec<AgentId>>,
}

impl TopicRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `agent` to `topic`. Subscribing twice is a no-op.
    pub fn subscribe(&mut self, agent: &AgentId, topic: &str) {
        let subscribers = self.topics.entry(topic.to_string()).or_default();
        if !subscribers.contains(agent) {
            subscribers.push(agent.clone());
        }
    }

    /// Remove `agent` from `topic` if present.
    pub fn unsubscribe(&mut self, agent: &AgentId, topic: &str) {
        if let Some(subscribers) = self.topics.get_mut(topic) {
            subscribers.retain(|s| s != agent);
        }
    }

    /// Drop every subscription held by `agent`.
    pub fn remove_agent(&mut self, agent: &AgentId) {
        for subscribers in self.topics.values_mut() {
            subscribers.retain(|s| s != agent);
        }
    }

    /// Snapshot of the subscribers of `topic`, in subscription order.
    #[must_use]
    pub fn subscribers(&self, topic: &str) -> Vec<AgentId> {
        self.topics.get(topic).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn is_subscribed(&self, agent: &AgentId, topic: &str) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|subscribers| subscribers.contains(agent))
    }

    /// Registered topic names, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut registry = TopicRegistry::new();
        let drummer = AgentId::from("drummer");
        registry.subscribe(&drummer, "groove");
        registry.subscribe(&drummer, "groove");
        assert_eq!(registry.subscribers("groove"), vec![drummer]);
    }

    #[test]
    fn test_subscription_order_preserved() {
        let mut registry = TopicRegistry::new();
        for id in ["keys", "bassist", "drummer"] {
            registry.subscribe(&id.into(), "animation");
        }
        let order: Vec<String> = registry
            .subscribers("animation")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(order, ["keys", "bassist", "drummer"]);
    }

    #[test]
    fn test_empty_topic_stays_registered() {
        let mut registry = TopicRegistry::new();
        let bassist = AgentId::from("bassist");
        registry.subscribe(&bassist, "groove");
        registry.unsubscribe(&bassist, "groove");
        registry.unsubscribe(&bassist, "groove");

        assert!(registry.subscribers("groove").is_empty());
        assert_eq!(registry.topics(), vec!["groove".to_string()]);
        assert!(registry.subscribers("missing").is_empty());
    }

    #[test]
    fn test_remove_agent_clears_all_topics() {
        let mut registry = TopicRegistry::new();
        let keys = AgentId::from("keys");
        registry.subscribe(&keys, "a");
        registry.subscribe(&keys, "b");
        registry.remove_agent(&keys);
        assert!(!registry.is_subscribed(&keys, "a"));
        assert!(!registry.is_subscribed(&keys, "b"));
    }
}
