//! Pending intents announced by other agents.

use bandmate_core::{
    AgentId,
    protocol::{IntentCancelled, IntentNotification, MusicalEvent},
};
use serde::Serialize;

/// An announced action that has not happened yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expectation {
    pub from: AgentId,
    pub action: String,
    pub target_bar: u64,
    pub intensity: f64,
    /// Tick at which the announcement was sent.
    pub announced_at: u64,
}

/// Expectations keyed by announcing agent and action.
///
/// An expectation leaves the book in one of three ways: the matching event
/// arrives, the sender cancels it, or it expires `expiry_bars` after its
/// target bar.
#[derive(Debug, Clone, Default)]
pub struct ExpectationBook {
    entries: Vec<Expectation>,
}

impl ExpectationBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an announcement. A repeat of the same (sender, action, bar)
    /// replaces the earlier one.
    pub fn record(&mut self, from: &AgentId, intent: IntentNotification, announced_at: u64) {
        self.entries.retain(|e| {
            !(e.from == *from && e.action == intent.action && e.target_bar == intent.target_bar)
        });
        self.entries.push(Expectation {
            from: from.clone(),
            action: intent.action,
            target_bar: intent.target_bar,
            intensity: intent.intensity.clamp(0.0, 1.0),
            announced_at,
        });
    }

    /// Take the expectation an event fulfils.
    ///
    /// Prefers an exact bar match, then the oldest earlier target from the
    /// same sender (the event may land late after a tempo jump).
    pub fn fulfil(&mut self, from: &AgentId, event: &MusicalEvent) -> Option<Expectation> {
        let same = |e: &Expectation| e.from == *from && e.action == event.action;
        let index = self
            .entries
            .iter()
            .position(|e| same(e) && e.target_bar == event.bar)
            .or_else(|| {
                self.entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| same(e) && e.target_bar <= event.bar)
                    .min_by_key(|(_, e)| e.target_bar)
                    .map(|(i, _)| i)
            })?;
        Some(self.entries.remove(index))
    }

    /// Drop a cancelled expectation. Returns whether one was removed.
    pub fn cancel(&mut self, from: &AgentId, cancelled: &IntentCancelled) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| {
            !(e.from == *from && e.action == cancelled.action && e.target_bar == cancelled.target_bar)
        });
        before != self.entries.len()
    }

    /// Drop expectations with `target_bar + expiry_bars < current_bar`.
    /// Returns how many were dropped.
    pub fn expire(&mut self, current_bar: u64, expiry_bars: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.target_bar.saturating_add(expiry_bars) >= current_bar);
        before - self.entries.len()
    }

    /// Forget everything announced by `from`.
    pub fn forget(&mut self, from: &AgentId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.from != *from);
        before - self.entries.len()
    }

    /// Expectations targeting `bar`.
    pub fn due(&self, bar: u64) -> impl Iterator<Item = &Expectation> {
        self.entries.iter().filter(move |e| e.target_bar == bar)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Expectation> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(target_bar: u64) -> IntentNotification {
        IntentNotification {
            action: "fill".to_string(),
            target_bar,
            intensity: 0.8,
        }
    }

    fn event(bar: u64) -> MusicalEvent {
        MusicalEvent {
            action: "fill".to_string(),
            bar,
            intensity: 0.8,
        }
    }

    #[test]
    fn test_fulfil_removes_matching_entry() {
        let drummer = AgentId::from("drummer");
        let mut book = ExpectationBook::new();
        book.record(&drummer, intent(11), 10);
        assert_eq!(book.len(), 1);

        let hit = book.fulfil(&drummer, &event(11)).unwrap();
        assert_eq!(hit.target_bar, 11);
        assert_eq!(hit.announced_at, 10);
        assert!(book.is_empty());
    }

    #[test]
    fn test_fulfil_ignores_other_senders() {
        let mut book = ExpectationBook::new();
        book.record(&"drummer".into(), intent(11), 10);
        assert!(book.fulfil(&"keys".into(), &event(11)).is_none());
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_late_event_takes_oldest_earlier_target() {
        let drummer = AgentId::from("drummer");
        let mut book = ExpectationBook::new();
        book.record(&drummer, intent(9), 5);
        book.record(&drummer, intent(7), 3);

        let hit = book.fulfil(&drummer, &event(10)).unwrap();
        assert_eq!(hit.target_bar, 7);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_repeat_announcement_replaces() {
        let drummer = AgentId::from("drummer");
        let mut book = ExpectationBook::new();
        book.record(&drummer, intent(7), 3);
        book.record(&drummer, intent(7), 4);
        assert_eq!(book.len(), 1);
        assert_eq!(book.iter().next().unwrap().announced_at, 4);
    }

    #[test]
    fn test_expiry_window() {
        let drummer = AgentId::from("drummer");
        let mut book = ExpectationBook::new();
        book.record(&drummer, intent(7), 3);

        assert_eq!(book.expire(9, 2), 0);
        assert_eq!(book.expire(10, 2), 1);
        assert!(book.is_empty());
    }

    #[test]
    fn test_cancel_and_forget() {
        let drummer = AgentId::from("drummer");
        let mut book = ExpectationBook::new();
        book.record(&drummer, intent(7), 3);
        book.record(&drummer, intent(11), 7);
        book.record(&"keys".into(), intent(11), 7);

        let cancelled = IntentCancelled {
            action: "fill".to_string(),
            target_bar: 7,
        };
        assert!(book.cancel(&drummer, &cancelled));
        assert!(!book.cancel(&drummer, &cancelled));
        assert_eq!(book.due(11).count(), 2);

        assert_eq!(book.forget(&drummer), 1);
        assert_eq!(book.len(), 1);
    }
}
