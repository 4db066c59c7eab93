//! Drummer policy: keeps time, plans fills, and announces them ahead.

use bandmate_core::{
    AgentId, AgentProfile, Bandmate, HandlerError, HandlerTable, MessageType, MusicalContext, Note, Outbox, OutputEvent, Policy,
    protocol::{IntentCancelled, IntentNotification, MusicalEvent, MusicalQuery, MusicalResponse},
};
use serde_json::json;

use crate::voicing;

const KICK: u8 = 36;
const SNARE: u8 = 38;
const HI_HAT_CLOSED: u8 = 42;
const TOM_LOW: u8 = 43;
const TOM_MID: u8 = 47;
const CRASH: u8 = 49;
const TOM_HIGH: u8 = 50;

/// General MIDI percussion channel.
const DRUM_CHANNEL: u8 = 9;
const HIT_BEATS: f64 = 0.1;

pub const FILL: &str = "fill";

/// Fill timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillPlan {
    /// A fill is announced on bars where `bar % every == every - 1`.
    pub every: u64,
    /// Bars between the announcement and the fill.
    pub lead: u64,
    pub intensity: f64,
}

impl Default for FillPlan {
    fn default() -> Self {
        Self {
            every: 4,
            lead: 4,
            intensity: 0.8,
        }
    }
}

/// A fill that has been announced but not played.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedFill {
    pub target_bar: u64,
    pub intensity: f64,
}

/// Drum decisions for one agent.
#[derive(Debug, Default)]
pub struct Drummer {
    plan: FillPlan,
    /// Fill events go directly to these agents; broadcast when empty.
    listeners: Vec<AgentId>,
    planned: Option<PlannedFill>,
    fill_bar: Option<u64>,
    fills_played: u64,
    last_bar: Option<u64>,
    last_eighth: Option<u64>,
    last_section: Option<String>,
}

impl Drummer {
    #[must_use]
    pub fn new(plan: FillPlan, listeners: Vec<AgentId>) -> Self {
        Self {
            plan: FillPlan {
                every: plan.every.max(1),
                ..plan
            },
            listeners,
            ..Self::default()
        }
    }

    /// Build a registered-ready agent.
    #[must_use]
    pub fn agent(profile: AgentProfile, plan: FillPlan, listeners: Vec<AgentId>) -> Bandmate<Self> {
        Bandmate::new(profile, Self::new(plan, listeners))
    }

    #[must_use]
    pub const fn planned_fill(&self) -> Option<PlannedFill> {
        self.planned
    }

    #[must_use]
    pub const fn fills_played(&self) -> u64 {
        self.fills_played
    }

    fn on_new_bar(&mut self, profile: &AgentProfile, context: &MusicalContext, outbox: &Outbox) -> Result<(), HandlerError> {
        let bar = context.bar_position;

        if let Some(fill) = self.planned.filter(|f| f.target_bar <= bar) {
            self.planned = None;
            self.play_fill(profile, fill, bar, outbox)?;
            return Ok(());
        }

        if self.planned.is_none() && bar % self.plan.every == self.plan.every - 1 {
            let fill = PlannedFill {
                target_bar: bar + self.plan.lead,
                intensity: self.plan.intensity,
            };
            outbox.broadcast_typed(&IntentNotification {
                action: FILL.to_string(),
                target_bar: fill.target_bar,
                intensity: fill.intensity,
            })?;
            tracing::debug!(agent = %profile.id, bar, target_bar = fill.target_bar, "Announced fill");
            self.planned = Some(fill);
        }
        Ok(())
    }

    fn play_fill(&mut self, profile: &AgentProfile, fill: PlannedFill, bar: u64, outbox: &Outbox) -> Result<(), HandlerError> {
        let event = MusicalEvent {
            action: FILL.to_string(),
            bar,
            intensity: fill.intensity,
        };
        if self.listeners.is_empty() {
            outbox.broadcast_typed(&event)?;
        } else {
            for listener in &self.listeners {
                outbox.send_typed(listener, &event)?;
            }
        }

        outbox.emit(OutputEvent::Animation {
            agent: profile.id.clone(),
            tick: outbox.tick(),
            gesture: FILL.to_string(),
            intensity: fill.intensity,
        });
        self.fill_bar = Some(bar);
        self.fills_played += 1;
        tracing::debug!(agent = %profile.id, bar, "Playing fill");
        Ok(())
    }

    fn cancel_fill(&mut self, profile: &AgentProfile, outbox: &Outbox) -> Result<(), HandlerError> {
        let Some(fill) = self.planned.take() else {
            return Ok(());
        };
        outbox.broadcast_typed(&IntentCancelled {
            action: FILL.to_string(),
            target_bar: fill.target_bar,
        })?;
        tracing::debug!(agent = %profile.id, target_bar = fill.target_bar, "Cancelled fill on section change");
        Ok(())
    }

    /// Notes for the eighth note that just started. Hi-hats keep eighths; kick
    /// and snare only land on the beat.
    fn beat_notes(&self, profile: &AgentProfile, context: &MusicalContext) -> Vec<Note> {
        let beat = context.beat_in_bar();
        let last_beat = context.beats_per_bar() - 1;
        let intensity = voicing::section_intensity(&context.section);
        let hit = |pitch, base| Note {
            pitch,
            velocity: voicing::velocity(base, intensity, context.dynamics, profile.responsiveness),
            duration_beats: HIT_BEATS,
            channel: DRUM_CHANNEL,
        };

        let in_fill = self.fill_bar == Some(context.bar_position);
        let mut notes = vec![hit(HI_HAT_CLOSED, 70)];
        if context.beat_position.fract() >= 0.5 {
            return notes;
        }
        match beat % 4 {
            0 => notes.push(hit(KICK, 100)),
            2 => notes.push(hit(KICK, 90)),
            _ => notes.push(hit(SNARE, 100)),
        }
        if beat == 0 && self.fill_bar.is_some_and(|b| b + 1 == context.bar_position) {
            notes.push(hit(CRASH, 110));
        }
        if in_fill && beat == last_beat {
            notes.extend([hit(TOM_HIGH, 90), hit(TOM_MID, 90), hit(TOM_LOW, 90)]);
        }
        notes
    }

    fn answer(&self, query: &MusicalQuery) -> serde_json::Value {
        match query.question.as_str() {
            "next_fill" => self.planned.map_or(serde_json::Value::Null, |f| {
                json!({ "target_bar": f.target_bar, "intensity": f.intensity })
            }),
            "groove" => json!({
                "pattern": "rock",
                "section": self.last_section,
                "kick_beats": [0, 2],
                "snare_beats": [1, 3],
            }),
            _ => serde_json::Value::Null,
        }
    }
}

/// Absolute eighth-note count since the start of the session.
fn eighth_index(context: &MusicalContext) -> u64 {
    context
        .beat_index()
        .saturating_mul(2)
        .saturating_add(u64::from(context.beat_position.fract() >= 0.5))
}

impl Policy for Drummer {
    fn install(handlers: &mut HandlerTable<Self>) {
        handlers.register(MessageType::MusicalQuery, |drummer, message, outbox| {
            let query: MusicalQuery = message.decode()?;
            let answer = drummer.answer(&query);
            outbox.send_typed(
                message.sender_id(),
                &MusicalResponse {
                    request_id: query.request_id,
                    answer,
                },
            )?;
            Ok(())
        });
    }

    fn on_context(
        &mut self,
        profile: &AgentProfile,
        context: &MusicalContext,
        outbox: &Outbox,
    ) -> Result<(), HandlerError> {
        if self
            .last_section
            .as_deref()
            .is_some_and(|section| section != context.section)
        {
            self.cancel_fill(profile, outbox)?;
        }
        if self.last_section.as_deref() != Some(context.section.as_str()) {
            self.last_section = Some(context.section.clone());
        }

        if !context.is_playing {
            return Ok(());
        }

        if self.last_bar != Some(context.bar_position) {
            self.last_bar = Some(context.bar_position);
            self.on_new_bar(profile, context, outbox)?;
        }

        let eighth = eighth_index(context);
        if self.last_eighth != Some(eighth) {
            self.last_eighth = Some(eighth);
            outbox.emit(OutputEvent::Notes {
                agent: profile.id.clone(),
                tick: context.tick,
                notes: self.beat_notes(profile, context),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bandmate_core::{Agent, Bus, Message, OutputStore, Payload, SessionState};

    use super::*;

    fn drummer(listeners: &[&str]) -> (Bandmate<Drummer>, Arc<Bus>) {
        let bus = Arc::new(Bus::new(Arc::new(OutputStore::default())));
        bus.transition(SessionState::Idle, SessionState::Running);
        let mut agent = Drummer::agent(
            AgentProfile::new("drummer", "drums", 1.0),
            FillPlan::default(),
            listeners.iter().map(|id| AgentId::from(*id)).collect(),
        );
        agent.attach(Outbox::new("drummer".into(), Arc::clone(&bus)));
        (agent, bus)
    }

    fn at_bar(bar: u64) -> MusicalContext {
        MusicalContext {
            bar_position: bar,
            tick: bar,
            is_playing: true,
            ..MusicalContext::default()
        }
    }

    fn drain(bus: &Bus) -> Vec<Message> {
        std::iter::from_fn(|| bus.dequeue()).collect()
    }

    fn query(from: &str, question: &str) -> Message {
        Message::direct(
            from.into(),
            "drummer".into(),
            MessageType::MusicalQuery,
            Payload::from_typed(&MusicalQuery {
                request_id: "q-1".to_string(),
                question: question.to_string(),
            })
            .unwrap(),
            0,
        )
    }

    #[test]
    fn test_announces_fill_on_fourth_bar() {
        let (mut agent, bus) = drummer(&[]);
        for bar in 0..3 {
            agent.on_context(&at_bar(bar)).unwrap();
        }
        assert!(drain(&bus).is_empty());

        agent.on_context(&at_bar(3)).unwrap();
        let sent = drain(&bus);
        assert_eq!(sent.len(), 1);
        let intent: IntentNotification = sent[0].decode().unwrap();
        assert_eq!(intent.target_bar, 7);
        assert_eq!(intent.intensity, 0.8);
        assert!(sent[0].recipient_id().is_none());
        assert_eq!(agent.policy().planned_fill().unwrap().target_bar, 7);
    }

    #[test]
    fn test_fill_goes_to_listeners_on_target_bar() {
        let (mut agent, bus) = drummer(&["bassist"]);
        for bar in 0..=7 {
            agent.on_context(&at_bar(bar)).unwrap();
        }
        let sent = drain(&bus);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].kind(), &MessageType::MusicalEvent);
        assert_eq!(sent[1].recipient_id(), Some(&AgentId::from("bassist")));
        let event: MusicalEvent = sent[1].decode().unwrap();
        assert_eq!(event.bar, 7);

        assert!(agent.policy().planned_fill().is_none());
        assert_eq!(agent.policy().fills_played(), 1);
        assert!(bus.outputs().history().iter().any(|e| matches!(
            e,
            OutputEvent::Animation { gesture, .. } if gesture == FILL
        )));
    }

    #[test]
    fn test_no_announcement_on_fill_bar() {
        let (mut agent, bus) = drummer(&[]);
        for bar in 0..=10 {
            agent.on_context(&at_bar(bar)).unwrap();
        }
        let kinds: Vec<MessageType> = drain(&bus).iter().map(|m| m.kind().clone()).collect();
        assert_eq!(kinds, [MessageType::IntentNotification, MessageType::MusicalEvent]);

        agent.on_context(&at_bar(11)).unwrap();
        let intent: IntentNotification = drain(&bus)[0].decode().unwrap();
        assert_eq!(intent.target_bar, 15);
    }

    #[test]
    fn test_section_change_cancels_planned_fill() {
        let (mut agent, bus) = drummer(&[]);
        for bar in 0..=3 {
            agent.on_context(&at_bar(bar)).unwrap();
        }
        drain(&bus);

        let mut chorus = at_bar(4);
        chorus.section = "chorus".to_string();
        agent.on_context(&chorus).unwrap();

        let sent = drain(&bus);
        let cancelled: IntentCancelled = sent[0].decode().unwrap();
        assert_eq!(cancelled.target_bar, 7);
        assert!(agent.policy().planned_fill().is_none());
    }

    #[test]
    fn test_answers_queries_with_request_id() {
        let (mut agent, bus) = drummer(&[]);
        for bar in 0..=3 {
            agent.on_context(&at_bar(bar)).unwrap();
        }
        drain(&bus);

        agent.on_message(&query("bassist", "next_fill")).unwrap();
        let reply = bus.dequeue().unwrap();
        assert_eq!(reply.recipient_id(), Some(&AgentId::from("bassist")));
        let response: MusicalResponse = reply.decode().unwrap();
        assert_eq!(response.request_id, "q-1");
        assert_eq!(response.answer["target_bar"], 7);

        agent.on_message(&query("bassist", "favourite_colour")).unwrap();
        let response: MusicalResponse = bus.dequeue().unwrap().decode().unwrap();
        assert!(response.answer.is_null());
    }

    #[test]
    fn test_rock_pattern() {
        let (agent, _bus) = drummer(&[]);
        let policy = agent.policy();
        let profile = AgentProfile::new("drummer", "drums", 1.0);
        let pitches = |beat: f64| -> Vec<u8> {
            let ctx = MusicalContext {
                beat_position: beat,
                ..at_bar(1)
            };
            policy.beat_notes(&profile, &ctx).iter().map(|n| n.pitch).collect()
        };

        assert_eq!(pitches(0.0), [HI_HAT_CLOSED, KICK]);
        assert_eq!(pitches(1.0), [HI_HAT_CLOSED, SNARE]);
        assert_eq!(pitches(2.0), [HI_HAT_CLOSED, KICK]);
        assert_eq!(pitches(3.0), [HI_HAT_CLOSED, SNARE]);
        assert_eq!(pitches(0.5), [HI_HAT_CLOSED]);
        assert_eq!(pitches(3.5), [HI_HAT_CLOSED]);
    }

    #[test]
    fn test_hi_hat_keeps_eighths() {
        let (mut agent, bus) = drummer(&[]);
        for beat in [0.0, 0.2, 0.5, 0.9, 1.0] {
            agent
                .on_context(&MusicalContext {
                    beat_position: beat,
                    ..at_bar(1)
                })
                .unwrap();
        }

        let sizes: Vec<usize> = bus
            .outputs()
            .history()
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Notes { notes, .. } => Some(notes.len()),
                OutputEvent::Animation { .. } => None,
            })
            .collect();
        assert_eq!(sizes, [2, 1, 2]);
    }

    #[test]
    fn test_idle_transport_plays_nothing() {
        let (mut agent, bus) = drummer(&[]);
        let ctx = MusicalContext {
            bar_position: 3,
            ..MusicalContext::default()
        };
        agent.on_context(&ctx).unwrap();
        assert!(drain(&bus).is_empty());
        assert!(bus.outputs().history().is_empty());
    }
}
