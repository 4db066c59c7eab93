//! Bassist policy: follows the key, listens for fills, and asks its groove
//! partner how it is playing.

use std::collections::HashMap;

use bandmate_core::{
    AgentId, AgentProfile, Bandmate, HandlerError, HandlerTable, MessageType, MusicalContext, Note,
    Outbox, OutputEvent, Policy,
    protocol::{
        CoordinationRequest, IntentCancelled, IntentNotification, MusicalEvent, MusicalQuery,
        MusicalResponse,
    },
};
use serde_json::Value;

use crate::{expectations::ExpectationBook, voicing};

const BASS_CHANNEL: u8 = 0;
const NOTE_BEATS: f64 = 0.9;
const MAJOR_SCALE: [u8; 8] = [0, 2, 4, 5, 7, 9, 11, 12];

/// Lowest bass root for `key` (C2 = 36 through B2 = 47).
///
/// Accepts sharps and flats; a trailing `m` (minor) is ignored.
#[must_use]
pub fn root_pitch(key: &str) -> Option<u8> {
    let name = key.trim();
    let name = name.strip_suffix('m').unwrap_or(name);
    let offset = match name {
        "C" => 0,
        "C#" | "Db" => 1,
        "D" => 2,
        "D#" | "Eb" => 3,
        "E" => 4,
        "F" => 5,
        "F#" | "Gb" => 6,
        "G" => 7,
        "G#" | "Ab" => 8,
        "A" => 9,
        "A#" | "Bb" => 10,
        "B" => 11,
        _ => return None,
    };
    Some(36 + offset)
}

/// Root of a chord symbol such as `"G7"`, `"F#m"` or `"Bbmaj7"`.
fn chord_root(chord: &str) -> Option<u8> {
    let chord = chord.trim();
    let letter_len = chord.chars().next()?.len_utf8();
    let with_accidental = chord
        .get(..letter_len + 1)
        .filter(|name| name.ends_with(['#', 'b']));
    root_pitch(with_accidental.unwrap_or(&chord[..letter_len]))
}

/// Bass decisions for one agent.
#[derive(Debug, Default)]
pub struct Bassist {
    expectations: ExpectationBook,
    expiry_bars: u64,
    groove_partner: Option<AgentId>,
    /// Outstanding queries by request id.
    pending_queries: HashMap<String, String>,
    partner_groove: Option<Value>,
    /// Bar to play root-only because a fill lands on it.
    simplify_bar: Option<u64>,
    simplified_bars: u64,
    muted: bool,
    last_beat: Option<u64>,
    last_section: Option<String>,
    last_bar: Option<u64>,
}

impl Bassist {
    #[must_use]
    pub fn new(expiry_bars: u64, groove_partner: Option<AgentId>) -> Self {
        Self {
            expiry_bars,
            groove_partner,
            ..Self::default()
        }
    }

    /// Build a registered-ready agent.
    #[must_use]
    pub fn agent(profile: AgentProfile, expiry_bars: u64, groove_partner: Option<AgentId>) -> Bandmate<Self> {
        Bandmate::new(profile, Self::new(expiry_bars, groove_partner))
    }

    #[must_use]
    pub const fn expectations(&self) -> &ExpectationBook {
        &self.expectations
    }

    /// Last groove description received from the partner.
    #[must_use]
    pub const fn partner_groove(&self) -> Option<&Value> {
        self.partner_groove.as_ref()
    }

    #[must_use]
    pub fn pending_queries(&self) -> usize {
        self.pending_queries.len()
    }

    /// Number of bars simplified for an announced fill.
    #[must_use]
    pub const fn simplified_bars(&self) -> u64 {
        self.simplified_bars
    }

    #[must_use]
    pub const fn is_muted(&self) -> bool {
        self.muted
    }

    fn ask_partner(&mut self, profile: &AgentProfile, outbox: &Outbox) -> Result<(), HandlerError> {
        let Some(partner) = &self.groove_partner else {
            return Ok(());
        };
        let request_id = uuid::Uuid::new_v4().to_string();
        let question = "groove".to_string();
        outbox.send_typed(
            partner,
            &MusicalQuery {
                request_id: request_id.clone(),
                question: question.clone(),
            },
        )?;
        tracing::trace!(agent = %profile.id, %partner, %request_id, "Asked partner for groove");
        // only the newest groove question is worth an answer
        self.pending_queries.retain(|_, asked| *asked != question);
        self.pending_queries.insert(request_id, question);
        Ok(())
    }

    fn on_intent(&mut self, from: &AgentId, intent: IntentNotification, tick: u64) {
        tracing::debug!(from = %from, action = %intent.action, target_bar = intent.target_bar, "Expecting");
        self.expectations.record(from, intent, tick);
    }

    fn on_event(&mut self, from: &AgentId, event: &MusicalEvent) {
        if let Some(expected) = self.expectations.fulfil(from, event) {
            tracing::debug!(from = %from, bar = event.bar, action = %expected.action, "Simplifying for expected event");
            self.simplify_bar = Some(event.bar);
        } else {
            tracing::trace!(from = %from, bar = event.bar, "Unannounced event");
        }
    }

    fn on_response(&mut self, response: MusicalResponse) {
        match self.pending_queries.remove(&response.request_id) {
            Some(question) if question == "groove" => self.partner_groove = Some(response.answer),
            Some(_) => {}
            None => {
                tracing::trace!(request_id = %response.request_id, "Response for unknown request, ignoring");
            }
        }
    }

    fn on_coordination(&mut self, request: &CoordinationRequest) {
        match request.request.as_str() {
            "drop_out" => self.muted = true,
            "come_in" => self.muted = false,
            other => tracing::trace!(request = other, "Unsupported coordination request"),
        }
    }

    /// Notes for the beat that just started.
    fn beat_notes(&self, profile: &AgentProfile, context: &MusicalContext) -> Vec<Note> {
        let Some(root) = root_pitch(&context.key) else {
            tracing::trace!(key = %context.key, "Unknown key, resting");
            return Vec::new();
        };
        // follow the chord: shift the key's scale by the chord root
        let offset = chord_root(&context.chord).map_or(0, |chord| i16::from(chord) - i16::from(root));
        let simplified = self.simplify_bar == Some(context.bar_position);
        let intensity = voicing::section_intensity(&context.section);

        // (scale degree, base velocity) per beat
        let (degree, base) = match (context.beat_in_bar() % 4, simplified) {
            (0, _) => (0, 100),
            (_, true) => return Vec::new(),
            (1, false) => (4, 90),
            (2, false) => (0, 95),
            _ => (2, 85),
        };
        let pitch = (i16::from(root + MAJOR_SCALE[degree]) + offset).clamp(0, 127);
        let pitch = u8::try_from(pitch).unwrap_or(root);
        vec![Note {
            pitch,
            velocity: voicing::velocity(base, intensity, context.dynamics, profile.responsiveness),
            duration_beats: NOTE_BEATS,
            channel: BASS_CHANNEL,
        }]
    }
}

impl Policy for Bassist {
    fn install(handlers: &mut HandlerTable<Self>) {
        handlers.register(MessageType::IntentNotification, |bass, message, _| {
            bass.on_intent(message.sender_id(), message.decode()?, message.timestamp());
            Ok(())
        });
        handlers.register(MessageType::IntentCancelled, |bass, message, _| {
            let cancelled: IntentCancelled = message.decode()?;
            bass.expectations.cancel(message.sender_id(), &cancelled);
            Ok(())
        });
        handlers.register(MessageType::MusicalEvent, |bass, message, _| {
            let event: MusicalEvent = message.decode()?;
            bass.on_event(message.sender_id(), &event);
            Ok(())
        });
        handlers.register(MessageType::MusicalResponse, |bass, message, _| {
            bass.on_response(message.decode()?);
            Ok(())
        });
        handlers.register(MessageType::CoordinationRequest, |bass, message, _| {
            let request: CoordinationRequest = message.decode()?;
            bass.on_coordination(&request);
            Ok(())
        });
    }

    fn on_context(
        &mut self,
        profile: &AgentProfile,
        context: &MusicalContext,
        outbox: &Outbox,
    ) -> Result<(), HandlerError> {
        let bar = context.bar_position;
        if self.last_bar != Some(bar) {
            self.last_bar = Some(bar);
            let expired = self.expectations.expire(bar, self.expiry_bars);
            if expired > 0 {
                tracing::debug!(agent = %profile.id, bar, expired, "Dropped stale expectations");
            }
            if self.simplify_bar == Some(bar) {
                self.simplified_bars += 1;
            }
        }

        if self.last_section.as_deref() != Some(context.section.as_str()) {
            self.last_section = Some(context.section.clone());
            self.ask_partner(profile, outbox)?;
        }

        if !context.is_playing || self.muted {
            return Ok(());
        }

        let beat = context.beat_index();
        if self.last_beat != Some(beat) {
            self.last_beat = Some(beat);
            let notes = self.beat_notes(profile, context);
            if !notes.is_empty() {
                outbox.emit(OutputEvent::Notes {
                    agent: profile.id.clone(),
                    tick: context.tick,
                    notes,
                });
            }
        }
        Ok(())
    }
}
