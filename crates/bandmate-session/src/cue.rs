//! External cues that change the musical context between ticks.

use bandmate_core::MusicalContext;
use serde::{Deserialize, Serialize};

/// Features reported by an audio analyser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    #[serde(default)]
    pub tempo: Option<f64>,
    #[serde(default)]
    pub dynamics: Option<f64>,
    /// Detected chords, strongest first.
    #[serde(default)]
    pub chords: Vec<String>,
}

/// A performer or analyser instruction, applied at the top of the next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Cue {
    SectionChange(String),
    TempoChange(f64),
    KeyChange(String),
    ChordChange(String),
    Dynamics(f64),
    Play,
    Pause,
    Features(AudioFeatures),
}

impl Cue {
    /// Apply to `context`. Returns false if the cue was rejected.
    pub fn apply(self, context: &mut MusicalContext) -> bool {
        match self {
            Self::SectionChange(section) => context.section = section,
            Self::TempoChange(tempo) => {
                if !is_valid_tempo(tempo) {
                    tracing::warn!(tempo, "Ignoring non-positive tempo cue");
                    return false;
                }
                context.tempo_bpm = tempo;
            }
            Self::KeyChange(key) => context.key = key,
            Self::ChordChange(chord) => context.chord = chord,
            Self::Dynamics(dynamics) => context.set_dynamics(dynamics),
            Self::Play => context.is_playing = true,
            Self::Pause => context.is_playing = false,
            Self::Features(features) => {
                if let Some(tempo) = features.tempo.filter(|t| is_valid_tempo(*t)) {
                    context.tempo_bpm = tempo;
                }
                if let Some(dynamics) = features.dynamics {
                    context.set_dynamics(dynamics);
                }
                if let Some(chord) = features.chords.into_iter().next() {
                    context.chord = chord;
                }
            }
        }
        true
    }
}

fn is_valid_tempo(tempo: f64) -> bool {
    tempo.is_finite() && tempo > 0.0
}
