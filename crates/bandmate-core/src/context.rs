//! Shared musical context for a session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time signature as (beats per bar, beat unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats_per_bar: u32,
    pub beat_unit: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats_per_bar: 4,
            beat_unit: 4,
        }
    }
}

/// Snapshot of tempo, key, and position that every agent reads each tick.
///
/// Only the session authority writes it; agents receive `&MusicalContext`
/// and clone it if they need to keep a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicalContext {
    /// Tempo in beats per minute, always positive.
    pub tempo_bpm: f64,
    pub key: String,
    pub chord: String,
    /// Bars elapsed since the session started.
    pub bar_position: u64,
    /// Position within the bar, in `[0, beats_per_bar)`.
    pub beat_position: f64,
    pub time_signature: TimeSignature,
    pub section: String,
    /// Loudness in `[0, 1]`.
    pub dynamics: f64,
    pub is_playing: bool,
    /// Number of ticks applied so far.
    pub tick: u64,
}

impl Default for MusicalContext {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            key: "C".to_string(),
            chord: "C".to_string(),
            bar_position: 0,
            beat_position: 0.0,
            time_signature: TimeSignature::default(),
            section: "verse".to_string(),
            dynamics: 0.5,
            is_playing: false,
            tick: 0,
        }
    }
}

impl MusicalContext {
    #[must_use]
    pub fn new(tempo_bpm: f64, key: impl Into<String>, time_signature: TimeSignature) -> Self {
        let key = key.into();
        Self {
            tempo_bpm,
            chord: key.clone(),
            key,
            time_signature,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn beats_per_bar(&self) -> u32 {
        self.time_signature.beats_per_bar.max(1)
    }

    /// Advance one tick of `elapsed` wall time.
    ///
    /// Position only moves while playing; the tick counter always moves.
    pub fn advance(&mut self, elapsed: Duration) {
        self.tick += 1;
        if !self.is_playing {
            return;
        }

        let beats_per_bar = f64::from(self.beats_per_bar());
        let beat = self.beat_position + self.tempo_bpm / 60.0 * elapsed.as_secs_f64();
        if !beat.is_finite() {
            self.bar_position = u64::MAX;
            self.beat_position = 0.0;
            return;
        }

        // float to int casts saturate, so absurd tempos pin the bar counter
        // at u64::MAX
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bars = (beat / beats_per_bar).floor() as u64;
        self.bar_position = self.bar_position.saturating_add(bars);
        self.beat_position = beat.rem_euclid(beats_per_bar);
    }

    /// Absolute beat count since the start of the session.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn beat_index(&self) -> u64 {
        self.bar_position
            .saturating_mul(u64::from(self.beats_per_bar()))
            .saturating_add(self.beat_position.floor() as u64)
    }

    /// Whole beat within the current bar.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn beat_in_bar(&self) -> u32 {
        self.beat_position.floor() as u32
    }

    pub fn set_dynamics(&mut self, dynamics: f64) {
        self.dynamics = dynamics.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_wraps_into_bars() {
        let mut ctx = MusicalContext {
            is_playing: true,
            ..MusicalContext::default()
        };

        // 120 bpm for 2.5s is five beats
        ctx.advance(Duration::from_millis(2500));
        assert_eq!(ctx.bar_position, 1);
        assert!((ctx.beat_position - 1.0).abs() < 1e-9);
        assert_eq!(ctx.beat_index(), 5);
        assert_eq!(ctx.tick, 1);
    }

    #[test]
    fn test_paused_context_keeps_position() {
        let mut ctx = MusicalContext::default();
        ctx.advance(Duration::from_secs(4));
        assert_eq!(ctx.bar_position, 0);
        assert_eq!(ctx.beat_position, 0.0);
        assert_eq!(ctx.tick, 1);
    }

    #[test]
    fn test_odd_meter() {
        let mut ctx = MusicalContext::new(
            60.0,
            "D",
            TimeSignature {
                beats_per_bar: 3,
                beat_unit: 4,
            },
        );
        ctx.is_playing = true;
        ctx.advance(Duration::from_secs(7));
        assert_eq!(ctx.bar_position, 2);
        assert_eq!(ctx.beat_in_bar(), 1);
        assert_eq!(ctx.chord, "D");
    }

    #[test]
    fn test_extreme_tempo_saturates() {
        let mut ctx = MusicalContext {
            tempo_bpm: 1e20,
            is_playing: true,
            ..MusicalContext::default()
        };

        ctx.advance(Duration::from_millis(33));
        assert!(ctx.bar_position > 1_000_000);
        assert!((0.0..4.0).contains(&ctx.beat_position));

        ctx.tempo_bpm = 1e300;
        ctx.advance(Duration::from_secs(3600));
        ctx.advance(Duration::from_secs(3600));
        assert_eq!(ctx.bar_position, u64::MAX);
        assert!((0.0..4.0).contains(&ctx.beat_position));
        assert_eq!(ctx.beat_index(), u64::MAX);
        assert_eq!(ctx.tick, 3);
    }

    #[test]
    fn test_dynamics_clamped() {
        let mut ctx = MusicalContext::default();
        ctx.set_dynamics(1.7);
        assert_eq!(ctx.dynamics, 1.0);
    }
}
