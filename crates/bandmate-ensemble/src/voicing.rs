//! Velocity shaping shared by the instrument policies.

/// Section-level intensity multiplier.
#[must_use]
pub fn section_intensity(section: &str) -> f64 {
    match section {
        "chorus" => 1.2,
        "intro" | "outro" => 0.8,
        _ => 1.0,
    }
}

/// Dynamics multiplier: quiet passages soften, loud ones push.
fn dynamics_factor(dynamics: f64) -> f64 {
    if dynamics < 0.3 {
        0.7
    } else if dynamics > 0.7 {
        1.2
    } else {
        1.0
    }
}

/// Scale a base MIDI velocity.
///
/// `responsiveness` sets how far the agent follows the dynamics: 0 ignores
/// them, 1 applies the full factor.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn velocity(base: u8, intensity: f64, dynamics: f64, responsiveness: f64) -> u8 {
    let follow = 1.0 + (dynamics_factor(dynamics) - 1.0) * responsiveness.clamp(0.0, 1.0);
    (f64::from(base) * intensity * follow).round().clamp(1.0, 127.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_follows_dynamics() {
        assert_eq!(velocity(100, 1.0, 0.5, 1.0), 100);
        assert_eq!(velocity(100, 1.0, 0.1, 1.0), 70);
        assert_eq!(velocity(100, 1.0, 0.9, 1.0), 120);
        assert_eq!(velocity(100, 1.0, 0.9, 0.0), 100);
        assert_eq!(velocity(100, 1.0, 0.9, 0.5), 110);
    }

    #[test]
    fn test_velocity_is_clamped() {
        assert_eq!(velocity(120, 1.2, 0.9, 1.0), 127);
        assert_eq!(velocity(1, 0.1, 0.1, 1.0), 1);
    }

    #[test]
    fn test_section_intensity() {
        assert!(section_intensity("chorus") > section_intensity("verse"));
        assert!(section_intensity("intro") < 1.0);
    }
}
