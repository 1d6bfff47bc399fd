// Parametric gait patterns for the two-actuator rig
// Converts a cycle phase in [0, 1) to a pair of target positions.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// One periodic motion pattern.
///
/// Both actuators follow a sinusoid over the same cycle; the rear actuator
/// is shifted by `phase_shift_deg`. Amplitudes and offsets are in encoder
/// pulses. The cycle period must be strictly positive; keeping it that way
/// is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionPattern {
    pub name: String,
    /// Full cycle period in milliseconds
    pub cycle_time_ms: u32,
    pub front_amplitude: i32,
    pub rear_amplitude: i32,
    /// Phase shift of the rear actuator relative to the front, in degrees
    pub phase_shift_deg: f64,
    /// Center offset of the front actuator
    pub front_offset: i32,
    /// Center offset of the rear actuator
    pub rear_offset: i32,
}

impl MotionPattern {
    /// Target positions (front, rear) for a cycle phase in [0, 1).
    ///
    /// The fractional result is truncated toward zero to whole encoder
    /// pulses.
    pub fn calculate_positions(&self, phase: f64) -> (i32, i32) {
        let front_angle = TAU * phase;
        let rear_angle = TAU * phase + self.phase_shift_deg.to_radians();

        let front = self.front_offset as f64 + self.front_amplitude as f64 * front_angle.sin();
        let rear = self.rear_offset as f64 + self.rear_amplitude as f64 * rear_angle.sin();

        (front as i32, rear as i32)
    }

    /// Walk preset: slow 2 s cycle, moderate amplitude, actuators in
    /// anti-phase (front up while rear is down).
    pub fn walk() -> Self {
        Self {
            name: "walk".into(),
            cycle_time_ms: 2000,
            front_amplitude: 3000,
            rear_amplitude: 3000,
            phase_shift_deg: 180.0,
            front_offset: 0,
            rear_offset: 0,
        }
    }

    /// Gallop preset: fast 0.6 s cycle, large amplitude, 90 degree shift
    /// for a wave-like motion.
    pub fn gallop() -> Self {
        Self {
            name: "gallop".into(),
            cycle_time_ms: 600,
            front_amplitude: 5000,
            rear_amplitude: 5000,
            phase_shift_deg: 90.0,
            front_offset: 0,
            rear_offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: i32, b: i32, tolerance: i32) {
        assert!(
            (a - b).abs() <= tolerance,
            "expected {a} within {tolerance} of {b}"
        );
    }

    #[test]
    fn test_periodicity() {
        let pattern = MotionPattern::gallop();
        for i in 0..20 {
            let phase = i as f64 / 20.0;
            let (f0, r0) = pattern.calculate_positions(phase);
            let (f1, r1) = pattern.calculate_positions(phase + 1.0);
            assert_close(f0, f1, 1);
            assert_close(r0, r1, 1);
        }
    }

    #[test]
    fn test_zero_shift_equal_amplitudes_track_together() {
        let pattern = MotionPattern {
            phase_shift_deg: 0.0,
            ..MotionPattern::walk()
        };
        for i in 0..8 {
            let (front, rear) = pattern.calculate_positions(i as f64 / 8.0);
            assert_close(front, rear, 1);
        }
    }

    #[test]
    fn test_walk_anti_phase_law() {
        // 180 degree shift: each actuator at phase p is the negative of
        // itself at p + 0.5, when centered at offset 0
        let pattern = MotionPattern::walk();
        for i in 0..10 {
            let phase = i as f64 / 10.0;
            let (f0, r0) = pattern.calculate_positions(phase);
            let (f1, r1) = pattern.calculate_positions((phase + 0.5) % 1.0);
            assert_close(f0, -f1, 1);
            assert_close(r0, -r1, 1);
        }
    }

    #[test]
    fn test_amplitude_extremes() {
        let pattern = MotionPattern::walk();
        let (front, rear) = pattern.calculate_positions(0.25);
        assert_close(front, 3000, 1); // sin(pi/2)
        assert_close(rear, -3000, 1); // shifted by 180 degrees

        let (front, _) = pattern.calculate_positions(0.75);
        assert_close(front, -3000, 1);
    }

    #[test]
    fn test_offsets_shift_center() {
        let pattern = MotionPattern {
            front_offset: 1000,
            rear_offset: -500,
            ..MotionPattern::walk()
        };
        let (front, rear) = pattern.calculate_positions(0.0);
        assert_close(front, 1000, 1);
        assert_close(rear, -500, 1);
    }

    #[test]
    fn test_presets() {
        let walk = MotionPattern::walk();
        assert_eq!(walk.cycle_time_ms, 2000);
        assert_eq!(walk.phase_shift_deg, 180.0);
        assert_eq!(walk.front_amplitude, walk.rear_amplitude);

        let gallop = MotionPattern::gallop();
        assert_eq!(gallop.cycle_time_ms, 600);
        assert_eq!(gallop.phase_shift_deg, 90.0);
        assert!(gallop.front_amplitude > walk.front_amplitude);
    }
}
