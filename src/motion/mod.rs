// Motion generation module
//
// Provides:
// - Parametric sinusoidal gait patterns (walk, gallop, caller-defined)
// - The motion controller: mode state machine, 50 Hz sampling loop,
//   emergency stop, event notifications

pub mod controller;
pub mod pattern;

pub use controller::{MotionController, MotionError};
pub use pattern::MotionPattern;
