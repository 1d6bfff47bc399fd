// Message types shared between the motion controller and its consumers

use serde::{Deserialize, Serialize};

/// Motion mode of the rig. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MotionMode {
    #[default]
    Stopped,
    Manual,
    Walk,
    Gallop,
    Custom,
}

impl MotionMode {
    /// Whether this mode owns a background sampling loop.
    ///
    /// Manual commands and the sampling loop are mutually exclusive
    /// writers by construction: the loop only runs in pattern modes,
    /// manual positioning is only legal in Manual.
    pub fn drives_pattern(self) -> bool {
        matches!(self, Self::Walk | Self::Gallop | Self::Custom)
    }
}

/// Which of the two actuators a command targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServoSide {
    Front,
    Rear,
}

impl ServoSide {
    pub fn name(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Rear => "rear",
        }
    }
}

// Notifications pushed from the controller to the UI layer.
// Fire-and-forget: no acknowledgment, no backpressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MotionEvent {
    ModeChanged { mode: MotionMode },
    PositionUpdate { front: i32, rear: i32 },
    Error { message: String },
}
