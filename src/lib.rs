// Runtime for a two-servo gait training rig
//
// Drives a front and a rear LICHUAN A5 servo over Modbus RTU to reproduce
// periodic gait trajectories (walk, gallop) and to support manual jogging.
// The UI layer consumes `MotionEvent` notifications and issues commands
// through `MotionController`.

pub mod config;
pub mod messages;
pub mod motion;
pub mod servo;

pub use config::ConnectionConfig;
pub use messages::{MotionEvent, MotionMode, ServoSide};
pub use motion::{MotionController, MotionError, MotionPattern};
pub use servo::{A5Servo, ModbusError, ServoStatus};
