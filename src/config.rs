// Serial connection parameters and loop timing constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

// Sampling rate of the motion-generation loop (20 ms tick = 50 Hz)
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(20);

// How long stop_motion() waits for the sampling thread before abandoning it
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

// Default jog speed in RPM
pub const DEFAULT_JOG_SPEED: i16 = 100;

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SerialParity {
    #[default]
    None,
    Even,
    Odd,
}

/// Connection parameters for one servo drive on a Modbus RTU line.
///
/// Immutable once the transport has been opened; changing any field
/// requires a disconnect/reconnect cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port, e.g. "/dev/ttyUSB0" or "COM3"
    pub port: String,
    /// Modbus slave address (1-247)
    pub slave_id: u8,
    pub baud_rate: u32,
    pub parity: SerialParity,
    /// 1 or 2
    pub stop_bits: u8,
    /// 5 to 8
    pub data_bits: u8,
    /// Response timeout in milliseconds
    pub timeout_ms: u64,
}

impl ConnectionConfig {
    pub fn new(port: impl Into<String>, slave_id: u8) -> Self {
        Self {
            port: port.into(),
            slave_id,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        // Factory communication settings of the A5 drive: 115200 8N1, 1 s timeout
        Self {
            port: String::new(),
            slave_id: 1,
            baud_rate: 115_200,
            parity: SerialParity::None,
            stop_bits: 1,
            data_bits: 8,
            timeout_ms: 1000,
        }
    }
}
