// Modbus RTU register transport for the servo drives
//
// Wraps a synchronous tokio-modbus RTU client behind the three function
// codes the drive uses: 0x03 (read holding registers), 0x06 (write single
// register), 0x10 (write multiple registers). Framing and CRC belong to the
// library; this layer only adds register-level semantics, in particular the
// drive's low-word-first 32-bit register pairs.

use std::time::Duration;
use tokio_modbus::Slave;
use tokio_modbus::client::sync::{self, Context, Reader, Writer};
use tracing::{debug, error, info};

use crate::config::{ConnectionConfig, SerialParity};

/// Error types for Modbus communication
#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    #[error("not connected")]
    NotConnected,

    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("invalid serial configuration: {0}")]
    Config(String),

    #[error("transport error at register {address:#06x}: {reason}")]
    Transport { address: u16, reason: String },

    #[error("modbus exception at register {address:#06x}: {reason}")]
    Exception { address: u16, reason: String },

    #[error("short response at register {address:#06x}: expected {expected} registers, got {got}")]
    ShortResponse {
        address: u16,
        expected: usize,
        got: usize,
    },
}

pub type Result<T> = std::result::Result<T, ModbusError>;

/// Register-level access to one slave device.
///
/// `ModbusBus` is the serial implementation; tests substitute a scripted
/// mock. One bus equals one serial connection equals one in-flight request
/// at a time; callers that share a bus across threads must serialize access.
pub trait RegisterBus: Send {
    /// Establish the connection. An open failure is captured and reported,
    /// never propagated as a panic.
    fn open(&mut self) -> Result<()>;

    /// Release the connection. Idempotent.
    fn close(&mut self);

    fn is_connected(&self) -> bool;

    /// Read `count` holding registers starting at `address` (function 0x03)
    fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// Write one holding register (function 0x06)
    fn write_register(&mut self, address: u16, value: u16) -> Result<()>;

    /// Write several holding registers in one transaction (function 0x10)
    fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()>;

    /// Read a 32-bit signed value from the register pair at `address`.
    /// Low word lives at `address`, high word at `address + 1`.
    fn read_i32(&mut self, address: u16) -> Result<i32> {
        let words = self.read_registers(address, 2)?;
        if words.len() < 2 {
            return Err(ModbusError::ShortResponse {
                address,
                expected: 2,
                got: words.len(),
            });
        }
        Ok(compose_i32(words[0], words[1]))
    }

    /// Write a 32-bit signed value to the register pair at `address`.
    /// Uses one multi-register write so both words land in the same
    /// transaction.
    fn write_i32(&mut self, address: u16, value: i32) -> Result<()> {
        self.write_registers(address, &split_i32(value))
    }
}

/// Modbus RTU bus over a serial port, talking to one fixed slave address.
pub struct ModbusBus {
    config: ConnectionConfig,
    ctx: Option<Context>,
}

impl ModbusBus {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, ctx: None }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn serial_builder(&self) -> Result<tokio_serial::SerialPortBuilder> {
        let parity = match self.config.parity {
            SerialParity::None => tokio_serial::Parity::None,
            SerialParity::Even => tokio_serial::Parity::Even,
            SerialParity::Odd => tokio_serial::Parity::Odd,
        };
        let stop_bits = match self.config.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            n => return Err(ModbusError::Config(format!("unsupported stop bits: {n}"))),
        };
        let data_bits = match self.config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            n => return Err(ModbusError::Config(format!("unsupported data bits: {n}"))),
        };
        Ok(tokio_serial::new(&self.config.port, self.config.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits)
            .timeout(self.config.timeout()))
    }

    fn ctx(&mut self) -> Result<&mut Context> {
        self.ctx.as_mut().ok_or(ModbusError::NotConnected)
    }
}

impl RegisterBus for ModbusBus {
    fn open(&mut self) -> Result<()> {
        if !(1..=247).contains(&self.config.slave_id) {
            return Err(ModbusError::Config(format!(
                "slave id out of range: {}",
                self.config.slave_id
            )));
        }

        let builder = self.serial_builder()?;
        let timeout: Option<Duration> = Some(self.config.timeout());
        match sync::rtu::connect_slave_with_timeout(&builder, Slave(self.config.slave_id), timeout)
        {
            Ok(ctx) => {
                info!(
                    "Connected to {} (slave {})",
                    self.config.port, self.config.slave_id
                );
                self.ctx = Some(ctx);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open {}: {}", self.config.port, e);
                Err(ModbusError::Open {
                    port: self.config.port.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn close(&mut self) {
        if self.ctx.take().is_some() {
            info!("Disconnected from {}", self.config.port);
        }
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        match self.ctx()?.read_holding_registers(address, count) {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(exception)) => Err(ModbusError::Exception {
                address,
                reason: exception.to_string(),
            }),
            Err(e) => Err(ModbusError::Transport {
                address,
                reason: e.to_string(),
            }),
        }
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        match self.ctx()?.write_single_register(address, value) {
            Ok(Ok(())) => {
                debug!("Wrote {} to register {:#06x}", value, address);
                Ok(())
            }
            Ok(Err(exception)) => Err(ModbusError::Exception {
                address,
                reason: exception.to_string(),
            }),
            Err(e) => Err(ModbusError::Transport {
                address,
                reason: e.to_string(),
            }),
        }
    }

    fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        match self.ctx()?.write_multiple_registers(address, values) {
            Ok(Ok(())) => {
                debug!(
                    "Wrote {} registers starting at {:#06x}",
                    values.len(),
                    address
                );
                Ok(())
            }
            Ok(Err(exception)) => Err(ModbusError::Exception {
                address,
                reason: exception.to_string(),
            }),
            Err(e) => Err(ModbusError::Transport {
                address,
                reason: e.to_string(),
            }),
        }
    }
}

/// Reinterpret a raw 16-bit register as signed two's complement.
/// Values above 32767 are negative (e.g. 65436 reads as -100 RPM).
pub fn decode_i16(raw: u16) -> i16 {
    raw as i16
}

/// Compose a 32-bit signed value from a low-word-first register pair.
pub fn compose_i32(low: u16, high: u16) -> i32 {
    (((high as u32) << 16) | low as u32) as i32
}

/// Split a 32-bit signed value into a low-word-first register pair.
pub fn split_i32(value: i32) -> [u16; 2] {
    let raw = value as u32;
    [(raw & 0xFFFF) as u16, (raw >> 16) as u16]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_i16() {
        assert_eq!(decode_i16(0), 0);
        assert_eq!(decode_i16(100), 100);
        assert_eq!(decode_i16(32767), 32767);
        assert_eq!(decode_i16(65436), -100);
        assert_eq!(decode_i16(0xFFFF), -1);
        assert_eq!(decode_i16(0x8000), i16::MIN);
    }

    #[test]
    fn test_i32_round_trip() {
        for v in [
            0,
            1,
            -1,
            3000,
            -3000,
            65536,
            -65536,
            i32::MAX,
            i32::MIN,
            0x1234_5678,
            -0x1234_5678,
        ] {
            let [low, high] = split_i32(v);
            assert_eq!(compose_i32(low, high), v, "round trip failed for {v}");
        }
    }

    #[test]
    fn test_split_word_order() {
        // Low word first, matching the drive's register layout
        assert_eq!(split_i32(0x0001_0002), [0x0002, 0x0001]);
        assert_eq!(split_i32(-1), [0xFFFF, 0xFFFF]);
        assert_eq!(compose_i32(0x0002, 0x0001), 0x0001_0002);
    }

    #[test]
    fn test_sign_bit_in_high_word() {
        // Composite with the high bit set reads back negative
        assert_eq!(compose_i32(0x0000, 0x8000), i32::MIN);
        assert_eq!(compose_i32(0xFFFF, 0x7FFF), i32::MAX);
    }
}
