// LICHUAN A5 series servo drive
//
// Translates actuator semantics (position, speed, torque, enable, fault)
// into register operations on a `RegisterBus`, and decodes raw register
// values into signed status fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::modbus::{ModbusBus, Result, decode_i16};
use super::{ModbusError, RegisterBus};
use crate::config::ConnectionConfig;

/// Register map of the A5 drive.
///
/// Addresses encode `group * 256 + index`: parameter P0B-02 lives at 0x0B02.
/// The map is fixed by the drive's documentation and is not configurable at
/// runtime.
pub mod reg {
    // P01 - drive parameters
    pub const MOTOR_CODE: u16 = 0x0100; // P01-00
    pub const CONTROL_MODE: u16 = 0x0102; // P01-02
    pub const ENABLE_SOURCE: u16 = 0x010F; // P01-15

    // P02 - basic control
    pub const DIR_POLARITY: u16 = 0x0200; // P02-00

    // P03 - digital input functions
    pub const DI1_FUNCTION: u16 = 0x0300; // P03-00
    pub const DI2_FUNCTION: u16 = 0x0301; // P03-01

    // P04 - digital output functions
    pub const DO1_FUNCTION: u16 = 0x0400; // P04-00

    // P05 - position control
    pub const POS_CMD_SOURCE: u16 = 0x0500; // P05-00
    pub const GEAR_RATIO_NUM: u16 = 0x0507; // P05-07
    pub const GEAR_RATIO_DEN: u16 = 0x0508; // P05-08

    // P06 - speed control
    pub const SPEED_CMD_SOURCE: u16 = 0x0600; // P06-00
    pub const INTERNAL_SPEED_1: u16 = 0x0601; // P06-01
    pub const ACCEL_TIME: u16 = 0x0602; // P06-02
    pub const DECEL_TIME: u16 = 0x0603; // P06-03

    // P07 - torque control
    pub const TORQUE_CMD_SOURCE: u16 = 0x0700; // P07-00

    // P08 - gains
    pub const POSITION_GAIN: u16 = 0x0800; // P08-00
    pub const SPEED_GAIN: u16 = 0x0802; // P08-02

    // P0A - protection
    pub const FAULT_CODE: u16 = 0x0A00; // P0A-00

    // P0B - monitoring (read-only)
    pub const CURRENT_POSITION: u16 = 0x0B00; // P0B-00, 32-bit pair
    pub const CURRENT_SPEED: u16 = 0x0B02; // P0B-02, RPM
    pub const CURRENT_TORQUE: u16 = 0x0B04; // P0B-04, percent
    pub const DC_BUS_VOLTAGE: u16 = 0x0B06; // P0B-06
    pub const DI_STATUS: u16 = 0x0B10; // P0B-10
    pub const DO_STATUS: u16 = 0x0B11; // P0B-11

    // P0C - communication
    pub const SLAVE_ID: u16 = 0x0C00; // P0C-00
    pub const BAUD_RATE: u16 = 0x0C01; // P0C-01
    pub const PARITY: u16 = 0x0C02; // P0C-02

    // P11 - multi-segment positioning
    pub const SEGMENT_COUNT: u16 = 0x1100; // P11-00
    pub const SEGMENT_TARGET_1: u16 = 0x1102; // P11-02, 32-bit pair
    pub const SEGMENT_SPEED_1: u16 = 0x1104; // P11-04

    // P17 - virtual digital I/O
    pub const VIRTUAL_DI: u16 = 0x1700; // P17-00
    pub const VIRTUAL_DO: u16 = 0x1701; // P17-01

    // P30 - monitor variables over comms
    pub const READ_POSITION: u16 = 0x3000; // P30-00, 32-bit pair
    pub const READ_SPEED: u16 = 0x3002; // P30-02
    pub const READ_TORQUE: u16 = 0x3004; // P30-04

    // P31 - command variables over comms
    pub const CMD_POSITION: u16 = 0x3100; // P31-00, 32-bit pair
    pub const CMD_SPEED: u16 = 0x3102; // P31-02
    pub const CMD_TORQUE: u16 = 0x3104; // P31-04
}

/// Virtual DI bit driving the servo-on (enable) function
pub const DI_BIT_SON: u16 = 0x0001;
/// Virtual DI bit driving the alarm-reset function
pub const DI_BIT_ALM_RST: u16 = 0x4000;

/// Known fault codes, indexed by code. Unmapped codes fall back to a
/// generic `Er.NN - Unknown fault` message.
const FAULT_DESCRIPTIONS: [&str; 11] = [
    "No fault",
    "Er.01 - Overcurrent",
    "Er.02 - Overvoltage",
    "Er.03 - Undervoltage",
    "Er.04 - Encoder fault",
    "Er.05 - Overheat",
    "Er.06 - Regeneration fault",
    "Er.07 - Overload",
    "Er.08 - Position following error",
    "Er.09 - Speed error",
    "Er.10 - EEPROM fault",
];

/// Human-readable description for a drive fault code
pub fn fault_description(code: u16) -> String {
    match FAULT_DESCRIPTIONS.get(code as usize) {
        Some(text) => (*text).to_string(),
        None => format!("Er.{code:02} - Unknown fault"),
    }
}

/// Decoded state of one servo drive, produced by `read_status`.
///
/// Fields are only ever updated as part of a read cycle; a sub-read that
/// fails leaves the previously known value in place rather than zeroing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServoStatus {
    /// Current position in encoder pulses
    pub position: i32,
    /// Current speed in RPM
    pub speed: i16,
    /// Current torque in percent of rated
    pub torque: i16,
    /// DC bus voltage, raw register value
    pub dc_voltage: u16,
    /// Active fault code, 0 = none
    pub fault_code: u16,
    /// Digital input bitmask
    pub di_status: u16,
    /// Digital output bitmask
    pub do_status: u16,
    /// Drive enable state, derived from the DI bitmask (bit 0 = SON)
    pub is_enabled: bool,
}

/// A monitoring point added at runtime on top of the fixed register map
#[derive(Debug, Clone)]
pub struct CustomRegister {
    pub name: String,
    pub description: String,
    pub is_32bit: bool,
    /// Last value read, `None` until read or after a failed read
    pub last_value: Option<i64>,
}

/// One A5 servo drive on its own Modbus RTU connection.
///
/// The bus is owned exclusively; two drives never share a transport.
pub struct A5Servo<B: RegisterBus = ModbusBus> {
    name: String,
    bus: B,
    status: ServoStatus,
    custom_registers: BTreeMap<u16, CustomRegister>,
}

impl A5Servo<ModbusBus> {
    pub fn new(name: impl Into<String>, config: ConnectionConfig) -> Self {
        Self::with_bus(name, ModbusBus::new(config))
    }
}

impl<B: RegisterBus> A5Servo<B> {
    /// Build a servo on an existing bus (tests use this with a mock)
    pub fn with_bus(name: impl Into<String>, bus: B) -> Self {
        Self {
            name: name.into(),
            bus,
            status: ServoStatus::default(),
            custom_registers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connect(&mut self) -> Result<()> {
        self.bus.open()
    }

    pub fn disconnect(&mut self) {
        self.bus.close();
    }

    pub fn is_connected(&self) -> bool {
        self.bus.is_connected()
    }

    /// Last decoded status. Refreshed by `read_status`.
    pub fn status(&self) -> &ServoStatus {
        &self.status
    }

    /// Perform one status read cycle.
    ///
    /// Each sub-read is independent: a failure leaves that field at its
    /// last-known value and the cycle carries on. The call itself only
    /// fails when no read could be attempted at all (not connected).
    pub fn read_status(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(ModbusError::NotConnected);
        }

        match self.bus.read_i32(reg::CURRENT_POSITION) {
            Ok(position) => self.status.position = position,
            Err(e) => debug!("{}: position read failed: {}", self.name, e),
        }

        match self.read_one(reg::CURRENT_SPEED) {
            Ok(raw) => self.status.speed = decode_i16(raw),
            Err(e) => debug!("{}: speed read failed: {}", self.name, e),
        }

        match self.read_one(reg::CURRENT_TORQUE) {
            Ok(raw) => self.status.torque = decode_i16(raw),
            Err(e) => debug!("{}: torque read failed: {}", self.name, e),
        }

        match self.read_one(reg::DC_BUS_VOLTAGE) {
            Ok(raw) => self.status.dc_voltage = raw,
            Err(e) => debug!("{}: dc bus voltage read failed: {}", self.name, e),
        }

        match self.read_one(reg::FAULT_CODE) {
            Ok(raw) => self.status.fault_code = raw,
            Err(e) => debug!("{}: fault code read failed: {}", self.name, e),
        }

        match self.read_one(reg::DI_STATUS) {
            Ok(raw) => {
                self.status.di_status = raw;
                self.status.is_enabled = raw & DI_BIT_SON != 0;
            }
            Err(e) => debug!("{}: DI status read failed: {}", self.name, e),
        }

        match self.read_one(reg::DO_STATUS) {
            Ok(raw) => self.status.do_status = raw,
            Err(e) => debug!("{}: DO status read failed: {}", self.name, e),
        }

        Ok(())
    }

    fn read_one(&mut self, address: u16) -> Result<u16> {
        let words = self.bus.read_registers(address, 1)?;
        words.first().copied().ok_or(ModbusError::ShortResponse {
            address,
            expected: 1,
            got: 0,
        })
    }

    /// Switch the drive on or off via the virtual DI register.
    ///
    /// Read-modify-write of the SON bit; all other bits are preserved.
    pub fn enable(&mut self, on: bool) -> Result<()> {
        let current = self.read_one(reg::VIRTUAL_DI)?;
        let value = if on {
            current | DI_BIT_SON
        } else {
            current & !DI_BIT_SON
        };
        self.bus.write_register(reg::VIRTUAL_DI, value)?;
        debug!("{}: enable({}) -> DI {:#06x}", self.name, on, value);
        Ok(())
    }

    /// Pulse the alarm-reset bit to clear an active fault.
    ///
    /// Two-step set-then-clear on the virtual DI register. If the second
    /// write fails after the first succeeded, the reset bit stays latched
    /// on the drive; no rollback is attempted and the caller sees the
    /// error.
    pub fn clear_fault(&mut self) -> Result<()> {
        let current = self.read_one(reg::VIRTUAL_DI)?;
        self.bus
            .write_register(reg::VIRTUAL_DI, current | DI_BIT_ALM_RST)?;
        self.bus
            .write_register(reg::VIRTUAL_DI, current & !DI_BIT_ALM_RST)
    }

    /// Command a target position in encoder pulses.
    /// Both words of the pair go out in a single transaction.
    pub fn set_target_position(&mut self, position: i32) -> Result<()> {
        self.bus.write_i32(reg::CMD_POSITION, position)
    }

    /// Command a target speed in RPM. Negative values reverse direction.
    pub fn set_target_speed(&mut self, speed: i16) -> Result<()> {
        self.bus.write_register(reg::CMD_SPEED, speed as u16)
    }

    /// Command a target torque in percent of rated.
    pub fn set_target_torque(&mut self, torque: i16) -> Result<()> {
        self.bus.write_register(reg::CMD_TORQUE, torque as u16)
    }

    /// Jog at `speed` RPM: direction 1 = forward, -1 = reverse, 0 = stop.
    pub fn jog(&mut self, direction: i8, speed: i16) -> Result<()> {
        let target = match direction {
            0 => 0,
            d if d > 0 => speed,
            _ => -speed,
        };
        self.set_target_speed(target)
    }

    /// Register an extra monitoring point
    pub fn add_custom_register(
        &mut self,
        address: u16,
        name: impl Into<String>,
        description: impl Into<String>,
        is_32bit: bool,
    ) {
        self.custom_registers.insert(
            address,
            CustomRegister {
                name: name.into(),
                description: description.into(),
                is_32bit,
                last_value: None,
            },
        );
    }

    pub fn custom_registers(&self) -> &BTreeMap<u16, CustomRegister> {
        &self.custom_registers
    }

    /// Read every registered monitoring point.
    ///
    /// Each point is read independently; a failed read yields `None` for
    /// that address without aborting the rest.
    pub fn read_custom_registers(&mut self) -> BTreeMap<u16, Option<i64>> {
        let addresses: Vec<(u16, bool)> = self
            .custom_registers
            .iter()
            .map(|(addr, info)| (*addr, info.is_32bit))
            .collect();

        let mut results = BTreeMap::new();
        for (address, is_32bit) in addresses {
            let value = if is_32bit {
                match self.bus.read_i32(address) {
                    Ok(v) => Some(v as i64),
                    Err(e) => {
                        warn!("{}: custom register {:#06x}: {}", self.name, address, e);
                        None
                    }
                }
            } else {
                match self.read_one(address) {
                    Ok(v) => Some(v as i64),
                    Err(e) => {
                        warn!("{}: custom register {:#06x}: {}", self.name, address, e);
                        None
                    }
                }
            };
            if let Some(info) = self.custom_registers.get_mut(&address) {
                info.last_value = value;
            }
            results.insert(address, value);
        }
        results
    }

    /// Description of the currently latched fault code
    pub fn fault_description(&self) -> String {
        fault_description(self.status.fault_code)
    }
}
