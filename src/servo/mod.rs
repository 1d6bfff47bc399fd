// Servo drive module
//
// Provides:
// - Modbus RTU register transport (three function codes: 0x03, 0x06, 0x10)
// - LICHUAN A5 drive abstraction: register map, status decoding, enable,
//   fault handling, jog

pub mod a5;
pub mod modbus;

#[cfg(test)]
pub(crate) mod mock;

pub use a5::{A5Servo, CustomRegister, ServoStatus, fault_description};
pub use modbus::{ModbusBus, ModbusError, RegisterBus};
