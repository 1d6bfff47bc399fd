// Scripted in-memory register bus for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::modbus::{ModbusError, RegisterBus, Result};

#[derive(Debug, Default)]
pub struct MockState {
    pub connected: bool,
    pub registers: HashMap<u16, u16>,
    /// Start addresses whose reads fail with a transport error
    pub fail_reads: HashSet<u16>,
    /// Start addresses whose writes fail with a transport error
    pub fail_writes: HashSet<u16>,
    /// When set, every write fails regardless of address
    pub fail_all_writes: bool,
    /// When set, writes fail once this many have already succeeded
    pub fail_writes_after: Option<usize>,
    /// Every successful write, as (start address, values)
    pub writes: Vec<(u16, Vec<u16>)>,
}

/// Register bus backed by a hash map, with per-address failure injection.
///
/// The state is behind an `Arc` so a test can keep a handle for inspection
/// after moving the bus into a servo or controller.
#[derive(Clone)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    /// A bus that starts connected with an empty register image
    pub fn connected() -> Self {
        let bus = Self::disconnected();
        bus.state.lock().unwrap().connected = true;
        bus
    }

    pub fn disconnected() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    /// Flip the link state without going through the bus trait
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.state.lock().unwrap().registers.insert(address, value);
    }

    pub fn register(&self, address: u16) -> u16 {
        self.state
            .lock()
            .unwrap()
            .registers
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    pub fn fail_reads_at(&self, address: u16) {
        self.state.lock().unwrap().fail_reads.insert(address);
    }

    pub fn fail_writes_at(&self, address: u16) {
        self.state.lock().unwrap().fail_writes.insert(address);
    }

    /// Make every write fail regardless of address
    pub fn fail_all_writes(&self) {
        self.state.lock().unwrap().fail_all_writes = true;
    }

    /// Let `n` writes succeed, then fail every later one
    pub fn fail_writes_after(&self, n: usize) {
        self.state.lock().unwrap().fail_writes_after = Some(n);
    }

    pub fn writes(&self) -> Vec<(u16, Vec<u16>)> {
        self.state.lock().unwrap().writes.clone()
    }
}

impl RegisterBus for MockBus {
    fn open(&mut self) -> Result<()> {
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ModbusError::NotConnected);
        }
        if state.fail_reads.contains(&address) {
            return Err(ModbusError::Transport {
                address,
                reason: "scripted read failure".into(),
            });
        }
        Ok((0..count)
            .map(|i| {
                state
                    .registers
                    .get(&(address + i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.write_registers(address, &[value])
    }

    fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ModbusError::NotConnected);
        }
        let exhausted = state
            .fail_writes_after
            .is_some_and(|n| state.writes.len() >= n);
        if state.fail_all_writes || exhausted || state.fail_writes.contains(&address) {
            return Err(ModbusError::Transport {
                address,
                reason: "scripted write failure".into(),
            });
        }
        for (i, value) in values.iter().enumerate() {
            state.registers.insert(address + i as u16, *value);
        }
        state.writes.push((address, values.to_vec()));
        Ok(())
    }
}
