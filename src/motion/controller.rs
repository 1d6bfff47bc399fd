// Synchronized motion controller for the front/rear servo pair
//
// Owns the mode state machine and the 50 Hz sampling loop that keeps the
// two actuators phase-locked to one pattern. Mutual exclusion between
// writers is structural: the sampling thread only exists in pattern modes,
// manual positioning is only legal in Manual, so the two never overlap.
// The per-servo mutex serializes status reads against in-flight commands
// on the same serial link.

use crossbeam_channel::{Receiver, Sender, unbounded};
use spin_sleep::SpinSleeper;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::pattern::MotionPattern;
use crate::config::{SAMPLE_INTERVAL, STOP_JOIN_TIMEOUT};
use crate::messages::{MotionEvent, MotionMode, ServoSide};
use crate::servo::{A5Servo, ModbusBus, ModbusError, RegisterBus, ServoStatus};

/// Error types for motion control operations
#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("manual control is only available in manual mode")]
    NotInManualMode,

    #[error("custom mode requires a pattern")]
    PatternRequired,

    #[error(transparent)]
    Bus(#[from] ModbusError),
}

struct MotionWorker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Controller for the two-actuator rig.
///
/// Constructed with both servos; returns the receiving end of the event
/// channel so the UI layer can consume mode-change, position-update and
/// error notifications without the controller knowing anything about how
/// they are displayed.
pub struct MotionController<B: RegisterBus = ModbusBus> {
    front: Arc<Mutex<A5Servo<B>>>,
    rear: Arc<Mutex<A5Servo<B>>>,
    mode: MotionMode,
    current_pattern: Option<MotionPattern>,
    custom_patterns: HashMap<String, MotionPattern>,
    worker: Option<MotionWorker>,
    events: Sender<MotionEvent>,
}

impl<B: RegisterBus + 'static> MotionController<B> {
    pub fn new(front: A5Servo<B>, rear: A5Servo<B>) -> (Self, Receiver<MotionEvent>) {
        let (events, receiver) = unbounded();
        let controller = Self {
            front: Arc::new(Mutex::new(front)),
            rear: Arc::new(Mutex::new(rear)),
            mode: MotionMode::Stopped,
            current_pattern: None,
            custom_patterns: HashMap::new(),
            worker: None,
            events,
        };
        (controller, receiver)
    }

    pub fn mode(&self) -> MotionMode {
        self.mode
    }

    pub fn current_pattern(&self) -> Option<&MotionPattern> {
        self.current_pattern.as_ref()
    }

    fn servo(&self, side: ServoSide) -> &Arc<Mutex<A5Servo<B>>> {
        match side {
            ServoSide::Front => &self.front,
            ServoSide::Rear => &self.rear,
        }
    }

    // A poisoned servo mutex on a caller path just means the sampling
    // thread panicked mid-command; the servo itself is still usable.
    fn lock(servo: &Arc<Mutex<A5Servo<B>>>) -> MutexGuard<'_, A5Servo<B>> {
        servo.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: MotionEvent) {
        // Receiver gone means no UI is listening; nothing to do about it
        let _ = self.events.send(event);
    }

    // === Per-servo operations forwarded to the device layer ===

    pub fn connect(&self, side: ServoSide) -> Result<(), MotionError> {
        Ok(Self::lock(self.servo(side)).connect()?)
    }

    pub fn disconnect(&self, side: ServoSide) {
        Self::lock(self.servo(side)).disconnect();
    }

    pub fn is_connected(&self, side: ServoSide) -> bool {
        Self::lock(self.servo(side)).is_connected()
    }

    /// Run one status read cycle and return the resulting snapshot
    pub fn read_status(&self, side: ServoSide) -> Result<ServoStatus, MotionError> {
        let mut servo = Self::lock(self.servo(side));
        servo.read_status()?;
        Ok(servo.status().clone())
    }

    pub fn enable(&self, side: ServoSide, on: bool) -> Result<(), MotionError> {
        Ok(Self::lock(self.servo(side)).enable(on)?)
    }

    pub fn clear_fault(&self, side: ServoSide) -> Result<(), MotionError> {
        Ok(Self::lock(self.servo(side)).clear_fault()?)
    }

    pub fn fault_description(&self, side: ServoSide) -> String {
        Self::lock(self.servo(side)).fault_description()
    }

    pub fn add_custom_register(
        &self,
        side: ServoSide,
        address: u16,
        name: impl Into<String>,
        description: impl Into<String>,
        is_32bit: bool,
    ) {
        Self::lock(self.servo(side)).add_custom_register(address, name, description, is_32bit);
    }

    pub fn read_custom_registers(&self, side: ServoSide) -> BTreeMap<u16, Option<i64>> {
        Self::lock(self.servo(side)).read_custom_registers()
    }

    // === Pattern registry ===

    pub fn add_custom_pattern(&mut self, name: impl Into<String>, pattern: MotionPattern) {
        let name = name.into();
        info!("Registered pattern: {}", name);
        self.custom_patterns.insert(name, pattern);
    }

    pub fn custom_pattern(&self, name: &str) -> Option<&MotionPattern> {
        self.custom_patterns.get(name)
    }

    // === Mode state machine ===

    /// Enter `mode`, stopping any running session first.
    ///
    /// Walk and Gallop select their built-in pattern; Custom requires one
    /// from the caller and is rejected up front, before the running
    /// session is touched, so a bad request leaves the current mode
    /// intact. Pattern modes start exactly one background sampling loop.
    pub fn start_motion(
        &mut self,
        mode: MotionMode,
        pattern: Option<MotionPattern>,
    ) -> Result<(), MotionError> {
        let selected = match mode {
            MotionMode::Stopped | MotionMode::Manual => None,
            MotionMode::Walk => Some(MotionPattern::walk()),
            MotionMode::Gallop => Some(MotionPattern::gallop()),
            MotionMode::Custom => match pattern {
                Some(pattern) => Some(pattern),
                None => {
                    error!("Custom mode requested without a pattern");
                    self.emit(MotionEvent::Error {
                        message: "custom mode requires a pattern".into(),
                    });
                    return Err(MotionError::PatternRequired);
                }
            },
        };
        debug_assert_eq!(selected.is_some(), mode.drives_pattern());

        self.stop_motion();

        if mode == MotionMode::Stopped {
            // stop_motion already reported the transition
            return Ok(());
        }

        self.mode = mode;
        if let Some(pattern) = selected {
            info!(
                "Starting pattern '{}' ({} ms cycle)",
                pattern.name, pattern.cycle_time_ms
            );
            self.current_pattern = Some(pattern.clone());
            self.spawn_worker(pattern);
        }
        self.emit(MotionEvent::ModeChanged { mode });
        Ok(())
    }

    fn spawn_worker(&mut self, pattern: MotionPattern) {
        let stop = Arc::new(AtomicBool::new(false));
        let front = Arc::clone(&self.front);
        let rear = Arc::clone(&self.rear);
        let events = self.events.clone();
        let stop_flag = Arc::clone(&stop);

        let spawned = thread::Builder::new()
            .name("motion-loop".into())
            .spawn(move || sampling_loop(front, rear, pattern, stop_flag, events));

        match spawned {
            Ok(handle) => self.worker = Some(MotionWorker { handle, stop }),
            Err(e) => {
                error!("Failed to spawn sampling thread: {}", e);
                self.emit(MotionEvent::Error {
                    message: format!("failed to spawn sampling thread: {e}"),
                });
            }
        }
    }

    /// Stop any running session and command both connected servos to zero
    /// speed. Safe to call when nothing is running.
    pub fn stop_motion(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Relaxed);

            // Bounded join: a transport call blocked inside its timeout
            // cannot be interrupted, so a stuck thread is abandoned rather
            // than allowed to wedge mode transitions. The zero-speed
            // commands below may then race a tardy final tick.
            let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
            while !worker.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if worker.handle.is_finished() {
                let _ = worker.handle.join();
            } else {
                warn!(
                    "Sampling thread did not exit within {:?}, abandoning it",
                    STOP_JOIN_TIMEOUT
                );
            }
        }

        for (side, servo) in [(ServoSide::Front, &self.front), (ServoSide::Rear, &self.rear)] {
            let mut servo = Self::lock(servo);
            if servo.is_connected() {
                if let Err(e) = servo.set_target_speed(0) {
                    warn!("{}: stop command failed: {}", side.name(), e);
                }
            }
        }

        self.mode = MotionMode::Stopped;
        self.current_pattern = None;
        info!("Motion stopped");
        self.emit(MotionEvent::ModeChanged {
            mode: MotionMode::Stopped,
        });
    }

    /// Highest-priority stop path.
    ///
    /// Signals the sampling loop but does not wait for it: latency to the
    /// hardware stop commands wins over shutdown cleanliness. Each
    /// connected servo gets a zero-speed command and a disable, each
    /// best-effort; a failure on one never prevents the attempt on the
    /// other and is not reported as a call failure.
    pub fn emergency_stop(&mut self) {
        warn!("EMERGENCY STOP");

        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Relaxed);
        }

        for (side, servo) in [(ServoSide::Front, &self.front), (ServoSide::Rear, &self.rear)] {
            let mut servo = Self::lock(servo);
            if servo.is_connected() {
                if let Err(e) = servo.set_target_speed(0) {
                    error!("{}: emergency zero-speed failed: {}", side.name(), e);
                }
                if let Err(e) = servo.enable(false) {
                    error!("{}: emergency disable failed: {}", side.name(), e);
                }
            }
        }

        self.mode = MotionMode::Stopped;
        self.current_pattern = None;
        self.emit(MotionEvent::ModeChanged {
            mode: MotionMode::Stopped,
        });
    }

    /// Position both actuators by hand. Only legal in Manual mode; a side
    /// given `None` keeps its current target, a disconnected side is
    /// skipped.
    pub fn manual_move(
        &mut self,
        front_position: Option<i32>,
        rear_position: Option<i32>,
    ) -> Result<(), MotionError> {
        if self.mode != MotionMode::Manual {
            warn!("Manual move rejected: mode is {:?}", self.mode);
            return Err(MotionError::NotInManualMode);
        }

        let mut first_error: Option<ModbusError> = None;
        for (target, servo, side) in [
            (front_position, &self.front, ServoSide::Front),
            (rear_position, &self.rear, ServoSide::Rear),
        ] {
            if let Some(position) = target {
                let mut servo = Self::lock(servo);
                if servo.is_connected() {
                    if let Err(e) = servo.set_target_position(position) {
                        warn!("{}: manual move failed: {}", side.name(), e);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        self.emit(MotionEvent::PositionUpdate {
            front: front_position.unwrap_or(0),
            rear: rear_position.unwrap_or(0),
        });

        match first_error {
            None => Ok(()),
            Some(e) => Err(e.into()),
        }
    }

    /// Jog one actuator: direction 1 = forward, -1 = reverse, 0 = stop.
    ///
    /// Unlike manual_move this is not gated on Manual mode.
    pub fn manual_jog(&self, side: ServoSide, direction: i8, speed: i16) -> Result<(), MotionError> {
        let mut servo = Self::lock(self.servo(side));
        if !servo.is_connected() {
            return Err(ModbusError::NotConnected.into());
        }
        Ok(servo.jog(direction, speed)?)
    }
}

/// Background sampling loop, one per pattern-bearing session.
///
/// Each 20 ms tick computes both target positions from wall-clock phase
/// and commands whichever servos are connected. Per-servo command failures
/// are reported and the loop carries on; a poisoned servo lock is fatal
/// for the session.
fn sampling_loop<B: RegisterBus>(
    front: Arc<Mutex<A5Servo<B>>>,
    rear: Arc<Mutex<A5Servo<B>>>,
    pattern: MotionPattern,
    stop: Arc<AtomicBool>,
    events: Sender<MotionEvent>,
) {
    let cycle_s = f64::from(pattern.cycle_time_ms) / 1000.0;
    let sleeper = SpinSleeper::default();
    let start = Instant::now();
    let mut next_tick = start + SAMPLE_INTERVAL;

    info!(
        "Sampling loop started: '{}', {} ms cycle",
        pattern.name, pattern.cycle_time_ms
    );

    while !stop.load(Ordering::Relaxed) {
        let elapsed = start.elapsed().as_secs_f64();
        let phase = (elapsed % cycle_s) / cycle_s;
        let (front_pos, rear_pos) = pattern.calculate_positions(phase);

        let mut fatal = false;
        for (servo, position, side) in [
            (&front, front_pos, ServoSide::Front),
            (&rear, rear_pos, ServoSide::Rear),
        ] {
            match servo.lock() {
                Ok(mut servo) => {
                    if servo.is_connected() {
                        if let Err(e) = servo.set_target_position(position) {
                            warn!("{}: position command failed: {}", side.name(), e);
                            let _ = events.send(MotionEvent::Error {
                                message: format!("{}: {}", side.name(), e),
                            });
                        }
                    }
                }
                Err(_) => {
                    // Another thread panicked while holding this servo
                    error!("{} servo lock poisoned, ending pattern", side.name());
                    let _ = events.send(MotionEvent::Error {
                        message: format!("{} servo lock poisoned", side.name()),
                    });
                    fatal = true;
                }
            }
        }
        if fatal {
            break;
        }

        // Both computed positions go out every tick, connected or not
        let _ = events.send(MotionEvent::PositionUpdate {
            front: front_pos,
            rear: rear_pos,
        });

        sleeper.sleep(next_tick.saturating_duration_since(Instant::now()));
        next_tick += SAMPLE_INTERVAL;
    }

    info!("Sampling loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::a5::reg;
    use crate::servo::mock::MockBus;
    use crate::servo::modbus::decode_i16;

    fn rig() -> (
        MotionController<MockBus>,
        Receiver<MotionEvent>,
        MockBus,
        MockBus,
    ) {
        let front_bus = MockBus::connected();
        let rear_bus = MockBus::connected();
        let front = A5Servo::with_bus("front", front_bus.clone());
        let rear = A5Servo::with_bus("rear", rear_bus.clone());
        let (controller, events) = MotionController::new(front, rear);
        (controller, events, front_bus, rear_bus)
    }

    fn drain(events: &Receiver<MotionEvent>) -> Vec<MotionEvent> {
        events.try_iter().collect()
    }

    #[test]
    fn test_custom_without_pattern_leaves_mode_unchanged() {
        let (mut controller, events, _, _) = rig();
        controller.start_motion(MotionMode::Manual, None).unwrap();
        drain(&events);

        let result = controller.start_motion(MotionMode::Custom, None);
        assert!(matches!(result, Err(MotionError::PatternRequired)));
        assert_eq!(controller.mode(), MotionMode::Manual);
        assert!(controller.worker.is_none());

        // An error notification went out, but no mode change
        let emitted = drain(&events);
        assert!(
            emitted
                .iter()
                .all(|e| !matches!(e, MotionEvent::ModeChanged { .. }))
        );
        assert!(
            emitted
                .iter()
                .any(|e| matches!(e, MotionEvent::Error { .. }))
        );
    }

    #[test]
    fn test_stop_motion_is_idempotent() {
        let (mut controller, events, _, _) = rig();
        controller.stop_motion();
        controller.stop_motion();
        assert_eq!(controller.mode(), MotionMode::Stopped);

        let emitted = drain(&events);
        let stops = emitted
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    MotionEvent::ModeChanged {
                        mode: MotionMode::Stopped
                    }
                )
            })
            .count();
        assert_eq!(stops, 2);
    }

    #[test]
    fn test_stop_motion_zeroes_connected_servos() {
        let (mut controller, _events, front_bus, rear_bus) = rig();
        rear_bus.set_connected(false);

        controller.stop_motion();
        assert_eq!(front_bus.register(reg::CMD_SPEED), 0);
        assert!(
            front_bus
                .writes()
                .iter()
                .any(|(addr, _)| *addr == reg::CMD_SPEED)
        );
        assert!(rear_bus.writes().is_empty());
    }

    #[test]
    fn test_emergency_stop_forces_stopped_even_when_commands_fail() {
        let (mut controller, events, front_bus, rear_bus) = rig();
        front_bus.fail_all_writes();
        rear_bus.fail_all_writes();

        controller.start_motion(MotionMode::Walk, None).unwrap();
        drain(&events);

        controller.emergency_stop();
        assert_eq!(controller.mode(), MotionMode::Stopped);
        assert!(controller.worker.is_none());
        assert!(controller.current_pattern().is_none());

        let emitted = drain(&events);
        assert!(emitted.iter().any(|e| matches!(
            e,
            MotionEvent::ModeChanged {
                mode: MotionMode::Stopped
            }
        )));
    }

    #[test]
    fn test_emergency_stop_disables_both_servos() {
        let (mut controller, _events, front_bus, rear_bus) = rig();
        front_bus.set_register(reg::VIRTUAL_DI, 0x0001);
        rear_bus.set_register(reg::VIRTUAL_DI, 0x0001);

        controller.emergency_stop();
        assert_eq!(front_bus.register(reg::VIRTUAL_DI) & 0x0001, 0);
        assert_eq!(rear_bus.register(reg::VIRTUAL_DI) & 0x0001, 0);
        assert_eq!(front_bus.register(reg::CMD_SPEED), 0);
    }

    #[test]
    fn test_manual_move_requires_manual_mode() {
        let (mut controller, _events, front_bus, _) = rig();
        let result = controller.manual_move(Some(100), None);
        assert!(matches!(result, Err(MotionError::NotInManualMode)));
        assert!(front_bus.writes().is_empty());
    }

    #[test]
    fn test_manual_move_commands_and_reports() {
        let (mut controller, events, front_bus, rear_bus) = rig();
        controller.start_motion(MotionMode::Manual, None).unwrap();
        drain(&events);

        controller.manual_move(Some(1500), None).unwrap();

        // Entering Manual went through stop_motion, so ignore its
        // zero-speed write and look at position commands only
        let position_writes: Vec<_> = front_bus
            .writes()
            .into_iter()
            .filter(|(addr, _)| *addr == reg::CMD_POSITION)
            .collect();
        assert_eq!(position_writes.len(), 1);
        assert!(
            rear_bus
                .writes()
                .iter()
                .all(|(addr, _)| *addr != reg::CMD_POSITION)
        );

        // Missing side is reported as 0
        let emitted = drain(&events);
        assert!(emitted.contains(&MotionEvent::PositionUpdate {
            front: 1500,
            rear: 0
        }));
    }

    #[test]
    fn test_manual_jog_is_not_mode_gated() {
        let (controller, _events, front_bus, _) = rig();
        // Still in Stopped mode
        controller.manual_jog(ServoSide::Front, -1, 200).unwrap();
        assert_eq!(decode_i16(front_bus.register(reg::CMD_SPEED)), -200);
    }

    #[test]
    fn test_manual_jog_disconnected_fails() {
        let (controller, _events, _, rear_bus) = rig();
        rear_bus.set_connected(false);
        assert!(controller.manual_jog(ServoSide::Rear, 1, 100).is_err());
    }

    #[test]
    fn test_start_motion_replaces_running_session() {
        let (mut controller, events, _, _) = rig();
        controller.start_motion(MotionMode::Walk, None).unwrap();
        assert!(controller.worker.is_some());

        controller.start_motion(MotionMode::Gallop, None).unwrap();
        assert_eq!(controller.mode(), MotionMode::Gallop);
        assert!(controller.worker.is_some());
        assert_eq!(
            controller.current_pattern().map(|p| p.name.as_str()),
            Some("gallop")
        );

        controller.stop_motion();
        drain(&events);
    }

    #[test]
    fn test_custom_pattern_registry() {
        let (mut controller, _events, _, _) = rig();
        let pattern = MotionPattern {
            name: "trot".into(),
            cycle_time_ms: 1000,
            front_amplitude: 2000,
            rear_amplitude: 2000,
            phase_shift_deg: 120.0,
            front_offset: 0,
            rear_offset: 0,
        };
        controller.add_custom_pattern("trot", pattern.clone());
        assert_eq!(controller.custom_pattern("trot"), Some(&pattern));
        assert_eq!(controller.custom_pattern("canter"), None);
    }

    // One full Walk cycle on a healthy front servo: the pattern must close
    // on itself and stay inside the amplitude envelope.
    #[test]
    fn test_walk_cycle_scenario() {
        let (mut controller, events, front_bus, rear_bus) = rig();
        rear_bus.set_connected(false);

        controller.start_motion(MotionMode::Walk, None).unwrap();
        thread::sleep(Duration::from_millis(2200));
        controller.stop_motion();

        let samples: Vec<(i32, i32)> = drain(&events)
            .into_iter()
            .filter_map(|e| match e {
                MotionEvent::PositionUpdate { front, rear } => Some((front, rear)),
                _ => None,
            })
            .collect();

        // 50 Hz over ~2.2 s, allow generous scheduling slack
        assert!(samples.len() >= 90, "only {} samples", samples.len());

        // Envelope: walk amplitude is 3000 around offset 0
        for (front, rear) in &samples {
            assert!(front.abs() <= 3000, "front {front} outside envelope");
            assert!(rear.abs() <= 3000, "rear {rear} outside envelope");
        }

        // Cycle closure: after the first full cycle the pattern comes back
        // to within tolerance of its initial positions
        let (first_front, first_rear) = samples[0];
        let closed = samples
            .iter()
            .skip(85)
            .any(|(f, r)| (f - first_front).abs() <= 600 && (r - first_rear).abs() <= 600);
        assert!(closed, "pattern did not return to its initial positions");

        // The connected side was actually commanded; the disconnected side
        // got position updates but no writes
        assert!(
            front_bus
                .writes()
                .iter()
                .any(|(addr, _)| *addr == reg::CMD_POSITION)
        );
        assert!(
            rear_bus
                .writes()
                .iter()
                .all(|(addr, _)| *addr != reg::CMD_POSITION)
        );
    }
}
