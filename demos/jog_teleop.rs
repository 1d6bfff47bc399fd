// Keyboard jog teleop: W/S front jog, I/K rear jog, R/F speed, SPACE stop, Q quit
//
// Usage: cargo run --example jog_teleop -- [front_port] [rear_port]

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use gaitrig_modbus_runtime::{A5Servo, ConnectionConfig, MotionController, ServoSide};

const SPEEDS: [i16; 3] = [50, 100, 200]; // RPM
const INPUT_TIMEOUT_MS: u64 = 150; // Stop jogging after this much time with no input

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let front_port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let rear_port = std::env::args()
        .nth(2)
        .unwrap_or_else(|| "/dev/ttyUSB1".to_string());

    let front = A5Servo::new("front", ConnectionConfig::new(front_port, 1));
    let rear = A5Servo::new("rear", ConnectionConfig::new(rear_port, 1));
    let (mut rig, _events) = MotionController::new(front, rear);

    for side in [ServoSide::Front, ServoSide::Rear] {
        match rig.connect(side) {
            Ok(()) => {
                rig.enable(side, true)?;
                info!("{} servo ready", side.name());
            }
            Err(e) => warn!("{}: connect failed: {}", side.name(), e),
        }
    }

    info!("Controls: W/S=front, I/K=rear, R/F=speed, SPACE=stop, Q=quit");
    info!("Speed: {} RPM", SPEEDS[1]);

    enable_raw_mode()?;
    let result = run_teleop(&rig);
    disable_raw_mode()?;

    // Leave the rig stationary and disabled
    rig.emergency_stop();
    result
}

fn run_teleop(
    rig: &MotionController,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut speed_idx: usize = 1;
    let mut front_dir: i8 = 0;
    let mut rear_dir: i8 = 0;
    let mut last_input = Instant::now();

    loop {
        let mut changed = false;

        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                if !pressed {
                    continue;
                }

                match code {
                    KeyCode::Char('q') => break,

                    KeyCode::Char('w') => {
                        front_dir = 1;
                        changed = true;
                    }
                    KeyCode::Char('s') => {
                        front_dir = -1;
                        changed = true;
                    }
                    KeyCode::Char('i') => {
                        rear_dir = 1;
                        changed = true;
                    }
                    KeyCode::Char('k') => {
                        rear_dir = -1;
                        changed = true;
                    }

                    KeyCode::Char('r') => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        info!("Speed: {} RPM", SPEEDS[speed_idx]);
                        changed = true;
                    }
                    KeyCode::Char('f') => {
                        speed_idx = speed_idx.saturating_sub(1);
                        info!("Speed: {} RPM", SPEEDS[speed_idx]);
                        changed = true;
                    }

                    KeyCode::Char(' ') => {
                        front_dir = 0;
                        rear_dir = 0;
                        changed = true;
                    }

                    _ => {}
                }
                if changed {
                    last_input = Instant::now();
                }
            }
        } else if (front_dir != 0 || rear_dir != 0)
            && last_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS)
        {
            // Dead-man behavior: no input for a while means stop
            front_dir = 0;
            rear_dir = 0;
            changed = true;
        }

        if changed {
            send_jog(rig, ServoSide::Front, front_dir, SPEEDS[speed_idx]);
            send_jog(rig, ServoSide::Rear, rear_dir, SPEEDS[speed_idx]);
        }
    }

    Ok(())
}

fn send_jog(rig: &MotionController, side: ServoSide, direction: i8, speed: i16) {
    if let Err(e) = rig.manual_jog(side, direction, speed) {
        warn!("{}: jog failed: {}", side.name(), e);
    }
}
