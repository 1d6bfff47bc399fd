use clap::{Parser, ValueEnum};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gaitrig_modbus_runtime::{
    A5Servo, ConnectionConfig, MotionController, MotionError, MotionMode, ServoSide,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Gait {
    Walk,
    Gallop,
}

impl From<Gait> for MotionMode {
    fn from(gait: Gait) -> Self {
        match gait {
            Gait::Walk => MotionMode::Walk,
            Gait::Gallop => MotionMode::Gallop,
        }
    }
}

/// Run a gait pattern on the front/rear servo pair
#[derive(Debug, Parser)]
#[command(name = "gaitrig")]
struct Cli {
    /// Serial port of the front servo, e.g. /dev/ttyUSB0
    #[arg(long)]
    front_port: String,

    /// Serial port of the rear servo, e.g. /dev/ttyUSB1
    #[arg(long)]
    rear_port: String,

    /// Modbus slave address of the front servo
    #[arg(long, default_value_t = 1)]
    front_slave: u8,

    /// Modbus slave address of the rear servo
    #[arg(long, default_value_t = 1)]
    rear_slave: u8,

    #[arg(long, default_value_t = 115_200)]
    baud_rate: u32,

    /// Gait to run
    #[arg(long, value_enum, default_value_t = Gait::Walk)]
    gait: Gait,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 10)]
    duration: u64,
}

fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), MotionError> {
    let mut front_config = ConnectionConfig::new(cli.front_port, cli.front_slave);
    front_config.baud_rate = cli.baud_rate;
    let mut rear_config = ConnectionConfig::new(cli.rear_port, cli.rear_slave);
    rear_config.baud_rate = cli.baud_rate;

    let front = A5Servo::new("front", front_config);
    let rear = A5Servo::new("rear", rear_config);
    let (mut rig, events) = MotionController::new(front, rear);

    // Print every notification as a JSON line for downstream tooling
    let printer = thread::spawn(move || {
        for event in events.iter() {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode event: {}", e),
            }
        }
    });

    let mut connected = 0;
    for side in [ServoSide::Front, ServoSide::Rear] {
        match rig.connect(side) {
            Ok(()) => {
                connected += 1;
                let status = rig.read_status(side)?;
                info!(
                    "{}: position={} fault={} ({})",
                    side.name(),
                    status.position,
                    status.fault_code,
                    rig.fault_description(side)
                );
                rig.enable(side, true)?;
            }
            Err(e) => warn!("{}: connect failed: {}", side.name(), e),
        }
    }
    if connected == 0 {
        warn!("No servo reachable, running pattern generation only");
    }

    rig.start_motion(cli.gait.into(), None)?;
    thread::sleep(Duration::from_secs(cli.duration));
    rig.stop_motion();

    for side in [ServoSide::Front, ServoSide::Rear] {
        if rig.is_connected(side) {
            if let Err(e) = rig.enable(side, false) {
                warn!("{}: disable failed: {}", side.name(), e);
            }
            rig.disconnect(side);
        }
    }

    drop(rig);
    let _ = printer.join();
    Ok(())
}
