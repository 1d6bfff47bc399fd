// Servo diagnostic: READ-ONLY check of one A5 drive
//
// This tool does NOT write anything to the drive - it's completely safe.
// Use this first before running the gait runtime or jog_teleop.
//
// Usage: cargo run --example servo_diagnostic -- [port] [slave_id]
// Example: cargo run --example servo_diagnostic -- /dev/ttyUSB0 1

use gaitrig_modbus_runtime::servo::A5Servo;
use gaitrig_modbus_runtime::servo::a5::reg;
use gaitrig_modbus_runtime::ConnectionConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    // Get port and slave id from args or use defaults
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let slave_id: u8 = std::env::args()
        .nth(2)
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or(1);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            A5 Servo Diagnostic (READ-ONLY)                   ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only READS from the drive - no writes, no motion  ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Serial port: {}  slave id: {}", port, slave_id);
    println!();

    println!("Step 1: Opening Modbus connection...");
    let mut servo = A5Servo::new("diagnostic", ConnectionConfig::new(port, slave_id));
    match servo.connect() {
        Ok(()) => println!("  ✓ Connected"),
        Err(e) => {
            println!("  ✗ Failed to connect: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path and slave id");
            println!("  - Verify the RS485 adapter wiring (A/B lines)");
            println!("  - Confirm the drive's P0C communication settings");
            return Err(e.into());
        }
    }
    println!();

    println!("Step 2: Reading status...");
    servo.read_status()?;
    let status = servo.status();
    println!("  Position:   {} pulses", status.position);
    println!("  Speed:      {} RPM", status.speed);
    println!("  Torque:     {} %", status.torque);
    println!("  DC bus:     {} V", status.dc_voltage);
    println!("  DI status:  {:#06x}", status.di_status);
    println!("  DO status:  {:#06x}", status.do_status);
    println!("  Enabled:    {}", status.is_enabled);
    println!(
        "  Fault:      {} ({})",
        status.fault_code,
        servo.fault_description()
    );
    println!();

    println!("Step 3: Reading tuning registers...");
    servo.add_custom_register(reg::POSITION_GAIN, "position gain", "P08-00", false);
    servo.add_custom_register(reg::SPEED_GAIN, "speed gain", "P08-02", false);
    servo.add_custom_register(reg::GEAR_RATIO_NUM, "gear ratio numerator", "P05-07", false);
    servo.add_custom_register(reg::READ_POSITION, "comms position monitor", "P30-00", true);

    let values = servo.read_custom_registers();
    for (address, info) in servo.custom_registers() {
        match values.get(address).copied().flatten() {
            Some(value) => println!("  {:#06x} {:<24} = {}", address, info.name, value),
            None => println!("  {:#06x} {:<24} = <read failed>", address, info.name),
        }
    }
    println!();

    servo.disconnect();
    println!("Diagnostic complete.");
    Ok(())
}
