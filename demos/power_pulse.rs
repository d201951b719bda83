//! Demo: pulse pump power.

use discpump::{register, ConnectOptions, PumpClient};
use simple_logger::SimpleLogger;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable logging
    SimpleLogger::new().init().unwrap();

    let mut pump = PumpClient::new();
    pump.connect(ConnectOptions::new().serial_port("/dev/ttyUSB0"))?;
    pump.disable_streaming()?;
    pump.set_pump_enabled(false)?;

    // Run the pump at 1 W for one second.
    pump.set_manual_power_control()?;
    pump.write_register(register::SET_VAL, 1000.)?;
    pump.set_pump_enabled(true)?;
    std::thread::sleep(Duration::from_secs(1));
    pump.set_pump_enabled(false)?;

    pump.disconnect()?;
    Ok(())
}
