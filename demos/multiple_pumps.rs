//! Demo: drive multiple pumps on a shared I2C bus.

use discpump::{i2c::BusRegistry, register, ConnectOptions, PumpClient};
use simple_logger::SimpleLogger;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable logging
    SimpleLogger::new().init().unwrap();

    // Two SPMs in I2C-only mode, at addresses 40 and 41, and a GP driver over UART.
    let registry = BusRegistry::new();
    let bus = registry.linux("/dev/i2c-1");
    let mut pumps = [PumpClient::new(), PumpClient::new(), PumpClient::new()];
    pumps[0].connect(ConnectOptions::new().i2c(bus.clone(), 40))?;
    pumps[1].connect(ConnectOptions::new().i2c(bus, 41))?;
    pumps[2].connect(ConnectOptions::new().serial_port("/dev/ttyUSB0"))?;

    let colours = [(31, 31, 0), (0, 0, 31), (31, 0, 31)];
    for (pump, (red, green, blue)) in pumps.iter_mut().zip(colours) {
        pump.set_pump_enabled(false)?;
        pump.set_status_led_color(red, green, blue)?;
        pump.set_manual_power_control()?;
        pump.write_register(register::SET_VAL, 1000.)?;
    }

    for pump in &mut pumps {
        pump.set_pump_enabled(true)?;
    }
    std::thread::sleep(Duration::from_secs(1));
    for pump in &mut pumps {
        pump.set_pump_enabled(false)?;
        pump.disconnect()?;
    }
    Ok(())
}
