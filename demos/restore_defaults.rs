//! Demo: restore pump default settings.

use discpump::{i2c::BusRegistry, register, ConnectOptions, PumpClient};
use simple_logger::SimpleLogger;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable logging
    SimpleLogger::new().init().unwrap();

    let registry = BusRegistry::new();
    let mut pump = PumpClient::new();
    pump.connect(ConnectOptions::new().i2c(registry.linux("/dev/i2c-1"), 40))?;
    pump.disable_streaming()?;
    pump.set_pump_enabled(false)?;

    // Write a value that differs from every default, so the restore can be confirmed.
    let sentinel = 12345.;
    pump.write_register(register::SET_VAL, sentinel)?;
    let before = pump.read_register(register::SET_VAL)?;
    pump.restore_defaults()?;
    let after = pump.read_register(register::SET_VAL)?;

    if before != sentinel || after == before {
        println!("Values were not restored.");
        println!("Check the I2C address or serial port. SPMs in I2C-only mode must be connected over I2C.");
    } else {
        println!("Values restored to their defaults.");
        pump.persist_settings_to_board()?;
    }
    pump.disconnect()?;
    Ok(())
}
