//! A library for controlling disc pump driver boards.
//!
//! Driver boards (the general purpose driver "GP" and the small pump module
//! "SPM") are configured and monitored through 60 numbered
//! [registers](register). They can be reached over a serial port, with a
//! line-based text protocol ([`uart`]), or over an I2C bus, with a binary
//! protocol ([`i2c`]). Both are hidden behind the [`Transport`] trait, and the
//! [`PumpClient`] builds the common control operations on top of it.
//!
//! ```rust,no_run
//! use discpump::{register, ConnectOptions, PumpClient};
//! # fn wrapper() -> Result<(), discpump::error::Error> {
//! let mut pump = PumpClient::new();
//! pump.connect(ConnectOptions::new().serial_port("/dev/ttyUSB0"))?;
//!
//! pump.set_manual_power_control()?;
//! pump.write_register(register::SET_VAL, 1000.)?;
//! pump.enable_streaming()?;
//! let frame = pump.stream_frame()?;
//! println!("pressure: {}", frame.pressure());
//! pump.disconnect()?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(all(doc, feature = "doc_cfg"), feature(doc_cfg))]

pub mod backend;
mod client;
pub mod error;
pub mod i2c;
pub mod register;
pub mod stream;
pub mod timeout_guard;
pub mod transport;
pub mod uart;

pub use client::{BangBangSettings, ConnectOptions, PidCoefficients, PumpClient};
pub use stream::StreamFrame;
pub use transport::{Transport, TransportKind, WriteOptions};
