//! The transport-agnostic register access capability.
//!
//! A [`Transport`] moves single register values and telemetry frames between
//! the host and one driver board. There are two implementations:
//!
//! * [`UartTransport`](crate::uart::UartTransport): ASCII lines over a serial port,
//! * [`I2cTransport`](crate::i2c::I2cTransport): fixed binary transactions on a shared I2C bus.
//!
//! Most code does not use transports directly but goes through
//! [`PumpClient`](crate::PumpClient), which picks one when it connects.

use crate::{
    error::Error,
    register::{self, Encoded},
    stream::StreamFrame,
};
use std::time::Duration;

/// How long to wait for a register value or stream frame by default.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// How long to pause after each register write by default.
///
/// The driver's command processor is easily saturated by back-to-back writes.
pub const DEFAULT_POST_DELAY: Duration = Duration::from_millis(5);

/// The kind of link a [`Transport`] uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// ASCII lines over a serial port.
    Uart,
    /// Binary transactions on an I2C bus.
    I2c,
}

/// Options that control how a register is written.
///
/// ## Example
///
/// ```rust
/// # use discpump::transport::WriteOptions;
/// # use std::time::Duration;
/// let mut options = WriteOptions::new();
/// options.rounding_places(1).post_delay(Duration::from_millis(20));
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// The number of decimal places float values are rounded to over UART.
    rounding_places: u8,
    /// The pause after the write.
    post_delay: Duration,
}

impl WriteOptions {
    /// The default number of decimal places.
    pub const DEFAULT_ROUNDING_PLACES: u8 = 3;

    /// Create the default options: 3 decimal places and a 5 ms pause.
    ///
    /// Equivalent to [`default`](WriteOptions::default).
    pub const fn new() -> Self {
        WriteOptions {
            rounding_places: WriteOptions::DEFAULT_ROUNDING_PLACES,
            post_delay: DEFAULT_POST_DELAY,
        }
    }

    /// Set the number of decimal places float values are rounded to.
    ///
    /// Only the UART transport rounds floats. The I2C transport sends the
    /// 32-bit float as is.
    pub fn rounding_places(&mut self, places: u8) -> &mut Self {
        self.rounding_places = places;
        self
    }

    /// Set how long to pause after the write.
    pub fn post_delay(&mut self, delay: Duration) -> &mut Self {
        self.post_delay = delay;
        self
    }

    /// The number of decimal places float values are rounded to.
    pub fn get_rounding_places(&self) -> u8 {
        self.rounding_places
    }

    /// How long to pause after the write.
    pub fn get_post_delay(&self) -> Duration {
        self.post_delay
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions::new()
    }
}

/// A connection to one driver board that can read and write its registers.
///
/// Every call is a synchronous request/response exchange. Nothing is retried:
/// a timeout aborts the call and it is up to the caller to try again.
pub trait Transport: std::fmt::Debug {
    /// The kind of link this transport uses.
    fn kind(&self) -> TransportKind;

    /// Whether the transport is still connected.
    fn is_connected(&self) -> bool;

    /// Write `value` to register `id`, encoded according to the register's kind.
    ///
    /// The write is not acknowledged by the driver. After sending, the call
    /// blocks for the configured post delay.
    fn write_register(&mut self, id: u8, value: f64, options: &WriteOptions) -> Result<(), Error>;

    /// Read the value of register `id`, waiting at most `timeout` for it.
    fn read_register(&mut self, id: u8, timeout: Duration) -> Result<f64, Error>;

    /// Read one telemetry frame, waiting at most `timeout` for it.
    ///
    /// Streaming must have been enabled on the driver for the transport's
    /// interface first.
    fn stream_frame(&mut self, timeout: Duration) -> Result<StreamFrame, Error>;

    /// Release the connection.
    ///
    /// Calling this on a disconnected transport does nothing.
    fn disconnect(&mut self) -> Result<(), Error>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
    fn write_register(&mut self, id: u8, value: f64, options: &WriteOptions) -> Result<(), Error> {
        (**self).write_register(id, value, options)
    }
    fn read_register(&mut self, id: u8, timeout: Duration) -> Result<f64, Error> {
        (**self).read_register(id, timeout)
    }
    fn stream_frame(&mut self, timeout: Duration) -> Result<StreamFrame, Error> {
        (**self).stream_frame(timeout)
    }
    fn disconnect(&mut self) -> Result<(), Error> {
        (**self).disconnect()
    }
}

/// Check that `id` names a register and encode `value` for it.
pub(crate) fn encode_register(id: u8, value: f64) -> Result<Encoded, Error> {
    let entry = register::try_entry(id)?;
    Ok(entry.kind().encode(id, value)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use static_assertions::assert_obj_safe;

    assert_obj_safe!(Transport);

    #[test]
    fn write_options_builder() {
        let options = WriteOptions::default();
        assert_eq!(options.get_rounding_places(), 3);
        assert_eq!(options.get_post_delay(), Duration::from_millis(5));

        let mut options = WriteOptions::new();
        options.rounding_places(0).post_delay(Duration::ZERO);
        assert_eq!(options.get_rounding_places(), 0);
        assert_eq!(options.get_post_delay(), Duration::ZERO);
    }

    #[test]
    fn encode_register_checks_the_id_and_range() {
        assert_eq!(
            encode_register(register::SET_VAL, 123.0).unwrap(),
            Encoded::Float32(123.0)
        );
        assert_eq!(
            encode_register(register::PUMP_ENABLE, 1.0).unwrap(),
            Encoded::Int16(1)
        );
        assert!(matches!(
            encode_register(60, 0.0),
            Err(Error::InvalidRegister(_))
        ));
        assert!(matches!(
            encode_register(register::MANUAL_DRIVE_FREQUENCY, 70000.0),
            Err(Error::ValueOutOfRange(_))
        ));
    }
}
