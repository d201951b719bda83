//! Error types.
//!
//! Each error is represented by a unique type that implements [`std::error::Error`].
//! All public APIs return the higher level [`Error`] enum, which every error
//! type converts into, allowing them to be used with `?`:
//!
//! ```
//! use discpump::error::{ConfigurationError, Error};
//!
//! fn foo() -> Result<(), ConfigurationError> {
//!     // ...
//! # unimplemented!();
//! }
//!
//! fn bar() -> Result<(), Error> {
//!     foo()?;
//!     // ...
//! # Ok(())
//! }
//! ```
//!
//! To get the specific error back out of an [`Error`], use [`TryFrom`]:
//!
//! ```
//! # use discpump::error::{CommunicationTimeoutError, Error};
//! # fn wrapper(error: Error) {
//! if let Ok(timeout) = CommunicationTimeoutError::try_from(error) {
//!     println!("no response to {}", timeout.request());
//! }
//! # }
//! ```
//!
//! The errors map onto three broad categories:
//!
//! * configuration errors: [`ConfigurationError`] and the usage errors
//!   [`NotConnectedError`], [`AddressInUseError`], [`InvalidRegisterError`],
//!   [`ValueOutOfRangeError`] and [`UnknownDeviceTypeError`],
//! * communication timeouts: [`CommunicationTimeoutError`],
//! * transport errors: [`I2cBusError`], [`SerialDeviceInUseOrDisconnectedError`],
//!   [`MalformedResponseError`], [`FrameLengthError`] and [`std::io::Error`].

use std::fmt;

/// Implement Error and Display traits for the specified type.
///
/// After the type define the format string and any arguments it should
/// reference after `self =>` (to abide by macro hygiene rules).
macro_rules! impl_error_display {
    (
        $name:path,
        $self:ident =>
        $display:literal
        $(,
            $($arg:expr),+
        )?
    ) => {
        impl std::error::Error for $name {}

        impl std::fmt::Display for $name {
            fn fmt(&$self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(
                    f,
                    $display
                    $(,
                        $($arg),+
                    )?
                )
            }
        }
    };
}

/// Define an error enum that contains concrete error types (not other error enums).
///
/// From and TryFrom traits will be implemented for the enum and it's underlying
/// errors. The enum's Display implementation will defer to the underlying errors'
/// Display implementations.
macro_rules! error_enum {
    (
        $(#[$attr:meta])*
        pub enum $name:ident {
            $(
                $variant:ident($inner:path)
            ),+
            $(,)?
        }
    ) => {
        $(
            #[$attr]
        )*
        #[allow(missing_docs)]
        pub enum $name {
            $(
                $variant($inner)
            ),+
        }

        impl std::error::Error for $name {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                match self {
                    $(
                        $name::$variant(e) => e.source()
                    ),+
                }
            }
        }

        // Defer the display to the inner error type
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        $name::$variant(e) => e.fmt(f)
                    ),+
                }
            }
        }

        // Allow the enum to be convertible from an infallible error
        impl From<std::convert::Infallible> for $name {
            fn from(_: std::convert::Infallible) -> Self {
                unreachable!();
            }
        }

        $(
            impl From<$inner> for $name {
                fn from(other: $inner) -> Self {
                    $name::$variant(other)
                }
            }

            impl TryFrom<$name> for $inner {
                type Error = $name;
                fn try_from(other: $name) -> Result<Self, Self::Error> {
                    match other {
                        $name::$variant(value) => Ok(value),
                        value => Err(value)
                    }
                }
            }
        )+
    };
}

/// The request a device failed to answer, or answered badly.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    /// A read of the register with the given id.
    ReadRegister(u8),
    /// A write to the register with the given id.
    WriteRegister(u8),
    /// A streaming-mode telemetry frame.
    StreamFrame,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::ReadRegister(id) => write!(f, "read of register {id}"),
            Request::WriteRegister(id) => write!(f, "write to register {id}"),
            Request::StreamFrame => f.write_str("stream frame"),
        }
    }
}

/// A pump was connected with an invalid combination of settings.
///
/// Exactly one of a serial port or an I2C address must be specified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigurationError(Box<str>);

impl ConfigurationError {
    pub(crate) fn new<S: Into<Box<str>>>(message: S) -> Self {
        ConfigurationError(message.into())
    }
}

impl_error_display! {
    ConfigurationError,
    self => "invalid pump configuration: {}", self.0
}

/// An operation required a connected pump, but the client is disconnected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NotConnectedError;

impl_error_display! {
    NotConnectedError,
    self => "the pump is not connected"
}

/// Another pump is already connected at the same address on the shared I2C bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressInUseError {
    /// The contested address.
    address: u8,
    /// The name of the bus.
    bus: Box<str>,
}

impl AddressInUseError {
    pub(crate) fn new<S: Into<Box<str>>>(address: u8, bus: S) -> Self {
        AddressInUseError {
            address,
            bus: bus.into(),
        }
    }

    /// The I2C address that is already in use.
    pub fn address(&self) -> u8 {
        self.address
    }
}

impl_error_display! {
    AddressInUseError,
    self => "I2C address {} is already connected on bus {}", self.address, self.bus
}

/// The register id is outside of the device's register map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct InvalidRegisterError(pub(crate) u8);

impl InvalidRegisterError {
    /// The offending register id.
    pub fn id(&self) -> u8 {
        self.0
    }
}

impl_error_display! {
    InvalidRegisterError,
    self => "register {} does not exist (valid ids are 0..{})", self.0, crate::register::count()
}

/// A value cannot be represented by the register's numeric kind.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ValueOutOfRangeError {
    /// The register being written.
    pub(crate) id: u8,
    /// The rejected value.
    pub(crate) value: f64,
    /// The numeric kind the value was encoded as.
    pub(crate) kind: crate::register::Kind,
}

impl ValueOutOfRangeError {
    /// The register that was being written.
    pub fn id(&self) -> u8 {
        self.id
    }
    /// The value that could not be encoded.
    pub fn value(&self) -> f64 {
        self.value
    }
    /// The numeric kind the value was encoded as.
    pub fn kind(&self) -> crate::register::Kind {
        self.kind
    }
}

impl_error_display! {
    ValueOutOfRangeError,
    self => "value {} cannot be encoded for register {} ({})",
    self.value,
    self.id,
    self.kind
}

/// The device reported a device type this library does not know.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct UnknownDeviceTypeError(pub(crate) f64);

impl_error_display! {
    UnknownDeviceTypeError,
    self => "unknown device type {}", self.0
}

/// The device did not produce a valid response before the timeout elapsed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CommunicationTimeoutError(Request);

impl CommunicationTimeoutError {
    pub(crate) const fn new(request: Request) -> Self {
        CommunicationTimeoutError(request)
    }

    /// The request that went unanswered.
    pub fn request(&self) -> Request {
        self.0
    }
}

impl_error_display! {
    CommunicationTimeoutError,
    self => "did not get the expected response from the driver to the {} before timing out", self.0
}

/// A response matched the expected request but its content could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MalformedResponseError {
    /// The request the response belongs to.
    request: Request,
    /// The raw bytes of the response.
    content: Box<[u8]>,
}

impl MalformedResponseError {
    pub(crate) fn new<T: Into<Box<[u8]>>>(request: Request, content: T) -> Self {
        MalformedResponseError {
            request,
            content: content.into(),
        }
    }

    /// The request the response belongs to.
    pub fn request(&self) -> Request {
        self.request
    }
}

impl AsRef<[u8]> for MalformedResponseError {
    fn as_ref(&self) -> &[u8] {
        &self.content
    }
}

impl_error_display! {
    MalformedResponseError,
    self => "malformed response to {}: {:?}",
    self.request,
    String::from_utf8_lossy(&self.content).trim_end()
}

/// A binary frame was shorter than its fixed layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FrameLengthError {
    /// The number of bytes the layout requires.
    pub(crate) expected: usize,
    /// The number of bytes available.
    pub(crate) actual: usize,
}

impl FrameLengthError {
    /// The number of bytes the frame requires.
    pub fn expected(&self) -> usize {
        self.expected
    }
    /// The number of bytes that were available.
    pub fn actual(&self) -> usize {
        self.actual
    }
}

impl_error_display! {
    FrameLengthError,
    self => "expected a {} byte frame but only {} bytes were available", self.expected, self.actual
}

/// An I2C transaction failed on the bus (e.g., the target did not acknowledge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cBusError {
    /// The target address of the transaction.
    address: u8,
    /// The HAL's classification of the failure.
    kind: embedded_hal::i2c::ErrorKind,
    /// A description of the underlying error.
    description: Box<str>,
}

impl I2cBusError {
    /// Create a new I2C bus error.
    ///
    /// Custom [`Bus`](crate::i2c::Bus) implementations use this to report
    /// failed transactions.
    pub fn new<S: Into<Box<str>>>(
        address: u8,
        kind: embedded_hal::i2c::ErrorKind,
        description: S,
    ) -> Self {
        I2cBusError {
            address,
            kind,
            description: description.into(),
        }
    }

    /// The target address of the failed transaction.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The kind of bus failure.
    pub fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        self.kind
    }
}

impl_error_display! {
    I2cBusError,
    self => "I2C transaction with address {} failed ({:?}): {}", self.address, self.kind, self.description
}

/// The specified device is either disconnected or already in use by another process.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SerialDeviceInUseOrDisconnectedError(Box<str>);

impl_error_display! {
    SerialDeviceInUseOrDisconnectedError,
    self =>
    "the specified device is either disconnected or already in use by another process: {}", self.0
}

error_enum! {
    /// Any error returned by this crate.
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum Error {
        Configuration(ConfigurationError),
        NotConnected(NotConnectedError),
        AddressInUse(AddressInUseError),
        InvalidRegister(InvalidRegisterError),
        ValueOutOfRange(ValueOutOfRangeError),
        UnknownDeviceType(UnknownDeviceTypeError),
        CommunicationTimeout(CommunicationTimeoutError),
        MalformedResponse(MalformedResponseError),
        FrameLength(FrameLengthError),
        I2cBus(I2cBusError),
        SerialDeviceInUseOrDisconnected(SerialDeviceInUseOrDisconnectedError),
        Io(std::io::Error),
    }
}

impl Error {
    /// A convenience function for determining if the error is due to the
    /// device or port timing out.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::CommunicationTimeout(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Replace a low-level timeout with a [`CommunicationTimeoutError`] naming `request`.
    ///
    /// All other errors are returned unchanged.
    pub(crate) fn with_timeout_context(self, request: Request) -> Self {
        if self.is_timeout() {
            CommunicationTimeoutError::new(request).into()
        } else {
            self
        }
    }
}

impl From<serialport::Error> for Error {
    fn from(other: serialport::Error) -> Self {
        use std::io;

        match other.kind() {
            serialport::ErrorKind::NoDevice => Error::SerialDeviceInUseOrDisconnected(
                SerialDeviceInUseOrDisconnectedError(other.description.into_boxed_str()),
            ),
            serialport::ErrorKind::InvalidInput => Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                other.description,
            )),
            serialport::ErrorKind::Unknown => {
                Error::Io(io::Error::new(io::ErrorKind::Other, other.description))
            }
            serialport::ErrorKind::Io(kind) => Error::Io(io::Error::new(kind, other.description)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: Send, Sync, std::error::Error, From<ConfigurationError>);
    assert_impl_all!(ConfigurationError: TryFrom<Error>);
    assert_impl_all!(CommunicationTimeoutError: TryFrom<Error>, Copy);

    #[test]
    fn timeouts_are_recognized() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::TimedOut, "too slow").into();
        assert!(err.is_timeout());
        let err = err.with_timeout_context(Request::ReadRegister(7));
        let err = CommunicationTimeoutError::try_from(err).unwrap();
        assert_eq!(err.request(), Request::ReadRegister(7));

        let err: Error = NotConnectedError.into();
        assert!(!err.is_timeout());
        assert!(matches!(
            err.with_timeout_context(Request::StreamFrame),
            Error::NotConnected(_)
        ));
    }

    #[test]
    fn display_names_the_request() {
        let err = CommunicationTimeoutError::new(Request::ReadRegister(39));
        assert!(err.to_string().contains("read of register 39"));
        let err = MalformedResponseError::new(Request::StreamFrame, b"#S1,2\r\n".to_vec());
        assert_eq!(
            err.to_string(),
            "malformed response to stream frame: \"#S1,2\""
        );
    }

    #[test]
    fn serialport_errors_convert() {
        let err: Error =
            serialport::Error::new(serialport::ErrorKind::NoDevice, "/dev/ttyUSB9").into();
        assert!(matches!(err, Error::SerialDeviceInUseOrDisconnected(_)));
        let err: Error = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut),
            "slow",
        )
        .into();
        assert!(err.is_timeout());
    }
}
