//! Register access over a serial line (UART).
//!
//! The driver speaks a simple line-based ASCII protocol:
//!
//! * `#W{id},{value}\n` writes a register (no reply),
//! * `#R{id}\n` requests a register, which the driver answers with a line
//!   containing `#R{id},{value}`,
//! * in streaming mode the driver pushes lines containing `#S` followed by the
//!   eight channels of a [`StreamFrame`].
//!
//! The line is noisy in practice. Lines containing bytes that are not ASCII
//! are dropped, as are lines that don't answer the current request.
//!
//! ```rust,no_run
//! # use discpump::{register, transport::{Transport, WriteOptions}, uart::UartTransport};
//! # use std::time::Duration;
//! # fn wrapper() -> Result<(), discpump::error::Error> {
//! let mut transport = UartTransport::open("/dev/ttyUSB0")?;
//! transport.write_register(register::SET_VAL, 500., &WriteOptions::new())?;
//! let power = transport.read_register(register::MEAS_DRIVE_MILLIWATTS, Duration::from_secs(1))?;
//! # Ok(())
//! # }
//! ```

#[cfg(any(test, feature = "mock"))]
use crate::backend::Mock;
use crate::{
    backend::{Backend, Serial, UNKNOWN_BACKEND_NAME},
    error::{CommunicationTimeoutError, Error, MalformedResponseError, NotConnectedError, Request},
    register::{self, Encoded},
    stream::StreamFrame,
    timeout_guard::TimeoutGuard,
    transport::{self, Transport, TransportKind, WriteOptions},
};
use serialport as sp;
use std::{
    fmt, io,
    time::{Duration, Instant},
};

/// The line feed that terminates every line in both directions.
const LINE_FEED: u8 = b'\n';

/// Options for configuring and opening a serial port.
///
/// The port is always configured for 8 data bits, no parity, 1 stop bit and
/// no flow control.
///
/// ## Example
///
/// ```rust,no_run
/// # use discpump::uart::OpenSerialOptions;
/// # use std::time::Duration;
/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let mut transport = OpenSerialOptions::new()
///     .timeout(Some(Duration::from_millis(500)))
///     .open("/dev/ttyUSB0")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSerialOptions {
    /// The custom baud rate
    baud_rate: u32,
    /// The custom link-level read timeout
    timeout: Option<Duration>,
}

impl OpenSerialOptions {
    /// The driver's baud rate.
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;

    /// The default link-level read timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Create a blank set of options ready for configuration.
    ///
    /// The default baud rate and read timeout are 115,200 and 2 seconds, respectively.
    ///
    /// Equivalent to [`default`](OpenSerialOptions::default).
    pub fn new() -> Self {
        OpenSerialOptions {
            baud_rate: OpenSerialOptions::DEFAULT_BAUD_RATE,
            timeout: Some(OpenSerialOptions::DEFAULT_TIMEOUT),
        }
    }

    /// Set a custom baud rate.
    pub fn baud_rate(&mut self, baud_rate: u32) -> &mut Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set a custom link-level read timeout.
    ///
    /// Register reads and stream frames use their own, per-call timeout. This
    /// timeout is what the port is left with between calls. If duration is
    /// `None`, reads will block indefinitely.
    pub fn timeout(&mut self, duration: Option<Duration>) -> &mut Self {
        self.timeout = duration;
        self
    }

    /// Open a [`Serial`] port configured for the driver at the specified path.
    fn open_serial_port(&self, path: &str) -> Result<Serial, Error> {
        // The baud rate passed to `new` is ignored by some platforms, so set
        // it again with `baud_rate` below.
        let serial = sp::new(path, self.baud_rate)
            .data_bits(sp::DataBits::Eight)
            .parity(sp::Parity::None)
            .flow_control(sp::FlowControl::None)
            .stop_bits(sp::StopBits::One)
            .timeout(self.timeout.unwrap_or(Duration::MAX))
            .baud_rate(self.baud_rate)
            .open_native()
            .map(Serial)?;
        log::info!("opened {path} at {} baud", self.baud_rate);
        Ok(serial)
    }

    /// Open the port at the specified path with the custom options.
    pub fn open(&self, path: &str) -> Result<UartTransport<Serial>, Error> {
        Ok(UartTransport::from_backend(self.open_serial_port(path)?))
    }

    /// Open the port at the specified path with the custom options.
    ///
    /// The type of the underlying backend is erased via dynamic dispatch,
    /// which does have runtime overhead. [`open`](OpenSerialOptions::open)
    /// should generally be used instead, except when the type of the underlying
    /// backend may not be known at compile time.
    pub fn open_dyn(&self, path: &str) -> Result<UartTransport<Box<dyn Backend + Send>>, Error> {
        Ok(UartTransport::from_backend(Box::new(
            self.open_serial_port(path)?,
        )))
    }
}

impl Default for OpenSerialOptions {
    fn default() -> Self {
        OpenSerialOptions::new()
    }
}

/// A [`Transport`] that talks to the driver over a serial line.
pub struct UartTransport<B> {
    /// The backend to transmit/receive lines with, until disconnected.
    backend: Option<B>,
    /// The name of the backend, for logging.
    name: String,
    /// If populated, the error that has "poisoned" the transport. This error
    /// MUST be reported before the transport is used for communication again.
    ///
    /// A transport becomes poisoned when a [`TimeoutGuard`] cannot restore the
    /// link-level timeout in its Drop implementation.
    poison: Option<io::Error>,
}

impl UartTransport<Serial> {
    /// Open the serial port at the specified path using the default options.
    ///
    /// Alternatively, use [`OpenSerialOptions`] to customize how the port is opened.
    pub fn open(path: &str) -> Result<UartTransport<Serial>, Error> {
        OpenSerialOptions::new().open(path)
    }
}

#[cfg(any(test, feature = "mock"))]
impl UartTransport<Mock> {
    /// Open a transport on a [`Mock`] backend.
    pub fn open_mock() -> UartTransport<Mock> {
        UartTransport::from_backend(Mock::new())
    }
}

impl<B: Backend> UartTransport<B> {
    /// Get a transport from the given backend.
    pub fn from_backend(backend: B) -> UartTransport<B> {
        let name = backend
            .name()
            .unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string());
        UartTransport {
            backend: Some(backend),
            name,
            poison: None,
        }
    }

    /// Get the underlying backend, if the transport is still connected.
    pub fn get_mut(&mut self) -> Option<&mut B> {
        self.backend.as_mut()
    }

    /// Check if the transport is poisoned and report the error if it exists.
    fn check_poisoned(&mut self) -> Result<(), io::Error> {
        if let Some(poison) = self.poison.take() {
            Err(poison)
        } else {
            Ok(())
        }
    }

    /// Get the backend, or an error if the transport has been disconnected.
    fn connected_backend(&mut self) -> Result<&mut B, Error> {
        self.check_poisoned()?;
        self.backend.as_mut().ok_or_else(|| NotConnectedError.into())
    }

    /// Transmit a single line. `line` must end with a line feed.
    fn send_line(&mut self, line: &str, request: Request) -> Result<(), Error> {
        log::debug!("{} TX:   {}", self.name, line.trim_end());
        let backend = self.connected_backend()?;
        io::Write::write_all(backend, line.as_bytes())
            .and_then(|()| io::Write::flush(backend))
            .map_err(|e| Error::from(e).with_timeout_context(request))
    }

    /// Temporarily change the read timeout of the port.
    ///
    /// The original timeout is restored when the returned guard goes out of
    /// scope. If it cannot be restored, the next operation on the transport
    /// reports the error.
    pub fn timeout_guard(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<TimeoutGuard<'_, B, Self>, Error> {
        self.connected_backend()?;
        Ok(TimeoutGuard::new(self, timeout)?)
    }

    /// Read lines until `parse` accepts one or the timeout elapses.
    ///
    /// `parse` receives the raw line and its text. It returns `None` to skip
    /// the line. Lines that contain non-ASCII bytes are skipped without
    /// being passed to `parse`.
    fn poll_lines<T>(
        &mut self,
        request: Request,
        timeout: Duration,
        mut parse: impl FnMut(&[u8], &str) -> Option<Result<T, Error>>,
    ) -> Result<T, Error> {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.timeout_guard(Some(timeout))?;
        loop {
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                return Err(CommunicationTimeoutError::new(request).into());
            }
            guard.set_timeout(remaining)?;
            let Some(backend) = guard.backend.as_mut() else {
                return Err(NotConnectedError.into());
            };
            let (line, stopped_by) = read_line(backend);

            if !line.is_empty() {
                log::debug!("{} RECV: {}", guard.name, String::from_utf8_lossy(&line).trim_end());
                match std::str::from_utf8(&line) {
                    Ok(text) if text.is_ascii() => {
                        if let Some(result) = parse(&line, text) {
                            return result;
                        }
                        log::trace!("{} skipped a line not answering the {request}", guard.name);
                    }
                    _ => log::trace!("{} skipped a corrupted line", guard.name),
                }
            }

            if let Some(err) = stopped_by {
                return Err(Error::from(err).with_timeout_context(request));
            }
        }
    }
}

/// Read bytes up to and including the next line feed.
///
/// Returns the bytes read and, if the line was cut short, the error that
/// stopped the read.
fn read_line<B: Backend>(backend: &mut B) -> (Vec<u8>, Option<io::Error>) {
    let mut line = Vec::with_capacity(64);
    for byte in io::Read::bytes(backend) {
        match byte {
            Ok(byte) => {
                line.push(byte);
                if byte == LINE_FEED {
                    return (line, None);
                }
            }
            Err(e) => return (line, Some(e)),
        }
    }
    (
        line,
        Some(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "the serial port was closed",
        )),
    )
}

/// Format a register value the way the driver expects it in a write command.
///
/// Integer registers get the rounded integer. Float registers get the value
/// rounded to `places` decimal places. Values too large to carry that many
/// places in an `f64` are sent unchanged, and negative zero is sent as `0`.
fn format_value(encoded: Encoded, value: f64, places: u8) -> String {
    /// Beyond this magnitude every `f64` is an integer.
    const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0; // 2^53

    match encoded {
        Encoded::Int16(value) => value.to_string(),
        Encoded::Float32(_) => {
            let factor = 10f64.powi(i32::from(places));
            let scaled = value * factor;
            let rounded = if scaled.abs() < EXACT_INTEGER_LIMIT {
                scaled.round() / factor
            } else {
                value
            };
            // -0.0 == 0.0, so this also drops the sign of a negative zero.
            if rounded == 0.0 {
                "0".to_string()
            } else {
                rounded.to_string()
            }
        }
    }
}

impl<B: Backend> Transport for UartTransport<B> {
    fn kind(&self) -> TransportKind {
        TransportKind::Uart
    }

    fn is_connected(&self) -> bool {
        self.backend.is_some()
    }

    fn write_register(&mut self, id: u8, value: f64, options: &WriteOptions) -> Result<(), Error> {
        let encoded = transport::encode_register(id, value)?;
        let line = format!(
            "#W{id},{}\n",
            format_value(encoded, value, options.get_rounding_places())
        );
        self.send_line(&line, Request::WriteRegister(id))?;
        std::thread::sleep(options.get_post_delay());
        Ok(())
    }

    fn read_register(&mut self, id: u8, timeout: Duration) -> Result<f64, Error> {
        register::try_entry(id)?;
        let request = Request::ReadRegister(id);
        self.connected_backend()?.clear_input_buffer()?;
        self.send_line(&format!("#R{id}\n"), request)?;

        let marker = format!("#R{id},");
        self.poll_lines(request, timeout, |line, text| {
            let start = text.find(&marker)? + marker.len();
            let value = text[start..].split(',').next().unwrap_or_default().trim();
            Some(
                value
                    .parse()
                    .map_err(|_| MalformedResponseError::new(request, line.to_vec()).into()),
            )
        })
    }

    fn stream_frame(&mut self, timeout: Duration) -> Result<StreamFrame, Error> {
        self.connected_backend()?.clear_input_buffer()?;
        self.poll_lines(Request::StreamFrame, timeout, |line, text| {
            let start = text.find("#S")? + 2;
            Some(StreamFrame::from_uart_payload(text[start..].trim(), line).map_err(Into::into))
        })
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        if self.backend.take().is_some() {
            log::info!("{} disconnected", self.name);
        }
        self.poison = None;
        Ok(())
    }
}

impl<B: Backend> crate::timeout_guard::Port<B> for UartTransport<B> {
    fn backend_mut(&mut self) -> Option<&mut B> {
        self.backend.as_mut()
    }

    fn poison(&mut self, error: io::Error) {
        self.poison = Some(error);
    }
}

impl<B> fmt::Debug for UartTransport<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UartTransport")
            .field("name", &self.name)
            .field("connected", &self.backend.is_some())
            .field("poison", &self.poison)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::backend::MockOperation;
    use std::sync::{Arc, Mutex};

    const TIMEOUT: Duration = Duration::from_millis(200);

    /// The state of a driver simulated behind a [`Mock`] backend.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct SimulatedDriver {
        /// The value of every register that has been written.
        pub(crate) registers: Arc<Mutex<std::collections::HashMap<u8, f64>>>,
        /// Every write, in order.
        pub(crate) writes: Arc<Mutex<Vec<(u8, f64)>>>,
    }

    impl SimulatedDriver {
        /// Open a UART transport answered by a new simulated driver.
        pub(crate) fn open() -> (UartTransport<Mock>, SimulatedDriver) {
            let driver = SimulatedDriver::default();
            let mut transport = UartTransport::open_mock();
            let state = driver.clone();
            transport
                .get_mut()
                .unwrap()
                .set_responder(move |bytes| state.respond(bytes));
            (transport, driver)
        }

        /// Set a register without recording a write.
        pub(crate) fn set(&self, id: u8, value: f64) {
            self.registers.lock().unwrap().insert(id, value);
        }

        /// All writes so far.
        pub(crate) fn writes(&self) -> Vec<(u8, f64)> {
            self.writes.lock().unwrap().clone()
        }

        fn respond(&self, bytes: &[u8]) -> Option<Vec<u8>> {
            let line = std::str::from_utf8(bytes).ok()?.trim_end();
            if let Some(command) = line.strip_prefix("#W") {
                let (id, value) = command.split_once(',')?;
                let (id, value) = (id.parse().ok()?, value.parse().ok()?);
                self.set(id, value);
                self.writes.lock().unwrap().push((id, value));
                None
            } else if let Some(id) = line.strip_prefix("#R") {
                let id: u8 = id.parse().ok()?;
                let value = self.registers.lock().unwrap().get(&id).copied().unwrap_or(0.);
                Some(format!("#R{id},{value}\r\n").into_bytes())
            } else {
                None
            }
        }
    }

    fn mock(transport: &mut UartTransport<Mock>) -> &mut Mock {
        transport.get_mut().unwrap()
    }

    #[test]
    fn corrupted_lines_are_skipped() {
        let mut transport = UartTransport::open_mock();
        mock(&mut transport).schedule_data(b"#R7,4\xff\xfe2.5\r\n#R7,42.5\r\n");
        let value = transport.read_register(7, TIMEOUT).unwrap();
        assert_eq!(value, 42.5);
        assert_eq!(mock(&mut transport).written(), b"#R7\n");
    }

    #[test]
    fn lines_for_other_requests_are_skipped() {
        let mut transport = UartTransport::open_mock();
        mock(&mut transport).schedule_data(b"#R7\r\n#R17,1.5\r\n#R8,2\r\n#R7, 3 ,extra\r\n");
        assert_eq!(transport.read_register(7, TIMEOUT).unwrap(), 3.);
    }

    #[test]
    fn stale_data_is_flushed_before_reading() {
        let mut transport = UartTransport::open_mock();
        mock(&mut transport).append_data(b"#R7,1.0\r\n");
        mock(&mut transport).schedule_data(b"#R7,2.0\r\n");
        assert_eq!(transport.read_register(7, TIMEOUT).unwrap(), 2.);
    }

    #[test]
    fn unterminated_final_line_is_accepted() {
        let mut transport = UartTransport::open_mock();
        mock(&mut transport).schedule_data(b"#R36,1");
        assert_eq!(transport.read_register(36, TIMEOUT).unwrap(), 1.);
    }

    #[test]
    fn missing_response_times_out() {
        let mut transport = UartTransport::open_mock();
        mock(&mut transport).schedule_data(b"#R8,2\r\n");
        let err = transport.read_register(7, TIMEOUT).unwrap_err();
        assert!(err.is_timeout());
        let err = CommunicationTimeoutError::try_from(err).unwrap();
        assert_eq!(err.request(), Request::ReadRegister(7));
    }

    #[test]
    fn unparsable_value_is_malformed() {
        let mut transport = UartTransport::open_mock();
        mock(&mut transport).schedule_data(b"#R7,abc\r\n");
        let err = transport.read_register(7, TIMEOUT).unwrap_err();
        let err = MalformedResponseError::try_from(err).unwrap();
        assert_eq!(err.as_ref(), b"#R7,abc\r\n");
    }

    #[test]
    fn invalid_registers_are_not_requested() {
        let mut transport = UartTransport::open_mock();
        assert!(matches!(
            transport.read_register(60, TIMEOUT),
            Err(Error::InvalidRegister(_))
        ));
        assert!(matches!(
            transport.write_register(60, 1., &WriteOptions::new()),
            Err(Error::InvalidRegister(_))
        ));
        assert!(mock(&mut transport).written().is_empty());
    }

    #[test]
    fn write_formatting() {
        let mut transport = UartTransport::open_mock();
        let mut options = WriteOptions::new();
        options.post_delay(Duration::ZERO);

        transport
            .write_register(register::SET_VAL, 123.456_78, &options)
            .unwrap();
        transport
            .write_register(register::MANUAL_DRIVE_FREQUENCY, 20999.6, &options)
            .unwrap();
        transport
            .write_register(register::CONTROL_MODE, 1.0, &options)
            .unwrap();
        transport
            .write_register(register::SET_VAL, 2.5, options.rounding_places(0))
            .unwrap();
        assert_eq!(
            mock(&mut transport).written(),
            b"#W23,123.457\n#W35,21000\n#W10,1\n#W23,3\n"
        );

        mock(&mut transport).clear_written();
        options.rounding_places(3);
        for value in [1e20, -0.0001, -0.0] {
            transport
                .write_register(register::SET_VAL, value, &options)
                .unwrap();
        }
        assert_eq!(
            mock(&mut transport).written(),
            b"#W23,100000000000000000000\n#W23,0\n#W23,0\n"
        );

        let err = transport
            .write_register(register::PUMP_ENABLE, 1e6, &options)
            .unwrap_err();
        assert!(matches!(err, Error::ValueOutOfRange(_)));
    }

    #[test]
    fn write_then_read_round_trips() {
        let (mut transport, driver) = SimulatedDriver::open();
        transport
            .write_register(register::SET_VAL, 123.0, &WriteOptions::new())
            .unwrap();
        assert_eq!(transport.read_register(register::SET_VAL, TIMEOUT).unwrap(), 123.0);
        assert_eq!(driver.writes(), [(register::SET_VAL, 123.0)]);
    }

    #[test]
    fn stream_frames() {
        let mut transport = UartTransport::open_mock();
        mock(&mut transport).append_data(b"#S0,0,0,0,0,0,0,0\r\n");
        mock(&mut transport)
            .schedule_data(b"garbage\r\n#S1,12.5,0.25,21000,0,-150.5,3.75,0\r\n");
        let frame = transport.stream_frame(TIMEOUT).unwrap();
        assert!(frame.pump_enabled());
        assert_eq!(frame.frequency(), 21000.);
        assert_eq!(frame.pressure(), -150.5);

        mock(&mut transport).schedule_data(b"#S1,2,3\r\n");
        let err = transport.stream_frame(TIMEOUT).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));

        let err = transport.stream_frame(TIMEOUT).unwrap_err();
        assert_eq!(
            CommunicationTimeoutError::try_from(err).unwrap().request(),
            Request::StreamFrame
        );
    }

    #[test]
    fn link_timeout_is_restored() {
        let mut transport = UartTransport::open_mock();
        mock(&mut transport)
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        mock(&mut transport).schedule_data(b"#R7,1\r\n");
        transport.read_register(7, TIMEOUT).unwrap();
        assert_eq!(
            mock(&mut transport).read_timeout().unwrap(),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut transport = UartTransport::open_mock();
        assert!(transport.is_connected());
        transport.disconnect().unwrap();
        transport.disconnect().unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.read_register(7, TIMEOUT),
            Err(Error::NotConnected(_))
        ));
        assert!(matches!(
            transport.stream_frame(TIMEOUT),
            Err(Error::NotConnected(_))
        ));
    }

    #[test]
    fn io_errors_are_reported() {
        let mut transport = UartTransport::open_mock();
        mock(&mut transport).fail_next(
            MockOperation::Write,
            io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"),
        );
        let err = transport
            .write_register(register::SET_VAL, 1., &WriteOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn failing_to_restore_the_link_timeout_poisons_the_transport() {
        let mut transport = UartTransport::open_mock();
        {
            let mut guard = transport.timeout_guard(Some(TIMEOUT)).unwrap();
            guard
                .get_mut()
                .unwrap()
                .fail_next(MockOperation::SetReadTimeout, io::ErrorKind::Other.into());
        }
        let err = transport
            .write_register(register::SET_VAL, 1., &WriteOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(mock(&mut transport).written().is_empty());

        // The poison is reported once.
        transport
            .write_register(register::SET_VAL, 1., &WriteOptions::new())
            .unwrap();
        assert_eq!(mock(&mut transport).written(), b"#W23,1\n");
    }
}
