//! Types that can exchange (read/write) bytes with a driver over a serial line.
//!
//! The [`Backend`] trait represents all such types.

use std::io;
use std::time::Duration;

use serialport as sp;

#[cfg(windows)]
use sp::COMPort as ExternSerial;
use sp::SerialPort;
#[cfg(unix)]
use sp::TTYPort as ExternSerial;

/// The placeholder name for a backend that doesn't have a name.
pub(crate) const UNKNOWN_BACKEND_NAME: &str = "<unknown backend>";

/// Types that allow reading and writing bytes with a connected driver.
pub trait Backend: io::Read + io::Write + private::Sealed {
    /// Set the read timeout.
    ///
    /// If timeout is `None`, reads will block indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error>;

    /// Get the read timeout.
    ///
    /// If timeout is `None`, reads will block indefinitely.
    fn read_timeout(&self) -> Result<Option<Duration>, io::Error>;

    /// Get the "name" of the backend.
    ///
    /// This can be in any format, but should uniquely identify the backend
    /// instance.
    fn name(&self) -> Option<String>;

    /// Discard any bytes that have been received but not yet read.
    fn clear_input_buffer(&mut self) -> Result<(), io::Error>;
}

impl<C: Backend + ?Sized> Backend for Box<C> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        (**self).set_read_timeout(timeout)
    }
    fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
        (**self).read_timeout()
    }
    fn name(&self) -> Option<String> {
        (**self).name()
    }
    fn clear_input_buffer(&mut self) -> Result<(), io::Error> {
        (**self).clear_input_buffer()
    }
}

impl<C: Backend + ?Sized> Backend for &mut C {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        (**self).set_read_timeout(timeout)
    }
    fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
        (**self).read_timeout()
    }
    fn name(&self) -> Option<String> {
        (**self).name()
    }
    fn clear_input_buffer(&mut self) -> Result<(), io::Error> {
        (**self).clear_input_buffer()
    }
}

/// A platform agnostic serial port backend.
//
// `serialport` exposes `COMPort` on windows and `TTYPort` on unix. Wrapping
// whichever one the platform provides in a newtype keeps consumers free of
// both dynamic dispatch and an extra type parameter.
#[derive(Debug)]
pub struct Serial(pub(crate) ExternSerial);

impl io::Read for Serial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.0, buf)
    }
}

impl io::Write for Serial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut self.0, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.0)
    }
}

impl Backend for Serial {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        // serialport has no infinite timeout; Duration::MAX is close enough.
        Ok(self.0.set_timeout(timeout.unwrap_or(Duration::MAX))?)
    }
    fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
        Ok(Some(self.0.timeout()))
    }
    fn name(&self) -> Option<String> {
        self.0.name()
    }
    fn clear_input_buffer(&mut self) -> Result<(), io::Error> {
        Ok(self.0.clear(sp::ClearBuffer::Input)?)
    }
}

/// A function that answers bytes written to a [`Mock`].
#[cfg(any(test, feature = "mock"))]
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// A mock backend for use in testing.
///
/// It has the following features:
///   * It records all data written to it.
///   * It can be filled with data for reading, either immediately
///     ([`append_data`](Mock::append_data)) or once the input buffer has been
///     cleared ([`schedule_data`](Mock::schedule_data)), which is how a real
///     driver's reply arrives after a request.
///   * A [`Responder`] can produce the reply to each write, simulating a driver.
///   * Any [`MockOperation`] can be made to fail once with
///     [`fail_next`](Mock::fail_next).
///
/// When no data is available, reads fail immediately with a
/// [`TimedOut`](io::ErrorKind::TimedOut) error.
#[cfg(any(test, feature = "mock"))]
pub struct Mock {
    /// The buffer data is read from.
    buffer: io::Cursor<Vec<u8>>,
    /// Data that becomes readable once the input buffer is cleared.
    scheduled: Vec<u8>,
    /// Everything written to the mock.
    written: Vec<u8>,
    /// Produces data in response to writes.
    responder: Option<Responder>,
    /// Pending failures, each surfaced once by the next matching operation.
    failures: Vec<(MockOperation, io::Error)>,
    /// The read timeout, which is ignored.
    ignored_read_timeout: Option<Duration>,
}

#[cfg(any(test, feature = "mock"))]
impl Mock {
    /// Create a new Mock backend.
    pub fn new() -> Self {
        Mock {
            buffer: io::Cursor::new(Vec::new()),
            scheduled: Vec::new(),
            written: Vec::new(),
            responder: None,
            failures: Vec::new(),
            ignored_read_timeout: Some(Duration::ZERO),
        }
    }
    /// Append data to the read buffer.
    ///
    /// The data is not validated in any way. Clearing the input buffer
    /// discards it.
    pub fn append_data<T: AsRef<[u8]>>(&mut self, bytes: T) {
        self.buffer.get_mut().extend_from_slice(bytes.as_ref());
    }
    /// Append data to the read buffer after the next time the input buffer is cleared.
    pub fn schedule_data<T: AsRef<[u8]>>(&mut self, bytes: T) {
        self.scheduled.extend_from_slice(bytes.as_ref());
    }
    /// Set the function that answers every write.
    ///
    /// Whatever it returns is appended to the read buffer.
    pub fn set_responder<F>(&mut self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
    }
    /// Clear the read buffer.
    pub fn clear_buffer(&mut self) {
        self.buffer.get_mut().clear();
        self.buffer.set_position(0);
    }
    /// Whether the mock has any data available or not
    pub fn is_empty(&self) -> bool {
        self.buffer.position() as usize >= self.buffer.get_ref().len()
    }
    /// All bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }
    /// Forget all bytes written so far.
    pub fn clear_written(&mut self) {
        self.written.clear();
    }
    /// Make the next `operation` fail with `err`.
    ///
    /// Several failures can be pending at once. They are surfaced in the
    /// order they were added.
    pub fn fail_next(&mut self, operation: MockOperation, err: io::Error) {
        self.failures.push((operation, err));
    }
    fn take_failure(&mut self, operation: MockOperation) -> Result<(), io::Error> {
        match self.failures.iter().position(|(op, _)| *op == operation) {
            Some(index) => Err(self.failures.remove(index).1),
            None => Ok(()),
        }
    }
}

/// An operation on a [`Mock`] that can be made to fail.
#[cfg(any(test, feature = "mock"))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MockOperation {
    /// `io::Read::read`
    Read,
    /// `io::Write::write`
    Write,
    /// `io::Write::flush`
    Flush,
    /// [`Backend::set_read_timeout`]
    SetReadTimeout,
    /// [`Backend::clear_input_buffer`]
    ClearInputBuffer,
}

#[cfg(any(test, feature = "mock"))]
impl Default for Mock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "mock"))]
impl std::fmt::Debug for Mock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mock")
            .field("buffer", &self.buffer)
            .field("scheduled", &self.scheduled)
            .field("written", &self.written)
            .field("responder", &self.responder.as_ref().map(|_| ".."))
            .field("ignored_read_timeout", &self.ignored_read_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(any(test, feature = "mock"))]
impl Backend for Mock {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        self.take_failure(MockOperation::SetReadTimeout)?;
        self.ignored_read_timeout = timeout;
        Ok(())
    }

    fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
        Ok(self.ignored_read_timeout)
    }

    fn name(&self) -> Option<String> {
        Some(format!("<mock 0x{:x}>", self as *const Mock as usize))
    }

    fn clear_input_buffer(&mut self) -> Result<(), io::Error> {
        self.take_failure(MockOperation::ClearInputBuffer)?;
        self.clear_buffer();
        let scheduled = std::mem::take(&mut self.scheduled);
        self.append_data(scheduled);
        Ok(())
    }
}

#[cfg(any(test, feature = "mock"))]
impl io::Read for Mock {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.take_failure(MockOperation::Read)?;
        if self.is_empty() {
            // A real port would wait for the timeout before failing.
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data from the mock"));
        }
        io::Read::read(&mut self.buffer, buf)
    }
}

#[cfg(any(test, feature = "mock"))]
impl io::Write for Mock {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.take_failure(MockOperation::Write)?;
        self.written.extend_from_slice(buf);
        if let Some(reply) = self.responder.as_mut().and_then(|respond| respond(buf)) {
            self.append_data(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.take_failure(MockOperation::Flush)
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for super::Serial {}
    #[cfg(any(test, feature = "mock"))]
    impl Sealed for super::Mock {}
    impl<C: super::Backend + ?Sized> Sealed for Box<C> {}
    impl<C: super::Backend + ?Sized> Sealed for &mut C {}
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn scheduled_data_arrives_after_clearing_input() {
        let mut mock = Mock::new();
        mock.append_data(b"stale");
        mock.schedule_data(b"fresh");
        mock.clear_input_buffer().unwrap();
        let mut buf = Vec::new();
        let err = mock.read_to_end(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(buf, b"fresh");
    }

    #[test]
    fn responder_answers_writes() {
        let mut mock = Mock::new();
        mock.set_responder(|bytes| (bytes == b"ping").then(|| b"pong".to_vec()));
        mock.write_all(b"ping").unwrap();
        mock.write_all(b"other").unwrap();
        let mut buf = [0; 4];
        mock.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
        assert!(mock.is_empty());
        assert_eq!(mock.written(), b"pingother");
    }

    #[test]
    fn failures_are_surfaced_once_in_order() {
        let mut mock = Mock::new();
        mock.fail_next(MockOperation::Write, io::Error::new(io::ErrorKind::BrokenPipe, "first"));
        mock.fail_next(MockOperation::Flush, io::ErrorKind::Other.into());
        mock.fail_next(MockOperation::Write, io::Error::new(io::ErrorKind::BrokenPipe, "second"));

        assert_eq!(mock.write(b"a").unwrap_err().to_string(), "first");
        assert_eq!(mock.flush().unwrap_err().kind(), io::ErrorKind::Other);
        assert_eq!(mock.write(b"b").unwrap_err().to_string(), "second");
        mock.write_all(b"c").unwrap();
        mock.flush().unwrap();
        assert_eq!(mock.written(), b"c");
    }
}
