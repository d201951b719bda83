//! A "scope guard" that will reset a transport's read timeout when it goes out of scope.

use crate::backend::Backend;
use std::{io, marker::PhantomData, time::Duration};

/// A port, as required by the [`TimeoutGuard`].
pub trait Port<B>: private::Sealed {
    /// Get the underlying backend, if the port is still open.
    #[doc(hidden)]
    fn backend_mut(&mut self) -> Option<&mut B>;
    /// Poison the port.
    #[doc(hidden)]
    fn poison(&mut self, e: io::Error);
}

mod private {
    /// Marks a trait a sealed.
    pub trait Sealed {}
    impl<B> Sealed for crate::uart::UartTransport<B> {}
}

/// A "scope guard" that will update the port's read timeout and then reset it
/// when it goes out of scope.
///
/// To create a guard, use [`UartTransport::timeout_guard`](crate::uart::UartTransport::timeout_guard).
/// The timeout can be changed again while the guard is alive with
/// [`set_timeout`](TimeoutGuard::set_timeout); the original timeout is
/// restored either way.
///
/// While the guard is in scope, the port can only be accessed through the guard.
/// However, because the guard implements [`Deref`](std::ops::Deref) and
/// [`DerefMut`](std::ops::DerefMut) callers can treat the guard as the port.
#[derive(Debug)]
pub struct TimeoutGuard<'a, B: Backend, P: Port<B>> {
    /// The underlying port.
    port: &'a mut P,
    /// The original timeout that will be restored when the guard is dropped.
    original_timeout: Option<Duration>,
    backend_marker: PhantomData<B>,
}

impl<'a, B: Backend, P: Port<B>> TimeoutGuard<'a, B, P> {
    /// Update the port's timeout and return a [`TimeoutGuard`] wrapping the port.
    pub(crate) fn new(port: &'a mut P, timeout: Option<Duration>) -> Result<Self, io::Error> {
        let backend = port.backend_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "the port has been closed")
        })?;
        let original_timeout = backend.read_timeout()?;
        backend.set_read_timeout(timeout)?;
        Ok(TimeoutGuard {
            port,
            original_timeout,
            backend_marker: PhantomData,
        })
    }

    /// Change the port's timeout again without affecting what is restored.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        match self.port.backend_mut() {
            Some(backend) => backend.set_read_timeout(timeout),
            None => Ok(()),
        }
    }
}

impl<'a, B: Backend, P: Port<B>> std::ops::Deref for TimeoutGuard<'a, B, P> {
    type Target = P;
    /// Get a shared reference to the underlying port.
    fn deref(&self) -> &Self::Target {
        self.port
    }
}

impl<'a, B: Backend, P: Port<B>> std::ops::DerefMut for TimeoutGuard<'a, B, P> {
    /// Get an exclusive reference to the underlying port.
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.port
    }
}

impl<'a, B: Backend, P: Port<B>> std::ops::Drop for TimeoutGuard<'a, B, P> {
    fn drop(&mut self) {
        let Some(backend) = self.port.backend_mut() else {
            return;
        };
        if let Err(err) = backend.set_read_timeout(self.original_timeout) {
            let message = match self.original_timeout {
                Some(timeout) => format!(
                    "failed to restore the {} ms read timeout: {err}",
                    timeout.as_millis()
                ),
                None => format!("failed to restore an infinite read timeout: {err}"),
            };
            log::warn!("{message}");
            self.port.poison(io::Error::new(io::ErrorKind::Other, message));
        }
    }
}
