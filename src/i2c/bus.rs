//! I2C buses and the reference-counted handle shared by every pump on a bus.

use crate::error::{AddressInUseError, Error, I2cBusError, NotConnectedError};
use std::{
    collections::{BTreeSet, HashMap},
    fmt, io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// An open I2C bus that can exchange bytes with targets.
///
/// Implement this to drive pumps through an I2C adapter this crate does not
/// support directly. [`HalBus`] implements it for any `embedded-hal` I2C bus.
pub trait Bus {
    /// Write `bytes` to the target at `address` in one transaction.
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Error>;

    /// Fill `buffer` from the target at `address` in one transaction.
    ///
    /// A read that does not complete within `timeout` fails with a timeout
    /// error (see [`Error::is_timeout`]).
    fn read(&mut self, address: u8, buffer: &mut [u8], timeout: Duration) -> Result<(), Error>;

    /// Get the "name" of the bus, for logging.
    fn name(&self) -> Option<String> {
        None
    }
}

impl<T: Bus + ?Sized> Bus for Box<T> {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Error> {
        (**self).write(address, bytes)
    }
    fn read(&mut self, address: u8, buffer: &mut [u8], timeout: Duration) -> Result<(), Error> {
        (**self).read(address, buffer, timeout)
    }
    fn name(&self) -> Option<String> {
        (**self).name()
    }
}

/// A [`Bus`] backed by an [`embedded_hal::i2c::I2c`] implementation.
///
/// `embedded-hal` has no notion of timeouts. A read that takes longer than its
/// timeout still completes but is then reported as timed out.
#[derive(Debug)]
pub struct HalBus<I> {
    /// The HAL bus.
    i2c: I,
    /// The name of the bus, for logging.
    name: Option<String>,
}

impl<I: embedded_hal::i2c::I2c> HalBus<I> {
    /// Wrap a HAL bus.
    pub fn new(i2c: I) -> Self {
        HalBus { i2c, name: None }
    }

    /// Wrap a HAL bus and give it a name.
    pub fn with_name<S: Into<String>>(i2c: I, name: S) -> Self {
        HalBus {
            i2c,
            name: Some(name.into()),
        }
    }

    /// Unwrap the HAL bus.
    pub fn into_inner(self) -> I {
        self.i2c
    }
}

/// Convert an `embedded-hal` error into an [`I2cBusError`].
fn hal_error<E: embedded_hal::i2c::Error>(address: u8, error: &E) -> Error {
    I2cBusError::new(address, error.kind(), format!("{error:?}")).into()
}

impl<I: embedded_hal::i2c::I2c> Bus for HalBus<I> {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Error> {
        embedded_hal::i2c::I2c::write(&mut self.i2c, address, bytes)
            .map_err(|e| hal_error(address, &e))
    }

    fn read(&mut self, address: u8, buffer: &mut [u8], timeout: Duration) -> Result<(), Error> {
        let start = Instant::now();
        embedded_hal::i2c::I2c::read(&mut self.i2c, address, buffer)
            .map_err(|e| hal_error(address, &e))?;
        if start.elapsed() > timeout {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("I2C read from address {address} took longer than {timeout:?}"),
            )
            .into());
        }
        Ok(())
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }
}

/// Opens the underlying bus handle of a [`SharedBus`].
type Opener = Box<dyn FnMut() -> Result<Box<dyn Bus + Send>, Error> + Send>;

/// The mutable state of a [`SharedBus`].
struct State {
    /// Opens the bus handle.
    opener: Opener,
    /// The open bus handle, while any address is connected.
    handle: Option<Box<dyn Bus + Send>>,
    /// The connected addresses.
    addresses: BTreeSet<u8>,
}

/// One physical I2C bus, shared by every pump connected on it.
///
/// The bus handle is opened when the first address is acquired and closed
/// again when the last address is released. Each acquired address belongs to
/// exactly one [`I2cTransport`](crate::i2c::I2cTransport) at a time.
///
/// All access goes through an internal lock, so a request and its response
/// from one pump are never interleaved with another pump's transactions.
pub struct SharedBus {
    /// The identity of the bus (for instance, its device path).
    identity: String,
    /// The shared state.
    state: Mutex<State>,
}

impl SharedBus {
    /// Create a shared bus that opens its handle with `opener`.
    ///
    /// The bus starts closed. `opener` is called every time the first
    /// address is acquired.
    pub fn new<S, F>(identity: S, opener: F) -> SharedBus
    where
        S: Into<String>,
        F: FnMut() -> Result<Box<dyn Bus + Send>, Error> + Send + 'static,
    {
        SharedBus {
            identity: identity.into(),
            state: Mutex::new(State {
                opener: Box::new(opener),
                handle: None,
                addresses: BTreeSet::new(),
            }),
        }
    }

    /// Create a shared bus for a Linux I2C character device, such as `/dev/i2c-1`.
    #[cfg(all(target_os = "linux", feature = "linux-i2c"))]
    #[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(all(target_os = "linux", feature = "linux-i2c"))))]
    pub fn linux<S: Into<String>>(path: S) -> SharedBus {
        let path = path.into();
        let opener_path = path.clone();
        SharedBus::new(path, move || {
            let i2c = linux_embedded_hal::I2cdev::new(&opener_path).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("cannot open I2C bus {opener_path}: {e}"),
                )
            })?;
            Ok(Box::new(HalBus::with_name(i2c, opener_path.clone())) as Box<dyn Bus + Send>)
        })
    }

    /// The identity of the bus.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Whether the bus handle is currently open.
    pub fn is_open(&self) -> bool {
        self.lock().handle.is_some()
    }

    /// The addresses currently connected, in ascending order.
    pub fn addresses(&self) -> Vec<u8> {
        self.lock().addresses.iter().copied().collect()
    }

    /// Lock the state. A panic while holding the lock cannot leave the
    /// address set inconsistent, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `address` to the connected set, opening the handle if necessary.
    pub(crate) fn acquire(&self, address: u8) -> Result<(), Error> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.addresses.contains(&address) {
            return Err(AddressInUseError::new(address, self.identity.as_str()).into());
        }
        if state.handle.is_none() {
            let handle = (state.opener)()?;
            log::info!("opened I2C bus {}", self.identity);
            state.handle = Some(handle);
        }
        state.addresses.insert(address);
        Ok(())
    }

    /// Remove `address` from the connected set, closing the handle if it was the last one.
    pub(crate) fn release(&self, address: u8) {
        let mut state = self.lock();
        if state.addresses.remove(&address) && state.addresses.is_empty() {
            state.handle = None;
            log::info!("closed I2C bus {}", self.identity);
        }
    }

    /// Run `f` with exclusive access to the open bus handle.
    pub(crate) fn with_handle<T>(
        &self,
        f: impl FnOnce(&mut (dyn Bus + Send)) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut state = self.lock();
        match state.handle.as_mut() {
            Some(handle) => f(handle.as_mut()),
            None => Err(NotConnectedError.into()),
        }
    }
}

impl fmt::Debug for SharedBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SharedBus")
            .field("identity", &self.identity)
            .field("open", &state.handle.is_some())
            .field("addresses", &state.addresses)
            .finish_non_exhaustive()
    }
}

/// The shared buses of a process, keyed by identity.
///
/// Pumps connected through the same registry with the same bus identity share
/// one [`SharedBus`].
#[derive(Debug, Default)]
pub struct BusRegistry {
    /// The known buses.
    buses: Mutex<HashMap<String, Arc<SharedBus>>>,
}

impl BusRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        BusRegistry::default()
    }

    /// Get the bus with the given identity, creating it with `create` if it
    /// isn't known yet.
    ///
    /// `create` should return a bus whose [`identity`](SharedBus::identity) is `identity`.
    pub fn get_or_insert_with<F>(&self, identity: &str, create: F) -> Arc<SharedBus>
    where
        F: FnOnce() -> SharedBus,
    {
        let mut buses = self.buses.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            buses
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(create())),
        )
    }

    /// Get the bus for a Linux I2C character device, such as `/dev/i2c-1`.
    #[cfg(all(target_os = "linux", feature = "linux-i2c"))]
    #[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(all(target_os = "linux", feature = "linux-i2c"))))]
    pub fn linux(&self, path: &str) -> Arc<SharedBus> {
        self.get_or_insert_with(path, || SharedBus::linux(path))
    }

    /// Get the bus with the given identity, if it is known.
    pub fn get(&self, identity: &str) -> Option<Arc<SharedBus>> {
        self.buses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource, Operation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A register map behind one simulated I2C target.
    #[derive(Debug, Default)]
    struct Target {
        /// Raw register contents.
        registers: HashMap<u8, Vec<u8>>,
        /// The register requested by the last read request, if any.
        requested: Option<u8>,
        /// What a read without a request returns.
        frame: Vec<u8>,
    }

    /// Simulated driver boards on an I2C bus.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct SimulatedBus {
        targets: Arc<Mutex<HashMap<u8, Target>>>,
        /// Every write transaction, in order.
        writes: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl SimulatedBus {
        /// Simulate drivers at the given addresses.
        pub(crate) fn with_targets(addresses: &[u8]) -> Self {
            let bus = SimulatedBus::default();
            for address in addresses {
                bus.targets.lock().unwrap().insert(*address, Target::default());
            }
            bus
        }

        /// A shared bus that opens handles onto this simulation.
        pub(crate) fn shared(&self) -> Arc<SharedBus> {
            let sim = self.clone();
            Arc::new(SharedBus::new("sim", move || {
                sim.opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(Handle(sim.clone())) as Box<dyn Bus + Send>)
            }))
        }

        /// Set the frame returned by reads that don't follow a read request.
        pub(crate) fn set_frame(&self, address: u8, frame: Vec<u8>) {
            self.targets.lock().unwrap().get_mut(&address).unwrap().frame = frame;
        }

        /// Set the raw contents of a register.
        pub(crate) fn set_register(&self, address: u8, id: u8, bytes: Vec<u8>) {
            self.targets
                .lock()
                .unwrap()
                .get_mut(&address)
                .unwrap()
                .registers
                .insert(id, bytes);
        }

        /// All write transactions so far.
        pub(crate) fn writes(&self) -> Vec<(u8, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }

        pub(crate) fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub(crate) fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn nack(address: u8) -> Error {
        I2cBusError::new(
            address,
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            "no target",
        )
        .into()
    }

    /// An open handle onto a [`SimulatedBus`].
    struct Handle(SimulatedBus);

    impl Bus for Handle {
        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Error> {
            let mut targets = self.0.targets.lock().unwrap();
            let target = targets.get_mut(&address).ok_or_else(|| nack(address))?;
            self.0.writes.lock().unwrap().push((address, bytes.to_vec()));
            match bytes.split_first() {
                Some((&id, [])) if id >= 128 => target.requested = Some(id - 128),
                Some((&id, value)) => {
                    target.registers.insert(id, value.to_vec());
                }
                None => {}
            }
            Ok(())
        }

        fn read(&mut self, address: u8, buffer: &mut [u8], _: Duration) -> Result<(), Error> {
            let mut targets = self.0.targets.lock().unwrap();
            let target = targets.get_mut(&address).ok_or_else(|| nack(address))?;
            let source = match target.requested.take() {
                Some(id) => target.registers.get(&id).cloned().unwrap_or_default(),
                None => target.frame.clone(),
            };
            if source.len() < buffer.len() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "target did not answer").into());
            }
            buffer.copy_from_slice(&source[..buffer.len()]);
            Ok(())
        }

        fn name(&self) -> Option<String> {
            Some("sim".to_string())
        }
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            self.0.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn handle_is_opened_on_first_acquire_and_closed_on_last_release() {
        let sim = SimulatedBus::default();
        let bus = sim.shared();
        assert!(!bus.is_open());
        bus.acquire(37).unwrap();
        bus.acquire(38).unwrap();
        assert!(bus.is_open());
        assert_eq!(bus.addresses(), [37, 38]);
        assert_eq!(sim.opened(), 1);

        bus.release(37);
        assert!(bus.is_open());
        bus.release(38);
        assert!(!bus.is_open());
        assert_eq!(sim.closed(), 1);

        // Releasing an unknown address changes nothing.
        bus.release(38);
        assert_eq!(sim.closed(), 1);
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let bus = SimulatedBus::default().shared();
        bus.acquire(37).unwrap();
        let err = bus.acquire(37).unwrap_err();
        let err = AddressInUseError::try_from(err).unwrap();
        assert_eq!(err.address(), 37);
        assert_eq!(bus.addresses(), [37]);
    }

    #[test]
    fn failed_open_leaves_the_bus_closed() {
        let bus = SharedBus::new("broken", || {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such bus").into())
        });
        assert!(matches!(bus.acquire(37), Err(Error::Io(_))));
        assert!(!bus.is_open());
        assert!(bus.addresses().is_empty());
    }

    #[test]
    fn registry_shares_buses_by_identity() {
        let registry = BusRegistry::new();
        let sim = SimulatedBus::default();
        let first = registry.get_or_insert_with("sim", || {
            Arc::try_unwrap(sim.shared()).unwrap()
        });
        let second = registry.get_or_insert_with("sim", || unreachable!());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.get("other").is_none());
        assert_eq!(registry.get("sim").unwrap().identity(), "sim");
    }

    /// An `embedded-hal` bus on which nothing answers.
    struct Silent;

    impl embedded_hal::i2c::ErrorType for Silent {
        type Error = ErrorKind;
    }

    impl embedded_hal::i2c::I2c for Silent {
        fn transaction(
            &mut self,
            _address: u8,
            _operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
        }
    }

    #[test]
    fn hal_errors_are_converted() {
        let mut bus = HalBus::with_name(Silent, "silent");
        assert_eq!(bus.name().as_deref(), Some("silent"));
        let err = bus.write(37, &[0]).unwrap_err();
        let err = I2cBusError::try_from(err).unwrap();
        assert_eq!(err.address(), 37);
        assert_eq!(
            err.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        );
        let mut buffer = [0; 2];
        assert!(matches!(
            bus.read(37, &mut buffer, Duration::from_secs(1)),
            Err(Error::I2cBus(_))
        ));
    }

    /// An `embedded-hal` bus that answers every read with `0xaa`, slowly.
    struct Sluggish(Duration);

    impl embedded_hal::i2c::ErrorType for Sluggish {
        type Error = ErrorKind;
    }

    impl embedded_hal::i2c::I2c for Sluggish {
        fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            std::thread::sleep(self.0);
            for operation in operations {
                if let Operation::Read(buffer) = operation {
                    buffer.fill(0xaa);
                }
            }
            Ok(())
        }
    }

    #[test]
    fn slow_hal_reads_complete_then_time_out() {
        let mut bus = HalBus::new(Sluggish(Duration::from_millis(30)));
        let mut buffer = [0; 2];
        let start = Instant::now();
        let err = bus
            .read(37, &mut buffer, Duration::from_millis(5))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(buffer, [0xaa, 0xaa]);

        bus.read(37, &mut buffer, Duration::from_secs(1)).unwrap();
    }
}
