//! Register access over a shared I2C bus.
//!
//! Every transaction is a fixed little-endian binary layout:
//!
//! * a write sends the register id followed by the 2 or 4 byte value,
//! * a read sends the register id with the high bit set (`id + 128`) and then
//!   reads the 2 or 4 byte value back,
//! * a stream frame is a single 28 byte read (see [`StreamFrame::from_i2c_bytes`]).
//!
//! Several pumps usually share one bus. Each bus is represented by one
//! [`SharedBus`], which every [`I2cTransport`] on it holds on to:
//!
//! ```rust,no_run
//! # use discpump::{i2c::{BusRegistry, I2cTransport}, register, transport::Transport};
//! # use std::time::Duration;
//! # fn wrapper() -> Result<(), discpump::error::Error> {
//! let registry = BusRegistry::new();
//! let bus = registry.linux("/dev/i2c-1");
//! let mut first = I2cTransport::connect(bus.clone(), 0x25)?;
//! let mut second = I2cTransport::connect(bus, 0x26)?;
//! let pressure = first.read_register(register::MEAS_DIGITAL_PRESSURE, Duration::from_secs(1))?;
//! # Ok(())
//! # }
//! ```

mod bus;

pub use bus::{Bus, BusRegistry, HalBus, SharedBus};

use crate::{
    error::{Error, NotConnectedError, Request},
    register,
    stream::{StreamFrame, I2C_FRAME_SIZE},
    transport::{self, Transport, TransportKind, WriteOptions},
};
use std::{sync::Arc, time::Duration};

/// The bit that marks a register id as a read request.
const READ_REQUEST_FLAG: u8 = 0x80;

/// A [`Transport`] that talks to one driver on a [`SharedBus`].
///
/// Connecting claims the driver's address on the bus. The address is released
/// by [`disconnect`](Transport::disconnect), or when the transport is dropped.
#[derive(Debug)]
pub struct I2cTransport {
    /// The bus, until disconnected.
    bus: Option<Arc<SharedBus>>,
    /// The address of the driver.
    address: u8,
}

impl I2cTransport {
    /// Connect to the driver at `address` on `bus`.
    ///
    /// The bus handle is opened if no other driver on it is connected. Only
    /// one transport can be connected to an address at a time; connecting to
    /// an address that is already in use fails with an
    /// [`AddressInUseError`](crate::error::AddressInUseError).
    pub fn connect(bus: Arc<SharedBus>, address: u8) -> Result<Self, Error> {
        bus.acquire(address)?;
        log::info!("connected to address {address} on I2C bus {}", bus.identity());
        Ok(I2cTransport {
            bus: Some(bus),
            address,
        })
    }

    /// The address of the driver.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The bus the transport is connected on, if it is still connected.
    pub fn bus(&self) -> Option<&Arc<SharedBus>> {
        self.bus.as_ref()
    }

    /// Run `f` with exclusive access to the bus, naming `request` in timeouts.
    fn transact<T>(
        &self,
        request: Request,
        f: impl FnOnce(&mut (dyn Bus + Send), u8) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let address = self.address;
        let bus = self.bus.as_ref().ok_or(NotConnectedError)?;
        bus.with_handle(|handle| f(handle, address))
            .map_err(|e| e.with_timeout_context(request))
    }
}

impl Transport for I2cTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::I2c
    }

    fn is_connected(&self) -> bool {
        self.bus.is_some()
    }

    fn write_register(&mut self, id: u8, value: f64, options: &WriteOptions) -> Result<(), Error> {
        let encoded = transport::encode_register(id, value)?;
        let mut bytes = Vec::with_capacity(5);
        bytes.push(id);
        encoded.extend_le_bytes(&mut bytes);

        self.transact(Request::WriteRegister(id), |bus, address| {
            log::debug!(
                "{} TX:   {address:#04x} {bytes:02x?}",
                bus.name().unwrap_or_default()
            );
            bus.write(address, &bytes)
        })?;
        std::thread::sleep(options.get_post_delay());
        Ok(())
    }

    fn read_register(&mut self, id: u8, timeout: Duration) -> Result<f64, Error> {
        let kind = register::try_entry(id)?.kind();
        let size = kind.size();
        let mut buffer = [0u8; 4];

        self.transact(Request::ReadRegister(id), |bus, address| {
            let name = bus.name().unwrap_or_default();
            let request = [id | READ_REQUEST_FLAG];
            log::debug!("{name} TX:   {address:#04x} {request:02x?}");
            bus.write(address, &request)?;
            bus.read(address, &mut buffer[..size], timeout)?;
            log::debug!("{name} RECV: {address:#04x} {:02x?}", &buffer[..size]);
            Ok(())
        })?;
        // The buffer is always large enough for the kind.
        Ok(kind.decode(&buffer).unwrap_or_default())
    }

    fn stream_frame(&mut self, timeout: Duration) -> Result<StreamFrame, Error> {
        let mut buffer = [0u8; I2C_FRAME_SIZE];
        self.transact(Request::StreamFrame, |bus, address| {
            bus.read(address, &mut buffer, timeout)?;
            log::debug!(
                "{} RECV: {address:#04x} {buffer:02x?}",
                bus.name().unwrap_or_default()
            );
            Ok(())
        })?;
        Ok(StreamFrame::from_i2c_bytes(&buffer)?)
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        if let Some(bus) = self.bus.take() {
            bus.release(self.address);
            log::info!(
                "disconnected from address {} on I2C bus {}",
                self.address,
                bus.identity()
            );
        }
        Ok(())
    }
}

impl Drop for I2cTransport {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.take() {
            bus.release(self.address);
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    pub(crate) use super::bus::test::SimulatedBus;
    use super::*;
    use crate::error::{AddressInUseError, CommunicationTimeoutError, I2cBusError};

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn no_delay() -> WriteOptions {
        let mut options = WriteOptions::new();
        options.post_delay(Duration::ZERO);
        options
    }

    #[test]
    fn write_then_read_round_trips() {
        let sim = SimulatedBus::with_targets(&[37]);
        let mut transport = I2cTransport::connect(sim.shared(), 37).unwrap();
        transport
            .write_register(register::SET_VAL, 123.0, &no_delay())
            .unwrap();
        let value = transport.read_register(register::SET_VAL, TIMEOUT).unwrap();
        assert_eq!(value, 123.0);
        assert_eq!(
            sim.writes(),
            [
                (37, vec![23, 0x00, 0x00, 0xf6, 0x42]),
                (37, vec![23 + 128]),
            ]
        );
    }

    #[test]
    fn integer_registers_use_two_bytes() {
        let sim = SimulatedBus::with_targets(&[37]);
        let mut transport = I2cTransport::connect(sim.shared(), 37).unwrap();
        transport
            .write_register(register::MANUAL_DRIVE_FREQUENCY, 20999.6, &no_delay())
            .unwrap();
        assert_eq!(sim.writes(), [(37, vec![35, 0x08, 0x52])]);

        sim.set_register(37, register::DEVICE_TYPE, vec![3, 0]);
        assert_eq!(
            transport.read_register(register::DEVICE_TYPE, TIMEOUT).unwrap(),
            3.0
        );
    }

    #[test]
    fn stream_frames() {
        let sim = SimulatedBus::with_targets(&[37]);
        sim.set_frame(37, crate::stream::test::i2c_frame_bytes());
        let mut transport = I2cTransport::connect(sim.shared(), 37).unwrap();
        let frame = transport.stream_frame(TIMEOUT).unwrap();
        assert!(frame.pump_enabled());
        assert_eq!(frame.voltage(), 12.5);
        assert_eq!(frame.frequency(), 21000.);
        assert_eq!(frame.ana_c(), 3.75);
    }

    #[test]
    fn unanswered_reads_time_out() {
        let sim = SimulatedBus::with_targets(&[37]);
        let mut transport = I2cTransport::connect(sim.shared(), 37).unwrap();
        let err = transport.stream_frame(TIMEOUT).unwrap_err();
        let err = CommunicationTimeoutError::try_from(err).unwrap();
        assert_eq!(err.request(), Request::StreamFrame);
    }

    #[test]
    fn missing_targets_report_bus_errors() {
        let sim = SimulatedBus::with_targets(&[37]);
        let mut transport = I2cTransport::connect(sim.shared(), 38).unwrap();
        let err = transport
            .read_register(register::SET_VAL, TIMEOUT)
            .unwrap_err();
        assert_eq!(I2cBusError::try_from(err).unwrap().address(), 38);
    }

    #[test]
    fn bus_is_closed_after_the_last_disconnect_and_reopened() {
        let sim = SimulatedBus::with_targets(&[37, 38, 39]);
        let bus = sim.shared();
        let mut first = I2cTransport::connect(Arc::clone(&bus), 37).unwrap();
        let mut second = I2cTransport::connect(Arc::clone(&bus), 38).unwrap();
        assert!(bus.is_open());
        assert_eq!(sim.opened(), 1);

        first.disconnect().unwrap();
        assert!(bus.is_open());
        second.disconnect().unwrap();
        assert!(!bus.is_open());
        assert_eq!(sim.closed(), 1);

        let _third = I2cTransport::connect(Arc::clone(&bus), 39).unwrap();
        assert!(bus.is_open());
        assert_eq!(sim.opened(), 2);
    }

    #[test]
    fn addresses_are_exclusive() {
        let sim = SimulatedBus::with_targets(&[37]);
        let bus = sim.shared();
        let mut first = I2cTransport::connect(Arc::clone(&bus), 37).unwrap();
        let err = I2cTransport::connect(Arc::clone(&bus), 37).unwrap_err();
        assert_eq!(AddressInUseError::try_from(err).unwrap().address(), 37);

        first.disconnect().unwrap();
        assert!(I2cTransport::connect(bus, 37).is_ok());
    }

    #[test]
    fn dropping_releases_the_address() {
        let sim = SimulatedBus::with_targets(&[37]);
        let bus = sim.shared();
        {
            let _transport = I2cTransport::connect(Arc::clone(&bus), 37).unwrap();
            assert_eq!(bus.addresses(), [37]);
        }
        assert!(bus.addresses().is_empty());
        assert!(!bus.is_open());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let sim = SimulatedBus::with_targets(&[37]);
        let mut transport = I2cTransport::connect(sim.shared(), 37).unwrap();
        transport.disconnect().unwrap();
        transport.disconnect().unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.read_register(register::SET_VAL, TIMEOUT),
            Err(Error::NotConnected(_))
        ));
        assert!(sim.writes().is_empty());
    }
}
