//! The pump client: one driver board, over whichever transport it is connected with.

use crate::{
    error::{ConfigurationError, Error, NotConnectedError},
    i2c::{I2cTransport, SharedBus},
    register::{
        self, ControlMode, ControlSource, DeviceType, GpioPin, GpioPinMode, GpioState, StreamMode,
        CommunicationInterface,
    },
    stream::StreamFrame,
    transport::{Transport, TransportKind, WriteOptions, DEFAULT_READ_TIMEOUT},
    uart::OpenSerialOptions,
};
use std::{sync::Arc, time::Duration};

/// How long the driver needs to commit its settings to flash.
const PERSIST_SETTLE_TIME: Duration = Duration::from_secs(1);

/// The maximum value of each status LED colour channel.
const LED_CHANNEL_MAX: i32 = 31;

/// Where to find the pump.
///
/// Exactly one endpoint must be configured: a serial port or an address on
/// an I2C bus.
///
/// ## Example
///
/// ```rust,no_run
/// # use discpump::{ConnectOptions, PumpClient, uart::OpenSerialOptions};
/// # use std::time::Duration;
/// # fn wrapper() -> Result<(), discpump::error::Error> {
/// let mut serial = OpenSerialOptions::new();
/// serial.timeout(Some(Duration::from_secs(1)));
///
/// let mut pump = PumpClient::new();
/// pump.connect(ConnectOptions::new().serial_port("/dev/ttyUSB0").serial_options(serial))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// The path of the serial port, for UART.
    serial_port: Option<String>,
    /// How to open the serial port.
    serial_options: OpenSerialOptions,
    /// The bus and address, for I2C.
    i2c: Option<(Arc<SharedBus>, u8)>,
}

impl ConnectOptions {
    /// Create options with no endpoint.
    pub fn new() -> Self {
        ConnectOptions::default()
    }

    /// Connect over UART through the serial port at `path`.
    pub fn serial_port<S: Into<String>>(&mut self, path: S) -> &mut Self {
        self.serial_port = Some(path.into());
        self
    }

    /// Set how the serial port is opened.
    pub fn serial_options(&mut self, options: OpenSerialOptions) -> &mut Self {
        self.serial_options = options;
        self
    }

    /// Connect over I2C to the driver at `address` on `bus`.
    ///
    /// I2C reads through [`HalBus`](crate::i2c::HalBus) cannot be interrupted.
    /// A read timeout is only detected once the read returns, so the bus
    /// adapter's own timeout (the kernel's, for `/dev/i2c-N`) is what bounds a
    /// hung read.
    pub fn i2c(&mut self, bus: Arc<SharedBus>, address: u8) -> &mut Self {
        self.i2c = Some((bus, address));
        self
    }
}

/// The gains of the PID controller.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PidCoefficients {
    /// The proportional gain.
    pub proportional: f64,
    /// The integral gain.
    pub integral: f64,
    /// The differential gain.
    pub differential: f64,
}

impl PidCoefficients {
    /// Create a set of gains.
    pub const fn new(proportional: f64, integral: f64, differential: f64) -> Self {
        PidCoefficients {
            proportional,
            integral,
            differential,
        }
    }
}

impl Default for PidCoefficients {
    /// The factory gains: `P = 5`, `I = 10`, `D = 0`.
    fn default() -> Self {
        PidCoefficients::new(5., 10., 0.)
    }
}

/// The configuration of bang-bang control.
///
/// While the measurement is below the lower threshold the pump runs at the
/// lower power, and above the upper threshold at the upper power.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BangBangSettings {
    /// The measurement compared against the thresholds.
    pub source: ControlSource,
    /// The lower threshold.
    pub lower_threshold: f64,
    /// The upper threshold.
    pub upper_threshold: f64,
    /// The power below the lower threshold, in milliwatts.
    pub lower_power_mw: f64,
    /// The power above the upper threshold, in milliwatts.
    pub upper_power_mw: f64,
}

impl Default for BangBangSettings {
    /// The factory settings: digital pressure between 10 and 50, at 1000 mW and 0 mW.
    fn default() -> Self {
        BangBangSettings {
            source: ControlSource::DigitalPressure,
            lower_threshold: 10.,
            upper_threshold: 50.,
            lower_power_mw: 1000.,
            upper_power_mw: 0.,
        }
    }
}

/// A client for one disc pump driver board.
///
/// A client starts disconnected. [`connect`](PumpClient::connect) opens a
/// UART or I2C [`Transport`], which every other method then goes through.
/// Calls made while disconnected fail with a [`NotConnectedError`].
///
/// Operations that write several registers (e.g.,
/// [`set_pid_control`](PumpClient::set_pid_control) or
/// [`restore_defaults`](PumpClient::restore_defaults)) are not atomic. If one
/// write fails, the registers written before it keep their new values. Read a
/// register back to confirm a multi-register change took effect.
///
/// ## Example
///
/// ```rust,no_run
/// # use discpump::{ConnectOptions, PumpClient, register};
/// # fn wrapper() -> Result<(), discpump::error::Error> {
/// let mut pump = PumpClient::new();
/// pump.connect(ConnectOptions::new().serial_port("/dev/ttyUSB0"))?;
/// pump.set_manual_power_control()?;
/// pump.write_register(register::SET_VAL, 1000.)?;
/// pump.set_pump_enabled(true)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct PumpClient {
    /// The transport, while connected.
    transport: Option<Box<dyn Transport + Send>>,
}

impl PumpClient {
    /// The I2C address SPMs use unless configured otherwise.
    pub const DEFAULT_SPM_I2C_ADDRESS: u8 = 37;

    /// Create a disconnected client.
    pub fn new() -> Self {
        PumpClient::default()
    }

    /// Connect to the pump.
    ///
    /// Fails with a [`ConfigurationError`] unless exactly one endpoint is
    /// configured in `options`, or if the client is already connected.
    pub fn connect(&mut self, options: &ConnectOptions) -> Result<(), Error> {
        self.check_disconnected()?;
        let transport: Box<dyn Transport + Send> = match (&options.serial_port, &options.i2c) {
            (Some(path), None) => Box::new(options.serial_options.open(path)?),
            (None, Some((bus, address))) => Box::new(I2cTransport::connect(Arc::clone(bus), *address)?),
            (Some(_), Some(_)) => {
                return Err(ConfigurationError::new(
                    "both a serial port and an I2C address were specified",
                )
                .into())
            }
            (None, None) => {
                return Err(ConfigurationError::new(
                    "either a serial port or an I2C address must be specified",
                )
                .into())
            }
        };
        self.transport = Some(transport);
        Ok(())
    }

    /// Connect to the pump through an already connected transport.
    ///
    /// Fails with a [`ConfigurationError`] if the client is already connected.
    pub fn connect_transport(&mut self, transport: Box<dyn Transport + Send>) -> Result<(), Error> {
        self.check_disconnected()?;
        if !transport.is_connected() {
            return Err(NotConnectedError.into());
        }
        self.transport = Some(transport);
        Ok(())
    }

    fn check_disconnected(&self) -> Result<(), ConfigurationError> {
        if self.is_connected() {
            Err(ConfigurationError::new(
                "the client is already connected; disconnect first",
            ))
        } else {
            Ok(())
        }
    }

    /// Whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|transport| transport.is_connected())
    }

    /// The kind of transport the client is connected with, if any.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(|transport| transport.kind())
    }

    /// Get the transport, or an error if the client is disconnected.
    fn transport(&mut self) -> Result<&mut Box<dyn Transport + Send>, Error> {
        self.transport
            .as_mut()
            .ok_or_else(|| NotConnectedError.into())
    }

    /// Disconnect from the pump.
    ///
    /// Calling this on a disconnected client does nothing.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        match self.transport.take() {
            Some(mut transport) => transport.disconnect(),
            None => Ok(()),
        }
    }

    /// Write a register with the default [`WriteOptions`].
    pub fn write_register(&mut self, id: u8, value: f64) -> Result<(), Error> {
        self.write_register_with(id, value, &WriteOptions::new())
    }

    /// Write a register.
    pub fn write_register_with(
        &mut self,
        id: u8,
        value: f64,
        options: &WriteOptions,
    ) -> Result<(), Error> {
        self.transport()?.write_register(id, value, options)
    }

    /// Read a register, waiting up to one second for the value.
    pub fn read_register(&mut self, id: u8) -> Result<f64, Error> {
        self.read_register_timeout(id, DEFAULT_READ_TIMEOUT)
    }

    /// Read a register, waiting up to `timeout` for the value.
    pub fn read_register_timeout(&mut self, id: u8, timeout: Duration) -> Result<f64, Error> {
        self.transport()?.read_register(id, timeout)
    }

    /// Make the driver stream telemetry frames over the current transport.
    pub fn enable_streaming(&mut self) -> Result<(), Error> {
        let mode = match self.transport()?.kind() {
            TransportKind::Uart => StreamMode::StreamingUart,
            TransportKind::I2c => StreamMode::StreamingI2c,
        };
        self.write_register(register::STREAM_MODE, mode.into())
    }

    /// Stop the driver from streaming telemetry frames.
    pub fn disable_streaming(&mut self) -> Result<(), Error> {
        self.write_register(register::STREAM_MODE, StreamMode::Disabled.into())
    }

    /// Read one telemetry frame, waiting up to one second for it.
    ///
    /// Streaming must be enabled first (see [`enable_streaming`](PumpClient::enable_streaming)).
    pub fn stream_frame(&mut self) -> Result<StreamFrame, Error> {
        self.stream_frame_timeout(DEFAULT_READ_TIMEOUT)
    }

    /// Read one telemetry frame, waiting up to `timeout` for it.
    pub fn stream_frame_timeout(&mut self, timeout: Duration) -> Result<StreamFrame, Error> {
        self.transport()?.stream_frame(timeout)
    }

    /// Turn the pump on or off.
    pub fn set_pump_enabled(&mut self, enabled: bool) -> Result<(), Error> {
        self.write_register(register::PUMP_ENABLE, if enabled { 1. } else { 0. })
    }

    /// Drive the pump at the power (in milliwatts) in the Set Val register.
    pub fn set_manual_power_control(&mut self) -> Result<(), Error> {
        self.write_register(register::CONTROL_MODE, ControlMode::Manual.into())?;
        self.write_register(
            register::MANUAL_MODE_SETPOINT_SOURCE,
            ControlSource::SetVal.into(),
        )
    }

    /// Track the Set Val register with a PID loop on the measurement `source`.
    pub fn set_pid_control(
        &mut self,
        source: ControlSource,
        coefficients: PidCoefficients,
    ) -> Result<(), Error> {
        self.write_register(register::CONTROL_MODE, ControlMode::Pid.into())?;
        self.write_register(register::PID_MODE_MEAS_SOURCE, source.into())?;
        self.write_register(register::PID_MODE_SETPOINT_SOURCE, ControlSource::SetVal.into())?;
        self.write_register(register::PID_PROPORTIONAL_COEFF, coefficients.proportional)?;
        self.write_register(register::PID_INTEGRAL_COEFF, coefficients.integral)?;
        self.write_register(register::PID_DIFFERENTIAL_COEFF, coefficients.differential)
    }

    /// Track a target digital pressure in the Set Val register.
    ///
    /// Digital pressure is only available on the SPM and the Development Kit.
    pub fn set_pid_digital_pressure_control(
        &mut self,
        coefficients: PidCoefficients,
    ) -> Result<(), Error> {
        self.set_pid_control(ControlSource::DigitalPressure, coefficients)
    }

    /// Track a target analog pressure (analog input B) in the Set Val register.
    pub fn set_pid_analog_pressure_control(
        &mut self,
        coefficients: PidCoefficients,
    ) -> Result<(), Error> {
        self.set_pid_control(ControlSource::AnaB, coefficients)
    }

    /// Track a target flow in the Set Val register.
    pub fn set_pid_flow_control(&mut self, coefficients: PidCoefficients) -> Result<(), Error> {
        self.set_pid_control(ControlSource::Flow, coefficients)
    }

    /// Switch the pump between two power levels at measurement thresholds.
    pub fn set_bang_bang_control(&mut self, settings: BangBangSettings) -> Result<(), Error> {
        self.write_register(register::CONTROL_MODE, ControlMode::BangBang.into())?;
        self.write_register(register::BANG_BANG_MEAS_SOURCE, settings.source.into())?;
        self.write_register(register::BANG_BANG_LOWER_THRESH, settings.lower_threshold)?;
        self.write_register(register::BANG_BANG_UPPER_THRESH, settings.upper_threshold)?;
        self.write_register(
            register::BANG_BANG_LOWER_POWER_MILLIWATTS,
            settings.lower_power_mw,
        )?;
        self.write_register(
            register::BANG_BANG_UPPER_POWER_MILLIWATTS,
            settings.upper_power_mw,
        )
    }

    /// Make an SPM listen only on I2C, at `address`.
    ///
    /// This is required when several SPMs share an I2C bus, each with its own
    /// address. The change takes effect once the settings are persisted (see
    /// [`persist_settings_to_board`](PumpClient::persist_settings_to_board))
    /// and the board is power cycled.
    pub fn configure_i2c_only_mode(&mut self, address: u8) -> Result<(), Error> {
        self.write_register(register::DRIVER_I2C_ADDRESS, f64::from(address))?;
        self.write_register(
            register::COMMUNICATION_INTERFACE,
            CommunicationInterface::OnlyI2c.into(),
        )
    }

    /// Store the current settings in the board's flash.
    ///
    /// Blocks for about a second while the board commits the settings. Some
    /// settings (e.g., the I2C address or GPIO pin modes) only take effect
    /// after a power cycle.
    pub fn persist_settings_to_board(&mut self) -> Result<(), Error> {
        self.write_register(register::STORE_CURRENT_SETTINGS, 1.)?;
        std::thread::sleep(PERSIST_SETTLE_TIME);
        log::info!(
            "settings stored to the board; power cycle it if any of them only apply at start-up"
        );
        Ok(())
    }

    /// Read the hardware variant of the board.
    pub fn read_device_type(&mut self) -> Result<DeviceType, Error> {
        let value = self.read_register(register::DEVICE_TYPE)?;
        Ok(DeviceType::try_from(value)?)
    }

    /// Read the firmware version as `(major, minor)`.
    pub fn firmware_version(&mut self) -> Result<(i32, i32), Error> {
        let major = self.read_register(register::FIRMWARE_VERSION)?;
        let minor = self.read_register(register::FIRMWARE_MINOR_VERSION)?;
        // Both registers are 16-bit integers.
        #[allow(clippy::cast_possible_truncation)]
        let version = (major.round() as i32, minor.round() as i32);
        Ok(version)
    }

    /// Restore every setting to its factory default for the board's variant.
    ///
    /// The variant is read from the board first. Registers without a default
    /// on that variant are left alone. Boards of the obsolete fast-response
    /// variant have no known defaults, so nothing is written to them.
    pub fn restore_defaults(&mut self) -> Result<(), Error> {
        let device_type = self.read_device_type()?;
        if device_type == DeviceType::FastResponseObsolete {
            log::warn!("no factory defaults are known for {device_type:?} boards");
            return Ok(());
        }
        let mut written = 0;
        for entry in register::entries() {
            if let Some(value) = entry.default_for(device_type) {
                self.write_register(entry.id(), value)?;
                written += 1;
            }
        }
        log::info!("restored {written} registers to their {device_type:?} defaults");
        Ok(())
    }

    /// Set the colour of the status LED.
    ///
    /// Each channel is clamped to `0..=31`. Avoid colours close to red, which
    /// the board uses to signal errors.
    pub fn set_status_led_color(&mut self, red: i32, green: i32, blue: i32) -> Result<(), Error> {
        let [red, green, blue] = [red, green, blue].map(|c| c.clamp(0, LED_CHANNEL_MAX));
        let packed = red * 1024 + green * 32 + blue;
        self.write_register(register::STATUS_LED_COLOUR, f64::from(packed))
    }

    /// Configure a GPIO pin.
    ///
    /// Pin D cannot be configured. The new mode only takes effect after the
    /// settings are persisted and the board is power cycled.
    pub fn set_gpio_pin_mode(&mut self, pin: GpioPin, mode: GpioPinMode) -> Result<(), Error> {
        let id = pin.pin_mode_register().ok_or_else(|| {
            ConfigurationError::new(format!("GPIO pin {pin:?} has no configurable mode"))
        })?;
        self.write_register(id, mode.into())
    }

    /// Drive a GPIO output.
    ///
    /// Pin D only supports the static [`On`](GpioState::On) and
    /// [`Off`](GpioState::Off) states. Pulse counts above
    /// [`GpioState::MAX_PULSES`] are rejected with a [`ConfigurationError`].
    pub fn set_gpio_state(&mut self, pin: GpioPin, state: GpioState) -> Result<(), Error> {
        if let GpioState::Pulses(count) = state {
            if pin == GpioPin::D {
                return Err(ConfigurationError::new("GPIO pin D cannot generate pulses").into());
            }
            if count > GpioState::MAX_PULSES {
                return Err(ConfigurationError::new(format!(
                    "cannot generate {count} pulses (at most {})",
                    GpioState::MAX_PULSES
                ))
                .into());
            }
        }
        self.write_register(pin.state_register(), state.into())
    }

    /// Set the duration and period of the pulses a GPIO pin generates.
    ///
    /// The unit depends on the pin mode: 10 µs in fast mode, 1 ms in slow mode.
    pub fn set_gpio_pulse_timing(
        &mut self,
        pin: GpioPin,
        duration: u16,
        period: u16,
    ) -> Result<(), Error> {
        let (duration_id, period_id) = pin.pulse_registers().ok_or_else(|| {
            ConfigurationError::new(format!("GPIO pin {pin:?} cannot generate pulses"))
        })?;
        self.write_register(duration_id, f64::from(duration))?;
        self.write_register(period_id, f64::from(period))
    }
}
