//! Enumerated values stored in registers.

use crate::error::UnknownDeviceTypeError;

/// Define an enum of the values a register accepts.
///
/// Each enum converts into the `f64` written to the register and can be
/// recovered from a value read back from the register with [`TryFrom`].
macro_rules! register_values {
    (
        $(#[$attr:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_attr:meta])*
                $variant:ident = $value:literal
            ),+
            $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$variant_attr])*
                $variant
            ),+
        }

        impl $name {
            /// The raw register value.
            pub const fn value(self) -> i16 {
                match self {
                    $(
                        $name::$variant => $value
                    ),+
                }
            }

            /// Get the variant for a raw register value, if any.
            ///
            /// Only exact integer values match.
            #[allow(clippy::float_cmp)]
            pub fn from_value(value: f64) -> Option<Self> {
                $(
                    if value == f64::from($name::$variant.value()) {
                        return Some($name::$variant);
                    }
                )+
                None
            }
        }

        impl From<$name> for f64 {
            fn from(other: $name) -> f64 {
                f64::from(other.value())
            }
        }
    };
}

register_values! {
    /// The source of a control loop's setpoint or measurement.
    pub enum ControlSource {
        /// The Set Val register.
        SetVal = 0,
        /// Analog input A.
        AnaA = 1,
        /// Analog input B (the analog pressure sensor on the Evaluation Kit).
        AnaB = 2,
        /// Analog input C.
        AnaC = 3,
        /// An external flow sensor.
        Flow = 4,
        /// The digital pressure sensor (SPM and Development Kit only).
        DigitalPressure = 5,
    }
}

register_values! {
    /// How the drive power is controlled.
    pub enum ControlMode {
        /// Power tracks the manual setpoint source.
        Manual = 0,
        /// A PID loop tracks a measurement towards the setpoint.
        Pid = 1,
        /// Power switches between two levels at measurement thresholds.
        BangBang = 2,
    }
}

register_values! {
    /// Whether, and over which interface, the driver pushes telemetry frames.
    pub enum StreamMode {
        /// Streaming is off.
        Disabled = 0,
        /// Frames are pushed over UART.
        StreamingUart = 1,
        /// Frames are made available over I2C.
        StreamingI2c = 2,
    }
}

register_values! {
    /// The interfaces an SPM listens on.
    pub enum CommunicationInterface {
        /// Detect UART or I2C automatically at start-up.
        AutodetectUartI2c = 1849,
        /// Only communicate over UART.
        OnlyUart = 1892,
        /// Only communicate over I2C. Required when several SPMs share a bus.
        OnlyI2c = 1935,
    }
}

register_values! {
    /// The hardware variant of the driver board.
    pub enum DeviceType {
        /// An obsolete fast-response driver. No defaults are known for it.
        FastResponseObsolete = 1,
        /// The general purpose driver.
        Gp = 2,
        /// The small pump module driver.
        Spm = 3,
    }
}

impl TryFrom<f64> for DeviceType {
    type Error = UnknownDeviceTypeError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        DeviceType::from_value(value).ok_or(UnknownDeviceTypeError(value))
    }
}

register_values! {
    /// The unit of the digital pressure measurement.
    pub enum PressureUnit {
        /// Millibar.
        Mbar = 0,
        /// Millimetres of mercury.
        MmHg = 1,
        /// Pounds per square inch.
        Psi = 2,
        /// Kilopascal.
        Kpa = 3,
        /// Inches of mercury.
        InHg = 4,
        /// Inches of water.
        InH2o = 5,
        /// Centimetres of water.
        CmH2o = 6,
    }
}

register_values! {
    /// The unit of the flow measurement.
    pub enum FlowUnit {
        /// Litres per minute.
        LPerMin = 0,
        /// Millilitres per minute.
        MlPerMin = 1,
        /// Microlitres per minute.
        UlPerMin = 2,
        /// Nanolitres per minute.
        NlPerMin = 3,
    }
}

register_values! {
    /// The configuration of a GPIO pin.
    ///
    /// Fast mode pulses have a 10 µs resolution but are limited to 300 ms.
    /// Slow mode pulses have a 1 ms resolution and can last up to 30 s.
    pub enum GpioPinMode {
        /// Fast pulse output, high when idle.
        OutputFastDefaultHigh = 0,
        /// Fast pulse output, low when idle.
        OutputFastDefaultLow = 1,
        /// Slow pulse output, high when idle.
        OutputSlowDefaultHigh = 2,
        /// Slow pulse output, low when idle.
        OutputSlowDefaultLow = 3,
        /// Input without pull resistor.
        InputNoPull = 4,
        /// Input with pull-up.
        InputPullUp = 5,
        /// Input with pull-down.
        InputPullDown = 6,
        /// The pin is disabled.
        Disabled = 7,
    }
}

/// The state to drive a GPIO output to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GpioState {
    /// Statically off.
    Off,
    /// Statically on.
    On,
    /// Generate the given number of pulses with the pin's pulse timing.
    ///
    /// The state register is a 16-bit signed integer, so at most
    /// [`MAX_PULSES`](GpioState::MAX_PULSES) pulses can be requested.
    Pulses(u16),
}

impl GpioState {
    /// The largest pulse count the state register can hold.
    pub const MAX_PULSES: u16 = i16::MAX.unsigned_abs();
}

impl From<GpioState> for f64 {
    fn from(other: GpioState) -> f64 {
        match other {
            GpioState::Off => 0.,
            GpioState::On => -1.,
            GpioState::Pulses(n) => f64::from(n),
        }
    }
}

/// A GPIO pin on the driver board.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GpioPin {
    /// GPIO A.
    A,
    /// GPIO B (valve 1 on the Development Kit).
    B,
    /// GPIO C (valve 2 on the Development Kit).
    C,
    /// GPIO D, which only supports static states.
    D,
}

impl GpioPin {
    /// The pin mode register, if the pin is configurable.
    pub const fn pin_mode_register(self) -> Option<u8> {
        match self {
            GpioPin::A => Some(super::GPIO_A_PIN_MODE),
            GpioPin::B => Some(super::GPIO_B_PIN_MODE),
            GpioPin::C => Some(super::GPIO_C_PIN_MODE),
            GpioPin::D => None,
        }
    }

    /// The state register.
    pub const fn state_register(self) -> u8 {
        match self {
            GpioPin::A => super::GPIO_A_STATE,
            GpioPin::B => super::GPIO_B_STATE,
            GpioPin::C => super::GPIO_C_STATE,
            GpioPin::D => super::GPIO_D_STATE,
        }
    }

    /// The pulse duration and pulse period registers, if the pin can pulse.
    pub const fn pulse_registers(self) -> Option<(u8, u8)> {
        match self {
            GpioPin::A => Some((super::GPIO_A_PULSE_DURATION, super::GPIO_A_PULSE_PERIOD)),
            GpioPin::B => Some((super::GPIO_B_PULSE_DURATION, super::GPIO_B_PULSE_PERIOD)),
            GpioPin::C => Some((super::GPIO_C_PULSE_DURATION, super::GPIO_C_PULSE_PERIOD)),
            GpioPin::D => None,
        }
    }
}
