//! The driver board's register map.
//!
//! Every setting and measurement on the board lives in one of 60 numbered
//! registers. Each register holds either a 16-bit signed integer or a 32-bit
//! float (see [`Kind`]), which determines how values are encoded on the wire.
//! The constants in this module name each register:
//!
//! ```
//! use discpump::register::{self, Kind};
//!
//! assert_eq!(register::SET_VAL, 23);
//! assert_eq!(register::kind_of(register::SET_VAL), Kind::Float32);
//! assert_eq!(register::name(register::SET_VAL), Some("Set Val"));
//! ```
//!
//! The catalog also records the factory default of each register for the GP
//! and SPM driver variants. Registers without a default (measurements and
//! read-only information) are skipped when restoring defaults.
//!
//! ```
//! use discpump::register::{self, DeviceType};
//!
//! assert_eq!(register::default_for(DeviceType::Spm, register::DRIVER_I2C_ADDRESS), Some(37.0));
//! assert_eq!(register::default_for(DeviceType::Gp, register::DRIVER_I2C_ADDRESS), None);
//! ```

mod values;

use crate::error::{InvalidRegisterError, ValueOutOfRangeError};
use std::fmt;
pub use values::*;

/// The numeric kind of the value stored in a register.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A 16-bit signed integer.
    Int16,
    /// A 32-bit IEEE-754 float.
    Float32,
}

impl Kind {
    /// The number of bytes a value of this kind occupies on the I2C bus.
    pub const fn size(self) -> usize {
        match self {
            Kind::Int16 => 2,
            Kind::Float32 => 4,
        }
    }

    /// Encode `value` for the register `id`, which has this kind.
    ///
    /// Integer registers round to the nearest integer. Non-finite values, and
    /// values outside the range of an `i16` for integer registers, are rejected.
    pub fn encode(self, id: u8, value: f64) -> Result<Encoded, ValueOutOfRangeError> {
        let err = ValueOutOfRangeError {
            id,
            value,
            kind: self,
        };
        if !value.is_finite() {
            return Err(err);
        }
        match self {
            Kind::Int16 => {
                let rounded = value.round();
                if rounded < f64::from(i16::MIN) || rounded > f64::from(i16::MAX) {
                    Err(err)
                } else {
                    #[allow(clippy::cast_possible_truncation)]
                    let narrowed = rounded as i16;
                    Ok(Encoded::Int16(narrowed))
                }
            }
            Kind::Float32 => {
                #[allow(clippy::cast_possible_truncation)]
                let narrowed = value as f32;
                if narrowed.is_finite() {
                    Ok(Encoded::Float32(narrowed))
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Decode a little-endian value of this kind from the start of `bytes`.
    ///
    /// Returns `None` if `bytes` is shorter than [`size`](Kind::size).
    pub fn decode(self, bytes: &[u8]) -> Option<f64> {
        match self {
            Kind::Int16 => {
                let raw: [u8; 2] = bytes.get(..2)?.try_into().ok()?;
                Some(f64::from(i16::from_le_bytes(raw)))
            }
            Kind::Float32 => {
                let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
                Some(f64::from(f32::from_le_bytes(raw)))
            }
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Int16 => f.write_str("16-bit integer"),
            Kind::Float32 => f.write_str("32-bit float"),
        }
    }
}

/// A register value encoded according to the register's [`Kind`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Encoded {
    /// The value of an integer register.
    Int16(i16),
    /// The value of a float register.
    Float32(f32),
}

impl Encoded {
    /// Append the little-endian representation of the value to `buffer`.
    pub fn extend_le_bytes(&self, buffer: &mut Vec<u8>) {
        match self {
            Encoded::Int16(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            Encoded::Float32(v) => buffer.extend_from_slice(&v.to_le_bytes()),
        }
    }
}

/// Metadata for one register.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Entry {
    /// The register id.
    id: u8,
    /// The numeric kind of the register.
    kind: Kind,
    /// The factory default on the GP driver, if the register has one.
    default_gp: Option<f64>,
    /// The factory default on the SPM driver, if the register has one.
    default_spm: Option<f64>,
}

impl Entry {
    /// The register id.
    pub fn id(&self) -> u8 {
        self.id
    }
    /// The numeric kind of the register.
    pub fn kind(&self) -> Kind {
        self.kind
    }
    /// The register's name.
    pub fn name(&self) -> &'static str {
        name(self.id).unwrap_or("<unknown register>")
    }
    /// The factory default on the GP driver.
    pub fn default_gp(&self) -> Option<f64> {
        self.default_gp
    }
    /// The factory default on the SPM driver.
    pub fn default_spm(&self) -> Option<f64> {
        self.default_spm
    }
    /// The factory default for the given device type.
    ///
    /// `None` means the register is not restored on that device.
    pub fn default_for(&self, device_type: DeviceType) -> Option<f64> {
        match device_type {
            DeviceType::Gp => self.default_gp,
            DeviceType::Spm => self.default_spm,
            DeviceType::FastResponseObsolete => None,
        }
    }
}

macro_rules! define_registers {
    // Entry point.
    //
    // Serves to concatenate the parts of the name before defining the constants.
    (
        $(
            { $id:literal, $($name_word:ident)+, $kind:ident, gp($($gp:tt)*), spm($($spm:tt)*) }
        ),+
        $(,)?
    ) => {
        paste::paste! {
            define_registers!{@with_concatenated_name
                $(
                    { $id, $($name_word)+, [< $($name_word:camel)+ >], $kind, [$($gp)*], [$($spm)*] }
                ),+
            }
        }
    };
    (@with_concatenated_name
        $(
            { $id:literal, $($name_word:ident)+, $name:ident, $kind:ident, [$($gp:tt)*], [$($spm:tt)*] }
        ),+
    ) => {
        paste::paste! {
            $(
                #[doc = "The" $(" " $name_word)+ " register (id `" $id "`, `" $kind "`)."]
                pub const [< $name:snake:upper >] : u8 = $id;
            )+

            /// Get the name of a register.
            ///
            /// If the register id is not recognized, `None` is returned.
            pub const fn name(id: u8) -> Option<&'static str> {
                match id {
                    $(
                        $id => Some(stringify!($($name_word)+)),
                    )+
                    _ => None,
                }
            }

            /// The catalog of all registers, indexed by id.
            #[allow(clippy::cast_lossless)]
            static CATALOG: [Entry; REGISTER_COUNT] = [
                $(
                    Entry {
                        id: $id,
                        kind: Kind::$kind,
                        default_gp: define_registers!(@default $($gp)*),
                        default_spm: define_registers!(@default $($spm)*),
                    },
                )+
            ];
        }
    };
    (@default) => { None };
    (@default $($value:tt)+) => { Some(($($value)+) as f64) };
}

/// The number of registers on the device.
const REGISTER_COUNT: usize = 60;

define_registers! {
    // General settings
    { 0, Pump Enable, Int16, gp(1), spm(1) },
    { 1, Power Limit Milliwatts, Int16, gp(1000), spm(1000) },
    { 2, Stream Mode, Int16, gp(0), spm(0) },
    // Measurements
    { 3, Meas Drive Volts, Float32, gp(), spm() },
    { 4, Meas Drive Milliamps, Float32, gp(), spm() },
    { 5, Meas Drive Milliwatts, Float32, gp(), spm() },
    { 6, Meas Drive Freq, Int16, gp(), spm() },
    { 7, Meas Ana A, Float32, gp(), spm() },
    { 8, Meas Ana B, Float32, gp(), spm() },
    { 9, Meas Ana C, Float32, gp(), spm() },
    // Control settings
    { 10, Control Mode, Int16, gp(0), spm(0) },
    { 11, Manual Mode Setpoint Source, Int16, gp(1), spm(3) },
    { 12, Pid Mode Setpoint Source, Int16, gp(1), spm(3) },
    { 13, Pid Mode Meas Source, Int16, gp(5), spm(5) },
    { 14, Pid Proportional Coeff, Float32, gp(5), spm(5) },
    { 15, Pid Integral Coeff, Float32, gp(10), spm(10) },
    { 16, Pid Integral Limit Coeff, Float32, gp(1400), spm(1400) },
    { 17, Pid Differential Coeff, Float32, gp(0), spm(0) },
    { 18, Bang Bang Meas Source, Int16, gp(5), spm(5) },
    { 19, Bang Bang Lower Thresh, Float32, gp(10), spm(10) },
    { 20, Bang Bang Upper Thresh, Float32, gp(50), spm(50) },
    { 21, Bang Bang Lower Power Milliwatts, Float32, gp(1000), spm(1000) },
    { 22, Bang Bang Upper Power Milliwatts, Float32, gp(0), spm(0) },
    // Measurement settings
    { 23, Set Val, Float32, gp(250), spm(250) },
    { 24, Ana A Offset, Float32, gp(0), spm() },
    { 25, Ana A Gain, Float32, gp(1000), spm() },
    { 26, Ana B Offset, Float32, gp(-821), spm() },
    { 27, Ana B Gain, Float32, gp(2130), spm() },
    { 28, Ana C Offset, Float32, gp(0), spm(0) },
    { 29, Ana C Gain, Float32, gp(1000), spm(1000) },
    // Miscellaneous settings
    { 30, Store Current Settings, Int16, gp(0), spm(0) },
    { 31, Error Code, Int16, gp(), spm() },
    { 32, Meas Flow, Float32, gp(), spm() },
    { 33, Reset Pid On Turn On, Int16, gp(1), spm(1) },
    { 34, Use Frequency Tracking, Int16, gp(1), spm(1) },
    { 35, Manual Drive Frequency, Int16, gp(21000), spm(21000) },
    { 36, Firmware Version, Int16, gp(), spm() },
    { 37, Device Type, Int16, gp(), spm() },
    { 38, Firmware Minor Version, Int16, gp(), spm() },
    { 39, Meas Digital Pressure, Float32, gp(), spm() },
    { 40, Digital Pressure Offset, Float32, gp(0), spm(0) },
    { 41, Reserved, Float32, gp(), spm() },
    // Communication settings
    { 42, Driver I2c Address, Int16, gp(), spm(37) },
    { 43, Communication Interface, Int16, gp(), spm(1849) },
    // GPIO settings
    { 44, Gpio A Pin Mode, Int16, gp(5), spm() },
    { 45, Gpio A State, Int16, gp(), spm() },
    { 46, Gpio A Pulse Duration, Int16, gp(0), spm() },
    { 47, Gpio A Pulse Period, Int16, gp(0), spm() },
    { 48, Gpio B Pin Mode, Int16, gp(1), spm() },
    { 49, Gpio B State, Int16, gp(0), spm() },
    { 50, Gpio B Pulse Duration, Int16, gp(0), spm() },
    { 51, Gpio B Pulse Period, Int16, gp(0), spm() },
    { 52, Gpio C Pin Mode, Int16, gp(3), spm() },
    { 53, Gpio C State, Int16, gp(0), spm() },
    { 54, Gpio C Pulse Duration, Int16, gp(0), spm() },
    { 55, Gpio C Pulse Period, Int16, gp(0), spm() },
    { 56, Gpio D State, Int16, gp(), spm() },
    // Miscellaneous settings
    { 57, Status Led Colour, Int16, gp(992), spm(992) },
    { 58, Digital Pressure Meas Unit, Int16, gp(0), spm(0) },
    { 59, Flow Meas Unit, Int16, gp(1), spm() },
}

/// The number of registers in the catalog.
pub fn count() -> usize {
    CATALOG.len()
}

/// All register entries in ascending id order.
pub fn entries() -> impl Iterator<Item = &'static Entry> {
    CATALOG.iter()
}

/// Get the catalog entry for a register.
///
/// ## Panics
///
/// Panics if `id` is not a valid register id.
pub fn entry(id: u8) -> &'static Entry {
    &CATALOG[usize::from(id)]
}

/// Get the catalog entry for a register, if `id` is valid.
pub fn try_entry(id: u8) -> Result<&'static Entry, InvalidRegisterError> {
    CATALOG
        .get(usize::from(id))
        .ok_or(InvalidRegisterError(id))
}

/// Get the numeric kind of a register.
///
/// ## Panics
///
/// Panics if `id` is not a valid register id.
pub fn kind_of(id: u8) -> Kind {
    entry(id).kind
}

/// Get the factory default of a register on the given device type.
///
/// `None` means the register has no default on that device and must not be
/// written when restoring defaults.
///
/// ## Panics
///
/// Panics if `id` is not a valid register id.
pub fn default_for(device_type: DeviceType, id: u8) -> Option<f64> {
    entry(id).default_for(device_type)
}
