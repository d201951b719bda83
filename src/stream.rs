//! Streaming-mode telemetry frames.
//!
//! When streaming is enabled the driver periodically produces a full
//! telemetry frame, which is decoded into a [`StreamFrame`] regardless of the
//! transport it arrived on.

use crate::error::{FrameLengthError, MalformedResponseError, Request};
use crate::register::Kind;

/// The number of channels in a frame.
pub const CHANNEL_COUNT: usize = 8;

/// The size of a frame on the I2C bus, in bytes.
pub const I2C_FRAME_SIZE: usize = 28;

/// The byte layout of an I2C frame: the kind of each channel, in channel order.
const I2C_LAYOUT: [Kind; CHANNEL_COUNT] = [
    Kind::Int16,
    Kind::Float32,
    Kind::Float32,
    Kind::Int16,
    Kind::Float32,
    Kind::Float32,
    Kind::Float32,
    Kind::Float32,
];

/// The channels of a [`StreamFrame`], in wire order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Whether the pump is enabled.
    PumpEnabled = 0,
    /// The drive voltage.
    Voltage = 1,
    /// The drive current.
    Current = 2,
    /// The drive frequency.
    Frequency = 3,
    /// Analog input A (always `0` on the SPM).
    AnaA = 4,
    /// Analog input B (analog pressure) on the GP driver, or the digital pressure.
    AnaB = 5,
    /// Analog input C.
    AnaC = 6,
    /// Flow (always `0` on the SPM).
    Flow = 7,
}

/// One decoded telemetry frame.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct StreamFrame {
    channels: [f64; CHANNEL_COUNT],
}

impl StreamFrame {
    /// Create a frame from its channels, in wire order.
    pub const fn new(channels: [f64; CHANNEL_COUNT]) -> Self {
        StreamFrame { channels }
    }

    /// Decode the payload of a UART `#S` line (the text after the marker).
    ///
    /// The payload must contain exactly eight comma-separated decimal numbers.
    /// `line` is only used to report errors.
    pub(crate) fn from_uart_payload(payload: &str, line: &[u8]) -> Result<Self, MalformedResponseError> {
        let malformed = || MalformedResponseError::new(Request::StreamFrame, line.to_vec());

        let mut channels = [0.; CHANNEL_COUNT];
        let mut fields = payload.split(',');
        for channel in &mut channels {
            *channel = fields
                .next()
                .and_then(|field| field.trim().parse().ok())
                .ok_or_else(malformed)?;
        }
        if fields.next().is_some() {
            return Err(malformed());
        }
        Ok(StreamFrame { channels })
    }

    /// Decode a frame read from the I2C bus.
    ///
    /// The first [`I2C_FRAME_SIZE`] bytes are decoded. Any trailing bytes are
    /// ignored, but a shorter buffer is an error.
    pub fn from_i2c_bytes(bytes: &[u8]) -> Result<Self, FrameLengthError> {
        if bytes.len() < I2C_FRAME_SIZE {
            return Err(FrameLengthError {
                expected: I2C_FRAME_SIZE,
                actual: bytes.len(),
            });
        }
        let mut channels = [0.; CHANNEL_COUNT];
        let mut offset = 0;
        for (channel, kind) in channels.iter_mut().zip(I2C_LAYOUT) {
            // The length was checked above, so every field is present.
            *channel = kind.decode(&bytes[offset..]).unwrap_or_default();
            offset += kind.size();
        }
        Ok(StreamFrame { channels })
    }

    /// Get the value of a channel.
    pub fn get(&self, channel: Channel) -> f64 {
        self.channels[channel as usize]
    }

    /// All channels, in wire order.
    pub fn channels(&self) -> &[f64; CHANNEL_COUNT] {
        &self.channels
    }

    /// Whether the pump is enabled.
    pub fn pump_enabled(&self) -> bool {
        self.get(Channel::PumpEnabled) != 0.
    }
    /// The drive voltage.
    pub fn voltage(&self) -> f64 {
        self.get(Channel::Voltage)
    }
    /// The drive current.
    pub fn current(&self) -> f64 {
        self.get(Channel::Current)
    }
    /// The drive frequency.
    pub fn frequency(&self) -> f64 {
        self.get(Channel::Frequency)
    }
    /// Analog input A (always `0` on the SPM).
    pub fn ana_a(&self) -> f64 {
        self.get(Channel::AnaA)
    }
    /// Analog input B on the GP driver, or the digital pressure.
    pub fn ana_b(&self) -> f64 {
        self.get(Channel::AnaB)
    }
    /// The pressure channel. This is the same channel as [`ana_b`](Self::ana_b).
    pub fn pressure(&self) -> f64 {
        self.get(Channel::AnaB)
    }
    /// Analog input C.
    pub fn ana_c(&self) -> f64 {
        self.get(Channel::AnaC)
    }
    /// Flow (always `0` on the SPM).
    pub fn flow(&self) -> f64 {
        self.get(Channel::Flow)
    }
}

impl From<StreamFrame> for [f64; CHANNEL_COUNT] {
    fn from(other: StreamFrame) -> Self {
        other.channels
    }
}
