// TGM Wearable — Samples, Frames & Data Types

use heapless::Vec;

use crate::config::MAX_PAYLOAD_LEN;
use crate::error::{InvalidCommand, TransportError};

/// Serialized notification body.
pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

/// Little-endian wire form of a value pushed to the client.
pub trait Encode {
    fn encode(&self, out: &mut Payload) -> Result<(), TransportError>;
}

fn push_bytes(out: &mut Payload, bytes: &[u8]) -> Result<(), TransportError> {
    out.extend_from_slice(bytes)
        .map_err(|_| TransportError::PayloadTooLarge(out.len() + bytes.len()))
}

impl Encode for i32 {
    fn encode(&self, out: &mut Payload) -> Result<(), TransportError> {
        push_bytes(out, &self.to_le_bytes())
    }
}

impl Encode for u8 {
    fn encode(&self, out: &mut Payload) -> Result<(), TransportError> {
        push_bytes(out, &[*self])
    }
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// A fixed-shape sample with a fixed-size little-endian wire layout.
pub trait WireSample: Copy + Default {
    const WIRE_SIZE: usize;

    /// `out` is exactly `WIRE_SIZE` bytes long.
    fn write_le(&self, out: &mut [u8]);
}

/// One optical reading. Each channel is a 19-bit photodiode count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpgSample {
    pub red: u32,
    pub ir: u32,
    pub green: u32,
}

impl WireSample for PpgSample {
    const WIRE_SIZE: usize = 12;

    fn write_le(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.red.to_le_bytes());
        out[4..8].copy_from_slice(&self.ir.to_le_bytes());
        out[8..12].copy_from_slice(&self.green.to_le_bytes());
    }
}

/// One accelerometer reading, raw two's complement counts per axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccSample {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl WireSample for AccSample {
    const WIRE_SIZE: usize = 6;

    fn write_le(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.x.to_le_bytes());
        out[2..4].copy_from_slice(&self.y.to_le_bytes());
        out[4..6].copy_from_slice(&self.z.to_le_bytes());
    }
}

/// Die temperature in hundredths of a degree Celsius.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TempSample {
    pub centi: i16,
}

impl TempSample {
    pub fn from_celsius(celsius: f32) -> Self {
        Self {
            centi: (celsius * 100.0).round() as i16,
        }
    }

    pub fn celsius(&self) -> f32 {
        f32::from(self.centi) / 100.0
    }
}

impl WireSample for TempSample {
    const WIRE_SIZE: usize = 2;

    fn write_le(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.centi.to_le_bytes());
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// A counter-tagged batch of up to `N` samples of one sensor type.
///
/// On the wire a frame is always `4 + N * S::WIRE_SIZE` bytes: the counter,
/// then the samples, zero-padded when fewer than `N` were read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<S, const N: usize> {
    pub counter: u32,
    pub samples: Vec<S, N>,
}

impl<S: WireSample, const N: usize> Frame<S, N> {
    pub const WIRE_LEN: usize = 4 + N * S::WIRE_SIZE;

    pub fn new(counter: u32) -> Self {
        Self {
            counter,
            samples: Vec::new(),
        }
    }
}

impl<S: WireSample, const N: usize> Default for Frame<S, N> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<S: WireSample, const N: usize> Encode for Frame<S, N> {
    fn encode(&self, out: &mut Payload) -> Result<(), TransportError> {
        let start = out.len();
        out.resize_default(start + Self::WIRE_LEN)
            .map_err(|_| TransportError::PayloadTooLarge(start + Self::WIRE_LEN))?;

        let body = &mut out[start..];
        body[0..4].copy_from_slice(&self.counter.to_le_bytes());
        for (slot, sample) in body[4..].chunks_exact_mut(S::WIRE_SIZE).zip(&self.samples) {
            sample.write_le(slot);
        }
        Ok(())
    }
}

/// Wrapping 32-bit frame sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounter(u32);

impl FrameCounter {
    pub fn starting_at(value: u32) -> Self {
        Self(value)
    }

    /// Returns the current value and advances, wrapping at `u32::MAX`.
    pub fn next(&mut self) -> u32 {
        let value = self.0;
        self.0 = self.0.wrapping_add(1);
        value
    }
}

// ---------------------------------------------------------------------------
// Notification channels
// ---------------------------------------------------------------------------

/// Push channels of the TGM service, each gated by its own subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    Battery = 0,
    Optical = 1,
    Motion = 2,
    Temperature = 3,
    RegisterRead = 4,
    RegisterWrite = 5,
}

impl Channel {
    pub const COUNT: usize = 6;

    pub const ALL: [Channel; Self::COUNT] = [
        Self::Battery,
        Self::Optical,
        Self::Motion,
        Self::Temperature,
        Self::RegisterRead,
        Self::RegisterWrite,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::Optical => "ppg",
            Self::Motion => "acc",
            Self::Temperature => "temp",
            Self::RegisterRead => "reg-read",
            Self::RegisterWrite => "reg-write",
        }
    }
}

// ---------------------------------------------------------------------------
// Device state
// ---------------------------------------------------------------------------

/// Display label derived from the `worn` / `charging` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Initializing,
    Idle,
    ChargingIdle,
    Worn,
}

impl DeviceState {
    /// Worn takes precedence over charging.
    pub fn derive(worn: bool, charging: bool) -> Self {
        match (worn, charging) {
            (true, _) => Self::Worn,
            (false, true) => Self::ChargingIdle,
            (false, false) => Self::Idle,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::ChargingIdle => "charging",
            Self::Worn => "worn",
        }
    }
}

// ---------------------------------------------------------------------------
// Register commands
// ---------------------------------------------------------------------------

/// Which command characteristic the client wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Read,
    Write,
}

/// A client-issued register access on the optical sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterTransaction {
    Read { register: u8 },
    Write { register: u8, data: u8 },
}

impl RegisterTransaction {
    /// Validate a raw characteristic write. Reads carry exactly one byte,
    /// writes exactly two, and neither accepts a non-zero offset.
    pub fn parse(kind: CommandKind, offset: u16, value: &[u8]) -> Result<Self, InvalidCommand> {
        if offset != 0 {
            return Err(InvalidCommand::InvalidOffset(offset));
        }

        match (kind, value) {
            (CommandKind::Read, &[register]) => Ok(Self::Read { register }),
            (CommandKind::Write, &[register, data]) => Ok(Self::Write { register, data }),
            _ => Err(InvalidCommand::InvalidAttributeLength(value.len())),
        }
    }

    pub fn register(&self) -> u8 {
        match *self {
            Self::Read { register } | Self::Write { register, .. } => register,
        }
    }
}
