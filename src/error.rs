// TGM Wearable — Error Types

use thiserror::Error;

/// A register transaction on the sensor bus failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bus transaction failed on device 0x{device:02X}, register 0x{register:02X}")]
pub struct BusError {
    pub device: u8,
    pub register: u8,
}

/// Subsystem bring-up failures. Fatal to the subsystem, not to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("{name} not ready (id 0x{found:02X}, expected 0x{expected:02X})")]
    DeviceNotReady {
        name: &'static str,
        found: u8,
        expected: u8,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Malformed register command from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidCommand {
    #[error("invalid offset {0}")]
    InvalidOffset(u16),

    #[error("invalid attribute length {0}")]
    InvalidAttributeLength(usize),
}

/// A notification could not be handed to the link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("payload of {0} bytes exceeds the notification buffer")]
    PayloadTooLarge(usize),

    #[error("no client connected")]
    NotConnected,

    #[error("link refused notification: {0}")]
    Link(String),
}

/// The battery ADC or its divider switch reported a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("battery ADC: {0}")]
pub struct AdcError(pub String);
