use std::fmt;

/// Errors raised by a [`ByteRing`](crate::ring::ByteRing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// The ring is at capacity, the byte was not stored.
    #[error("ring buffer overflow (capacity {capacity} bytes)")]
    Overflow { capacity: usize },
    /// Nothing left to pop.
    #[error("ring buffer is empty")]
    Empty,
}

/// Errors raised while turning ASCII hex into a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Only 4 and 8 character fields exist on the wire.
    #[error("invalid field width {0}, expected 4 or 8")]
    InvalidWidth(usize),
    /// The ring ran dry before the field was complete.
    #[error("field truncated, needed {expected} bytes but only {available} were available")]
    Truncated { expected: usize, available: usize },
    /// A byte outside of `0-9A-Fa-f`.
    #[error("invalid hex digit {0:#04x}")]
    InvalidHexDigit(u8),
    /// The raw value does not fit the field once converted.
    #[error("value {0:#06x} out of range")]
    OutOfRange(u32),
}

/// Position of a field inside a telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    Voltage,
    Current,
    AmpHours,
    CycleCount,
    StateOfCharge,
    Temperature,
    Status,
    AfeStatus,
    /// Zero based cell index.
    Cell(usize),
}

impl fmt::Display for FrameField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameField::Voltage => write!(f, "voltage"),
            FrameField::Current => write!(f, "current"),
            FrameField::AmpHours => write!(f, "amp hours"),
            FrameField::CycleCount => write!(f, "cycle count"),
            FrameField::StateOfCharge => write!(f, "state of charge"),
            FrameField::Temperature => write!(f, "temperature"),
            FrameField::Status => write!(f, "status"),
            FrameField::AfeStatus => write!(f, "AFE status"),
            FrameField::Cell(n) => write!(f, "cell #{}", n + 1),
        }
    }
}

/// A frame failed to decode; names the field that broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot decode {field}: {source}")]
pub struct FrameError {
    pub field: FrameField,
    #[source]
    pub source: DecodeError,
}

impl FrameError {
    pub fn kind(&self) -> DecodeError {
        self.source
    }
}

/// Failures reported by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("cannot connect to {identity}: {reason}")]
    Connect { identity: String, reason: String },
    #[error("service {0:#06x} not found")]
    ServiceNotFound(u16),
    #[error("characteristic {0:#06x} not found")]
    CharacteristicNotFound(u16),
    #[error("characteristic {0:#06x} cannot notify")]
    CannotNotify(u16),
    #[error("cannot subscribe to notifications: {0}")]
    Subscribe(String),
    #[error("transport not connected")]
    NotConnected,
    #[error("bluetooth error: {0}")]
    Bluetooth(String),
}

/// Crate level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot register battery, maximum of {capacity} reached")]
    RegistryFull { capacity: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("Ring error: {0}")]
    Ring(#[from] RingError),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
