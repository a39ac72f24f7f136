//! Error types for the encoder, bit engine and attack controller.
//!
//! Each fallible layer gets its own small enum, composed with [`From`] impls,
//! rather than one crate-wide error type.

use core::fmt;

/// The encoder could not fit the requested frame into the bit buffer.
///
/// Building a [`crate::frame::FrameSpec`] within the normal DLC/length rules
/// never triggers this; it guards a capacity that is, in principle, a
/// compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The encoded bitstream would not fit in [`crate::frame::Frame::CAPACITY`] bits.
    TooManyBits,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::TooManyBits => write!(f, "encoded frame exceeds bit buffer capacity"),
        }
    }
}

/// Outcome of a single bit-engine primitive (transmit, Janus transmit, spoof, error attack).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// The watchdog counter reached zero before the operation completed.
    Timeout,
    /// A driven bit was not observed on the bus (arbitration lost, or our own
    /// bit was overwritten) and no retries remain.
    ArbitrationLost,
    /// The target bit pattern never appeared on the bus before the watchdog
    /// expired.
    NoMatch,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Timeout => write!(f, "watchdog timeout"),
            EngineError::ArbitrationLost => write!(f, "arbitration lost, no retries remaining"),
            EngineError::NoMatch => write!(f, "target bit pattern did not appear before timeout"),
        }
    }
}

/// Outcome of an [`crate::attack::AttackController`] operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackError {
    /// The requested frame slot has not been loaded with `set_frame`.
    NotConfigured,
    /// The underlying bit-engine primitive failed.
    Engine(EngineError),
}

impl fmt::Display for AttackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackError::NotConfigured => write!(f, "frame slot not configured"),
            AttackError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl From<EngineError> for AttackError {
    fn from(e: EngineError) -> Self {
        AttackError::Engine(e)
    }
}
