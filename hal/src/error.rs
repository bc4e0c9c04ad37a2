//! # Collaborator Errors
//!
//! Error type returned by every hardware collaborator.

use core::fmt;

/// HAL result type alias
pub type Result<T> = core::result::Result<T, HalError>;

/// Failure reported by a hardware collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum HalError {
    /// Register or bus access failed
    AccessFailed,
    /// Device or counter is not ready (clock gated, not yet initialized)
    NotReady,
    /// Index does not name a known rail, domain, device or monitor
    UnknownIndex,
    /// Request was rejected by the receiving subsystem
    Rejected,
    /// Request queue is full
    QueueFull,
    /// Value is out of the range the hardware accepts
    OutOfRange,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessFailed => write!(f, "register access failed"),
            Self::NotReady => write!(f, "device not ready"),
            Self::UnknownIndex => write!(f, "unknown index"),
            Self::Rejected => write!(f, "request rejected"),
            Self::QueueFull => write!(f, "request queue full"),
            Self::OutOfRange => write!(f, "value out of range"),
        }
    }
}
