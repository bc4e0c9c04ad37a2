//! # Controller Errors
//!
//! Result codes returned to the host for every inbound operation, and the
//! fault codes recorded by the diagnostic monitor.
//!
//! | Error | Raised by | Effect |
//! |-------|-----------|--------|
//! | `InvalidArgument` | bad index, immutable field change, bad descriptor | call rejected |
//! | `IllegalOperation` | second `init()` | call rejected |
//! | `UnsupportedType` | unknown controller type tag | descriptor rejected |
//! | `InvalidState` | missing dependent data (target frequency, not initialized) | cycle aborted |
//! | `Overflow` | engaged time larger than eval time | source poisoned, fault recorded |
//! | `NotQueried` | zero evaluation window | source poisoned, fault recorded |
//! | `Hal` | collaborator failure | cycle aborted |

use core::fmt;

use helix_pmu_hal::HalError;

/// Controller result type alias
pub type Result<T> = core::result::Result<T, Error>;

/// Controller subsystem error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Bad index, bad descriptor value or attempt to change an immutable field
    InvalidArgument,
    /// Operation not legal in the current lifecycle state
    IllegalOperation,
    /// Unknown controller type tag
    UnsupportedType(u8),
    /// Dependent data missing or subsystem not in the required state
    InvalidState,
    /// Monotonic counter inconsistency
    Overflow,
    /// Counters were not advanced since the previous query
    NotQueried,
    /// Hardware collaborator failure
    Hal(HalError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::IllegalOperation => write!(f, "illegal operation"),
            Self::UnsupportedType(tag) => write!(f, "unsupported controller type {}", tag),
            Self::InvalidState => write!(f, "invalid state"),
            Self::Overflow => write!(f, "counter overflow"),
            Self::NotQueried => write!(f, "counters not queried"),
            Self::Hal(e) => write!(f, "collaborator error: {}", e),
        }
    }
}

impl From<HalError> for Error {
    fn from(e: HalError) -> Self {
        Error::Hal(e)
    }
}
