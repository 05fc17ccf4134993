//! HAL error types.

use core::fmt;

use crate::pin::Pin;

/// Errors a platform can report while wiring up a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// The pin does not exist on this platform.
    NoSuchPin(Pin),
    /// The pin exists but cannot raise edge interrupts.
    NoInterrupt(Pin),
    /// The interrupt controller refused the request.
    Unsupported,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchPin(pin) => write!(f, "{pin} does not exist"),
            Self::NoInterrupt(pin) => write!(f, "{pin} cannot raise edge interrupts"),
            Self::Unsupported => f.write_str("operation not supported"),
        }
    }
}
