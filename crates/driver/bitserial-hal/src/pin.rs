//! Pin identifiers and modes.

use core::fmt;

/// Highest GPIO number the UART core will ever address.
pub const MAX_PIN: u8 = 16;

/// Number of receive-capable pin slots (GPIO0..=GPIO15).
pub const NUM_PINS: usize = 16;

/// A GPIO number.
///
/// Constructing a `Pin` does not validate it; the UART facade decides which
/// pins it is willing to use (see [`Pin::is_uart_capable`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pin(u8);

impl Pin {
    /// Wraps a raw GPIO number.
    #[must_use]
    pub const fn new(gpio: u8) -> Self {
        Self(gpio)
    }

    /// Returns the raw GPIO number.
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Returns the slot index for per-pin tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns `true` for pins usable for receive or one-wire operation.
    ///
    /// GPIO6..=GPIO11 are wired to the SPI flash and must never be driven.
    #[must_use]
    pub const fn is_uart_capable(self) -> bool {
        matches!(self.0, 0..=5 | 12..=15)
    }

    /// Returns `true` for pins usable as a dedicated transmit line.
    ///
    /// GPIO16 can drive a level but has no edge interrupt, so it is only
    /// acceptable for transmit when receive lives on a different pin.
    #[must_use]
    pub const fn is_tx_capable(self, one_wire: bool) -> bool {
        self.is_uart_capable() || (!one_wire && self.0 == MAX_PIN)
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// Electrical configuration of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Floating input.
    Input,
    /// Input with the internal pull-up enabled.
    InputPullUp,
    /// Push-pull output.
    Output,
}
