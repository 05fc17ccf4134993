//! Hardware abstraction contracts for the bitserial software UART.
//!
//! The UART core never touches registers itself. Everything platform-specific
//! goes through the traits in this crate:
//!
//! - [`CycleClock`] -- the free-running cycle counter used for all timing.
//! - [`Gpio`] -- pin direction and level.
//! - [`EdgeInterrupts`] -- attaching a handler to both edges of a pin.
//! - [`InterruptMask`] -- global interrupt enable/disable for clean transmit edges.
//! - [`Scheduler`] -- cooperative yielding while waiting for a bit deadline.
//!
//! [`Platform`] bundles all of them for the driver's generic bound.

#![cfg_attr(not(test), no_std)]

pub mod error;
pub mod hw;
pub mod pin;

pub use error::HalError;
pub use hw::{CycleClock, EdgeHandler, EdgeInterrupts, Gpio, InterruptMask, Platform, Scheduler};
pub use pin::{MAX_PIN, NUM_PINS, Pin, PinMode};
