//! Platform traits consumed by the UART core.
//!
//! Every method takes `&self`: implementations are expected to be cheap
//! handles (a zero-sized register accessor on real hardware, an `Arc` around
//! the simulated board on the host) that can be cloned into the interrupt
//! path.

use crate::error::HalError;
use crate::pin::{Pin, PinMode};

/// Handler invoked on every edge of a pin. Carries no argument, so the
/// platform only has to store a plain function pointer per pin.
pub type EdgeHandler = fn();

/// A free-running cycle counter.
pub trait CycleClock {
    /// Current counter value. Monotonic, wraps at `u32::MAX`.
    ///
    /// Must be callable from interrupt context.
    fn cycles(&self) -> u32;

    /// Counter frequency in Hz.
    fn frequency_hz(&self) -> u32;
}

/// Digital pin access.
pub trait Gpio {
    /// Configures the pin direction and pull.
    fn set_mode(&self, pin: Pin, mode: PinMode);

    /// Drives an output pin.
    fn write(&self, pin: Pin, high: bool);

    /// Samples the pin level. Must be callable from interrupt context.
    fn read(&self, pin: Pin) -> bool;
}

/// Edge-triggered pin interrupts.
///
/// The platform must never run two handlers for the same pin concurrently;
/// the edge capture path relies on it.
pub trait EdgeInterrupts {
    /// Calls `handler` on both rising and falling edges of `pin`, replacing
    /// any handler already attached to it.
    ///
    /// # Errors
    ///
    /// Returns [`HalError`] if the pin cannot raise interrupts.
    fn attach_edge(&self, pin: Pin, handler: EdgeHandler) -> Result<(), HalError>;

    /// Stops delivering edges for `pin`. A no-op if nothing is attached.
    fn detach(&self, pin: Pin);
}

/// Global interrupt masking for the current core.
pub trait InterruptMask {
    /// Masks all interrupts. Edges arriving meanwhile stay pending.
    fn disable_interrupts(&self);

    /// Unmasks interrupts, delivering anything that became pending.
    fn enable_interrupts(&self);
}

/// Cooperative scheduling.
pub trait Scheduler {
    /// Lets other pending work run for up to `micros` microseconds.
    ///
    /// May return early or be a no-op; must never block indefinitely.
    fn cooperative_yield(&self, micros: u32);
}

/// Everything the UART core needs from a platform.
pub trait Platform:
    CycleClock + Gpio + EdgeInterrupts + InterruptMask + Scheduler + Clone + Send + Sync + 'static
{
}

impl<T> Platform for T where
    T: CycleClock + Gpio + EdgeInterrupts + InterruptMask + Scheduler + Clone + Send + Sync + 'static
{
}
