//! Cycle-timed frame transmitter.
//!
//! A frame is written against a running deadline that advances one bit
//! period per bit, so timing errors never accumulate across a frame. The pin
//! is only touched when the level changes; runs of equal bits cost one wait.

use bitserial_core::cycles::{self, CycleTimestamp};
use bitserial_hal::{CycleClock, Gpio, InterruptMask, Pin, Scheduler};

/// Microseconds of a wait that are always spent spinning rather than
/// yielding, to absorb scheduler overshoot.
pub const YIELD_GUARD_US: u32 = 8;

/// Masks interrupts for its lifetime.
///
/// Dropping the guard re-enables interrupts unconditionally: the transmitter
/// toggles the mask itself while waiting, so there is no prior state to
/// restore.
pub struct IrqGuard<'a, H: InterruptMask> {
    hal: &'a H,
}

impl<'a, H: InterruptMask> IrqGuard<'a, H> {
    /// Disables interrupts.
    pub fn new(hal: &'a H) -> Self {
        hal.disable_interrupts();
        Self { hal }
    }
}

impl<H: InterruptMask> Drop for IrqGuard<'_, H> {
    fn drop(&mut self) {
        self.hal.enable_interrupts();
    }
}

/// Transmit side of a port.
#[derive(Debug, Clone, Copy)]
pub struct Transmitter {
    pin: Pin,
    invert: bool,
    bit_cycles: u32,
    cycles_per_micro: u32,
}

impl Transmitter {
    /// Creates a transmitter for `pin`. Timing is set by [`Transmitter::set_timing`].
    #[must_use]
    pub const fn new(pin: Pin, invert: bool) -> Self {
        Self {
            pin,
            invert,
            bit_cycles: 0,
            cycles_per_micro: 1,
        }
    }

    /// Sets the bit period and the clock rate used to convert waits to
    /// microseconds.
    pub fn set_timing(&mut self, bit_cycles: u32, clock_hz: u32) {
        self.bit_cycles = bit_cycles;
        self.cycles_per_micro = cycles::cycles_per_micro(clock_hz);
    }

    /// Physical level of the idle line (logical mark).
    #[must_use]
    pub const fn idle_level(&self) -> bool {
        !self.invert
    }

    /// Drives the line to its idle level.
    pub fn idle<H: Gpio>(&self, hal: &H) {
        hal.write(self.pin, self.idle_level());
    }

    /// Sends `bytes` as 8N1 frames and returns the number sent.
    ///
    /// Interrupts stay masked except inside bit waits. `tx_enable`, if given,
    /// is held high for the whole transfer.
    pub fn transmit<H>(&self, hal: &H, bytes: &[u8], tx_enable: Option<Pin>) -> usize
    where
        H: CycleClock + Gpio + InterruptMask + Scheduler,
    {
        let _irq = IrqGuard::new(hal);

        if let Some(enable) = tx_enable {
            hal.write(enable, true);
        }
        self.idle(hal);

        for &byte in bytes {
            self.frame(hal, byte);
        }

        if let Some(enable) = tx_enable {
            hal.write(enable, false);
        }
        bytes.len()
    }

    /// Emits one frame: start bit, eight data bits LSB first, stop bit.
    fn frame<H>(&self, hal: &H, byte: u8)
    where
        H: CycleClock + Gpio + InterruptMask + Scheduler,
    {
        let mut level = false;
        let mut deadline = hal.cycles().wrapping_add(self.bit_cycles);
        hal.write(self.pin, level ^ self.invert);

        for bit in 0..9 {
            let next = bit == 8 || (byte >> bit) & 1 == 1;
            if next != level {
                self.wait_bit_cycles(hal, deadline);
                hal.write(self.pin, next ^ self.invert);
                level = next;
            }
            deadline = deadline.wrapping_add(self.bit_cycles);
        }

        // Stop bit, plus any data bits already at the stop level.
        self.wait_bit_cycles(hal, deadline);
    }

    /// Waits until `deadline` with interrupts enabled, so that a duplex
    /// receiver keeps capturing edges during the wait.
    fn wait_bit_cycles<H>(&self, hal: &H, deadline: CycleTimestamp)
    where
        H: CycleClock + InterruptMask + Scheduler,
    {
        hal.enable_interrupts();

        let per_micro = i32::try_from(self.cycles_per_micro).unwrap_or(i32::MAX);
        let micros = cycles::remaining(deadline, hal.cycles()) / per_micro;
        if let Ok(micros) = u32::try_from(micros) {
            if micros > YIELD_GUARD_US {
                hal.cooperative_yield(micros - YIELD_GUARD_US);
            }
        }
        while cycles::remaining(deadline, hal.cycles()) > 1 {
            core::hint::spin_loop();
        }

        hal.disable_interrupts();
    }
}
