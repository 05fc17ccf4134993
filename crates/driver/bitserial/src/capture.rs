//! Interrupt-time edge capture.
//!
//! [`EdgeCapture`] is the producer side of the edge ring. The platform calls
//! it (through the pin trampoline) once per transition of the receive pin;
//! it samples the cycle counter and the pin level and queues the pair. It
//! does nothing else: no division, no logging, no yielding, no allocation.

use bitserial_core::cell::RacyCell;
use bitserial_core::cycles::CycleTimestamp;
use bitserial_core::sync::Producer;
use bitserial_hal::{CycleClock, Gpio, Pin};

/// One captured pin transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Cycle counter when the handler ran.
    pub timestamp: CycleTimestamp,
    /// Raw pin level sampled right after the timestamp, before inversion.
    pub level: bool,
}

/// Receiver of edge notifications for one pin.
pub trait EdgeSink: Send + Sync {
    /// Records one edge.
    ///
    /// # Safety
    ///
    /// Must not run concurrently with another `on_edge` call on the same
    /// sink. The pin registry only calls it from the pin's interrupt
    /// handler, which the platform serializes.
    unsafe fn on_edge(&self);
}

/// Edge ring producer bound to a receive pin.
pub struct EdgeCapture<H> {
    hal: H,
    pin: Pin,
    events: RacyCell<Producer<EdgeEvent>>,
}

impl<H> EdgeCapture<H> {
    /// Wraps the producer half of an edge ring.
    pub fn new(hal: H, pin: Pin, events: Producer<EdgeEvent>) -> Self {
        Self {
            hal,
            pin,
            events: RacyCell::new(events),
        }
    }
}

impl<H> EdgeSink for EdgeCapture<H>
where
    H: CycleClock + Gpio + Send + Sync,
{
    unsafe fn on_edge(&self) {
        // Timestamp first: it is what the decoder measures against.
        let timestamp = self.hal.cycles();
        let level = self.hal.read(self.pin);

        // SAFETY: The caller guarantees `on_edge` is not re-entered, so this
        // is the only live reference to the producer.
        let events = unsafe { &mut *self.events.get() };
        // A full ring latches the overflow flag; the edge is dropped.
        let _ = events.push(EdgeEvent { timestamp, level });
    }
}
