//! Receive pin registry and interrupt trampolines.
//!
//! The platform's edge interrupt carries no argument, so each receive pin
//! gets its own trampoline function. The trampoline looks up the pin's slot
//! in a fixed table and forwards to the [`EdgeSink`] registered there.
//!
//! A slot has at most one owner. Registering a second port on the same pin
//! replaces the first one, and the evicted port can no longer release or
//! detach the slot it lost.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicPtr, Ordering};

use bitserial_hal::{EdgeHandler, NUM_PINS, Pin};

use crate::capture::EdgeSink;

/// Boxed so the slot can hold a thin pointer to a fat `Arc<dyn EdgeSink>`.
type Slot = Arc<dyn EdgeSink>;

/// Fixed table of receive pin owners.
pub struct PinRegistry {
    slots: [AtomicPtr<Slot>; NUM_PINS],
}

/// The registry the trampolines dispatch through.
pub static REGISTRY: PinRegistry = PinRegistry::new();

impl PinRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { AtomicPtr::new(core::ptr::null_mut()) }; NUM_PINS],
        }
    }

    fn slot(&self, pin: Pin) -> Option<&AtomicPtr<Slot>> {
        self.slots.get(pin.index())
    }

    /// Makes `sink` the owner of `pin`.
    ///
    /// Returns `true` if a previous owner was evicted. Pins outside the table
    /// are ignored.
    ///
    /// The evicted sink is dropped here. On the single-core model an edge
    /// handler always runs to completion before main-line code resumes, so
    /// no dispatch can still be using it.
    pub fn register(&self, pin: Pin, sink: Slot) -> bool {
        let Some(slot) = self.slot(pin) else {
            return false;
        };

        let new = Box::into_raw(Box::new(sink));
        let old = slot.swap(new, Ordering::AcqRel);
        if old.is_null() {
            return false;
        }

        // SAFETY: Non-null slot values always come from `Box::into_raw` above
        // and are removed from the table before being freed.
        drop(unsafe { Box::from_raw(old) });
        true
    }

    /// Releases `pin` if `sink` still owns it. Returns `true` on release.
    pub fn unregister(&self, pin: Pin, sink: &Slot) -> bool {
        let Some(slot) = self.slot(pin) else {
            return false;
        };

        let current = slot.load(Ordering::Acquire);
        if current.is_null() {
            return false;
        }
        // SAFETY: See `register`: the pointer is a live boxed `Slot`.
        if !Arc::ptr_eq(unsafe { &*current }, sink) {
            return false;
        }

        if slot
            .compare_exchange(
                current,
                core::ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        // SAFETY: We just took the pointer out of the table.
        drop(unsafe { Box::from_raw(current) });
        true
    }

    /// Returns `true` if `sink` currently owns `pin`.
    pub fn is_owner(&self, pin: Pin, sink: &Slot) -> bool {
        let Some(slot) = self.slot(pin) else {
            return false;
        };
        let current = slot.load(Ordering::Acquire);
        // SAFETY: See `register`.
        !current.is_null() && Arc::ptr_eq(unsafe { &*current }, sink)
    }

    /// Forwards an edge on `index` to its owner, if any.
    ///
    /// Called only from the per-pin trampolines, i.e. from the pin's edge
    /// interrupt.
    pub fn dispatch(&self, index: usize) {
        let Some(slot) = self.slots.get(index) else {
            return;
        };
        let current = slot.load(Ordering::Acquire);
        if current.is_null() {
            return;
        }
        // SAFETY: The pointer is a live boxed `Slot` (see `register`), and the
        // platform serializes handlers for one pin, which is the contract of
        // `EdgeSink::on_edge`.
        unsafe { (*current).on_edge() };
    }
}

impl Default for PinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PinRegistry {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            let ptr = *slot.get_mut();
            if !ptr.is_null() {
                // SAFETY: We have exclusive access; the pointer is a live box.
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Trampolines
// ---------------------------------------------------------------------------

macro_rules! trampolines {
    ($($index:literal => $name:ident),* $(,)?) => {
        $(
            fn $name() {
                REGISTRY.dispatch($index);
            }
        )*

        static TRAMPOLINES: [EdgeHandler; NUM_PINS] = [$($name),*];
    };
}

trampolines! {
    0 => edge_gpio0,
    1 => edge_gpio1,
    2 => edge_gpio2,
    3 => edge_gpio3,
    4 => edge_gpio4,
    5 => edge_gpio5,
    6 => edge_gpio6,
    7 => edge_gpio7,
    8 => edge_gpio8,
    9 => edge_gpio9,
    10 => edge_gpio10,
    11 => edge_gpio11,
    12 => edge_gpio12,
    13 => edge_gpio13,
    14 => edge_gpio14,
    15 => edge_gpio15,
}

/// Returns the interrupt entry point for `pin`, dispatching through
/// [`REGISTRY`]. `None` for pins without a slot.
#[must_use]
pub fn trampoline(pin: Pin) -> Option<EdgeHandler> {
    TRAMPOLINES.get(pin.index()).copied()
}
