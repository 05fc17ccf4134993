//! Interior mutability for state owned by one interrupt line.
//!
//! The edge capture holds the producer half of its edge ring behind a shared
//! reference, because the pin registry hands the interrupt trampoline an
//! `Arc` to it. Only that pin's handler ever mutates the producer, and the
//! platform never nests a pin's handler inside itself, so no lock is needed.

use core::cell::UnsafeCell;

/// Shared-reference cell for data mutated from exactly one interrupt handler.
///
/// Unlike a lock, nothing is checked at runtime: every access goes through
/// the raw pointer from [`RacyCell::get`] and must be justified at the call
/// site.
#[repr(transparent)]
pub struct RacyCell<T>(UnsafeCell<T>);

// SAFETY: The value may be created on the main line and then mutated from
// interrupt context, so it must be `Send`.
unsafe impl<T: Send> Send for RacyCell<T> {}
// SAFETY: Shared references only expose a raw pointer. Dereferencing it is
// the caller's responsibility, which for the edge producer is discharged by
// the one-handler-per-pin rule.
unsafe impl<T: Send> Sync for RacyCell<T> {}

impl<T> RacyCell<T> {
    /// Wraps `value`.
    #[inline]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Raw pointer to the wrapped value.
    ///
    /// Turning it into `&mut T` is sound only while no other reference to
    /// the value is live, e.g. inside the single handler that owns it.
    #[inline]
    pub const fn get(&self) -> *mut T {
        self.0.get()
    }
}
