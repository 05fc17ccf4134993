//! Single-producer / single-consumer ring buffer with a sticky overflow flag.
//!
//! The ring is split into a [`Producer`] and a [`Consumer`] handle. Each side
//! owns exactly one index: the producer publishes the write index, the
//! consumer publishes the read index. Because no index has two writers, the
//! ring needs no lock and the producer can run in interrupt context while the
//! consumer runs in main-line code.
//!
//! When the ring is full, [`Producer::push`] drops the value and latches the
//! overflow flag instead of overwriting unread data. The consumer retrieves
//! and clears the flag with [`Consumer::take_overflow`].
//!
//! # Example
//!
//! ```
//! use bitserial_core::sync::ring;
//!
//! let (mut tx, mut rx) = ring::<u8>(2);
//! tx.push(1).unwrap();
//! tx.push(2).unwrap();
//! assert_eq!(tx.push(3), Err(3));
//!
//! assert_eq!(rx.pop(), Some(1));
//! assert!(rx.take_overflow());
//! assert!(!rx.take_overflow());
//! ```

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::mem::MaybeUninit;

use super::loom_compat::{Arc, AtomicBool, AtomicUsize, Ordering, UnsafeCell};

/// Storage shared by the two halves of a ring.
struct Shared<T> {
    /// Backing slots. One slot is always left empty so that `head == tail`
    /// means empty and `head + 1 == tail` means full.
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Write index. Only the producer stores to it.
    head: AtomicUsize,
    /// Read index. Only the consumer stores to it.
    tail: AtomicUsize,
    /// Latched when a push found the ring full.
    overflow: AtomicBool,
}

// SAFETY: A slot is written only by the producer while it is outside the
// `tail..head` window and read only by the consumer while it is inside it.
// The Release store of `head` / Acquire load in the consumer (and vice versa
// for `tail`) order the slot accesses, so no slot is ever accessed from both
// sides at once.
unsafe impl<T: Send> Send for Shared<T> {}
// SAFETY: See above.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn next(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.slots.len() { 0 } else { next }
    }

    #[inline]
    fn len(&self, head: usize, tail: usize) -> usize {
        if head >= tail {
            head - tail
        } else {
            head + self.slots.len() - tail
        }
    }
}

/// Creates a ring able to hold `capacity` elements.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn ring<T: Copy + Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity > 0, "ring capacity must be non-zero");

    let slots: Vec<UnsafeCell<MaybeUninit<T>>> = (0..=capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();

    let shared = Arc::new(Shared {
        slots: slots.into_boxed_slice(),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        overflow: AtomicBool::new(false),
    });

    (
        Producer {
            shared: shared.clone(),
        },
        Consumer { shared },
    )
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// The writing half of a ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> Producer<T> {
    /// Appends `value`.
    ///
    /// The slot is written before the write index is published, so the
    /// consumer never observes a half-written element.
    ///
    /// # Errors
    ///
    /// Returns the value back if the ring is full. The overflow flag is set
    /// in that case.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Relaxed);
        let next = shared.next(head);

        if next == shared.tail.load(Ordering::Acquire) {
            shared.overflow.store(true, Ordering::Relaxed);
            return Err(value);
        }

        // SAFETY: `head` is outside the readable window, so the consumer
        // does not touch this slot until we publish `next`.
        shared.slots[head].with_mut(|slot| unsafe {
            (*slot).write(value);
        });
        shared.head.store(next, Ordering::Release);
        Ok(())
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("head", &self.shared.head.load(Ordering::Relaxed))
            .field("capacity", &(self.shared.slots.len() - 1))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// The reading half of a ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> Consumer<T> {
    /// Removes and returns the oldest element.
    pub fn pop(&mut self) -> Option<T> {
        let value = self.peek()?;
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        shared.tail.store(shared.next(tail), Ordering::Release);
        Some(value)
    }

    /// Returns the oldest element without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        if tail == shared.head.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `tail != head`, so the slot was initialised by a push whose
        // Release store of `head` we observed with the Acquire load above.
        // `T: Copy`, so reading it out leaves nothing to drop.
        Some(shared.slots[tail].with(|slot| unsafe { (*slot).assume_init_read() }))
    }

    /// Number of elements currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        let head = shared.head.load(Ordering::Acquire);
        shared.len(head, tail)
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards everything currently queued.
    ///
    /// Only the read index moves, so this is safe against a producer that
    /// keeps pushing concurrently: anything pushed after the snapshot of the
    /// write index survives.
    pub fn clear(&mut self) {
        let head = self.shared.head.load(Ordering::Acquire);
        self.shared.tail.store(head, Ordering::Release);
    }

    /// Returns and clears the overflow flag.
    pub fn take_overflow(&self) -> bool {
        self.shared.overflow.swap(false, Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("tail", &self.shared.tail.load(Ordering::Relaxed))
            .field("capacity", &(self.shared.slots.len() - 1))
            .finish_non_exhaustive()
    }
}
