//! Wrapping arithmetic on the free-running cycle counter.
//!
//! The counter is 32 bits wide and wraps silently. Elapsed time is always the
//! wrapping difference `now - then`; deadlines are compared through the
//! signed difference so that a deadline just past the wrap point is still
//! "in the future".

/// A raw cycle-counter reading.
pub type CycleTimestamp = u32;

/// Cycles elapsed from `since` to `now`, across at most one wrap.
#[inline]
#[must_use]
pub const fn elapsed(since: CycleTimestamp, now: CycleTimestamp) -> u32 {
    now.wrapping_sub(since)
}

/// Signed number of cycles left until `deadline`. Negative once passed.
#[inline]
#[must_use]
#[expect(clippy::cast_possible_wrap, reason = "signed view of a wrapping difference")]
pub const fn remaining(deadline: CycleTimestamp, now: CycleTimestamp) -> i32 {
    deadline.wrapping_sub(now) as i32
}

/// Length of one bit in cycles at the given clock and baud rate.
///
/// Returns 0 for a zero baud rate.
#[inline]
#[must_use]
pub const fn bit_cycles(clock_hz: u32, baud: u32) -> u32 {
    if baud == 0 { 0 } else { clock_hz / baud }
}

/// The baud rate actually produced by a bit period of `bit_cycles`.
///
/// Returns 0 for a zero bit period.
#[inline]
#[must_use]
pub const fn baud_rate(clock_hz: u32, bit_cycles: u32) -> u32 {
    if bit_cycles == 0 { 0 } else { clock_hz / bit_cycles }
}

/// Whole cycles per microsecond, never less than 1.
#[inline]
#[must_use]
pub const fn cycles_per_micro(clock_hz: u32) -> u32 {
    let mhz = clock_hz / 1_000_000;
    if mhz == 0 { 1 } else { mhz }
}
