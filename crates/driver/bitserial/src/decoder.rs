//! Edge-to-byte decoder.
//!
//! The capture ring holds only transitions, so a run of equal bits produces a
//! single edge. The decoder measures the time since the previous edge in bit
//! periods and shifts in the bits that went by without an edge at the level
//! of the last bit seen. Sampling is centered: every interval is shortened by
//! half a bit before it is divided up.
//!
//! A frame whose last data bits are already at the stop level ends without
//! an edge of its own. [`Decoder::decode`] closes such a frame once the line
//! has been quiet long enough, by replaying a virtual edge at the idle level.

use bitserial_core::cycles::{self, CycleTimestamp};
use bitserial_core::sync::{Consumer, Producer};

use crate::capture::EdgeEvent;

/// Frame position of the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderState {
    /// `-1` inside the start bit, `0..=7` after that many data bits, `8`
    /// idle or inside the stop bit.
    pub current_bit: i8,
    /// Data bits shifted in so far, MSB first in, LSB out.
    pub current_byte: u8,
    /// Timestamp of the last edge replayed.
    pub last_edge: CycleTimestamp,
}

impl DecoderState {
    /// Position inside the start bit.
    pub const START_BIT: i8 = -1;
    /// Position of the last data bit.
    pub const LAST_DATA_BIT: i8 = 7;
    /// Idle line or stop bit.
    pub const IDLE: i8 = 8;

    /// Idle state.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            current_bit: Self::IDLE,
            current_byte: 0,
            last_edge: 0,
        }
    }

    /// Returns `true` between a start bit and the end of the data bits.
    #[must_use]
    pub const fn in_frame(&self) -> bool {
        self.current_bit >= 0 && self.current_bit < Self::IDLE
    }
}

impl Default for DecoderState {
    fn default() -> Self {
        Self::idle()
    }
}

/// 8N1 decoder state machine.
#[derive(Debug, Clone)]
pub struct Decoder {
    bit_cycles: u32,
    invert: bool,
    grace_bits: u32,
    state: DecoderState,
}

impl Decoder {
    /// Creates an idle decoder. A zero `bit_cycles` disables decoding.
    #[must_use]
    pub const fn new(bit_cycles: u32, invert: bool, grace_bits: u32) -> Self {
        Self {
            bit_cycles,
            invert,
            grace_bits,
            state: DecoderState::idle(),
        }
    }

    /// Changes the bit period, e.g. after a new baud rate.
    pub fn set_bit_cycles(&mut self, bit_cycles: u32) {
        self.bit_cycles = bit_cycles;
    }

    /// Bit period in cycles.
    #[must_use]
    pub const fn bit_cycles(&self) -> u32 {
        self.bit_cycles
    }

    /// Drops any partial frame and waits for the next start bit.
    pub fn reset(&mut self) {
        self.state = DecoderState::idle();
    }

    /// Current frame position.
    #[must_use]
    pub const fn state(&self) -> DecoderState {
        self.state
    }

    /// Quiet time after the last edge at which the current frame is closed.
    fn stop_bit_threshold(&self) -> u32 {
        // `in_frame` guarantees 0 <= current_bit < 8.
        let done = u32::from(self.state.current_bit.unsigned_abs());
        (9 - done)
            .saturating_add(self.grace_bits)
            .saturating_mul(self.bit_cycles)
    }

    /// Drains `edges` into `bytes` and returns the number of bytes stored.
    ///
    /// `now` is read once, before draining. Every edge timestamped up to that
    /// point is already in the ring, so if the ring is empty afterwards and a
    /// frame is still open, its stop bit can be synthesized without passing
    /// a real edge. Bytes that do not fit in `bytes` are dropped and latch
    /// its overflow flag.
    pub fn decode(
        &mut self,
        edges: &mut Consumer<EdgeEvent>,
        bytes: &mut Producer<u8>,
        now: impl FnOnce() -> CycleTimestamp,
    ) -> usize {
        if self.bit_cycles == 0 {
            return 0;
        }

        let now = now();
        let mut stored = 0;

        while let Some(edge) = edges.pop() {
            stored += self.replay(edge.timestamp, edge.level ^ self.invert, bytes);
        }

        if self.state.in_frame() && edges.is_empty() {
            let threshold = self.stop_bit_threshold();
            if cycles::elapsed(self.state.last_edge, now) > threshold {
                let stop_at = self.state.last_edge.wrapping_add(threshold);
                stored += self.replay(stop_at, true, bytes);
            }
        }

        stored
    }

    /// Feeds one edge at logical `level` into the state machine.
    fn replay(&mut self, timestamp: CycleTimestamp, level: bool, bytes: &mut Producer<u8>) -> usize {
        let bit = i64::from(self.bit_cycles);
        let state = &mut self.state;

        let mut cycles =
            i64::from(cycles::elapsed(state.last_edge, timestamp)) - bit / 2;
        state.last_edge = timestamp;

        let mut stored = 0;
        loop {
            let cur = state.current_bit;

            if (DecoderState::START_BIT..DecoderState::LAST_DATA_BIT).contains(&cur) {
                if cycles >= bit {
                    // Bits without an edge repeat the previous level.
                    let max_hidden = i64::from(DecoderState::LAST_DATA_BIT - cur);
                    let hidden = (cycles / bit).min(max_hidden);
                    // 1..=8, so the narrowing casts are exact.
                    #[expect(clippy::cast_possible_truncation)]
                    let hidden_bits = hidden as i8;
                    let shift = hidden_bits.unsigned_abs();
                    let last_high = state.current_byte & 0x80 != 0;
                    let mut byte = u32::from(state.current_byte) >> shift;
                    if last_high {
                        byte |= (0xff << (8 - shift)) & 0xff;
                    }
                    #[expect(clippy::cast_possible_truncation)]
                    let byte = byte as u8;
                    state.current_byte = byte;
                    state.current_bit += hidden_bits;
                    cycles -= hidden * bit;
                }
                if state.current_bit < DecoderState::LAST_DATA_BIT {
                    state.current_bit += 1;
                    cycles -= bit;
                    state.current_byte >>= 1;
                    if level {
                        state.current_byte |= 0x80;
                    }
                }
            } else if cur == DecoderState::LAST_DATA_BIT {
                state.current_bit = DecoderState::IDLE;
                cycles -= bit;
                if bytes.push(state.current_byte).is_ok() {
                    stored += 1;
                }
                state.current_byte = 0;
            } else {
                if !level {
                    state.current_bit = DecoderState::START_BIT;
                }
                break;
            }

            if cycles < 0 {
                break;
            }
        }
        stored
    }
}
