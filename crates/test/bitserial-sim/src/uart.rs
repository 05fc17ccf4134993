//! Scripted external UART and a reference line decoder.
//!
//! The external transmitter derives its bit edges from the board frequency
//! with exact rational timing, so its clock is not aligned to the driver's
//! integer bit period. That mismatch is what a real peer looks like.

use bitserial_hal::Pin;

use crate::board::SimHandle;

/// 8N1 timing of a peer UART on the simulated board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartFrameTiming {
    /// Board clock frequency.
    pub frequency_hz: u32,
    /// Peer baud rate.
    pub baud: u32,
    /// Inverted line: idle low, start bit high.
    pub invert: bool,
}

impl UartFrameTiming {
    /// Non-inverted timing at `baud` on a board running at `frequency_hz`.
    #[must_use]
    pub const fn new(frequency_hz: u32, baud: u32) -> Self {
        Self {
            frequency_hz,
            baud,
            invert: false,
        }
    }

    /// Sets inverted logic.
    #[must_use]
    pub const fn inverted(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Board ticks from `origin` to the start of bit `n`.
    #[must_use]
    pub fn bit_offset(&self, n: u64) -> u64 {
        n * u64::from(self.frequency_hz) / u64::from(self.baud.max(1))
    }

    /// Length of one bit in whole board ticks.
    #[must_use]
    pub fn bit_ticks(&self) -> u64 {
        self.bit_offset(1)
    }

    /// Physical level of the idle line.
    #[must_use]
    pub const fn idle_level(&self) -> bool {
        !self.invert
    }
}

/// Logical levels of one frame: start, data LSB first, stop.
fn frame_levels(byte: u8) -> impl Iterator<Item = bool> {
    core::iter::once(false)
        .chain((0..8).map(move |bit| (byte >> bit) & 1 == 1))
        .chain(core::iter::once(true))
}

impl SimHandle {
    /// Schedules a peer on `pin` sending `bytes` back to back.
    ///
    /// The peer drives the idle level right away and the first start bit one
    /// bit period later. It keeps driving idle afterwards; release it with
    /// [`SimHandle::drive`]. Returns the board time at which the last stop
    /// bit ends.
    pub fn inject_uart(&self, pin: Pin, timing: UartFrameTiming, bytes: &[u8]) -> u64 {
        let now = self.now_ticks();
        self.schedule_drive(now, pin, Some(timing.idle_level()));

        let origin = now + timing.bit_ticks();
        let mut n = 0;
        for &byte in bytes {
            for level in frame_levels(byte) {
                self.schedule_drive(origin + timing.bit_offset(n), pin, Some(level ^ timing.invert));
                n += 1;
            }
        }
        origin + timing.bit_offset(n)
    }

    /// Like [`inject_uart`](Self::inject_uart), then lets the board run until
    /// the last stop bit has ended.
    pub fn play_uart(&self, pin: Pin, timing: UartFrameTiming, bytes: &[u8]) {
        let end = self.inject_uart(pin, timing, bytes);
        self.advance_to(end);
    }

    /// Schedules `count` level toggles on `pin`, `spacing` ticks apart,
    /// starting one spacing from now. Returns the time of the last toggle.
    pub fn inject_toggles(&self, pin: Pin, count: u32, spacing: u64) -> u64 {
        let now = self.now_ticks();
        let mut level = self.level(pin);
        let mut at = now;
        for _ in 0..count {
            at += spacing;
            level = !level;
            self.schedule_drive(at, pin, Some(level));
        }
        at
    }
}

/// Decodes a recorded line trace (see [`SimHandle::record`]) by sampling
/// every bit at its center, the way a hardware UART does.
///
/// Frames with a missing stop bit are skipped.
#[must_use]
pub fn decode_trace(trace: &[(u64, bool)], timing: UartFrameTiming) -> Vec<u8> {
    let level_at = |at: u64| {
        let idx = trace.partition_point(|&(t, _)| t <= at);
        if idx == 0 {
            timing.idle_level()
        } else {
            trace[idx - 1].1
        }
    };
    let center = |start: u64, bit: u64| start + timing.bit_offset(2 * bit + 1) / 2;

    let mut out = Vec::new();
    let mut resume = 0;
    for &(at, level) in trace {
        if at < resume || level ^ timing.invert {
            continue;
        }
        let mut byte = 0u8;
        for bit in 0..8 {
            if level_at(center(at, bit + 1)) ^ timing.invert {
                byte |= 1 << bit;
            }
        }
        let stop = center(at, 9);
        resume = stop;
        if level_at(stop) ^ timing.invert {
            out.push(byte);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::SimBoard;

    #[test]
    fn injected_frames_decode_from_trace() {
        let board = SimBoard::default();
        let pin = Pin::new(13);
        board.record(pin);

        let timing = UartFrameTiming::new(80_000_000, 115_200);
        board.play_uart(pin, timing, b"\x00\xffU*");
        assert_eq!(decode_trace(&board.take_trace(pin), timing), b"\x00\xffU*");
    }

    #[test]
    fn inverted_frames_decode_from_trace() {
        let board = SimBoard::default();
        let pin = Pin::new(14);
        board.set_pull(pin, false);
        board.record(pin);

        let timing = UartFrameTiming::new(80_000_000, 9600).inverted(true);
        board.play_uart(pin, timing, &[0x81, 0x7e]);
        assert_eq!(decode_trace(&board.take_trace(pin), timing), [0x81, 0x7e]);
    }

    #[test]
    fn toggles_alternate_the_line() {
        let board = SimBoard::default();
        let pin = Pin::new(0);
        board.record(pin);
        let last = board.inject_toggles(pin, 4, 100);
        board.advance_to(last);
        let levels: Vec<bool> = board.take_trace(pin).into_iter().map(|(_, l)| l).collect();
        assert_eq!(levels, [false, true, false, true]);
    }
}
