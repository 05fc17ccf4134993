//! Virtual clock, pins and interrupt controller.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use bitserial_hal::{
    CycleClock, EdgeHandler, EdgeInterrupts, Gpio, HalError, InterruptMask, Pin, PinMode,
    Scheduler,
};
use planck_noalloc::ringbuf::RingBuf;

use crate::logger;

/// Pins the board models: GPIO0 to GPIO16.
pub const SIM_PINS: usize = 17;

/// Pins below this number can raise edge interrupts. GPIO16 cannot.
const IRQ_PINS: usize = 16;

/// Pending interrupt latch. Holds each pin at most once.
const PENDING_DEPTH: usize = 32;

/// Board parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Cycle counter frequency.
    pub frequency_hz: u32,
    /// Cycles that pass on every counter read.
    pub cycles_per_read: u32,
    /// Cycles between an edge becoming deliverable and its handler running.
    pub isr_latency_cycles: u32,
    /// Counter value at power-up.
    pub start_counter: u32,
}

impl SimConfig {
    /// 80 MHz, 4 cycles per counter read, no interrupt latency.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frequency_hz: 80_000_000,
            cycles_per_read: 4,
            isr_latency_cycles: 0,
            start_counter: 0,
        }
    }

    /// Sets the clock frequency.
    #[must_use]
    pub const fn with_frequency(mut self, hz: u32) -> Self {
        self.frequency_hz = hz;
        self
    }

    /// Sets the cost of a counter read.
    #[must_use]
    pub const fn with_cycles_per_read(mut self, cycles: u32) -> Self {
        self.cycles_per_read = cycles;
        self
    }

    /// Sets the interrupt latency.
    #[must_use]
    pub const fn with_isr_latency(mut self, cycles: u32) -> Self {
        self.isr_latency_cycles = cycles;
        self
    }

    /// Sets the counter value at power-up, e.g. just below the wrap point.
    #[must_use]
    pub const fn with_start_counter(mut self, counter: u32) -> Self {
        self.start_counter = counter;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Board lease
// ---------------------------------------------------------------------------

// The driver's pin registry is process-global, so boards in one test binary
// take turns.
static BOARD_BUSY: Mutex<bool> = Mutex::new(false);
static BOARD_FREE: Condvar = Condvar::new();

struct Lease;

impl Lease {
    fn acquire() -> Self {
        let mut busy = BOARD_BUSY.lock().unwrap_or_else(PoisonError::into_inner);
        while *busy {
            busy = BOARD_FREE
                .wait(busy)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *busy = true;
        Lease
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        *BOARD_BUSY.lock().unwrap_or_else(PoisonError::into_inner) = false;
        BOARD_FREE.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Board state
// ---------------------------------------------------------------------------

/// A level imposed on a pin's net from outside the board.
#[derive(Debug, Clone, Copy)]
struct ExternalDrive {
    pin: usize,
    level: Option<bool>,
}

struct State {
    config: SimConfig,
    ticks: u64,

    modes: [PinMode; SIM_PINS],
    latch: [bool; SIM_PINS],
    external: [Option<bool>; SIM_PINS],
    /// Net id of each pin. Nets are indexed by their lowest original pin.
    net: [usize; SIM_PINS],
    pull: [bool; SIM_PINS],
    level: [bool; SIM_PINS],

    handlers: [Option<EdgeHandler>; SIM_PINS],
    irq_denied: u32,
    masked: bool,
    in_isr: bool,
    pending: RingBuf<u8, PENDING_DEPTH>,
    pending_set: u32,
    delivered: [u64; SIM_PINS],

    schedule: BTreeMap<(u64, u64), ExternalDrive>,
    next_seq: u64,
    recorders: [Option<Vec<(u64, bool)>>; SIM_PINS],
    yielded_micros: u64,
}

impl State {
    fn new(config: SimConfig) -> Self {
        Self {
            config,
            ticks: 0,
            modes: [PinMode::Input; SIM_PINS],
            latch: [false; SIM_PINS],
            external: [None; SIM_PINS],
            net: core::array::from_fn(|pin| pin),
            pull: [true; SIM_PINS],
            level: [true; SIM_PINS],
            handlers: [None; SIM_PINS],
            irq_denied: 0,
            masked: false,
            in_isr: false,
            pending: RingBuf::new(),
            pending_set: 0,
            delivered: [0; SIM_PINS],
            schedule: BTreeMap::new(),
            next_seq: 0,
            recorders: core::array::from_fn(|_| None),
            yielded_micros: 0,
        }
    }

    #[expect(clippy::cast_possible_truncation)]
    fn counter(&self) -> u32 {
        (self.ticks as u32).wrapping_add(self.config.start_counter)
    }

    /// Wired-AND of every driver on `net`, or its pull level if undriven.
    fn net_level(&self, net: usize) -> bool {
        let mut driven = None;
        for pin in (0..SIM_PINS).filter(|&pin| self.net[pin] == net) {
            if self.modes[pin] == PinMode::Output {
                driven = Some(driven.unwrap_or(true) && self.latch[pin]);
            }
            if let Some(level) = self.external[pin] {
                driven = Some(driven.unwrap_or(true) && level);
            }
        }
        driven.unwrap_or(self.pull[net])
    }

    fn pin_level(&self, pin: usize) -> bool {
        self.level[self.net[pin]]
    }

    /// Recomputes every net and latches interrupts for pins that saw a
    /// change.
    fn settle(&mut self) {
        for net in 0..SIM_PINS {
            let level = self.net_level(net);
            if level == self.level[net] {
                continue;
            }
            self.level[net] = level;

            for pin in 0..SIM_PINS {
                if self.net[pin] != net {
                    continue;
                }
                let ticks = self.ticks;
                if let Some(trace) = self.recorders[pin].as_mut() {
                    trace.push((ticks, level));
                }
                if self.handlers[pin].is_some() {
                    self.latch_irq(pin);
                }
            }
        }
    }

    fn latch_irq(&mut self, pin: usize) {
        let bit = 1 << pin;
        if self.pending_set & bit != 0 {
            return;
        }
        let Ok(id) = u8::try_from(pin) else {
            return;
        };
        if self.pending.try_push(id).is_ok() {
            self.pending_set |= bit;
        }
    }

    /// Applies the next batch of scheduled drives due by `target`, or moves
    /// the clock to `target` if there is none. Returns `true` if a batch ran.
    fn step_until(&mut self, target: u64) -> bool {
        let due = match self.schedule.first_key_value() {
            Some((&(at, _), _)) if at <= target => at,
            _ => {
                self.ticks = self.ticks.max(target);
                return false;
            }
        };

        self.ticks = self.ticks.max(due);
        while let Some(entry) = self.schedule.first_entry() {
            if entry.key().0 != due {
                break;
            }
            let drive = entry.remove();
            self.external[drive.pin] = drive.level;
        }
        self.settle();
        true
    }

    /// Pops the next deliverable interrupt and enters interrupt context.
    fn next_isr(&mut self) -> Option<EdgeHandler> {
        if self.masked || self.in_isr {
            return None;
        }
        while let Some(pin) = self.pending.pop() {
            let pin = usize::from(pin);
            self.pending_set &= !(1 << pin);
            if let Some(handler) = self.handlers[pin] {
                self.in_isr = true;
                self.delivered[pin] += 1;
                return Some(handler);
            }
        }
        None
    }

    fn schedule(&mut self, at: u64, drive: ExternalDrive) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.schedule.insert((at, seq), drive);
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Cloneable access to a [`SimBoard`]. This is the type handed to the
/// driver as its platform.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<State>>,
}

impl SimHandle {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs pending edge handlers until none is deliverable.
    ///
    /// The board lock is never held while a handler runs: handlers read the
    /// clock and the pin like any other caller.
    fn run_isrs(&self) {
        loop {
            let next = self.state().next_isr();
            let Some(handler) = next else {
                break;
            };
            let latency = self.state().config.isr_latency_cycles;
            if latency > 0 {
                self.advance_cycles(u64::from(latency));
            }
            handler();
            self.state().in_isr = false;
        }
    }

    fn with_pin(&self, pin: Pin, f: impl FnOnce(&mut State, usize)) {
        let index = pin.index();
        if index >= SIM_PINS {
            return;
        }
        f(&mut self.state(), index);
        self.run_isrs();
    }

    /// Lets `cycles` pass, firing scheduled line changes and their
    /// interrupts at the cycle they fall on.
    pub fn advance_cycles(&self, cycles: u64) {
        let target = self.state().ticks + cycles;
        loop {
            let stepped = self.state().step_until(target);
            self.run_isrs();
            if !stepped {
                break;
            }
        }
    }

    /// Lets `micros` microseconds pass.
    pub fn advance_micros(&self, micros: u64) {
        self.advance_cycles(micros * u64::from(self.cycles_per_micro()));
    }

    /// Advances to the absolute board time `ticks`, if it lies ahead.
    pub fn advance_to(&self, ticks: u64) {
        let now = self.now_ticks();
        if ticks > now {
            self.advance_cycles(ticks - now);
        }
    }

    /// Cycles elapsed since power-up. Unlike the counter, never wraps and
    /// does not advance when read.
    #[must_use]
    pub fn now_ticks(&self) -> u64 {
        self.state().ticks
    }

    /// Current counter value, without the cost of a read.
    #[must_use]
    pub fn counter(&self) -> u32 {
        self.state().counter()
    }

    /// Whole cycles per microsecond.
    #[must_use]
    pub fn cycles_per_micro(&self) -> u32 {
        (self.state().config.frequency_hz / 1_000_000).max(1)
    }

    /// The board parameters.
    #[must_use]
    pub fn config(&self) -> SimConfig {
        self.state().config
    }

    /// Connects the nets of `a` and `b`. Wire pins before driving them.
    pub fn wire(&self, a: Pin, b: Pin) {
        let (a, b) = (a.index(), b.index());
        if a >= SIM_PINS || b >= SIM_PINS {
            return;
        }
        let mut state = self.state();
        let (keep, merge) = (state.net[a], state.net[b]);
        if keep == merge {
            return;
        }
        for net in &mut state.net {
            if *net == merge {
                *net = keep;
            }
        }
        state.settle();
        drop(state);
        self.run_isrs();
    }

    /// Sets the level the net of `pin` rests at when nothing drives it.
    pub fn set_pull(&self, pin: Pin, high: bool) {
        self.with_pin(pin, |state, index| {
            let net = state.net[index];
            state.pull[net] = high;
            state.settle();
        });
    }

    /// Drives the net of `pin` from outside, or releases it with `None`.
    pub fn drive(&self, pin: Pin, level: Option<bool>) {
        self.with_pin(pin, |state, index| {
            state.external[index] = level;
            state.settle();
        });
    }

    /// Schedules an external drive change at board time `at`.
    pub fn schedule_drive(&self, at: u64, pin: Pin, level: Option<bool>) {
        let index = pin.index();
        if index < SIM_PINS {
            self.state().schedule(at, ExternalDrive { pin: index, level });
        }
    }

    /// Returns `true` while scheduled drive changes remain.
    #[must_use]
    pub fn has_scheduled(&self) -> bool {
        !self.state().schedule.is_empty()
    }

    /// Makes `pin` unable to raise interrupts, so attaching fails.
    pub fn deny_interrupt(&self, pin: Pin) {
        if pin.index() < IRQ_PINS {
            self.state().irq_denied |= 1 << pin.index();
        }
    }

    /// Starts recording level changes seen on `pin`.
    pub fn record(&self, pin: Pin) {
        if let Some(trace) = self.state().recorders.get_mut(pin.index()) {
            *trace = Some(Vec::new());
        }
    }

    /// Returns the changes recorded on `pin` as `(board ticks, level)` and
    /// keeps recording.
    #[must_use]
    pub fn take_trace(&self, pin: Pin) -> Vec<(u64, bool)> {
        self.state()
            .recorders
            .get_mut(pin.index())
            .and_then(Option::as_mut)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Level of `pin`'s net, without advancing the clock.
    #[must_use]
    pub fn level(&self, pin: Pin) -> bool {
        let index = pin.index();
        index < SIM_PINS && self.state().pin_level(index)
    }

    /// Current mode of `pin`.
    #[must_use]
    pub fn mode(&self, pin: Pin) -> Option<PinMode> {
        self.state().modes.get(pin.index()).copied()
    }

    /// Returns `true` if an edge handler is attached to `pin`.
    #[must_use]
    pub fn has_edge_handler(&self, pin: Pin) -> bool {
        self.state()
            .handlers
            .get(pin.index())
            .is_some_and(Option::is_some)
    }

    /// Edge interrupts delivered on `pin` so far.
    #[must_use]
    pub fn interrupts_delivered(&self, pin: Pin) -> u64 {
        self.state().delivered.get(pin.index()).copied().unwrap_or(0)
    }

    /// Returns `true` while interrupts are globally masked.
    #[must_use]
    pub fn interrupts_masked(&self) -> bool {
        self.state().masked
    }

    /// Total microseconds handed out through cooperative yields.
    #[must_use]
    pub fn yielded_micros(&self) -> u64 {
        self.state().yielded_micros
    }
}

impl CycleClock for SimHandle {
    fn cycles(&self) -> u32 {
        let step = self.state().config.cycles_per_read;
        self.advance_cycles(u64::from(step));
        self.counter()
    }

    fn frequency_hz(&self) -> u32 {
        self.state().config.frequency_hz
    }
}

impl Gpio for SimHandle {
    fn set_mode(&self, pin: Pin, mode: PinMode) {
        self.with_pin(pin, |state, index| {
            state.modes[index] = mode;
            state.settle();
        });
    }

    fn write(&self, pin: Pin, high: bool) {
        self.with_pin(pin, |state, index| {
            state.latch[index] = high;
            state.settle();
        });
    }

    fn read(&self, pin: Pin) -> bool {
        self.level(pin)
    }
}

impl EdgeInterrupts for SimHandle {
    fn attach_edge(&self, pin: Pin, handler: EdgeHandler) -> Result<(), HalError> {
        let index = pin.index();
        if index >= SIM_PINS {
            return Err(HalError::NoSuchPin(pin));
        }
        let mut state = self.state();
        if index >= IRQ_PINS || state.irq_denied & (1 << index) != 0 {
            return Err(HalError::NoInterrupt(pin));
        }
        state.handlers[index] = Some(handler);
        Ok(())
    }

    fn detach(&self, pin: Pin) {
        if let Some(handler) = self.state().handlers.get_mut(pin.index()) {
            *handler = None;
        }
    }
}

impl InterruptMask for SimHandle {
    fn disable_interrupts(&self) {
        self.state().masked = true;
    }

    fn enable_interrupts(&self) {
        self.state().masked = false;
        self.run_isrs();
    }
}

impl Scheduler for SimHandle {
    fn cooperative_yield(&self, micros: u32) {
        self.state().yielded_micros += u64::from(micros);
        self.advance_micros(u64::from(micros));
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// A simulated board. Only one exists at a time in a process; creating a
/// second one waits until the first is dropped.
///
/// Dereferences to its [`SimHandle`]; hand [`SimBoard::handle`] to the
/// driver.
pub struct SimBoard {
    handle: SimHandle,
    _lease: Lease,
}

impl SimBoard {
    /// Powers up a board.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let lease = Lease::acquire();
        logger::clear();
        Self {
            handle: SimHandle {
                state: Arc::new(Mutex::new(State::new(config))),
            },
            _lease: lease,
        }
    }

    /// A handle to pass to the driver.
    #[must_use]
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Deref for SimBoard {
    type Target = SimHandle;

    fn deref(&self) -> &SimHandle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const RX: Pin = Pin::new(4);
    const TX: Pin = Pin::new(5);

    #[test]
    fn counter_advances_per_read_and_wraps() {
        let board = SimBoard::new(SimConfig::new().with_start_counter(u32::MAX - 5));
        let hal = board.handle();
        assert_eq!(hal.cycles(), u32::MAX - 1);
        assert_eq!(hal.cycles(), 2);
        assert_eq!(board.now_ticks(), 8);
    }

    #[test]
    fn yield_advances_by_micros() {
        let board = SimBoard::default();
        board.handle().cooperative_yield(10);
        assert_eq!(board.now_ticks(), 800);
        assert_eq!(board.yielded_micros(), 10);
    }

    #[test]
    fn wired_pins_share_a_level() {
        let board = SimBoard::default();
        let hal = board.handle();
        board.wire(TX, RX);
        hal.write(TX, false);
        assert!(hal.read(RX), "input pin does not drive");
        hal.set_mode(TX, PinMode::Output);
        assert!(!hal.read(RX));
        hal.write(TX, true);
        assert!(hal.read(RX));
    }

    #[test]
    fn external_and_output_are_wired_and() {
        let board = SimBoard::default();
        let hal = board.handle();
        hal.write(TX, true);
        hal.set_mode(TX, PinMode::Output);
        board.drive(TX, Some(false));
        assert!(!board.level(TX));
        board.drive(TX, None);
        assert!(board.level(TX));
    }

    static HITS: AtomicU32 = AtomicU32::new(0);

    fn count_hit() {
        HITS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn masked_edges_are_latched_once() {
        let board = SimBoard::default();
        let hal = board.handle();
        HITS.store(0, Ordering::Relaxed);
        hal.attach_edge(RX, count_hit).unwrap();

        board.drive(RX, Some(false));
        assert_eq!(HITS.load(Ordering::Relaxed), 1);

        hal.disable_interrupts();
        board.drive(RX, Some(true));
        board.drive(RX, Some(false));
        assert_eq!(HITS.load(Ordering::Relaxed), 1);
        hal.enable_interrupts();
        assert_eq!(HITS.load(Ordering::Relaxed), 2);
        assert_eq!(board.interrupts_delivered(RX), 2);

        hal.detach(RX);
        board.drive(RX, None);
        assert_eq!(HITS.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn scheduled_drives_fire_at_their_cycle() {
        static SEEN: AtomicU32 = AtomicU32::new(0);
        fn stamp() {
            SEEN.store(1, Ordering::Relaxed);
        }

        let board = SimBoard::default();
        let hal = board.handle();
        hal.attach_edge(RX, stamp).unwrap();
        board.record(RX);
        board.schedule_drive(1000, RX, Some(false));

        board.advance_cycles(999);
        assert_eq!(SEEN.load(Ordering::Relaxed), 0);
        board.advance_cycles(10);
        assert_eq!(SEEN.load(Ordering::Relaxed), 1);
        assert_eq!(board.take_trace(RX), [(1000, false)]);
        assert!(!board.has_scheduled());
    }

    #[test]
    fn interrupt_pins_are_limited() {
        let board = SimBoard::default();
        let hal = board.handle();
        assert_eq!(
            hal.attach_edge(Pin::new(16), count_hit),
            Err(HalError::NoInterrupt(Pin::new(16)))
        );
        assert_eq!(
            hal.attach_edge(Pin::new(17), count_hit),
            Err(HalError::NoSuchPin(Pin::new(17)))
        );
        board.deny_interrupt(Pin::new(2));
        assert!(hal.attach_edge(Pin::new(2), count_hit).is_err());
    }
}
