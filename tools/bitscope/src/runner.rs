//! Runs a scenario on the simulated board.

use std::fmt;

use anyhow::{Result, ensure};
use bitserial::{Capabilities, PortConfig, SoftSerial};
use bitserial_hal::Pin;
use bitserial_sim::{SimBoard, SimConfig, SimHandle, UartFrameTiming, decode_trace};

use crate::scenario::{Mode, Scenario};

/// Bit periods the line rests after the last frame, so that a frame ending
/// without an edge can be closed.
const REST_BITS: u64 = 20;

/// Outcome of one scenario run.
#[derive(Debug, Clone)]
pub struct Report {
    /// Scenario name.
    pub name: String,
    /// Baud rate the port actually runs at.
    pub actual_baud: u32,
    /// What the port reported after pin validation.
    pub capabilities: Capabilities,
    /// Bytes the port transmitted, if it transmitted.
    pub sent: Option<Vec<u8>>,
    /// Bytes expected at the receiving end.
    pub expected: Vec<u8>,
    /// Bytes the receiving end decoded.
    pub received: Vec<u8>,
    /// What a reference UART decoded from the port's transmit pin, if it
    /// transmitted.
    pub on_wire: Option<Vec<u8>>,
    /// Whether the port reported an overflow.
    pub overflow: bool,
    /// Edge interrupts delivered on the receive pin.
    pub edges: u64,
    /// Simulated time in microseconds.
    pub elapsed_us: u64,
    /// Recorded transitions of the transmit pin as `(ticks, level)`.
    pub trace: Vec<(u64, bool)>,
}

impl Report {
    /// Returns `true` if everything sent arrived intact.
    pub fn passed(&self) -> bool {
        self.received == self.expected && self.on_wire == self.sent && !self.overflow
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scenario:     {}", self.name)?;
        writeln!(f, "baud:         {}", self.actual_baud)?;
        writeln!(f, "capabilities: {:?}", self.capabilities)?;
        writeln!(f, "expected:     {}", Escaped(&self.expected))?;
        writeln!(f, "received:     {}", Escaped(&self.received))?;
        if let Some(wire) = &self.on_wire {
            writeln!(f, "on wire:      {}", Escaped(wire))?;
        }
        writeln!(f, "edges:        {}", self.edges)?;
        writeln!(f, "overflow:     {}", self.overflow)?;
        write!(f, "elapsed:      {} us", self.elapsed_us)
    }
}

/// Byte string shown with non-printable bytes escaped.
struct Escaped<'a>(&'a [u8]);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"")?;
        for &byte in self.0 {
            write!(f, "{}", std::ascii::escape_default(byte))?;
        }
        f.write_str("\"")
    }
}

fn pin(number: u8) -> Pin {
    Pin::new(number)
}

/// Runs `scenario` to completion.
pub fn run(scenario: &Scenario) -> Result<Report> {
    let board = SimBoard::new(
        SimConfig::new()
            .with_frequency(scenario.clock_hz)
            .with_isr_latency(scenario.isr_latency_cycles)
            .with_start_counter(scenario.start_counter),
    );

    let rx = pin(scenario.pins.rx);
    let tx = if scenario.mode == Mode::OneWire {
        rx
    } else {
        pin(scenario.pins.tx)
    };
    if scenario.invert {
        board.set_pull(rx, false);
    }
    if scenario.mode == Mode::Loopback {
        board.wire(tx, rx);
    }

    let config = PortConfig::new(rx, tx)
        .inverted(scenario.invert)
        .with_buffer_capacity(scenario.buffer_capacity)
        .with_edge_capacity(scenario.edge_capacity)
        .with_stop_bit_grace(scenario.stop_bit_grace);
    let mut port = SoftSerial::new(board.handle(), config);
    if let Some(enable) = scenario.pins.tx_enable {
        port.set_transmit_enable_pin(pin(enable));
    }
    port.begin(scenario.baud);

    let caps = port.capabilities();
    ensure!(
        caps.contains(Capabilities::RX),
        "GPIO{} cannot receive",
        scenario.pins.rx
    );

    let peer = UartFrameTiming::new(scenario.clock_hz, scenario.peer_baud())
        .inverted(scenario.invert);
    let rest = REST_BITS * peer.bit_ticks();
    let payload = scenario.payload.to_bytes();
    board.record(tx);

    let (sent, expected, on_wire) = match scenario.mode {
        Mode::Loopback => {
            ensure!(caps.contains(Capabilities::TX), "port cannot transmit");
            port.write(&payload);
            (Some(payload.clone()), payload, None)
        }
        Mode::Receive => {
            board.play_uart(rx, peer, &payload);
            (None, payload, None)
        }
        Mode::OneWire => {
            ensure!(caps.contains(Capabilities::TX), "port cannot transmit");
            port.write(&payload);
            board.advance_cycles(rest);
            let wire = decode_trace(&board.take_trace(tx), peer);
            ensure!(port.available() == 0, "one-wire port heard its own transmission");

            let reply = scenario.reply.to_bytes();
            board.play_uart(rx, peer, &reply);
            (Some(payload), reply, Some(wire))
        }
    };
    board.advance_cycles(rest);

    let mut received = Vec::new();
    while let Some(byte) = port.read() {
        received.push(byte);
    }

    let trace = board.take_trace(tx);
    let on_wire = on_wire.or_else(|| {
        (scenario.mode == Mode::Loopback).then(|| decode_trace(&trace, peer))
    });

    Ok(Report {
        name: scenario.name.clone(),
        actual_baud: port.baud_rate(),
        capabilities: caps,
        sent,
        expected,
        received,
        on_wire,
        overflow: port.overflow(),
        edges: board.interrupts_delivered(rx),
        elapsed_us: board.now_ticks() / u64::from(board.cycles_per_micro()),
        trace,
    })
}
