//! The [`SoftSerial`] port facade.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use bitserial_core::cycles;
use bitserial_core::sync::{Consumer, Producer, ring};
use bitserial_core::{bdebug, berr, binfo, bwarn};
use bitserial_hal::{Pin, PinMode, Platform};

use crate::capture::{EdgeCapture, EdgeEvent, EdgeSink};
use crate::config::{Capabilities, PortConfig};
use crate::decoder::Decoder;
use crate::registry::{self, REGISTRY};
use crate::transmit::Transmitter;

/// Callback run by [`SoftSerial::perform_work`] with the number of bytes
/// waiting.
pub type ReceiveHandler = Box<dyn FnMut(usize) + Send>;

/// Receive side: the capture registered for the pin and the main-line ends
/// of both rings.
struct Receiver {
    sink: Arc<dyn EdgeSink>,
    edges: Consumer<EdgeEvent>,
    bytes_in: Producer<u8>,
    bytes_out: Consumer<u8>,
    decoder: Decoder,
    overflow: bool,
}

impl Receiver {
    fn decode<H: Platform>(&mut self, hal: &H) -> usize {
        let stored = self
            .decoder
            .decode(&mut self.edges, &mut self.bytes_in, || hal.cycles());
        self.overflow |= self.edges.take_overflow();
        stored
    }

    fn clear(&mut self) {
        self.edges.clear();
        self.bytes_out.clear();
        self.decoder.reset();
    }
}

/// A software UART on one or two GPIO pins.
///
/// Reception is interrupt-driven: once [`begin`](Self::begin) has run, every
/// edge on the receive pin is timestamped in interrupt context, and bytes are
/// decoded lazily by [`read`](Self::read), [`peek`](Self::peek),
/// [`available`](Self::available) and [`perform_work`](Self::perform_work).
/// Transmission busy-waits on the cycle counter with interrupts masked
/// between bit edges.
///
/// Pins that cannot do their job never make construction fail. The port
/// degrades instead, and [`capabilities`](Self::capabilities) tells what is
/// left.
pub struct SoftSerial<H: Platform> {
    hal: H,
    config: PortConfig,
    caps: Capabilities,
    rx: Option<Receiver>,
    tx: Transmitter,
    tx_enable: Option<Pin>,
    bit_cycles: u32,
    started: bool,
    rx_enabled: bool,
    tx_active: bool,
    on_receive: Option<ReceiveHandler>,
}

impl<H: Platform> SoftSerial<H> {
    /// Validates the pins in `config` and allocates the receive buffers.
    pub fn new(hal: H, config: PortConfig) -> Self {
        let one_wire = config.is_one_wire();
        let mut caps = Capabilities::empty();
        caps.set(Capabilities::ONE_WIRE, one_wire);

        let rx = if !config.rx_pin.is_uart_capable() {
            bwarn!("bitserial: {} cannot receive, port is transmit-only", config.rx_pin);
            None
        } else if config.buffer_capacity == 0 {
            bwarn!("bitserial: zero receive buffer, port is transmit-only");
            None
        } else {
            caps |= Capabilities::RX;
            Some(Self::receiver(&hal, &config))
        };

        if config.tx_pin.is_tx_capable(one_wire) {
            caps |= Capabilities::TX;
        } else {
            bwarn!("bitserial: {} cannot transmit, port is receive-only", config.tx_pin);
        }

        Self {
            tx: Transmitter::new(config.tx_pin, config.invert),
            hal,
            config,
            caps,
            rx,
            tx_enable: None,
            bit_cycles: 0,
            started: false,
            rx_enabled: false,
            tx_active: false,
            on_receive: None,
        }
    }

    fn receiver(hal: &H, config: &PortConfig) -> Receiver {
        let (events, edges) = ring(config.effective_edge_capacity());
        let (bytes_in, bytes_out) = ring(config.buffer_capacity);
        let sink: Arc<dyn EdgeSink> = Arc::new(EdgeCapture::new(hal.clone(), config.rx_pin, events));
        Receiver {
            sink,
            edges,
            bytes_in,
            bytes_out,
            decoder: Decoder::new(0, config.invert, config.stop_bit_grace),
            overflow: false,
        }
    }

    /// Starts the port at `baud`.
    ///
    /// Clears both buffers, claims the receive pin (evicting any other port
    /// registered on it), parks the transmit pin at the idle level and
    /// enables reception.
    pub fn begin(&mut self, baud: u32) {
        let clock_hz = self.hal.frequency_hz();
        self.bit_cycles = cycles::bit_cycles(clock_hz, baud);
        if self.bit_cycles == 0 {
            bwarn!("bitserial: {baud} baud is not achievable at {clock_hz} Hz");
        }
        self.tx.set_timing(self.bit_cycles, clock_hz);

        if let Some(rx) = self.rx.as_mut() {
            rx.decoder.set_bit_cycles(self.bit_cycles);
            rx.clear();
            self.hal.set_mode(self.config.rx_pin, PinMode::InputPullUp);
            if !REGISTRY.is_owner(self.config.rx_pin, &rx.sink) {
                // An enable from an earlier claim no longer says anything
                // about the interrupt attached to the pin.
                self.rx_enabled = false;
                if REGISTRY.register(self.config.rx_pin, rx.sink.clone()) {
                    binfo!("bitserial: {} taken over from a previous port", self.config.rx_pin);
                }
            }
        }

        if self.caps.contains(Capabilities::TX) && !self.config.is_one_wire() {
            self.tx.idle(&self.hal);
            self.hal.set_mode(self.config.tx_pin, PinMode::Output);
        }

        self.started = true;
        if !self.rx_enabled {
            self.enable_rx(true);
        }

        bdebug!(
            "bitserial: rx {} tx {} at {} baud ({} cycles/bit){}",
            self.config.rx_pin,
            self.config.tx_pin,
            self.baud_rate(),
            self.bit_cycles,
            if self.config.invert { ", inverted" } else { "" }
        );
    }

    /// Stops reception and releases the receive pin.
    ///
    /// Bytes already decoded stay readable. [`begin`](Self::begin) restarts
    /// the port.
    pub fn end(&mut self) {
        self.enable_rx(false);
        if let Some(rx) = &self.rx {
            if REGISTRY.unregister(self.config.rx_pin, &rx.sink) {
                bdebug!("bitserial: released {}", self.config.rx_pin);
            }
        }
        self.started = false;
    }

    /// Attaches or detaches the receive interrupt.
    ///
    /// Enabling drops any partially decoded frame. Has no effect before
    /// [`begin`](Self::begin), or after another port took over the pin.
    pub fn enable_rx(&mut self, on: bool) {
        let Some(rx) = self.rx.as_mut() else {
            return;
        };
        let pin = self.config.rx_pin;
        let owner = REGISTRY.is_owner(pin, &rx.sink);

        if !on {
            if owner && self.rx_enabled {
                self.hal.detach(pin);
            }
            self.rx_enabled = false;
            return;
        }

        if !self.started {
            return;
        }
        if !owner {
            bwarn!("bitserial: {pin} belongs to another port, receive stays off");
            self.rx_enabled = false;
            return;
        }

        rx.decoder.reset();
        let Some(handler) = registry::trampoline(pin) else {
            berr!("bitserial: no interrupt slot for {pin}");
            return;
        };
        match self.hal.attach_edge(pin, handler) {
            Ok(()) => self.rx_enabled = true,
            Err(err) => {
                berr!("bitserial: {err}, receive disabled");
                self.rx_enabled = false;
            }
        }
    }

    /// Switches a one-wire port between transmitting and receiving.
    ///
    /// On: receive is disabled and the shared pin driven at the idle level.
    /// Off: the pin is released to a pulled-up input and receive resumes.
    /// No effect on two-pin ports.
    pub fn enable_tx(&mut self, on: bool) {
        if !self.config.is_one_wire() || !self.caps.contains(Capabilities::TX) {
            return;
        }
        let pin = self.config.tx_pin;
        if on {
            self.enable_rx(false);
            self.tx.idle(&self.hal);
            self.hal.set_mode(pin, PinMode::Output);
            self.tx_active = true;
        } else {
            self.hal.set_mode(pin, PinMode::InputPullUp);
            self.tx_active = false;
            self.enable_rx(true);
        }
    }

    /// Configures a pin held high while transmitting, e.g. an RS-485 driver
    /// enable. An unusable pin clears the setting.
    pub fn set_transmit_enable_pin(&mut self, pin: Pin) {
        if pin.is_uart_capable() {
            self.hal.write(pin, false);
            self.hal.set_mode(pin, PinMode::Output);
            self.tx_enable = Some(pin);
            self.caps |= Capabilities::TX_ENABLE;
        } else {
            bwarn!("bitserial: {pin} cannot be a transmit enable pin");
            self.tx_enable = None;
            self.caps.remove(Capabilities::TX_ENABLE);
        }
    }

    /// Returns the next received byte, if any.
    pub fn read(&mut self) -> Option<u8> {
        let rx = self.rx.as_mut()?;
        if rx.bytes_out.is_empty() {
            rx.decode(&self.hal);
        }
        rx.bytes_out.pop()
    }

    /// Returns the next received byte without consuming it.
    pub fn peek(&mut self) -> Option<u8> {
        let rx = self.rx.as_mut()?;
        if rx.bytes_out.is_empty() {
            rx.decode(&self.hal);
        }
        rx.bytes_out.peek()
    }

    /// Reads up to `buf.len()` received bytes without waiting and returns
    /// how many were stored.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        for slot in buf.iter_mut() {
            match self.read() {
                Some(byte) => *slot = byte,
                None => break,
            }
            n += 1;
        }
        n
    }

    /// Number of received bytes ready to read.
    ///
    /// If nothing is ready, yields for half a bit period once so that a byte
    /// in flight can complete, then looks again.
    pub fn available(&mut self) -> usize {
        let Some(rx) = self.rx.as_mut() else {
            return 0;
        };
        rx.decode(&self.hal);
        if rx.bytes_out.is_empty() && self.bit_cycles != 0 {
            let per_micro = cycles::cycles_per_micro(self.hal.frequency_hz());
            self.hal
                .cooperative_yield((self.bit_cycles / 2 / per_micro).max(1));
            rx.decode(&self.hal);
        }
        rx.bytes_out.len()
    }

    /// Transmits `bytes` and returns how many were sent.
    ///
    /// Pending edges are decoded first. Returns 0 if the port cannot
    /// transmit or has not been started. A one-wire port not already
    /// switched with [`enable_tx`](Self::enable_tx) is switched to transmit
    /// for the duration of the call.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        if let Some(rx) = self.rx.as_mut() {
            rx.decode(&self.hal);
        }
        if !self.caps.contains(Capabilities::TX) || self.bit_cycles == 0 {
            return 0;
        }

        let turnaround = self.config.is_one_wire() && !self.tx_active;
        if turnaround {
            self.enable_tx(true);
        }
        let sent = self.tx.transmit(&self.hal, bytes, self.tx_enable);
        if turnaround {
            self.enable_tx(false);
        }
        sent
    }

    /// Transmits one byte. Returns `true` if it was sent.
    pub fn write_byte(&mut self, byte: u8) -> bool {
        self.write(&[byte]) == 1
    }

    /// Discards everything received and not yet read, including a frame in
    /// progress.
    pub fn flush(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            rx.clear();
        }
    }

    /// Returns and clears the receive overflow flag.
    ///
    /// Set when either the edge buffer or the byte buffer had to drop data.
    pub fn overflow(&mut self) -> bool {
        let Some(rx) = self.rx.as_mut() else {
            return false;
        };
        let edges = rx.edges.take_overflow();
        let bytes = rx.bytes_out.take_overflow();
        let sticky = core::mem::take(&mut rx.overflow);
        sticky | edges | bytes
    }

    /// Registers the callback run by [`perform_work`](Self::perform_work).
    pub fn on_receive(&mut self, handler: impl FnMut(usize) + Send + 'static) {
        self.on_receive = Some(Box::new(handler));
    }

    /// Decodes pending edges and, if bytes are waiting and a receive
    /// callback is registered, calls it with their number.
    ///
    /// Meant to be polled from the main loop. Returns the number of bytes
    /// waiting.
    pub fn perform_work(&mut self) -> usize {
        let Some(rx) = self.rx.as_mut() else {
            return 0;
        };
        rx.decode(&self.hal);
        let waiting = rx.bytes_out.len();
        if waiting > 0 {
            if let Some(handler) = self.on_receive.as_mut() {
                handler(waiting);
            }
        }
        waiting
    }

    /// The baud rate the configured bit period actually produces, or 0
    /// before [`begin`](Self::begin).
    #[must_use]
    pub fn baud_rate(&self) -> u32 {
        cycles::baud_rate(self.hal.frequency_hz(), self.bit_cycles)
    }

    /// What this port can do after pin validation.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Returns `true` while edges on the receive pin reach this port.
    #[must_use]
    pub fn is_rx_enabled(&self) -> bool {
        self.rx_enabled
            && self
                .rx
                .as_ref()
                .is_some_and(|rx| REGISTRY.is_owner(self.config.rx_pin, &rx.sink))
    }

    /// Returns `true` if receive and transmit share one pin.
    #[must_use]
    pub fn is_one_wire(&self) -> bool {
        self.config.is_one_wire()
    }

    /// The configuration this port was built from.
    #[must_use]
    pub fn config(&self) -> &PortConfig {
        &self.config
    }
}

impl<H: Platform> fmt::Write for SoftSerial<H> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.write(s.as_bytes()) == s.len() {
            Ok(())
        } else {
            Err(fmt::Error)
        }
    }
}

impl<H: Platform> fmt::Debug for SoftSerial<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftSerial")
            .field("config", &self.config)
            .field("caps", &self.caps)
            .field("bit_cycles", &self.bit_cycles)
            .field("rx_enabled", &self.rx_enabled)
            .finish_non_exhaustive()
    }
}

impl<H: Platform> Drop for SoftSerial<H> {
    fn drop(&mut self) {
        self.end();
    }
}
