//! Port configuration and the capability set it validates to.

use bitflags::bitflags;
use bitserial_hal::Pin;

bitflags! {
    /// What a port can actually do after pin validation.
    ///
    /// Invalid pins never make construction fail; they only clear the
    /// corresponding bit, leaving a transmit-only, receive-only or inert port.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        /// Receive pin validated and buffers allocated.
        const RX        = 1 << 0;
        /// Transmit pin validated.
        const TX        = 1 << 1;
        /// Receive and transmit share one pin (half-duplex).
        const ONE_WIRE  = 1 << 2;
        /// A transmit-enable pin (e.g. RS-485 driver enable) is configured.
        const TX_ENABLE = 1 << 3;
    }
}

/// Static configuration of a [`SoftSerial`](crate::SoftSerial) port.
///
/// Inversion and pin roles are fixed for the lifetime of the port; changing
/// them means dropping the port and building a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// Receive pin.
    pub rx_pin: Pin,
    /// Transmit pin. Equal to `rx_pin` for one-wire operation.
    pub tx_pin: Pin,
    /// Inverted logic: idle low, start bit high.
    pub invert: bool,
    /// Decoded bytes the receive buffer holds.
    pub buffer_capacity: usize,
    /// Edges the capture ring holds. `0` selects ten edges per buffered byte.
    pub edge_capacity: usize,
    /// Extra bit periods to wait past the end of a frame before assuming its
    /// stop bit arrived without an edge.
    pub stop_bit_grace: u32,
}

impl PortConfig {
    /// Default receive buffer size in bytes.
    pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

    /// Edges per buffered byte when no edge capacity is given.
    pub const EDGES_PER_BYTE: usize = 10;

    /// Default stop-bit grace in bit periods.
    pub const DEFAULT_STOP_BIT_GRACE: u32 = 2;

    /// Non-inverted 8N1 on the given pins with default buffer sizes.
    #[must_use]
    pub const fn new(rx_pin: Pin, tx_pin: Pin) -> Self {
        Self {
            rx_pin,
            tx_pin,
            invert: false,
            buffer_capacity: Self::DEFAULT_BUFFER_CAPACITY,
            edge_capacity: 0,
            stop_bit_grace: Self::DEFAULT_STOP_BIT_GRACE,
        }
    }

    /// Receive and transmit on the same pin.
    #[must_use]
    pub const fn one_wire(pin: Pin) -> Self {
        Self::new(pin, pin)
    }

    /// Sets inverted logic.
    #[must_use]
    pub const fn inverted(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Sets the receive buffer size.
    #[must_use]
    pub const fn with_buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes;
        self
    }

    /// Sets the edge ring size.
    #[must_use]
    pub const fn with_edge_capacity(mut self, edges: usize) -> Self {
        self.edge_capacity = edges;
        self
    }

    /// Sets the stop-bit grace period.
    #[must_use]
    pub const fn with_stop_bit_grace(mut self, bits: u32) -> Self {
        self.stop_bit_grace = bits;
        self
    }

    /// Returns `true` if receive and transmit share a pin.
    #[must_use]
    pub const fn is_one_wire(&self) -> bool {
        self.rx_pin.number() == self.tx_pin.number()
    }

    /// Edge ring size after applying the default.
    #[must_use]
    pub const fn effective_edge_capacity(&self) -> usize {
        if self.edge_capacity == 0 {
            self.buffer_capacity.saturating_mul(Self::EDGES_PER_BYTE)
        } else {
            self.edge_capacity
        }
    }
}
