//! Interrupt-driven software UART.
//!
//! Turns any edge-interrupt capable GPIO into an 8N1 serial port without
//! UART hardware:
//!
//! - [`capture`] -- the interrupt handler that timestamps every pin edge into
//!   a lock-free ring.
//! - [`decoder`] -- replays the timestamped edges into bytes, inferring the
//!   bits that produced no edge.
//! - [`transmit`] -- emits frames by driving the pin against cycle-counter
//!   deadlines.
//! - [`registry`] -- maps each receive pin to the port that owns it, behind
//!   one argument-less trampoline per pin.
//! - [`port`] -- the [`SoftSerial`] facade tying it together.
//!
//! All platform access goes through [`bitserial_hal::Platform`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod capture;
pub mod config;
pub mod decoder;
pub mod port;
pub mod registry;
pub mod transmit;

pub use capture::EdgeEvent;
pub use config::{Capabilities, PortConfig};
pub use port::SoftSerial;
