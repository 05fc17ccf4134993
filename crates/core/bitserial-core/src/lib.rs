//! Core building blocks for the bitserial software UART.
//!
//! This crate holds the pieces that do not touch hardware and can therefore
//! be tested on the host with `cargo test` and loom: the single-producer /
//! single-consumer ring used between interrupt and main-line context, wrapping
//! cycle-counter arithmetic, and the leveled log facade.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod cell;
pub mod cycles;
pub mod log;
pub mod sync;
