//! Synchronization primitives shared between interrupt and main-line context.

pub(crate) mod loom_compat;
pub mod spsc;

pub use spsc::{Consumer, Producer, ring};
