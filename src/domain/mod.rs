//! Domain layer
//!
//! Shared wire constants, fabric snapshot types and the port traits the
//! replica and controller adapters implement.

pub mod ports;

pub use ports::*;
