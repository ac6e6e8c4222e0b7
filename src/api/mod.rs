//! API Module
//!
//! REST control APIs of the replica and controller services.

pub mod controller;
pub mod metrics;
pub mod replica;
pub mod rest;
pub mod server;

pub use controller::*;
pub use replica::*;
pub use rest::*;
pub use server::*;
