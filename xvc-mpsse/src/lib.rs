//! MPSSE-based JTAG engine for FT2232H adapters: scan planning, command batching,
//! bit scatter/gather, TAP tracking, and the FTDI transport itself.

pub mod bits;
pub mod builder;
pub mod engine;
pub mod error;
pub mod ft2232h;
pub mod opcodes;
pub mod planner;
pub mod tap;
pub mod transport;

#[cfg(any(test, feature = "simulated"))]
pub mod sim;

pub use engine::JtagEngine;
pub use error::TransportError;
pub use ft2232h::Ft2232hTransport;
pub use tap::TapState;
pub use transport::{DeviceSelector, FtdiTransport};
