//! Renogy Rover access module
//!
//! Provides typed readings from a Rover charge controller via Modbus RTU.

pub mod client;
pub mod modbus;
pub mod serial;
pub mod types;

pub use client::{ChargeController, Rover};
pub use serial::SerialLink;
pub use types::ChargingState;
