//! Renogy Rover to Venus OS Bridge
//!
//! Polls a Renogy Rover MPPT charge controller over Modbus RTU and publishes
//! its telemetry as solar charger paths on a system bus.

pub mod bus;
pub mod config;
pub mod errors;
pub mod info;
pub mod rover;
pub mod service;

pub use config::Config;
pub use info::DeviceInfo;
pub use rover::Rover;
pub use service::RoverService;
