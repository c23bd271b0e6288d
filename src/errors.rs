//! Error types for the Rover bridge
//!
//! Uses thiserror for ergonomic error definitions.
//! These errors can be converted to anyhow::Error in the main application.

use std::path::PathBuf;

/// Serial and Modbus communication errors
#[derive(Debug, thiserror::Error)]
pub enum RoverError {
    #[error("Failed to open serial port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Modbus exception {code:#04x} for function {function:#04x}")]
    Exception { function: u8, code: u8 },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid register value at {address:#06x}: {reason}")]
    InvalidValue { address: u16, reason: String },

    #[error("Unknown charging state: {0}")]
    UnknownChargingState(u8),
}

/// Device info persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize device info: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Bus declaration and publishing errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Path '{0}' is not declared")]
    UnknownPath(String),

    #[error("Path '{0}' is already declared")]
    DuplicatePath(String),

    #[error("Path '{0}' is not writeable")]
    NotWriteable(String),

    #[error("Failed to publish message to topic '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Failed to serialize data: {error:?}")]
    SerializationError { error: serde_json::Error },

    #[error("Bus client error: {0}")]
    ClientError(String),
}

/// Service construction errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Unsupported TTY name: {0}")]
    UnsupportedTty(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}
