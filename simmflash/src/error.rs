//! Error types for simmflash.

use std::io;
use thiserror::Error;

/// Result type for simmflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for simmflash operations.
///
/// Protocol outcomes (wire errors, refused capabilities, verification
/// mismatches) are reported as [`ProgrammerEvent`](crate::ProgrammerEvent)s,
/// not through this type. It covers the transport and the driver layer.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// An operation is already in flight.
    #[error("Programmer is busy with another operation")]
    Busy,

    /// No programmer board is attached (or no port name is known).
    #[error("Programmer board not found")]
    DeviceNotFound,

    /// The transport is not open.
    #[error("Serial port is not open")]
    PortClosed,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
