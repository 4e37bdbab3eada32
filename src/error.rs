//! Error types for spidev operations

use thiserror::Error;

/// Errors surfaced by [`SpiHandle`](crate::SpiHandle) operations
#[derive(Debug, Error)]
pub enum SpiError {
    /// Caller-supplied argument was invalid
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Operation requires an open device
    #[error("device is not open")]
    NotOpen,

    /// Failed to open device
    #[error("failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Driver rejected a mode/speed/word-length setting
    #[error("driver rejected {setting} = {value}: {source}")]
    ConfigRejected {
        setting: &'static str,
        value: u32,
        #[source]
        source: std::io::Error,
    },

    /// SPI transfer failed
    #[error("SPI transfer failed: {0}")]
    TransferFailed(#[source] std::io::Error),

    /// Failed to close device
    #[error("failed to close device: {0}")]
    CloseFailed(#[source] std::io::Error),
}

/// Result type for spidev operations
pub type Result<T> = std::result::Result<T, SpiError>;
