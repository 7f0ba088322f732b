//! Error types for HSC driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for HSC operations
pub type Result<T> = std::result::Result<T, HscError>;

/// Errors that can occur during HSC operations
#[derive(Debug, Error)]
pub enum HscError {
    /// Index out of range, absent descriptor or unsupported value
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was rejected
        reason: String,
    },

    /// Coherent memory allocation failed
    #[error("Out of DMA memory: {size} bytes requested")]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
    },

    /// Microcode image could not be fetched
    #[error("Firmware not found: {name}")]
    FirmwareNotFound {
        /// Image name
        name: String,
    },

    /// Operation timeout
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Component is in the wrong state for the request
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Hardware reported something impossible, or a platform call failed
    #[error("Hardware error: {reason}")]
    HardwareError {
        /// Reason for failure
        reason: String,
    },

    /// Device not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// No HSC instance detected on the system
    #[error("No HSC devices detected")]
    NoDevicesFound,

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl HscError {
    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a firmware not found error
    pub fn firmware_not_found(name: impl Into<String>) -> Self {
        Self::FirmwareNotFound { name: name.into() }
    }

    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a hardware error
    pub fn hardware_error(reason: impl Into<String>) -> Self {
        Self::HardwareError {
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
