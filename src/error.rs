use thiserror::Error;

use crate::types::{Axis, CharacteristicRole};

/// Errors that can occur when working with a MotionMount
#[derive(Error, Debug)]
pub enum MountError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// The accessory could not be found or is not advertising
    #[error("MotionMount not found: {0}")]
    DiscoveryFailed(String),

    /// Opening the link or resolving the service failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// An operation needed a link and auto-connect failed
    #[error("Device not connected: {reason}")]
    NotConnected {
        /// Why the link could not be established
        reason: String,
    },

    /// Caller-supplied position outside the accepted bounds
    #[error("Invalid {axis} position {value}, must be between {} and {}", .axis.min(), .axis.max())]
    InvalidRange {
        /// Axis the value was meant for
        axis: Axis,
        /// Rejected value
        value: i32,
    },

    /// Preset index does not address a loaded preset
    #[error("Preset index {index} out of range ({len} presets loaded)")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of loaded presets
        len: usize,
    },

    /// The characteristic for a role was not resolved on this connection
    #[error("Characteristic not available: {0}")]
    MissingCharacteristic(CharacteristicRole),

    /// A characteristic read or write failed at the transport level
    #[error("Characteristic I/O failed: {0}")]
    Io(String),

    /// Persisting local state failed
    #[error("Store error: {0}")]
    Store(#[from] std::io::Error),

    /// Persisted state could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for MotionMount operations
pub type Result<T> = std::result::Result<T, MountError>;

impl MountError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::DiscoveryFailed(_)
                | Self::ConnectionFailed(_)
                | Self::NotConnected { .. }
        )
    }

    /// Check if this error is caused by caller input rather than the link
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. } | Self::IndexOutOfRange { .. }
        )
    }
}
