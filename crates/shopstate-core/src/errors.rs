//! Error types for the shopstate layer
//!
//! `PersistenceError` covers the durable key-value store; `ShopStateError`
//! unifies it with the preference, connectivity and configuration failures.
//! Read failures are recovered by the caller (the default value stands),
//! write failures are surfaced.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures of the durable key-value store
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to read key {key}: {reason}")]
    ReadFailed { key: String, reason: String },
    #[error("Failed to write key {key}: {reason}")]
    WriteFailed { key: String, reason: String },
    #[error("Storage is not available")]
    Unavailable,
    #[error("Stored data is corrupt: {reason}")]
    Corrupt { reason: String },
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PersistenceError {
    /// Create a read failure for a key
    pub fn read_failed<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        PersistenceError::ReadFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a write failure for a key
    pub fn write_failed<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        PersistenceError::WriteFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the shopstate layer
#[derive(Debug, thiserror::Error)]
pub enum ShopStateError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Attempted to set a preference outside its valid set
    #[error("Invalid value {value:?} for preference {key}")]
    InvalidValue { key: String, value: String },

    /// OS connectivity facility absent or failing
    #[error("Connectivity probe unavailable: {reason}")]
    ProbeUnavailable { reason: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ShopStateError {
    /// Create an invalid value error
    pub fn invalid_value<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        ShopStateError::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a probe unavailable error with a reason
    pub fn probe_unavailable<T: Into<String>>(reason: T) -> Self {
        ShopStateError::ProbeUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        ShopStateError::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether this error came from the durable store
    pub fn is_persistence(&self) -> bool {
        matches!(self, ShopStateError::Persistence(_))
    }

    /// Whether this error is a rejected preference value
    pub fn is_invalid_value(&self) -> bool {
        matches!(self, ShopStateError::InvalidValue { .. })
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ShopStateError>;
pub type ShopStateResult<T> = Result<T>;
