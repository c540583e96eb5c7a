//! Shared Error Types
//!
//! Error types used across the offline-resilience subsystem.
//!
//! # Error Categories
//!
//! - `SyncError` - crate-wide error returned by local store, sync engine and façades
//! - `RemoteError` - failure reported by the remote document service
//!
//! # Usage
//!
//! ```rust
//! use fieldsync::shared::error::{RemoteError, SyncError};
//!
//! let error = SyncError::validation("name", "name cannot be empty");
//! let remote = RemoteError::new("503 service unavailable").with_status(503);
//! assert!(remote.to_string().contains("unavailable"));
//! # let _ = error;
//! ```
//!
//! # Thread Safety
//!
//! All error types are `Send + Sync` and can be safely shared across task boundaries.
use thiserror::Error;

use crate::shared::config::ConfigError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by the offline-resilience subsystem
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local durable store failure (disk, schema, constraint)
    #[error("Local store error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote service call failed
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Entity failed validation before submission
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Requested record does not exist
    #[error("{collection}/{id} not found")]
    NotFound {
        /// Collection name
        collection: String,
        /// Entity or operation id
        id: String,
    },

    /// Filesystem error while preparing the local store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// Failure reported by the remote document service.
///
/// `code` carries a structured error code when the service provides one
/// (e.g. `permission-denied`); `message` is always present and is what the
/// keyword fallback in the classifier inspects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    /// Structured error code from the service, if any
    pub code: Option<String>,
    /// HTTP status, if the failure came from an HTTP response
    pub status: Option<u16>,
    /// Human-readable error message
    pub message: String,
}

impl RemoteError {
    /// Create an opaque remote error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: None,
            message: message.into(),
        }
    }

    /// Attach a structured error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach an HTTP status
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}
