//! Shared Module
//!
//! Types used by every layer of the offline-resilience subsystem: the
//! error taxonomy, configuration and the entity/document contract.

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Entity trait and document helpers
pub mod entity;

/// Re-export commonly used types for convenience
pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use entity::{Document, Entity};
pub use error::{RemoteError, Result, SyncError};
