//! # Failure Classification
//!
//! Turns a failed call plus the operation it belonged to into a
//! [`ClassifiedError`]. Structured error codes from the remote service are
//! mapped through a lookup table first, then HTTP status classes; only
//! opaque errors fall back to keyword matching over the lowercased message.
//!
//! Keyword precedence (first match wins): network, validation,
//! authentication, permission, server, database, unknown.

use crate::client::offline::queue::{OperationType, PendingOperation};
use crate::shared::error::{RemoteError, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Failure taxonomy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Network,
    Validation,
    Auth,
    Permission,
    Server,
    Database,
    Unknown,
}

impl ErrorCode {
    /// Transient classes are retried automatically
    pub fn can_retry(&self) -> bool {
        matches!(self, ErrorCode::Network | ErrorCode::Server | ErrorCode::Database)
    }

    /// Default rollback decision for a failed operation of the given type
    pub fn should_rollback(&self, op_type: OperationType) -> bool {
        match self {
            ErrorCode::Network | ErrorCode::Validation | ErrorCode::Auth | ErrorCode::Permission => false,
            ErrorCode::Server | ErrorCode::Unknown => op_type == OperationType::Create,
            ErrorCode::Database => matches!(op_type, OperationType::Create | OperationType::Update),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Network => "NETWORK",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::Auth => "AUTH",
            ErrorCode::Permission => "PERMISSION",
            ErrorCode::Server => "SERVER",
            ErrorCode::Database => "DATABASE",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure with its retry and rollback decision
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub can_retry: bool,
    pub should_rollback: bool,
    pub message: String,
    pub related_operation: PendingOperation,
}

const KEYWORDS: &[(ErrorCode, &[&str])] = &[
    (
        ErrorCode::Network,
        &["network", "offline", "timeout", "timed out", "connection", "unreachable", "fetch failed", "dns"],
    ),
    (
        ErrorCode::Validation,
        &["validation", "invalid", "required", "malformed", "must be"],
    ),
    (
        ErrorCode::Auth,
        &["unauthenticated", "unauthorized", "authentication", "not authenticated", "token expired"],
    ),
    (
        ErrorCode::Permission,
        &["permission", "forbidden", "access denied", "not allowed"],
    ),
    (
        ErrorCode::Server,
        &["500", "502", "503", "504", "internal", "server error", "bad gateway", "service unavailable"],
    ),
    (
        ErrorCode::Database,
        &["database", "sqlite", "constraint", "deadlock", "transaction", "write conflict", "storage"],
    ),
];

/// Maps raw failures onto the [`ErrorCode`] taxonomy
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    codes: HashMap<String, ErrorCode>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        let codes = [
            ("unavailable", ErrorCode::Network),
            ("deadline-exceeded", ErrorCode::Network),
            ("network-error", ErrorCode::Network),
            ("invalid-argument", ErrorCode::Validation),
            ("failed-precondition", ErrorCode::Validation),
            ("out-of-range", ErrorCode::Validation),
            ("unauthenticated", ErrorCode::Auth),
            ("permission-denied", ErrorCode::Permission),
            ("internal", ErrorCode::Server),
            ("resource-exhausted", ErrorCode::Server),
            ("aborted", ErrorCode::Database),
            ("data-loss", ErrorCode::Database),
        ]
        .into_iter()
        .map(|(code, class)| (code.to_string(), class))
        .collect();

        Self { codes }
    }
}

impl FailureClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or override a structured code mapping
    pub fn with_code(mut self, code: impl Into<String>, class: ErrorCode) -> Self {
        self.codes.insert(code.into(), class);
        self
    }

    /// Classify a remote failure
    pub fn classify_remote(&self, error: &RemoteError) -> ErrorCode {
        if let Some(class) = error.code.as_deref().and_then(|code| self.codes.get(code)) {
            return *class;
        }
        if let Some(class) = error.status.and_then(Self::classify_status) {
            return class;
        }
        Self::classify_message(&error.message)
    }

    /// Classify any crate error
    pub fn classify_error(&self, error: &SyncError) -> ErrorCode {
        match error {
            SyncError::Remote(remote) => self.classify_remote(remote),
            SyncError::Validation { .. } | SyncError::Serialization(_) => ErrorCode::Validation,
            SyncError::Database(_) | SyncError::Io(_) => ErrorCode::Database,
            SyncError::NotFound { .. } | SyncError::Config(_) => Self::classify_message(&error.to_string()),
        }
    }

    fn classify_status(status: u16) -> Option<ErrorCode> {
        match status {
            400 | 422 => Some(ErrorCode::Validation),
            401 => Some(ErrorCode::Auth),
            403 => Some(ErrorCode::Permission),
            408 => Some(ErrorCode::Network),
            429 | 500..=599 => Some(ErrorCode::Server),
            _ => None,
        }
    }

    /// Keyword fallback for opaque errors
    pub fn classify_message(message: &str) -> ErrorCode {
        let message = message.to_lowercase();
        KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|word| message.contains(word)))
            .map_or(ErrorCode::Unknown, |(class, _)| *class)
    }

    /// Attach the retry/rollback policy for `operation` to a classified code
    pub fn decide(code: ErrorCode, message: impl Into<String>, operation: &PendingOperation) -> ClassifiedError {
        ClassifiedError {
            code,
            can_retry: code.can_retry(),
            should_rollback: code.should_rollback(operation.op_type),
            message: message.into(),
            related_operation: operation.clone(),
        }
    }

    pub fn classify(&self, error: &SyncError, operation: &PendingOperation) -> ClassifiedError {
        Self::decide(self.classify_error(error), error.to_string(), operation)
    }
}
