//! Error types for the Array Volume Operator
//!
//! Provides the classified error taxonomy shared by the lifecycle managers,
//! the array client adapters, and the liveness monitor. Every failure path
//! in the crate maps to exactly one of these variants; callers never see a
//! bare transport or serialization error.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Input / Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Resource State Errors
    // =========================================================================
    #[error("Volume not found: {name}")]
    NotFound { name: String },

    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    #[error("Source not found: {name}")]
    SourceNotFound { name: String },

    #[error("Resource {name} has dependents: {detail}")]
    HasDependents { name: String, detail: String },

    #[error("Volume in use: {name} ({mounts} active mount(s))")]
    InUse { name: String, mounts: usize },

    #[error("Snapshot {name} is within its retention window until {until}")]
    RetentionActive { name: String, until: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unreachable: {backend} - {reason}")]
    BackendUnreachable { backend: String, reason: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    Backend {
        backend: String,
        operation: String,
        reason: String,
    },

    /// A compensating action failed after a partial mutation. The array and
    /// the metadata store may disagree until an operator reconciles them.
    #[error(
        "Partial failure during {operation} on {resource}: {cause}; \
         rollback failed: {rollback_failure} (array_side={array_side}, metadata_side={metadata_side})"
    )]
    PartialFailure {
        operation: String,
        resource: String,
        cause: String,
        rollback_failure: String,
        array_side: String,
        metadata_side: String,
    },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during request handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry with exponential backoff (liveness-monitor domain)
    RetryWithBackoff,
    /// Retry after a specific duration
    RetryAfter(Duration),
    /// Surface to the caller, do not retry
    NoRetry,
}

impl Error {
    /// Stable machine-readable tag for this error's class.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Configuration(_) => "configuration",
            Error::NotFound { .. } => "not-found",
            Error::AlreadyExists { .. } => "already-exists",
            Error::SourceNotFound { .. } => "source-not-found",
            Error::HasDependents { .. } => "has-dependents",
            Error::InUse { .. } => "in-use",
            Error::RetentionActive { .. } => "retention-active",
            Error::BackendUnreachable { .. } => "backend-unreachable",
            Error::Backend { .. } => "backend-error",
            Error::PartialFailure { .. } => "partial-failure",
            Error::Internal(_) => "internal",
            Error::JsonParse(_) => "json-parse",
            Error::Io(_) => "io",
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient connectivity - retry with backoff (monitor only)
            Error::BackendUnreachable { .. } => ErrorAction::RetryWithBackoff,

            // Retention expires on its own - retry later makes sense
            Error::RetentionActive { .. } => ErrorAction::RetryAfter(Duration::from_secs(300)),

            // Everything else is deterministic: retrying won't change it
            _ => ErrorAction::NoRetry,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRetry)
    }

    /// Check if this error indicates lost connectivity to the array
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::BackendUnreachable { .. })
    }

    /// Partial failures must reach an operator; they are never downgraded.
    pub fn is_partial_failure(&self) -> bool {
        matches!(self, Error::PartialFailure { .. })
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::BackendUnreachable {
            backend: "array-a".into(),
            reason: "connect timeout".into(),
        };
        assert_eq!(err.action(), ErrorAction::RetryWithBackoff);
        assert!(err.is_retryable());
        assert!(err.is_unreachable());

        let err = Error::Validation("retention exceeds expiration".into());
        assert_eq!(err.action(), ErrorAction::NoRetry);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_kinds_are_stable() {
        let err = Error::AlreadyExists {
            kind: "Volume".into(),
            name: "vol-1".into(),
        };
        assert_eq!(err.kind(), "already-exists");

        let err = Error::RetentionActive {
            name: "snap-1".into(),
            until: "2026-01-01T00:00:00Z".into(),
        };
        assert_eq!(err.kind(), "retention-active");
        assert_eq!(err.action(), ErrorAction::RetryAfter(Duration::from_secs(300)));
    }

    #[test]
    fn test_partial_failure_message_names_both_sides() {
        let err = Error::PartialFailure {
            operation: "create".into(),
            resource: "vol-1".into(),
            cause: "metadata save failed".into(),
            rollback_failure: "array delete failed".into(),
            array_side: "volume present".into(),
            metadata_side: "record absent".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("vol-1"));
        assert!(msg.contains("array_side=volume present"));
        assert!(msg.contains("metadata_side=record absent"));
        assert!(err.is_partial_failure());
    }
}
