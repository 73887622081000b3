//! Error types for kongsync.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, identity state, the Kong Admin API, planning, and
//! reconciliation.

use std::path::PathBuf;
use thiserror::Error;

use crate::resources::UpdateStep;

/// The main error type for kongsync.
#[derive(Debug, Error)]
pub enum KongSyncError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Kong Admin API errors.
    #[error("Kong API error: {0}")]
    Api(#[from] ApiError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Two declarations share a name that must be unique.
    #[error("Duplicate {resource} name '{name}' at {field}")]
    DuplicateName {
        /// Resource kind (`upstream` or `target`).
        resource: String,
        /// Repeated name.
        name: String,
        /// Field path of the repeat.
        field: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Reading or writing the state file failed.
    #[error("State storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Kong Admin API errors.
///
/// A 404 on a read is not represented here: reconcilers report it as
/// absence (`Ok(None)`), never as an error.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced an HTTP response (connect, timeout, body read).
    #[error("Transport error talking to Kong: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The object already exists remotely.
    #[error("409 Conflict - {resource} '{name}' already exists, use `kongsync import` to manage it")]
    Conflict {
        /// Resource kind.
        resource: String,
        /// Name that collided.
        name: String,
    },

    /// A status outside the operation's expected success set.
    #[error("unexpected status code received: {status_line}{}", body_suffix(.body))]
    UnexpectedStatus {
        /// Numeric HTTP status.
        status: u16,
        /// Status line, e.g. `500 Internal Server Error`.
        status_line: String,
        /// Response body, possibly empty.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("Invalid response from Kong: {message}")]
    InvalidResponse {
        /// Description of the decode failure.
        message: String,
    },

    /// The request body could not be encoded.
    #[error("Failed to encode request: {message}")]
    Serialization {
        /// Description of the encode failure.
        message: String,
    },

    /// One step of a target's delete-then-create update failed.
    #[error("target update failed at {step} step (target {target_id}): {source}")]
    TargetUpdate {
        /// Step that failed.
        step: UpdateStep,
        /// Identifier of the target being replaced.
        target_id: String,
        /// Underlying failure.
        #[source]
        source: Box<ApiError>,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Referenced upstream is neither declared nor recorded.
    #[error("Unknown upstream '{name}'")]
    UnknownUpstream {
        /// Upstream name.
        name: String,
    },

    /// An in-place update would change a field Kong cannot change in place.
    #[error("Cannot change {field} of {resource} '{name}' in place ({from} -> {to}); it must be replaced")]
    ImmutableField {
        /// Resource kind.
        resource: String,
        /// Resource name.
        name: String,
        /// Field that differs.
        field: String,
        /// Recorded value.
        from: String,
        /// Declared value.
        to: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reconciliation failed for a specific resource.
    #[error("Failed to reconcile {resource_type} '{name}': {reason}")]
    ResourceReconcileFailed {
        /// Type of resource.
        resource_type: String,
        /// Name of the resource.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// The run stopped before sending any request.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Why the run stopped.
        reason: String,
    },
}

/// Result type alias for kongsync operations.
pub type Result<T> = std::result::Result<T, KongSyncError>;

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" ({body})")
    }
}

impl KongSyncError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the API error, if this is one.
    #[must_use]
    pub const fn as_api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the underlying API call answered 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.as_api().is_some_and(ApiError::is_not_found)
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ApiError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Returns true for failures that never reached Kong.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns true if Kong answered 404, directly or inside a target update step.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::UnexpectedStatus { status, .. } => *status == 404,
            Self::TargetUpdate { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Returns the failed step of a target update, if this is one.
    #[must_use]
    pub const fn failed_step(&self) -> Option<UpdateStep> {
        match self {
            Self::TargetUpdate { step, .. } => Some(*step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_status_message_includes_body() {
        let err = ApiError::UnexpectedStatus {
            status: 400,
            status_line: String::from("400 Bad Request"),
            body: String::from("{\"message\":\"schema violation\"}"),
        };
        let message = err.to_string();
        assert!(message.starts_with("unexpected status code received: 400 Bad Request"));
        assert!(message.contains("schema violation"));
    }

    #[test]
    fn test_conflict_points_to_import() {
        let err = ApiError::Conflict {
            resource: String::from("upstream"),
            name: String::from("svc-a"),
        };
        assert!(err.to_string().contains("kongsync import"));
    }

    #[test]
    fn test_target_update_exposes_step() {
        let err = ApiError::TargetUpdate {
            step: UpdateStep::Delete,
            target_id: String::from("t-1"),
            source: Box::new(ApiError::transport("connection reset")),
        };
        assert_eq!(err.failed_step(), Some(UpdateStep::Delete));
        assert!(err.to_string().contains("delete step"));
        assert!(!err.is_not_found());
    }
}
