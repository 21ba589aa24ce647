//! Unified error types for the guest compute service.
//!
//! Every fallible operation in the workspace returns [`GcsError`]. Errors
//! from collaborators are wrapped with the path, resource, or operation
//! that was being worked on so a failure can be diagnosed from the message
//! alone.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::ResourceKind;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum GcsError {
    /// A filesystem step failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A container or process id is unknown.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing entity.
        kind: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// The requested resource kind or operation is not supported.
    #[error("{message}")]
    Unsupported {
        /// Description of what was requested.
        message: String,
    },

    /// A hot-plug payload is malformed.
    #[error("invalid settings: {message}")]
    InvalidSettings {
        /// Description of the problem.
        message: String,
    },

    /// An operation did not complete before its deadline.
    #[error("timed out {operation} after {elapsed:?}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// How long the caller waited.
        elapsed: Duration,
    },

    /// An external helper exited unsuccessfully.
    #[error("command `{command}` failed (status {status:?}): {output}")]
    Command {
        /// Rendered command line.
        command: String,
        /// Exit status, if the helper ran at all.
        status: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },

    /// A system call or kernel interface failed.
    #[error("{operation} failed: {source}")]
    Os {
        /// Operation that failed.
        operation: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The container runtime reported a failure.
    #[error("runtime error: {message}")]
    Runtime {
        /// Description from the runtime.
        message: String,
    },

    /// Applying a hot-plug modification failed.
    #[error("failed to modify resource type \"{resource}\": {source}")]
    Modify {
        /// Resource kind of the request.
        resource: ResourceKind,
        /// Error raised by the resource handler.
        source: Box<GcsError>,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl GcsError {
    /// Error for an unknown container id.
    #[must_use]
    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "container",
            id: id.into(),
        }
    }

    /// Error for an unknown process id.
    #[must_use]
    pub fn process_not_found(pid: u32) -> Self {
        Self::NotFound {
            kind: "process",
            id: pid.to_string(),
        }
    }

    /// Wraps an I/O error with the path it happened at.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps an OS-level error with the operation that produced it.
    #[must_use]
    pub fn os(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Os {
            operation: operation.into(),
            source,
        }
    }

    /// Returns `true` if this error, or the error it wraps, is a not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Modify { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Returns `true` if the caller may retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Modify { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GcsError>;
