//! Custom error types for kru.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while planning or running a rolling upgrade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KruError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid version format: {0} (expected MAJOR.MINOR.PATCH-REV.SUB, e.g. 1.33.1-1.1)")]
    InvalidVersion(String),

    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("[{host}] unreachable: {detail}")]
    Connectivity { host: String, detail: String },

    #[error("[{node}] {phase} failed: {detail}")]
    Phase {
        node: String,
        phase: String,
        detail: String,
    },

    #[error("Timeout waiting for {operation}: {details}")]
    Timeout { operation: String, details: String },

    #[error("[{host}] transport error: {detail}")]
    Transport { host: String, detail: String },

    #[error("[{host}] command timed out after {seconds}s")]
    CommandTimeout { host: String, seconds: u64 },

    #[error("Operation cancelled by user")]
    UserCancelled,
}

impl KruError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        KruError::Configuration(msg.into())
    }

    /// Returns true if the error means the host could not be reached at all,
    /// as opposed to a command that ran and failed.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            KruError::Transport { .. } | KruError::CommandTimeout { .. } | KruError::Connectivity { .. }
        )
    }

    /// Process exit code for an error that ends the run before a summary exists.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// A failed diagnostic command. Logged and reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftCheckWarning {
    pub host: String,
    pub command: String,
    pub detail: String,
}

impl fmt::Display for SoftCheckWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] `{}`: {}", self.host, self.command, self.detail)
    }
}
