//! Error types for torgate.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for torgate operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur while configuring the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The host does not meet the requirements for a run. Fatal, raised
    /// before any mutation.
    #[error("Precondition not met: {0}")]
    Precondition(String),

    /// A file could not be snapshotted into the backup registry. The stage
    /// holding the rule must halt rather than mutate unprotected state.
    #[error("Backup of {path} failed: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A rule's apply action failed. Halts the pipeline.
    #[error("Rule '{target}' failed to apply: {cause}")]
    RuleApply { target: String, cause: String },

    /// A readiness wait expired. Recoverable: the stage degrades instead
    /// of halting the run.
    #[error("Timed out after {waited_secs}s waiting for {what}")]
    Timeout { what: String, waited_secs: u64 },

    /// A system service operation failed
    #[error("Service '{name}': {message}")]
    Service { name: String, message: String },

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether the error is recoverable by degrading the current stage
    /// rather than halting the whole run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }
}
