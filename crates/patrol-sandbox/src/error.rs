//! Sandbox error types.

use thiserror::Error;

/// Result type alias for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors reported by a sandbox runtime or the controller.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to connect to sandbox runtime: {0}")]
    Connect(String),

    #[error("sandbox not found: {0}")]
    NotFound(String),

    #[error("sandbox runtime operation `{operation}` for `{target}` failed: {message}")]
    Runtime {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("sandbox task for `{target}` failed: {message}")]
    Task { target: String, message: String },
}

impl SandboxError {
    pub fn runtime(operation: &'static str, target: &str, message: impl ToString) -> Self {
        SandboxError::Runtime {
            operation,
            target: target.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SandboxError::NotFound(_))
    }
}
