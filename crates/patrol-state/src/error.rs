//! Error types for the Patrol result store.

use thiserror::Error;

/// Result type alias for result store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the result store.
#[derive(Debug, Error)]
pub enum StateError {
    /// The database file could not be created or opened.
    #[error("failed to open result store: {0}")]
    Open(String),

    /// Beginning or committing a transaction, or opening a table in one.
    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("failed to encode result: {0}")]
    Serialize(String),

    #[error("failed to decode stored result: {0}")]
    Deserialize(String),
}
