//! Configuration error types.

use thiserror::Error;

/// Errors raised while turning a `patrol.toml` into check definitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("service #{index} has an empty name")]
    EmptyServiceName { index: usize },

    #[error("service '{service}' has a check with an empty name")]
    EmptyCheckName { service: String },

    #[error("check '{service}/{check}' has an empty {field}")]
    MissingField {
        service: String,
        check: String,
        field: &'static str,
    },

    #[error("check '{service}/{check}' has an invalid interval '{value}'")]
    InvalidInterval {
        service: String,
        check: String,
        value: String,
    },

    #[error("check '{service}/{check}' is defined more than once")]
    DuplicateCheck { service: String, check: String },

    #[error("checks '{first}' and '{second}' share sandbox identity '{identity}'")]
    IdentityCollision {
        identity: String,
        first: String,
        second: String,
    },
}
