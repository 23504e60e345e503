//! patrol-core — shared types and configuration for Patrol.
//!
//! A `patrol.toml` file lists services, each with a set of checks. Every
//! check is flattened into an immutable [`CheckDefinition`] at startup and
//! lives for the lifetime of the process.

pub mod config;
pub mod duration;
pub mod error;
pub mod identity;
pub mod types;

pub use config::{CheckConfig, PatrolConfig, ServiceConfig};
pub use duration::parse_duration;
pub use error::ConfigError;
pub use identity::sandbox_identity;
pub use types::*;
