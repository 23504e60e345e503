//! patrol-state — embedded result store for Patrol.
//!
//! Backed by [redb](https://docs.rs/redb), persists one [`CheckResult`] per
//! completed check run. Metric results are append-only; status results are
//! upserted so that each check keeps at most one record per day-of-month.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{service}␟{check}␟{day}` and
//! `{service}␟{check}␟{micros}␟{seq}`) enable prefix scans per check.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. The engine only sees it through the
//! [`ResultStore`] trait.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{ResultStore, StateStore};
pub use types::*;
