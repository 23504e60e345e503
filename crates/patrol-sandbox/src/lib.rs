//! patrol-sandbox — ephemeral execution sandboxes for check runs.
//!
//! Each run gets exactly one sandbox, named by the check's deterministic
//! identity. The controller reclaims any previous holder of that name,
//! makes sure the image is present, creates the sandbox, attaches to its
//! output before starting it, and waits for it to terminate.
//!
//! # Architecture
//!
//! ```text
//! SandboxController::run(identity, image, command)
//!   ├── SandboxRuntime (trait; DockerRuntime via bollard)
//!   │   ├── inspect / remove   (reclaim identity)
//!   │   ├── list tags / pull   (image presence)
//!   │   ├── create / attach    (output stream armed before start)
//!   │   └── start / wait       (exit status)
//!   └── OutputBuffer (per-run, sanitized stdout + stderr)
//! ```
//!
//! Neither the image pull nor the wait is bounded by a timeout. A stuck
//! registry or sandbox stalls that check's pipeline and nothing else.

pub mod controller;
pub mod docker;
pub mod error;
pub mod output;
pub mod runtime;

pub use controller::{SandboxController, SandboxOutcome, SandboxRun};
pub use docker::DockerRuntime;
pub use error::{SandboxError, SandboxResult};
pub use output::{OutputBuffer, sanitize_text};
pub use runtime::{
    OutputChunk, OutputStream, RuntimeFuture, SandboxExit, SandboxRuntime, SandboxSpec, StreamKind,
};
