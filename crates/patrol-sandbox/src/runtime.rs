//! The execution runtime contract the controller drives.
//!
//! Methods return boxed futures so the trait stays object-safe and a
//! runtime can be shared as `Arc<dyn SandboxRuntime>`.

use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use bytes::Bytes;
use futures::Stream;

use crate::error::SandboxResult;

/// Boxed future alias for runtime calls.
pub type RuntimeFuture<'a, T> = Pin<Box<dyn Future<Output = SandboxResult<T>> + Send + 'a>>;

/// Output stream of an attached sandbox. Ends when the sandbox exits.
pub type OutputStream = Pin<Box<dyn Stream<Item = SandboxResult<OutputChunk>> + Send>>;

/// Which stream a chunk was read from. Runtimes that merge both streams
/// report everything as `Stdout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Raw bytes read from one attached stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub bytes: Bytes,
}

impl OutputChunk {
    pub fn stdout(bytes: impl Into<Bytes>) -> Self {
        Self {
            stream: StreamKind::Stdout,
            bytes: bytes.into(),
        }
    }

    pub fn stderr(bytes: impl Into<Bytes>) -> Self {
        Self {
            stream: StreamKind::Stderr,
            bytes: bytes.into(),
        }
    }
}

/// What to create under a sandbox identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub identity: String,
    pub image: String,
    /// Passed as the single argument of `/bin/sh -c`.
    pub command: String,
}

/// Termination status reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxExit {
    pub status_code: i64,
    /// Error reported alongside the exit (e.g. OOM kill), if any.
    pub error: Option<String>,
}

impl SandboxExit {
    pub fn success(&self) -> bool {
        self.status_code == 0 && self.error.is_none()
    }
}

/// An external engine that can host named, ephemeral sandboxes.
pub trait SandboxRuntime: Send + Sync {
    /// Every `repo:tag` present locally.
    fn list_image_tags(&self) -> RuntimeFuture<'_, Vec<String>>;

    /// Pull an image. May block for an unbounded time.
    fn pull_image<'a>(&'a self, image: &'a str) -> RuntimeFuture<'a, ()>;

    /// Whether a sandbox currently exists under `identity`.
    fn sandbox_exists<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, bool>;

    /// Forcibly remove the sandbox under `identity`. Returns
    /// `SandboxError::NotFound` if there is none.
    fn remove_sandbox<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, ()>;

    /// Create (but do not start) a sandbox with auto-removal on exit, no
    /// stdin, and stdout/stderr capture.
    fn create_sandbox<'a>(&'a self, spec: &'a SandboxSpec) -> RuntimeFuture<'a, ()>;

    /// Attach to the sandbox's output. Must be called before start.
    fn attach_output<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, OutputStream>;

    fn start_sandbox<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, ()>;

    /// Resolve once the sandbox has terminated. No timeout.
    fn wait_sandbox<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, SandboxExit>;

    /// Exit status of the last sandbox under `identity` that terminated at
    /// or after `since`. Used when the sandbox was already reclaimed by the
    /// time the wait reached the runtime. `None` if the runtime cannot tell.
    fn recover_exit<'a>(
        &'a self,
        _identity: &'a str,
        _since: SystemTime,
    ) -> RuntimeFuture<'a, Option<SandboxExit>> {
        Box::pin(async { Ok(None) })
    }
}
