//! Sandbox controller — one full sandbox lifecycle per call.
//!
//! `run` never fails: every error becomes a `SandboxOutcome::Failure`
//! carrying the raw error text. There is no retry here; the next attempt
//! is the next scheduled run.

use std::sync::Arc;
use std::time::SystemTime;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::docker::normalize_image_ref;
use crate::error::{SandboxError, SandboxResult};
use crate::output::OutputBuffer;
use crate::runtime::{OutputStream, SandboxExit, SandboxRuntime, SandboxSpec};

/// How a sandbox run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    /// Exit code 0 and no termination error.
    Success,
    /// Non-zero exit, termination error, or a runtime failure.
    Failure { message: String },
}

impl SandboxOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SandboxOutcome::Success)
    }
}

/// Everything the classifier needs from one sandbox run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRun {
    pub outcome: SandboxOutcome,
    /// Sanitized stdout followed by sanitized stderr.
    pub output: String,
    /// Exit code, when the sandbox got far enough to report one.
    pub exit_code: Option<i64>,
}

/// Drives a [`SandboxRuntime`] through the per-run lifecycle.
#[derive(Clone)]
pub struct SandboxController {
    runtime: Arc<dyn SandboxRuntime>,
}

impl SandboxController {
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self { runtime }
    }

    /// Run `command` in a fresh sandbox named `identity`.
    pub async fn run(&self, identity: &str, image: &str, command: &str) -> SandboxRun {
        match self.execute(identity, image, command).await {
            Ok((exit, output)) => {
                let outcome = if exit.success() {
                    SandboxOutcome::Success
                } else {
                    SandboxOutcome::Failure {
                        message: exit_message(identity, &exit),
                    }
                };
                debug!(sandbox = %identity, status = exit.status_code, "sandbox terminated");
                SandboxRun {
                    outcome,
                    output,
                    exit_code: Some(exit.status_code),
                }
            }
            Err(e) => {
                warn!(sandbox = %identity, error = %e, "sandbox run failed");
                SandboxRun {
                    outcome: SandboxOutcome::Failure {
                        message: e.to_string(),
                    },
                    output: String::new(),
                    exit_code: None,
                }
            }
        }
    }

    async fn execute(
        &self,
        identity: &str,
        image: &str,
        command: &str,
    ) -> SandboxResult<(SandboxExit, String)> {
        self.reclaim(identity).await?;
        self.ensure_image(image).await?;

        let spec = SandboxSpec {
            identity: identity.to_string(),
            image: image.to_string(),
            command: command.to_string(),
        };
        self.runtime.create_sandbox(&spec).await?;

        // Attach before start so no early output is lost.
        let stream = self.runtime.attach_output(identity).await?;
        let drain = tokio::spawn(drain_output(stream));

        // Spawn the wait before start. The request may still reach the
        // runtime after a fast sandbox has been reclaimed; see below.
        let waiter = {
            let runtime = self.runtime.clone();
            let identity = identity.to_string();
            tokio::spawn(async move { runtime.wait_sandbox(&identity).await })
        };

        let start_requested_at = SystemTime::now();
        if let Err(e) = self.runtime.start_sandbox(identity).await {
            waiter.abort();
            drain.abort();
            return Err(e);
        }
        info!(sandbox = %identity, %image, "sandbox started");

        let exit = match join(identity, waiter).await {
            Ok(exit) => exit,
            // Started, then exited and was auto-removed before the wait
            // registered.
            Err(e) if e.is_not_found() => {
                match self.recover_exit(identity, start_requested_at).await {
                    Some(exit) => exit,
                    None => {
                        drain.abort();
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                drain.abort();
                return Err(e);
            }
        };
        let output = join(identity, drain).await?;
        Ok((exit, output.into_combined()))
    }

    async fn recover_exit(&self, identity: &str, since: SystemTime) -> Option<SandboxExit> {
        match self.runtime.recover_exit(identity, since).await {
            Ok(Some(exit)) => {
                debug!(sandbox = %identity, status = exit.status_code, "recovered exit status");
                Some(exit)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(sandbox = %identity, error = %e, "failed to recover exit status");
                None
            }
        }
    }

    /// Remove whatever sandbox currently holds `identity`.
    async fn reclaim(&self, identity: &str) -> SandboxResult<()> {
        if !self.runtime.sandbox_exists(identity).await? {
            return Ok(());
        }
        match self.runtime.remove_sandbox(identity).await {
            Ok(()) => {
                info!(sandbox = %identity, "removed previous sandbox");
                Ok(())
            }
            // Gone between inspect and remove (e.g. auto-removed on exit).
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Pull `image` unless a matching tag is already present locally.
    async fn ensure_image(&self, image: &str) -> SandboxResult<()> {
        let wanted = normalize_image_ref(image);
        let tags = self.runtime.list_image_tags().await?;
        if tags.iter().any(|t| *t == wanted) {
            debug!(%image, "image present locally");
            return Ok(());
        }
        info!(%image, "image not present locally, pulling");
        self.runtime.pull_image(image).await?;
        info!(%image, "image pulled");
        Ok(())
    }
}

/// Read an attached stream to its end into a fresh buffer.
async fn drain_output(mut stream: OutputStream) -> SandboxResult<OutputBuffer> {
    let mut buffer = OutputBuffer::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.push(chunk.stream, &chunk.bytes);
    }
    Ok(buffer)
}

async fn join<T>(identity: &str, handle: JoinHandle<SandboxResult<T>>) -> SandboxResult<T> {
    handle.await.map_err(|e| SandboxError::Task {
        target: identity.to_string(),
        message: e.to_string(),
    })?
}

fn exit_message(identity: &str, exit: &SandboxExit) -> String {
    match &exit.error {
        Some(err) => format!(
            "sandbox '{identity}' exited with exit status {}: {err}",
            exit.status_code
        ),
        None => format!(
            "sandbox '{identity}' exited with exit status {}",
            exit.status_code
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::runtime::{OutputChunk, RuntimeFuture};
    use tokio::sync::watch;

    /// Scripted runtime that records every call it receives.
    struct FakeRuntime {
        calls: Mutex<Vec<String>>,
        exists: bool,
        remove_error: Option<fn(&str) -> SandboxError>,
        tags: Vec<String>,
        create_fails: bool,
        chunks: Vec<OutputChunk>,
        exit: SandboxExit,
        /// Simulates a sandbox reclaimed before the wait registered.
        wait_not_found: bool,
        recovered: Option<SandboxExit>,
        started: watch::Sender<bool>,
    }

    impl FakeRuntime {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                exists: false,
                remove_error: None,
                tags: vec!["alpine:3.20".to_string()],
                create_fails: false,
                chunks: vec![OutputChunk::stdout("42\n")],
                exit: SandboxExit {
                    status_code: 0,
                    error: None,
                },
                wait_not_found: false,
                recovered: None,
                started: watch::channel(false).0,
            }
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SandboxRuntime for FakeRuntime {
        fn list_image_tags(&self) -> RuntimeFuture<'_, Vec<String>> {
            self.record("list_image_tags");
            Box::pin(async move { Ok(self.tags.clone()) })
        }

        fn pull_image<'a>(&'a self, image: &'a str) -> RuntimeFuture<'a, ()> {
            self.record(&format!("pull {image}"));
            Box::pin(async { Ok(()) })
        }

        fn sandbox_exists<'a>(&'a self, _identity: &'a str) -> RuntimeFuture<'a, bool> {
            self.record("exists");
            Box::pin(async move { Ok(self.exists) })
        }

        fn remove_sandbox<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, ()> {
            self.record("remove");
            Box::pin(async move {
                match self.remove_error {
                    Some(make) => Err(make(identity)),
                    None => Ok(()),
                }
            })
        }

        fn create_sandbox<'a>(&'a self, spec: &'a SandboxSpec) -> RuntimeFuture<'a, ()> {
            self.record(&format!("create {}", spec.identity));
            Box::pin(async move {
                if self.create_fails {
                    Err(SandboxError::runtime("create_container", &spec.identity, "conflict"))
                } else {
                    Ok(())
                }
            })
        }

        fn attach_output<'a>(&'a self, _identity: &'a str) -> RuntimeFuture<'a, OutputStream> {
            self.record("attach");
            let chunks: Vec<SandboxResult<OutputChunk>> =
                self.chunks.iter().cloned().map(Ok).collect();
            Box::pin(async move { Ok(Box::pin(futures::stream::iter(chunks)) as OutputStream) })
        }

        fn start_sandbox<'a>(&'a self, _identity: &'a str) -> RuntimeFuture<'a, ()> {
            self.record("start");
            self.started.send_replace(true);
            Box::pin(async { Ok(()) })
        }

        fn wait_sandbox<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, SandboxExit> {
            let mut started = self.started.subscribe();
            Box::pin(async move {
                // A real sandbox cannot exit before it has started.
                loop {
                    let is_started = *started.borrow_and_update();
                    if is_started || started.changed().await.is_err() {
                        break;
                    }
                }
                self.record("wait");
                if self.wait_not_found {
                    return Err(SandboxError::NotFound(identity.to_string()));
                }
                Ok(self.exit.clone())
            })
        }

        fn recover_exit<'a>(
            &'a self,
            _identity: &'a str,
            _since: SystemTime,
        ) -> RuntimeFuture<'a, Option<SandboxExit>> {
            self.record("recover");
            Box::pin(async move { Ok(self.recovered.clone()) })
        }
    }

    fn controller(fake: FakeRuntime) -> (SandboxController, Arc<FakeRuntime>) {
        let fake = Arc::new(fake);
        (SandboxController::new(fake.clone()), fake)
    }

    #[tokio::test]
    async fn successful_run_captures_output() {
        let (ctl, fake) = controller(FakeRuntime::new());
        let run = ctl.run("patrol_api_ping", "alpine:3.20", "echo 42").await;

        assert_eq!(run.outcome, SandboxOutcome::Success);
        assert_eq!(run.output, "42\n");
        assert_eq!(run.exit_code, Some(0));

        let calls = fake.calls();
        let pos = |name: &str| calls.iter().position(|c| c == name).unwrap();
        assert!(pos("attach") < pos("start"));
        assert!(pos("start") < pos("wait"));
        assert!(!calls.iter().any(|c| c == "remove"));
        assert!(!calls.iter().any(|c| c.starts_with("pull")));
    }

    #[tokio::test]
    async fn existing_sandbox_is_removed_first() {
        let mut fake = FakeRuntime::new();
        fake.exists = true;
        let (ctl, fake) = controller(fake);
        ctl.run("patrol_api_ping", "alpine:3.20", "true").await;

        let calls = fake.calls();
        assert_eq!(&calls[..2], &["exists".to_string(), "remove".to_string()]);
    }

    #[tokio::test]
    async fn vanished_sandbox_during_remove_is_not_an_error() {
        let mut fake = FakeRuntime::new();
        fake.exists = true;
        fake.remove_error = Some(|id: &str| SandboxError::NotFound(id.to_string()));
        let (ctl, _) = controller(fake);

        let run = ctl.run("patrol_api_ping", "alpine:3.20", "true").await;
        assert!(run.outcome.is_success());
    }

    #[tokio::test]
    async fn remove_failure_aborts_run() {
        let mut fake = FakeRuntime::new();
        fake.exists = true;
        fake.remove_error =
            Some(|id: &str| SandboxError::runtime("remove_container", id, "device busy"));
        let (ctl, fake) = controller(fake);

        let run = ctl.run("patrol_api_ping", "alpine:3.20", "true").await;
        match run.outcome {
            SandboxOutcome::Failure { message } => assert!(message.contains("device busy")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!fake.calls().iter().any(|c| c.starts_with("create")));
    }

    #[tokio::test]
    async fn missing_image_is_pulled() {
        let (ctl, fake) = controller(FakeRuntime::new());
        ctl.run("patrol_api_ping", "busybox", "true").await;

        let calls = fake.calls();
        assert!(calls.contains(&"pull busybox".to_string()));
        let pull = calls.iter().position(|c| c == "pull busybox").unwrap();
        let create = calls.iter().position(|c| c.starts_with("create")).unwrap();
        assert!(pull < create);
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_with_status() {
        let mut fake = FakeRuntime::new();
        fake.exit = SandboxExit {
            status_code: 2,
            error: None,
        };
        fake.chunks = vec![OutputChunk::stderr("connection refused\n")];
        let (ctl, _) = controller(fake);

        let run = ctl.run("patrol_api_ping", "alpine:3.20", "false").await;
        match &run.outcome {
            SandboxOutcome::Failure { message } => assert!(message.contains("exit status 2")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(run.exit_code, Some(2));
        assert_eq!(run.output, "connection refused\n");
    }

    #[tokio::test]
    async fn termination_error_with_zero_code_is_failure() {
        let mut fake = FakeRuntime::new();
        fake.exit = SandboxExit {
            status_code: 0,
            error: Some("killed".to_string()),
        };
        let (ctl, _) = controller(fake);

        let run = ctl.run("patrol_api_ping", "alpine:3.20", "true").await;
        match run.outcome {
            SandboxOutcome::Failure { message } => assert!(message.contains("killed")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_failure_keeps_raw_error() {
        let mut fake = FakeRuntime::new();
        fake.create_fails = true;
        let (ctl, fake) = controller(fake);

        let run = ctl.run("patrol_api_ping", "alpine:3.20", "true").await;
        match run.outcome {
            SandboxOutcome::Failure { message } => {
                assert!(message.contains("create_container"));
                assert!(message.contains("conflict"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(run.exit_code, None);
        assert!(!fake.calls().iter().any(|c| c == "start"));
    }

    #[tokio::test]
    async fn reclaimed_before_wait_uses_recovered_exit() {
        let mut fake = FakeRuntime::new();
        fake.wait_not_found = true;
        fake.recovered = Some(SandboxExit {
            status_code: 0,
            error: None,
        });
        let (ctl, fake) = controller(fake);

        let run = ctl.run("patrol_api_ping", "alpine:3.20", "echo 42").await;
        assert_eq!(run.outcome, SandboxOutcome::Success);
        assert_eq!(run.output, "42\n");
        assert!(fake.calls().contains(&"recover".to_string()));
    }

    #[tokio::test]
    async fn reclaimed_before_wait_keeps_recovered_failure() {
        let mut fake = FakeRuntime::new();
        fake.wait_not_found = true;
        fake.recovered = Some(SandboxExit {
            status_code: 3,
            error: None,
        });
        let (ctl, _) = controller(fake);

        let run = ctl.run("patrol_api_ping", "alpine:3.20", "exit 3").await;
        assert_eq!(run.exit_code, Some(3));
        assert!(!run.outcome.is_success());
    }

    #[tokio::test]
    async fn unrecoverable_exit_is_not_found_failure() {
        let mut fake = FakeRuntime::new();
        fake.wait_not_found = true;
        let (ctl, _) = controller(fake);

        let run = ctl.run("patrol_api_ping", "alpine:3.20", "true").await;
        match run.outcome {
            SandboxOutcome::Failure { message } => assert!(message.contains("not found")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(run.exit_code, None);
    }
}
