//! Delayed-job queue.
//!
//! The engine never decides *when* code runs; it hands jobs to a
//! [`JobQueue`] with an optional ready time. The queue must invoke each job
//! once, at or after its ready time.
//!
//! The engine keeps at most one pending job per check, so the queue never
//! has to deduplicate.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::clock::Clock;

/// Boxed unit of work.
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A unit of work with an optional earliest start time.
pub struct Job {
    /// Short description for logs (e.g. "run api/ping").
    pub label: String,
    /// `None` means runnable now.
    pub ready_at: Option<DateTime<Utc>>,
    pub work: JobFuture,
}

impl Job {
    pub fn immediate(label: impl Into<String>, work: JobFuture) -> Self {
        Self {
            label: label.into(),
            ready_at: None,
            work,
        }
    }

    pub fn at(label: impl Into<String>, ready_at: DateTime<Utc>, work: JobFuture) -> Self {
        Self {
            label: label.into(),
            ready_at: Some(ready_at),
            work,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("label", &self.label)
            .field("ready_at", &self.ready_at)
            .finish_non_exhaustive()
    }
}

/// Accepts jobs for later execution.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: Job);
}

/// In-process queue on the tokio runtime.
///
/// Each job gets its own task that sleeps until the job is ready and then
/// runs it to completion. Must be used from within a tokio runtime.
pub struct LocalQueue {
    clock: Arc<dyn Clock>,
    /// Jobs accepted but not yet finished.
    in_flight: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
}

impl LocalQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown: watch::channel(false).0,
        }
    }

    /// Number of jobs waiting or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Drop every job still waiting for its ready time and refuse new ones.
    /// Jobs already running are left to finish.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Time left until `ready_at`, or zero if it has passed.
    fn delay_until(&self, ready_at: Option<DateTime<Utc>>) -> Duration {
        ready_at
            .and_then(|at| (at - self.clock.now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

impl JobQueue for LocalQueue {
    fn enqueue(&self, job: Job) {
        if self.is_shut_down() {
            debug!(job = %job.label, "queue shut down, dropping job");
            return;
        }

        let delay = self.delay_until(job.ready_at);
        let in_flight = self.in_flight.clone();
        let mut shutdown = self.shutdown.subscribe();
        in_flight.fetch_add(1, Ordering::SeqCst);
        debug!(job = %job.label, delay_ms = delay.as_millis() as u64, "job enqueued");

        tokio::spawn(async move {
            // Released even if the job panics.
            let _in_flight = InFlight(in_flight);
            let Job { label, work, .. } = job;
            let cancelled = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = stopped(&mut shutdown) => true,
            };
            if cancelled {
                debug!(job = %label, "job cancelled by shutdown");
            } else {
                debug!(job = %label, "job ready");
                work.await;
            }
        });
    }
}

/// Counts one accepted job until dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolve once the queue is shut down. Never resolves if the queue itself
/// is dropped first.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
