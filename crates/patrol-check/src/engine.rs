//! CheckEngine — ties the sandbox, classifier, store, notifier and queue
//! together into a self-rescheduling loop per check.
//!
//! ```text
//! start_with_config ─► init_check ─► queue ─► execute_check ─► reschedule ─┐
//!                                      ▲                                   │
//!                                      └───────────────────────────────────┘
//! ```
//!
//! Every run attempt ends in exactly one `reschedule`, whatever happened
//! during the run. Nothing here stops scheduling a check.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, info, warn};

use patrol_core::{CheckDefinition, ConfigError, PatrolConfig, Verdict};
use patrol_sandbox::SandboxController;
use patrol_state::{CheckResult, ResultStore};

use crate::classifier::classify;
use crate::clock::Clock;
use crate::error::CheckError;
use crate::notify::{CheckContext, Notifier};
use crate::planner::{Schedule, plan_init, plan_next};
use crate::queue::{Job, JobFuture, JobQueue};

/// Per-check counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckStats {
    /// Completed run attempts, successful or not.
    pub runs: u64,
    /// Attempts that ended unhealthy or with an error.
    pub failures: u64,
    pub reschedules: u64,
    /// Verdict of the last attempt that reached a verdict.
    pub last_verdict: Option<Verdict>,
}

/// What one successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub result: CheckResult,
    pub previous: Option<Verdict>,
    /// Whether the run triggered notifications.
    pub notified: bool,
}

/// The check engine. Cheap to clone.
#[derive(Clone)]
pub struct CheckEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn ResultStore>,
    sandbox: SandboxController,
    queue: Arc<dyn JobQueue>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    stats: Mutex<HashMap<String, CheckStats>>,
}

impl CheckEngine {
    pub fn new(
        store: Arc<dyn ResultStore>,
        sandbox: SandboxController,
        queue: Arc<dyn JobQueue>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                sandbox,
                queue,
                notifier,
                clock,
                stats: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Enqueue one init job per configured check.
    ///
    /// The whole config is validated first; nothing is enqueued if it is
    /// invalid. Calling this twice schedules every check twice.
    pub fn start_with_config(&self, config: &PatrolConfig) -> Result<usize, ConfigError> {
        let definitions = config.check_definitions()?;
        let count = definitions.len();
        for definition in definitions {
            let engine = self.clone();
            let label = format!("init {}", definition.label());
            let definition = Arc::new(definition);
            let work: JobFuture = Box::pin(async move {
                engine.init_check(definition);
            });
            self.inner.queue.enqueue(Job::immediate(label, work));
        }
        info!(checks = count, "check engine started");
        Ok(count)
    }

    /// Plan and enqueue the first run of a check after process start.
    pub fn init_check(&self, definition: Arc<CheckDefinition>) -> Schedule {
        let latest = match self
            .inner
            .store
            .read_latest(&definition.service, &definition.name)
        {
            Ok(latest) => latest,
            Err(e) => {
                warn!(
                    service = %definition.service,
                    check = %definition.name,
                    error = %e,
                    "failed to read latest result, running immediately"
                );
                None
            }
        };

        let schedule = plan_init(latest.as_ref(), definition.interval, self.inner.clock.now());
        let label = format!("run {}", definition.label());
        let work = self.run_job(definition.clone());
        let job = match schedule {
            Schedule::Immediate => Job::immediate(label, work),
            Schedule::At(at) => Job::at(label, at, work),
        };
        self.inner.queue.enqueue(job);

        debug!(
            service = %definition.service,
            check = %definition.name,
            ?schedule,
            "check initialized"
        );
        schedule
    }

    /// Run one check attempt, then reschedule it.
    ///
    /// The error is returned for observation only; the next run is
    /// enqueued either way, including when the attempt panics.
    pub async fn execute_check(
        &self,
        definition: Arc<CheckDefinition>,
    ) -> Result<RunReport, CheckError> {
        let outcome = AssertUnwindSafe(self.run_once(&definition))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(CheckError::Panicked {
                    message: panic_message(panic.as_ref()),
                })
            });
        if let Err(e) = &outcome {
            warn!(
                service = %definition.service,
                check = %definition.name,
                error = %e,
                "check run failed"
            );
        }
        self.reschedule(definition);
        outcome
    }

    /// Enqueue the next run at `now + interval` and return that time.
    pub fn reschedule(&self, definition: Arc<CheckDefinition>) -> DateTime<Utc> {
        let next = plan_next(definition.interval, self.inner.clock.now());
        self.update_stats(&definition, |stats| stats.reschedules += 1);

        let label = format!("run {}", definition.label());
        let work = self.run_job(definition.clone());
        self.inner.queue.enqueue(Job::at(label, next, work));

        debug!(
            service = %definition.service,
            check = %definition.name,
            next = %next,
            "check rescheduled"
        );
        next
    }

    /// Counters for a check, if it has run or been rescheduled.
    pub fn stats(&self, service: &str, check: &str) -> Option<CheckStats> {
        let key = stats_key(service, check);
        match self.inner.stats.lock() {
            Ok(stats) => stats.get(&key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&key).cloned(),
        }
    }

    fn run_job(&self, definition: Arc<CheckDefinition>) -> JobFuture {
        let engine = self.clone();
        Box::pin(async move {
            let _ = engine.execute_check(definition).await;
        })
    }

    async fn run_once(&self, definition: &CheckDefinition) -> Result<RunReport, CheckError> {
        let identity = definition.sandbox_identity();
        let started_at = self.inner.clock.now();
        let run = self
            .inner
            .sandbox
            .run(&identity, &definition.image, &definition.command)
            .await;
        let now = self.inner.clock.now();
        let previous = self.previous_verdict(definition);
        self.update_stats(definition, |stats| stats.runs += 1);

        let result = match classify(definition, &run, started_at, now) {
            Ok(result) => result,
            Err(e) => {
                self.update_stats(definition, |stats| {
                    stats.failures += 1;
                    stats.last_verdict = Some(Verdict::Unhealthy);
                });
                if previous != Some(Verdict::Unhealthy) {
                    let context =
                        CheckContext::failed_run(definition, e.to_string(), previous, now);
                    self.inner
                        .notifier
                        .send_notifications(&definition.on_failure, &context);
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self.inner.store.persist(&result) {
            self.update_stats(definition, |stats| stats.failures += 1);
            return Err(e.into());
        }

        let verdict = result.verdict;
        self.update_stats(definition, |stats| {
            if !verdict.is_healthy() {
                stats.failures += 1;
            }
            stats.last_verdict = Some(verdict);
        });

        let notified = is_transition(previous, verdict);
        if notified {
            let context = CheckContext::from_result(definition, &result, previous);
            self.inner
                .notifier
                .send_notifications(definition.targets_for(verdict), &context);
        }

        info!(
            service = %definition.service,
            check = %definition.name,
            verdict = %verdict,
            duration_ms = result.duration_ms,
            "check completed"
        );
        Ok(RunReport {
            result,
            previous,
            notified,
        })
    }

    /// Last verdict seen in this process, or else the newest stored one.
    fn previous_verdict(&self, definition: &CheckDefinition) -> Option<Verdict> {
        if let Some(verdict) = self
            .stats(&definition.service, &definition.name)
            .and_then(|stats| stats.last_verdict)
        {
            return Some(verdict);
        }
        match self
            .inner
            .store
            .read_latest(&definition.service, &definition.name)
        {
            Ok(latest) => latest.map(|result| result.verdict),
            Err(e) => {
                warn!(
                    service = %definition.service,
                    check = %definition.name,
                    error = %e,
                    "failed to read previous result"
                );
                None
            }
        }
    }

    fn update_stats(&self, definition: &CheckDefinition, update: impl FnOnce(&mut CheckStats)) {
        let key = stats_key(&definition.service, &definition.name);
        let mut stats = match self.inner.stats.lock() {
            Ok(stats) => stats,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(stats.entry(key).or_default());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn stats_key(service: &str, check: &str) -> String {
    format!("{service}/{check}")
}

/// A first result only notifies when it is unhealthy.
fn is_transition(previous: Option<Verdict>, current: Verdict) -> bool {
    match previous {
        Some(previous) => previous != current,
        None => !current.is_healthy(),
    }
}
