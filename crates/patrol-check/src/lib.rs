//! patrol-check — the periodic check engine.
//!
//! Each configured check runs in a fresh sandbox, gets classified into a
//! [`patrol_state::CheckResult`], is persisted, may notify, and is then
//! enqueued again one interval later.
//!
//! # Architecture
//!
//! ```text
//! CheckEngine
//!   ├── SandboxController   (patrol-sandbox: one sandbox per run)
//!   ├── classify            (sandbox run → CheckResult)
//!   ├── ResultStore         (patrol-state: upsert status, append metric)
//!   ├── Notifier            (log / webhook on verdict transitions)
//!   ├── planner             (init drift compensation, now + interval)
//!   ├── JobQueue            (delayed jobs, LocalQueue on tokio)
//!   └── Clock               (SystemClock, ManualClock in tests)
//! ```

pub mod classifier;
pub mod clock;
pub mod engine;
pub mod error;
pub mod notify;
pub mod planner;
pub mod queue;

pub use classifier::{classify, parse_metric};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{CheckEngine, CheckStats, RunReport};
pub use error::{CheckError, ClassifyError};
pub use notify::{CheckContext, FanoutNotifier, LogNotifier, Notifier, WebhookNotifier};
pub use planner::{Schedule, plan_init, plan_next};
pub use queue::{Job, JobFuture, JobQueue, LocalQueue};
