//! Init / reschedule planning.
//!
//! Two rules only:
//! - cold start: if the last stored result is still fresh, resume exactly at
//!   `last.created_at + interval`; otherwise run now.
//! - after every run: next run at `now + interval`.
//!
//! Only the first run after a restart is drift-compensated. Delays after
//! that accumulate.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use patrol_state::CheckResult;

/// When the next execution should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Immediate,
    At(DateTime<Utc>),
}

/// `at + interval`, saturating at the end of representable time.
pub fn add_interval(at: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(interval)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Plan the first run of a check after process start.
pub fn plan_init(latest: Option<&CheckResult>, interval: Duration, now: DateTime<Utc>) -> Schedule {
    match latest {
        Some(last) => {
            let due = add_interval(last.created_at, interval);
            if now < due {
                Schedule::At(due)
            } else {
                Schedule::Immediate
            }
        }
        None => Schedule::Immediate,
    }
}

/// Plan the run following a completed attempt.
pub fn plan_next(interval: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    add_interval(now, interval)
}
