//! Persisted record types.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

pub use patrol_core::{CheckKind, Verdict};

use crate::tables::check_prefix;

/// Outcome of one completed check run, as stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub service: String,
    pub check: String,
    /// When the result was classified.
    pub created_at: DateTime<Utc>,
    /// UTC day-of-month of `created_at` (1–31). Part of the status upsert key.
    pub day: u32,
    /// Wall-clock time from run start to classification, in milliseconds.
    pub duration_ms: u64,
    pub kind: CheckKind,
    /// Sanitized stdout followed by sanitized stderr.
    pub output: String,
    /// Parsed measurement. Always `Some` for metric results.
    pub value: Option<f64>,
    pub verdict: Verdict,
    /// Failure detail (exit status, runtime error) when unhealthy.
    pub error: Option<String>,
}

impl CheckResult {
    /// Day-of-month used for a result created at `at`.
    pub fn day_of(at: DateTime<Utc>) -> u32 {
        at.day()
    }

    /// Upsert key for status results.
    pub fn status_key(&self) -> String {
        format!("{}{:02}", check_prefix(&self.service, &self.check), self.day)
    }

    /// Append key for metric results. `seq` disambiguates identical timestamps.
    pub fn metric_key(&self, seq: u64) -> String {
        let micros = self.created_at.timestamp_micros().max(0);
        format!(
            "{}{:020}{}{:010}",
            check_prefix(&self.service, &self.check),
            micros,
            crate::tables::KEY_SEP,
            seq
        )
    }
}
