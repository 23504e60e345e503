//! Result classification.
//!
//! Turns a sandbox run into a stored `CheckResult`. The verdict follows the
//! sandbox outcome. Metric checks must also yield a finite number from
//! their trimmed output; otherwise the run has no result at all, and the
//! error carries the sandbox failure when there was one.

use chrono::{DateTime, Utc};

use patrol_core::{CheckDefinition, CheckKind, Verdict};
use patrol_sandbox::{SandboxOutcome, SandboxRun};
use patrol_state::CheckResult;

use crate::error::ClassifyError;

/// Parse metric output. Empty, non-numeric, NaN and infinite values fail.
pub fn parse_metric(output: &str) -> Result<f64, ClassifyError> {
    let trimmed = output.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ClassifyError::InvalidMetric {
            output: trimmed.to_string(),
        })
}

/// Classify one run.
///
/// `now` is the classification time: it sets `created_at`, the UTC
/// day-of-month, and the end of the measured duration.
pub fn classify(
    definition: &CheckDefinition,
    run: &SandboxRun,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<CheckResult, ClassifyError> {
    let (verdict, error) = match &run.outcome {
        SandboxOutcome::Success => (Verdict::Healthy, None),
        SandboxOutcome::Failure { message } => (Verdict::Unhealthy, Some(message.clone())),
    };

    let value = match definition.kind {
        CheckKind::Metric => match (parse_metric(&run.output), &error) {
            (Ok(value), _) => Some(value),
            // Output of a failed run is rarely a number; report the failure.
            (Err(_), Some(cause)) => {
                return Err(ClassifyError::MetricRunFailed {
                    cause: cause.clone(),
                    output: run.output.trim().to_string(),
                });
            }
            (Err(e), None) => return Err(e),
        },
        CheckKind::Status => None,
    };

    let duration_ms = (now - started_at).num_milliseconds().max(0) as u64;

    Ok(CheckResult {
        service: definition.service.clone(),
        check: definition.name.clone(),
        created_at: now,
        day: CheckResult::day_of(now),
        duration_ms,
        kind: definition.kind,
        output: run.output.clone(),
        value,
        verdict,
        error,
    })
}
