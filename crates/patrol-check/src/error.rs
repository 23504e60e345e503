//! Check engine error types.

use thiserror::Error;

/// Classification failures. The run produces no record.
#[derive(Debug, Error, PartialEq)]
pub enum ClassifyError {
    #[error("metric output is not a finite number: {output:?}")]
    InvalidMetric { output: String },

    /// The sandbox failed and left no parseable metric.
    #[error("metric run failed: {cause}")]
    MetricRunFailed { cause: String, output: String },
}

/// Errors that end a single check run. Never fatal to the schedule.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error("result store error: {0}")]
    State(#[from] patrol_state::StateError),

    /// The run panicked. The check is still rescheduled.
    #[error("check run panicked: {message}")]
    Panicked { message: String },
}
