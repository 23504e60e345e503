//! Shared types used across Patrol crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::sandbox_identity;

/// What a check produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Pass/fail only. One stored record per check per day.
    Status,
    /// A numeric measurement parsed from the command output. Every run is
    /// stored.
    Metric,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Status => "status",
            CheckKind::Metric => "metric",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary health classification of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Healthy,
    Unhealthy,
}

impl Verdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Verdict::Healthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Healthy => "healthy",
            Verdict::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, fully resolved check loaded from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckDefinition {
    /// Name of the owning service.
    pub service: String,
    /// Check name, unique within the service.
    pub name: String,
    pub kind: CheckKind,
    /// Shell command run inside the sandbox via `/bin/sh -c`.
    pub command: String,
    /// Image reference the sandbox is created from.
    pub image: String,
    /// Unit label for metric checks (e.g. "ms").
    pub unit: Option<String>,
    /// Time between the end of one run and the start of the next.
    pub interval: Duration,
    /// Notification targets used when the check turns healthy.
    pub on_success: Vec<String>,
    /// Notification targets used when the check turns unhealthy.
    pub on_failure: Vec<String>,
}

impl CheckDefinition {
    /// Deterministic sandbox name for this check. Stable across runs and
    /// restarts.
    pub fn sandbox_identity(&self) -> String {
        sandbox_identity(&self.service, &self.name)
    }

    /// Human-readable `service/check` label for logs.
    pub fn label(&self) -> String {
        format!("{}/{}", self.service, self.name)
    }

    /// Targets to notify for a given verdict.
    pub fn targets_for(&self, verdict: Verdict) -> &[String] {
        match verdict {
            Verdict::Healthy => &self.on_success,
            Verdict::Unhealthy => &self.on_failure,
        }
    }
}
