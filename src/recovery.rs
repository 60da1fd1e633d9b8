//! Recovery advisor: picks what to do between two attempts of a failing phase.
//!
//! Classification is a case-insensitive substring match on the error text.
//! The advisor is pure; applying the chosen strategy is the retry
//! controller's job.

use conductor_common::{Phase, WorkerRole};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "temporarily",
    "connection",
    "network",
    "unavailable",
];

const SESSION_MARKERS: &[&str] = &[
    "session",
    "expired",
    "unauthorized",
    "forbidden",
    "logged out",
    "stale",
];

const TARGETING_MARKERS: &[&str] = &[
    "not found",
    "selector",
    "element",
    "no such",
    "unsupported",
];

/// What the retry controller does before the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecoveryAction {
    /// Restore memory from the last good checkpoint and recreate the worker.
    Rollback,
    /// Sleep, then retry with the same worker.
    WaitThenRetry { delay_ms: u64 },
    /// Reassign the phase to another worker role.
    SwapWorker { role: WorkerRole },
}

impl RecoveryAction {
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryAction::Rollback => "rollback",
            RecoveryAction::WaitThenRetry { .. } => "wait-then-retry",
            RecoveryAction::SwapWorker { .. } => "swap-worker",
        }
    }
}

/// Error class the advisor derived from the failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    Session,
    Targeting,
    Unknown,
}

impl FailureClass {
    pub fn classify(error: &str) -> Self {
        let lower = error.to_lowercase();
        let hit = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
        if hit(TRANSIENT_MARKERS) {
            FailureClass::Transient
        } else if hit(SESSION_MARKERS) {
            FailureClass::Session
        } else if hit(TARGETING_MARKERS) {
            FailureClass::Targeting
        } else {
            FailureClass::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub name: String,
    pub action: RecoveryAction,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Set by the retry controller once the strategy has been applied.
    #[serde(default)]
    pub succeeded: bool,
}

impl RecoveryStrategy {
    fn new(action: RecoveryAction, parameters: serde_json::Value) -> Self {
        Self {
            name: action.name().to_string(),
            action,
            parameters,
            succeeded: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryAdvisor {
    base_delay: Duration,
    max_delay: Duration,
    fallback_role: WorkerRole,
}

impl Default for RecoveryAdvisor {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(30), WorkerRole::Generic)
    }
}

impl RecoveryAdvisor {
    pub fn new(base_delay: Duration, max_delay: Duration, fallback_role: WorkerRole) -> Self {
        Self {
            base_delay,
            max_delay,
            fallback_role,
        }
    }

    pub fn fallback_role(&self) -> WorkerRole {
        self.fallback_role
    }

    /// Linear backoff: `base_delay * attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }

    pub fn analyze(&self, phase: &Phase, error: &str, attempt: u32) -> RecoveryStrategy {
        let class = FailureClass::classify(error);
        let action = match class {
            FailureClass::Transient => self.wait(attempt),
            FailureClass::Session => RecoveryAction::Rollback,
            FailureClass::Targeting if phase.role != self.fallback_role => {
                RecoveryAction::SwapWorker {
                    role: self.fallback_role,
                }
            }
            FailureClass::Targeting => RecoveryAction::Rollback,
            FailureClass::Unknown if attempt <= 1 => self.wait(attempt),
            FailureClass::Unknown => RecoveryAction::Rollback,
        };

        let mut parameters = json!({
            "class": class,
            "phase": phase.name,
            "attempt": attempt,
        });
        match &action {
            RecoveryAction::WaitThenRetry { delay_ms } => {
                parameters["delay_ms"] = json!(delay_ms);
            }
            RecoveryAction::SwapWorker { role } => {
                parameters["from_role"] = json!(phase.role);
                parameters["to_role"] = json!(role);
            }
            RecoveryAction::Rollback => {}
        }

        RecoveryStrategy::new(action, parameters)
    }

    fn wait(&self, attempt: u32) -> RecoveryAction {
        RecoveryAction::WaitThenRetry {
            delay_ms: self.delay_for(attempt).as_millis() as u64,
        }
    }
}
