use crate::recovery::RecoveryStrategy;
use chrono::{DateTime, Utc};
use conductor_common::{MissionId, MissionStatus, RequestId, WorkerRole};
use serde::{Deserialize, Serialize};

/// One immutable, timestamped record of a mission state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub mission_id: MissionId,
    /// Strictly increasing per mission, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: AuditEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventKind {
    MissionStarted {
        procedure_hash: String,
        phase_count: usize,
        require_human_oversight: bool,
        max_retries: u32,
    },
    MissionResumed {
        from_checkpoint: u64,
        remaining_phases: usize,
    },
    StatusChanged {
        from: MissionStatus,
        to: MissionStatus,
    },
    PhaseStarted {
        phase: String,
        attempt: u32,
        role: WorkerRole,
    },
    PhaseCompleted {
        phase: String,
        attempt: u32,
        summary: String,
    },
    PhaseFailed {
        phase: String,
        attempt: u32,
        error: String,
    },
    PhaseSkipped {
        phase: String,
        reason: String,
    },
    RecoveryApplied {
        phase: String,
        attempt: u32,
        strategy: RecoveryStrategy,
    },
    InterventionRequested {
        request_id: RequestId,
        phase: String,
    },
    InterventionResolved {
        request_id: RequestId,
        phase: String,
        action: String,
        #[serde(default)]
        timed_out: bool,
    },
    MissionRecoveryAttempted {
        phase: String,
        max_retries: u32,
    },
    MissionCompleted {
        phases_completed: usize,
        phases_skipped: usize,
    },
    MissionFailed {
        phase: String,
        attempts: u32,
        error: String,
    },
    MissionPaused {
        phase: String,
        reason: String,
    },
    MissionCancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
    },
}

impl AuditEventKind {
    /// Phase the event concerns, if any.
    pub fn phase(&self) -> Option<&str> {
        match self {
            AuditEventKind::PhaseStarted { phase, .. }
            | AuditEventKind::PhaseCompleted { phase, .. }
            | AuditEventKind::PhaseFailed { phase, .. }
            | AuditEventKind::PhaseSkipped { phase, .. }
            | AuditEventKind::RecoveryApplied { phase, .. }
            | AuditEventKind::InterventionRequested { phase, .. }
            | AuditEventKind::InterventionResolved { phase, .. }
            | AuditEventKind::MissionRecoveryAttempted { phase, .. }
            | AuditEventKind::MissionFailed { phase, .. }
            | AuditEventKind::MissionPaused { phase, .. } => Some(phase),
            AuditEventKind::MissionCancelled { phase } => phase.as_deref(),
            _ => None,
        }
    }

    /// Short machine name, matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            AuditEventKind::MissionStarted { .. } => "mission_started",
            AuditEventKind::MissionResumed { .. } => "mission_resumed",
            AuditEventKind::StatusChanged { .. } => "status_changed",
            AuditEventKind::PhaseStarted { .. } => "phase_started",
            AuditEventKind::PhaseCompleted { .. } => "phase_completed",
            AuditEventKind::PhaseFailed { .. } => "phase_failed",
            AuditEventKind::PhaseSkipped { .. } => "phase_skipped",
            AuditEventKind::RecoveryApplied { .. } => "recovery_applied",
            AuditEventKind::InterventionRequested { .. } => "intervention_requested",
            AuditEventKind::InterventionResolved { .. } => "intervention_resolved",
            AuditEventKind::MissionRecoveryAttempted { .. } => "mission_recovery_attempted",
            AuditEventKind::MissionCompleted { .. } => "mission_completed",
            AuditEventKind::MissionFailed { .. } => "mission_failed",
            AuditEventKind::MissionPaused { .. } => "mission_paused",
            AuditEventKind::MissionCancelled { .. } => "mission_cancelled",
        }
    }
}

pub mod logger;
pub use logger::AuditLog;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_flat_type_tag() {
        let event = AuditEvent {
            mission_id: MissionId::new_v4(),
            sequence: 4,
            timestamp: Utc::now(),
            kind: AuditEventKind::PhaseFailed {
                phase: "02-email".into(),
                attempt: 1,
                error: "timeout".into(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "phase_failed");
        assert_eq!(value["phase"], "02-email");
        assert_eq!(value["sequence"], 4);

        let back: AuditEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_phase_accessor() {
        let kind = AuditEventKind::MissionCancelled { phase: None };
        assert!(kind.phase().is_none());
        let kind = AuditEventKind::PhaseSkipped {
            phase: "03-crm".into(),
            reason: "operator".into(),
        };
        assert_eq!(kind.phase(), Some("03-crm"));
        assert_eq!(kind.name(), "phase_skipped");
    }
}
