use crate::audit::{AuditEvent, AuditEventKind};
use crate::checkpoint::Checkpoint;
use crate::errors::StoreError;
use conductor_common::{MissionMemory, MissionStatus, Phase, PhaseResult, PhaseStatus, WorkerRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointOutcome {
    Initialized,
    AttemptSucceeded,
    AttemptFailed,
    Skipped,
}

impl CheckpointOutcome {
    /// A good checkpoint is a valid rollback target.
    pub fn is_good(&self) -> bool {
        !matches!(self, CheckpointOutcome::AttemptFailed)
    }
}

/// Payload stored in every checkpoint the engine writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionState {
    pub outcome: CheckpointOutcome,
    pub status: MissionStatus,
    pub procedure_hash: String,
    #[serde(default)]
    pub phase_results: BTreeMap<String, PhaseResult>,
    /// Attempts spent per phase, across recovery passes and resumes.
    #[serde(default)]
    pub attempts: BTreeMap<String, u32>,
    /// Role each phase is (or will be) executed by.
    #[serde(default)]
    pub roles: BTreeMap<String, WorkerRole>,
    #[serde(default)]
    pub memory: MissionMemory,
}

impl MissionState {
    pub fn initial(procedure_hash: &str, phases: &[Phase]) -> Self {
        Self {
            outcome: CheckpointOutcome::Initialized,
            status: MissionStatus::Pending,
            procedure_hash: procedure_hash.to_string(),
            phase_results: BTreeMap::new(),
            attempts: BTreeMap::new(),
            roles: phases.iter().map(|p| (p.name.clone(), p.role)).collect(),
            memory: MissionMemory::new(),
        }
    }

    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self, StoreError> {
        Ok(serde_json::from_value(checkpoint.state.clone())?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::to_value(self)?)
    }

    /// True when `checkpoint` carries a state that is safe to roll back to.
    pub fn is_good_checkpoint(checkpoint: &Checkpoint) -> bool {
        checkpoint
            .state
            .get("outcome")
            .cloned()
            .and_then(|v| serde_json::from_value::<CheckpointOutcome>(v).ok())
            .is_some_and(|o| o.is_good())
    }

    /// Bump and return the attempt counter for `phase`.
    pub fn next_attempt(&mut self, phase: &str) -> u32 {
        let counter = self.attempts.entry(phase.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Raise attempt counters to the attempts the audit trail shows as
    /// started. Returns the attempts no checkpoint accounts for: they were
    /// interrupted before they finished.
    pub fn reconcile_attempts(&mut self, events: &[AuditEvent]) -> Vec<(String, u32)> {
        let mut started: BTreeMap<&str, u32> = BTreeMap::new();
        for event in events {
            if let AuditEventKind::PhaseStarted { phase, attempt, .. } = &event.kind {
                let highest = started.entry(phase.as_str()).or_insert(0);
                *highest = (*highest).max(*attempt);
            }
        }

        let mut interrupted = Vec::new();
        for (phase, attempt) in started {
            let counter = self.attempts.entry(phase.to_string()).or_insert(0);
            if attempt > *counter {
                interrupted.push((phase.to_string(), attempt));
                *counter = attempt;
            }
        }
        interrupted
    }

    pub fn is_settled(&self, phase: &str) -> bool {
        self.phase_results
            .get(phase)
            .is_some_and(|r| r.status.is_settled())
    }

    /// Take results, memory and roles from `other`, keeping attempt counters.
    pub fn restore_from(&mut self, other: MissionState) {
        self.phase_results = other.phase_results;
        self.memory = other.memory;
        for (phase, role) in other.roles {
            self.roles.insert(phase, role);
        }
    }

    /// Bring planned phases in line with this state.
    pub fn apply_to(&self, phases: &mut [Phase]) {
        for phase in phases.iter_mut() {
            if let Some(role) = self.roles.get(&phase.name) {
                phase.role = *role;
            }
            phase.attempts = self.attempts.get(&phase.name).copied().unwrap_or(0);
            phase.status = match self.phase_results.get(&phase.name) {
                Some(result) if result.status.is_settled() => result.status,
                _ => PhaseStatus::Pending,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use conductor_common::MissionId;

    fn phases() -> Vec<Phase> {
        vec![
            Phase::new(0, "auth", WorkerRole::Auth),
            Phase::new(1, "crm", WorkerRole::RecordUpdate),
        ]
    }

    #[test]
    fn test_state_round_trips_through_checkpoint() {
        let store = CheckpointStore::in_memory();
        let mission = MissionId::new_v4();
        let mut state = MissionState::initial("hash", &phases());
        state
            .phase_results
            .insert("01-auth".into(), PhaseResult::completed("ok", 1));

        let checkpoint = store
            .create(mission, "01-auth", 1, state.to_value().unwrap())
            .unwrap();
        assert_eq!(MissionState::from_checkpoint(&checkpoint).unwrap(), state);
        assert!(MissionState::is_good_checkpoint(&checkpoint));
    }

    #[test]
    fn test_failed_attempt_is_not_a_rollback_target() {
        let store = CheckpointStore::in_memory();
        let mut state = MissionState::initial("hash", &phases());
        state.outcome = CheckpointOutcome::AttemptFailed;
        let checkpoint = store
            .create(MissionId::new_v4(), "01-auth", 1, state.to_value().unwrap())
            .unwrap();
        assert!(!MissionState::is_good_checkpoint(&checkpoint));
    }

    #[test]
    fn test_attempts_survive_restore() {
        let mut state = MissionState::initial("hash", &phases());
        let snapshot = state.clone();
        assert_eq!(state.next_attempt("01-auth"), 1);
        assert_eq!(state.next_attempt("01-auth"), 2);
        state.restore_from(snapshot);
        assert_eq!(state.next_attempt("01-auth"), 3);
    }

    #[test]
    fn test_reconcile_attempts_counts_interrupted_attempts() {
        let mission = MissionId::new_v4();
        let started = |sequence, phase: &str, attempt| AuditEvent {
            mission_id: mission,
            sequence,
            timestamp: chrono::Utc::now(),
            kind: AuditEventKind::PhaseStarted {
                phase: phase.to_string(),
                attempt,
                role: WorkerRole::Auth,
            },
        };
        let mut state = MissionState::initial("hash", &phases());
        state.attempts.insert("01-auth".into(), 1);

        let events = vec![
            started(1, "01-auth", 1),
            started(2, "02-crm", 1),
            started(3, "02-crm", 2),
        ];
        let interrupted = state.reconcile_attempts(&events);

        assert_eq!(interrupted, vec![("02-crm".to_string(), 2)]);
        assert_eq!(state.attempts["01-auth"], 1);
        assert_eq!(state.next_attempt("02-crm"), 3);
        assert!(state.reconcile_attempts(&events).is_empty());
    }

    #[test]
    fn test_apply_to_marks_settled_phases() {
        let mut state = MissionState::initial("hash", &phases());
        state
            .phase_results
            .insert("01-auth".into(), PhaseResult::completed("ok", 1));
        state.roles.insert("02-crm".into(), WorkerRole::Generic);

        let mut planned = phases();
        state.apply_to(&mut planned);
        assert_eq!(planned[0].status, PhaseStatus::Completed);
        assert_eq!(planned[1].status, PhaseStatus::Pending);
        assert_eq!(planned[1].role, WorkerRole::Generic);
    }
}
