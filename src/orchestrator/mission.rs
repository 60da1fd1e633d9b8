use crate::errors::OrchestratorError;
use chrono::{DateTime, Utc};
use conductor_common::{MissionId, MissionStatus, Phase};
use serde::Serialize;

/// One run of a procedure, as owned by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct Mission {
    pub id: MissionId,
    status: MissionStatus,
    pub started_at: DateTime<Utc>,
    pub phases: Vec<Phase>,
    pub current_phase: usize,
    recovery_used: bool,
}

impl Mission {
    pub fn new(id: MissionId, phases: Vec<Phase>) -> Self {
        Self {
            id,
            status: MissionStatus::Pending,
            started_at: Utc::now(),
            phases,
            current_phase: 0,
            recovery_used: false,
        }
    }

    /// Mission picked up again from its journals.
    ///
    /// A paused mission continues from `Paused`; anything else (failed,
    /// interrupted mid-run) starts over from `Pending`.
    pub fn resumed(id: MissionId, last_status: MissionStatus, phases: Vec<Phase>) -> Self {
        let mut mission = Self::new(id, phases);
        if last_status == MissionStatus::Paused {
            mission.status = MissionStatus::Paused;
        }
        mission
    }

    pub fn status(&self) -> MissionStatus {
        self.status
    }

    pub fn recovery_used(&self) -> bool {
        self.recovery_used
    }

    /// Move to `next`, returning the previous status.
    ///
    /// `Error -> Running` is only allowed once per mission run.
    pub fn transition(&mut self, next: MissionStatus) -> Result<MissionStatus, OrchestratorError> {
        let from = self.status;
        let recovery = from == MissionStatus::Error && next == MissionStatus::Running;
        if !from.can_transition_to(next) || (recovery && self.recovery_used) {
            return Err(OrchestratorError::InvalidTransition { from, to: next });
        }
        if recovery {
            self.recovery_used = true;
        }
        self.status = next;
        Ok(from)
    }

    /// Index of the first phase that still has to run.
    pub fn next_phase(&self) -> Option<usize> {
        self.phases.iter().position(|p| !p.status.is_settled())
    }

    pub fn phase(&self, index: usize) -> Option<&Phase> {
        self.phases.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_common::{PhaseStatus, WorkerRole};

    fn mission() -> Mission {
        Mission::new(
            MissionId::new_v4(),
            vec![
                Phase::new(0, "auth", WorkerRole::Auth),
                Phase::new(1, "email", WorkerRole::DataExtraction),
            ],
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut m = mission();
        assert_eq!(m.transition(MissionStatus::Running).unwrap(), MissionStatus::Pending);
        m.transition(MissionStatus::WaitingOnHuman).unwrap();
        m.transition(MissionStatus::Running).unwrap();
        m.transition(MissionStatus::Completed).unwrap();
        assert_eq!(m.status(), MissionStatus::Completed);
    }

    #[test]
    fn test_terminal_status_rejects_transitions() {
        let mut m = mission();
        m.transition(MissionStatus::Running).unwrap();
        m.transition(MissionStatus::Completed).unwrap();
        let err = m.transition(MissionStatus::Running).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                from: MissionStatus::Completed,
                to: MissionStatus::Running
            }
        ));
    }

    #[test]
    fn test_recovery_allowed_once() {
        let mut m = mission();
        m.transition(MissionStatus::Running).unwrap();
        m.transition(MissionStatus::Error).unwrap();
        m.transition(MissionStatus::Running).unwrap();
        assert!(m.recovery_used());
        m.transition(MissionStatus::Error).unwrap();
        assert!(m.transition(MissionStatus::Running).is_err());
        m.transition(MissionStatus::Failed).unwrap();
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut m = mission();
        assert!(m.transition(MissionStatus::Completed).is_err());
        assert_eq!(m.status(), MissionStatus::Pending);
    }

    #[test]
    fn test_next_phase_skips_settled() {
        let mut m = mission();
        assert_eq!(m.next_phase(), Some(0));
        m.phases[0].status = PhaseStatus::Skipped;
        assert_eq!(m.next_phase(), Some(1));
        m.phases[1].status = PhaseStatus::Completed;
        assert_eq!(m.next_phase(), None);
    }

    #[test]
    fn test_resumed_paused_mission_keeps_status() {
        let m = Mission::resumed(MissionId::new_v4(), MissionStatus::Paused, vec![]);
        assert_eq!(m.status(), MissionStatus::Paused);
        let m = Mission::resumed(MissionId::new_v4(), MissionStatus::Failed, vec![]);
        assert_eq!(m.status(), MissionStatus::Pending);
    }
}
