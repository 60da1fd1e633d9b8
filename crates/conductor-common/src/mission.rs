use serde::{Deserialize, Serialize};

/// Lifecycle status of a mission.
///
/// ```text
/// Pending → Running → {Paused, WaitingOnHuman, Error} → {Completed, Failed, Cancelled}
/// ```
///
/// `Running` is the only state in which phases advance. `Error` may go back
/// to `Running` once, for the mission-level recovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    #[default]
    Pending,
    Running,
    Paused,
    WaitingOnHuman,
    Error,
    Completed,
    Failed,
    Cancelled,
}

impl MissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MissionStatus::Completed | MissionStatus::Failed | MissionStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: MissionStatus) -> bool {
        use MissionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, WaitingOnHuman)
                | (Running, Error)
                | (Running, Completed)
                | (Running, Cancelled)
                | (WaitingOnHuman, Running)
                | (WaitingOnHuman, Paused)
                | (WaitingOnHuman, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Error, Running)
                | (Error, Failed)
        )
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MissionStatus::Pending => "pending",
            MissionStatus::Running => "running",
            MissionStatus::Paused => "paused",
            MissionStatus::WaitingOnHuman => "waiting_on_human",
            MissionStatus::Error => "error",
            MissionStatus::Completed => "completed",
            MissionStatus::Failed => "failed",
            MissionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
