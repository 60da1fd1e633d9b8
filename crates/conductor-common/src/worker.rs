use crate::MissionId;
use crate::context::MissionContext;
use crate::phase::{Phase, PhaseResult};
use crate::role::WorkerRole;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a worker while executing a phase.
///
/// The engine treats every variant as a failed attempt, never as a fatal
/// process error.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Phase execution failed: {0}")]
    Execution(String),

    #[error("Failed to start automation backend: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Automation backend timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Automation backend exited with code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("No worker available for role {role}")]
    Unavailable { role: WorkerRole },
}

/// Live state of a worker instance, as shown in status snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Failed,
    Stopped,
}

/// A stateful executor bound to one role.
///
/// A worker instance lives for the whole mission that created it, so state
/// such as an authenticated session carries over from one phase to the next.
#[async_trait]
pub trait Worker: Send {
    fn id(&self) -> &str;

    fn role(&self) -> WorkerRole;

    async fn execute_phase(
        &mut self,
        phase: &Phase,
        ctx: &mut MissionContext,
    ) -> Result<PhaseResult, WorkerError>;

    /// Release external resources (sessions, processes). Called exactly once
    /// by the pool on teardown.
    async fn shutdown(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }
}

/// Creates workers on demand for a mission's worker pool.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn create(
        &self,
        role: WorkerRole,
        mission_id: MissionId,
    ) -> Result<Box<dyn Worker>, WorkerError>;
}
