//! Typed error hierarchy for the Conductor engine.
//!
//! - `PlanningError`: malformed procedure, the mission never starts
//! - `StoreError`: checkpoint/audit journal failures
//! - `BrokerError`: human-intervention mismatches, reported to the resolver
//! - `OrchestratorError`: what `execute_mission` and friends can return
//!
//! Worker failures use `conductor_common::WorkerError` and never escape the
//! retry controller.

use conductor_common::{MissionId, MissionStatus, RequestId};
use thiserror::Error;

/// Errors from turning a procedure into phases.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Procedure has no steps")]
    EmptyProcedure,

    #[error("Step {index} has no text")]
    BlankStep { index: usize },
}

/// Errors from the append-only journals.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write journal {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read journal {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt journal record in {path} at line {line}: {message}")]
    Corrupt {
        path: std::path::PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to serialize journal record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Journal lock poisoned")]
    LockPoisoned,

    #[error("Journal task panicked: {0}")]
    TaskFailed(String),
}

/// Errors from the human intervention broker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Intervention request {0} not found")]
    UnknownRequest(RequestId),

    #[error("Intervention request {0} was already resolved")]
    AlreadyResolved(RequestId),

    #[error("Mission {mission_id} already has pending request {request_id}")]
    AlreadyPending {
        mission_id: MissionId,
        request_id: RequestId,
    },

    #[error("Intervention request {0} was withdrawn")]
    Withdrawn(RequestId),
}

/// Errors surfaced by the mission orchestrator.
///
/// Phase failures are not in here: they end up in a structured
/// `MissionResult` with status `Failed`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Mission {0} has no checkpoints to resume from")]
    NothingToResume(MissionId),

    #[error("Procedure does not match mission {mission_id} (expected {expected}, got {actual})")]
    ProcedureMismatch {
        mission_id: MissionId,
        expected: String,
        actual: String,
    },

    #[error("Mission {mission_id} is {status} and cannot be resumed")]
    NotResumable {
        mission_id: MissionId,
        status: MissionStatus,
    },

    #[error("Mission {0} is already running")]
    AlreadyRunning(MissionId),

    #[error("Invalid mission transition {from} -> {to}")]
    InvalidTransition {
        from: MissionStatus,
        to: MissionStatus,
    },
}
