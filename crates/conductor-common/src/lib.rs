//! Shared domain types for Conductor.
//!
//! Automation backends only need this crate: it defines the procedure input,
//! the phase and result types the engine hands to workers, the mission-scoped
//! memory, and the [`Worker`] / [`WorkerFactory`] traits.

pub mod context;
pub mod memory;
pub mod mission;
pub mod phase;
pub mod procedure;
pub mod role;
pub mod worker;

pub use context::MissionContext;
pub use memory::{MemoryCategory, MemoryEntry, MissionMemory};
pub use mission::MissionStatus;
pub use phase::{Phase, PhaseResult, PhaseStatus};
pub use procedure::{Procedure, ProcedureStep};
pub use role::WorkerRole;
pub use worker::{Worker, WorkerError, WorkerFactory, WorkerStatus};

/// Identifier of one mission run.
pub type MissionId = uuid::Uuid;

/// Identifier of one human intervention request.
pub type RequestId = uuid::Uuid;
