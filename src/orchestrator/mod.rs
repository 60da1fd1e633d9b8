//! Mission orchestration.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `engine` | `MissionOrchestrator`: execute, resume, cancel, status |
//! | `mission` | Mission lifecycle and its status state machine |
//! | `registry` | Live snapshots and cancellation tokens of running missions |
//! | `state` | Payload written into every checkpoint |
//! | `run` | Control loop of one mission (approval gates, mission recovery) |
//! | `retry` | Bounded retry of one phase with recovery strategies |

pub mod engine;
pub mod mission;
pub mod registry;
mod retry;
mod run;
pub mod state;

pub use engine::{MissionFailure, MissionOptions, MissionOrchestrator, MissionResult};
pub use mission::Mission;
pub use registry::{MissionRegistry, MissionStatusSnapshot};
pub use state::{CheckpointOutcome, MissionState};
