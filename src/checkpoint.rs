//! Durable, append-only checkpoint log keyed by (mission, phase, attempt).

use crate::errors::StoreError;
use crate::journal::{Journal, JournalRecord};
use chrono::{DateTime, Utc};
use conductor_common::MissionId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Phase name of the checkpoint written right after planning.
pub const INITIALIZATION_PHASE: &str = "initialization";

const CHECKPOINT_FILE: &str = "checkpoints.jsonl";

/// Immutable snapshot of mission state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub mission_id: MissionId,
    /// Strictly increasing per mission, starting at 1.
    pub sequence: u64,
    pub phase: String,
    /// Attempt number within the phase; 0 for checkpoints not tied to an attempt.
    pub attempt: u32,
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl JournalRecord for Checkpoint {
    fn sequence(&self) -> u64 {
        self.sequence
    }
}

pub struct CheckpointStore {
    journal: Journal<Checkpoint>,
}

impl CheckpointStore {
    pub fn in_memory() -> Self {
        Self {
            journal: Journal::in_memory(CHECKPOINT_FILE),
        }
    }

    pub fn persistent(state_dir: &Path) -> Self {
        Self {
            journal: Journal::persistent(state_dir, CHECKPOINT_FILE),
        }
    }

    /// Append a new checkpoint. Durable before this returns.
    pub fn create(
        &self,
        mission_id: MissionId,
        phase: &str,
        attempt: u32,
        state: serde_json::Value,
    ) -> Result<Checkpoint, StoreError> {
        self.journal.append(mission_id, |sequence| Checkpoint {
            mission_id,
            sequence,
            phase: phase.to_string(),
            attempt,
            state,
            created_at: Utc::now(),
        })
    }

    pub fn list(&self, mission_id: MissionId) -> Result<Vec<Checkpoint>, StoreError> {
        self.journal.records(mission_id)
    }

    pub fn latest(&self, mission_id: MissionId) -> Result<Option<Checkpoint>, StoreError> {
        self.journal.last(mission_id)
    }

    pub fn for_phase(
        &self,
        mission_id: MissionId,
        phase: &str,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        Ok(self
            .list(mission_id)?
            .into_iter()
            .filter(|c| c.phase == phase)
            .collect())
    }

    /// Newest checkpoint satisfying `predicate`.
    pub fn find_last<P>(
        &self,
        mission_id: MissionId,
        predicate: P,
    ) -> Result<Option<Checkpoint>, StoreError>
    where
        P: Fn(&Checkpoint) -> bool,
    {
        Ok(self.list(mission_id)?.into_iter().rev().find(|c| predicate(c)))
    }

    pub fn missions(&self) -> Result<Vec<MissionId>, StoreError> {
        self.journal.missions()
    }

    /// Drop the cached copy of a finished mission. Reads reload from disk.
    pub fn release(&self, mission_id: MissionId) -> Result<(), StoreError> {
        self.journal.release(mission_id)
    }

    /// Number of missions held in memory.
    pub fn cached(&self) -> usize {
        self.journal.cached()
    }
}
