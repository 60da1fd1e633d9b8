use crate::MissionId;
use crate::memory::{MemoryCategory, MissionMemory};
use crate::phase::PhaseResult;
use std::collections::BTreeMap;

/// Execution context handed to a worker for one phase attempt.
///
/// Carries the mission's memory (append-only) and a read-only view of the
/// results of the phases that ran before this one.
#[derive(Debug, Clone)]
pub struct MissionContext {
    pub mission_id: MissionId,
    pub phase_index: usize,
    pub attempt: u32,
    memory: MissionMemory,
    previous_results: BTreeMap<String, PhaseResult>,
}

impl MissionContext {
    pub fn new(
        mission_id: MissionId,
        phase_index: usize,
        attempt: u32,
        memory: MissionMemory,
        previous_results: BTreeMap<String, PhaseResult>,
    ) -> Self {
        Self {
            mission_id,
            phase_index,
            attempt,
            memory,
            previous_results,
        }
    }

    pub fn memory(&self) -> &MissionMemory {
        &self.memory
    }

    /// Append an entry to the mission memory, tagged with the phase name.
    pub fn remember(
        &mut self,
        category: MemoryCategory,
        key: &str,
        value: serde_json::Value,
        phase: &str,
    ) {
        self.memory.append(category, key, value, Some(phase));
    }

    pub fn previous_result(&self, phase_name: &str) -> Option<&PhaseResult> {
        self.previous_results.get(phase_name)
    }

    pub fn previous_results(&self) -> &BTreeMap<String, PhaseResult> {
        &self.previous_results
    }

    /// Hand the (possibly extended) memory back to the engine.
    pub fn into_memory(self) -> MissionMemory {
        self.memory
    }
}
