use super::{AuditEvent, AuditEventKind};
use crate::errors::StoreError;
use crate::journal::{Journal, JournalRecord};
use anyhow::{Context, Result};
use chrono::Utc;
use conductor_common::MissionId;
use std::path::Path;

const AUDIT_FILE: &str = "audit.jsonl";

impl JournalRecord for AuditEvent {
    fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Durable, append-only event log keyed by mission.
pub struct AuditLog {
    journal: Journal<AuditEvent>,
}

impl AuditLog {
    pub fn in_memory() -> Self {
        Self {
            journal: Journal::in_memory(AUDIT_FILE),
        }
    }

    pub fn persistent(state_dir: &Path) -> Self {
        Self {
            journal: Journal::persistent(state_dir, AUDIT_FILE),
        }
    }

    /// Append an event. Durable before this returns.
    pub fn record(
        &self,
        mission_id: MissionId,
        kind: AuditEventKind,
    ) -> Result<AuditEvent, StoreError> {
        self.journal.append(mission_id, |sequence| AuditEvent {
            mission_id,
            sequence,
            timestamp: Utc::now(),
            kind,
        })
    }

    pub fn events(&self, mission_id: MissionId) -> Result<Vec<AuditEvent>, StoreError> {
        self.journal.records(mission_id)
    }

    pub fn events_for_phase(
        &self,
        mission_id: MissionId,
        phase: &str,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .events(mission_id)?
            .into_iter()
            .filter(|e| e.kind.phase() == Some(phase))
            .collect())
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

    /// Write the full trail of a mission as a pretty JSON array.
    pub fn export(&self, mission_id: MissionId, output: &Path) -> Result<usize> {
        let events = self.events(mission_id)?;
        let json =
            serde_json::to_string_pretty(&events).context("Failed to serialize audit trail")?;
        std::fs::write(output, json)
            .with_context(|| format!("Failed to write audit export: {}", output.display()))?;
        Ok(events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn started() -> AuditEventKind {
        AuditEventKind::MissionStarted {
            procedure_hash: "abc".into(),
            phase_count: 3,
            require_human_oversight: false,
            max_retries: 1,
        }
    }

    #[test]
    fn test_events_are_ordered_per_mission() {
        let log = AuditLog::in_memory();
        let mission = MissionId::new_v4();
        log.record(mission, started()).unwrap();
        log.record(
            mission,
            AuditEventKind::PhaseFailed {
                phase: "01-auth".into(),
                attempt: 1,
                error: "timeout".into(),
            },
        )
        .unwrap();

        let events = log.events(mission).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[1].sequence, 2);
        assert_eq!(log.events_for_phase(mission, "01-auth").unwrap().len(), 1);
    }

    #[test]
    fn test_persisted_trail_reloads() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mission = MissionId::new_v4();
        {
            let log = AuditLog::persistent(dir.path());
            log.record(mission, started()).unwrap();
        }
        let log = AuditLog::persistent(dir.path());
        let events = log.events(mission).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, AuditEventKind::MissionStarted { .. }));
    }

    #[test]
    fn test_export_writes_json_array() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let log = AuditLog::in_memory();
        let mission = MissionId::new_v4();
        log.record(mission, started()).unwrap();

        let out = dir.path().join("trail.json");
        let count = log.export(mission, &out).unwrap();
        assert_eq!(count, 1);

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        let items = value.as_array().expect("export must be a JSON array");
        assert_eq!(items[0]["type"], "mission_started");
    }
}
