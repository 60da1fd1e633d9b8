//! Live status of missions, for dashboards and the cancel switch.

use crate::audit::{AuditEvent, AuditEventKind};
use crate::errors::OrchestratorError;
use chrono::{DateTime, Utc};
use conductor_common::{MissionId, MissionStatus, WorkerRole, WorkerStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

/// Read-only view of one mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionStatusSnapshot {
    pub mission_id: MissionId,
    pub status: MissionStatus,
    pub current_phase: Option<String>,
    pub current_phase_index: Option<usize>,
    pub phase_count: usize,
    #[serde(default)]
    pub per_worker_status: BTreeMap<WorkerRole, WorkerStatus>,
    #[serde(default)]
    pub pending_interventions: usize,
    /// False for missions only known from their journals.
    #[serde(default)]
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MissionStatusSnapshot {
    pub fn new(mission_id: MissionId, phase_count: usize) -> Self {
        let now = Utc::now();
        Self {
            mission_id,
            status: MissionStatus::Pending,
            current_phase: None,
            current_phase_index: None,
            phase_count,
            per_worker_status: BTreeMap::new(),
            pending_interventions: 0,
            active: true,
            started_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a snapshot from a mission's audit trail.
    pub fn from_events(mission_id: MissionId, events: &[AuditEvent]) -> Option<Self> {
        let first = events.first()?;
        let mut snapshot = Self::new(mission_id, 0);
        snapshot.active = false;
        snapshot.started_at = first.timestamp;

        for event in events {
            snapshot.updated_at = event.timestamp;
            match &event.kind {
                AuditEventKind::MissionStarted { phase_count, .. } => {
                    snapshot.phase_count = *phase_count;
                }
                AuditEventKind::StatusChanged { to, .. } => snapshot.status = *to,
                kind => {
                    if let Some(phase) = kind.phase() {
                        snapshot.current_phase = Some(phase.to_string());
                        snapshot.current_phase_index = phase_index(phase);
                    }
                }
            }
        }
        Some(snapshot)
    }
}

/// "03-crm" -> Some(2)
fn phase_index(name: &str) -> Option<usize> {
    name.split('-')
        .next()
        .and_then(|n| n.parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
}

struct RegistryEntry {
    snapshot: MissionStatusSnapshot,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct MissionRegistry {
    missions: RwLock<HashMap<MissionId, RegistryEntry>>,
}

impl MissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<MissionId, RegistryEntry>> {
        self.missions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<MissionId, RegistryEntry>> {
        self.missions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a mission as running and hand out its cancellation token.
    pub fn register(
        &self,
        mission_id: MissionId,
        phase_count: usize,
    ) -> Result<CancellationToken, OrchestratorError> {
        let mut missions = self.write();
        if missions.get(&mission_id).is_some_and(|e| e.snapshot.active) {
            return Err(OrchestratorError::AlreadyRunning(mission_id));
        }
        let cancel = CancellationToken::new();
        missions.insert(
            mission_id,
            RegistryEntry {
                snapshot: MissionStatusSnapshot::new(mission_id, phase_count),
                cancel: cancel.clone(),
            },
        );
        Ok(cancel)
    }

    pub fn update<F>(&self, mission_id: MissionId, apply: F)
    where
        F: FnOnce(&mut MissionStatusSnapshot),
    {
        if let Some(entry) = self.write().get_mut(&mission_id) {
            apply(&mut entry.snapshot);
            entry.snapshot.updated_at = Utc::now();
        }
    }

    /// Forget a mission that stopped running. Its status is rebuilt from
    /// the audit trail from then on.
    pub fn finish(&self, mission_id: MissionId) {
        self.write().remove(&mission_id);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Request cancellation. Returns false when the mission is not running.
    pub fn cancel(&self, mission_id: MissionId) -> bool {
        match self.read().get(&mission_id) {
            Some(entry) if entry.snapshot.active => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self, mission_id: MissionId) -> Option<MissionStatusSnapshot> {
        self.read().get(&mission_id).map(|e| e.snapshot.clone())
    }

    pub fn snapshots(&self) -> Vec<MissionStatusSnapshot> {
        let mut all: Vec<_> = self.read().values().map(|e| e.snapshot.clone()).collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    pub fn is_active(&self, mission_id: MissionId) -> bool {
        self.read()
            .get(&mission_id)
            .is_some_and(|e| e.snapshot.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(mission_id: MissionId, sequence: u64, kind: AuditEventKind) -> AuditEvent {
        AuditEvent {
            mission_id,
            sequence,
            timestamp: Utc::now(),
            kind,
        }
    }

    #[test]
    fn test_register_twice_while_active_fails() {
        let registry = MissionRegistry::new();
        let id = MissionId::new_v4();
        registry.register(id, 3).unwrap();
        assert!(matches!(
            registry.register(id, 3),
            Err(OrchestratorError::AlreadyRunning(m)) if m == id
        ));
        registry.finish(id);
        assert!(registry.register(id, 3).is_ok());
    }

    #[test]
    fn test_cancel_trips_token_only_while_active() {
        let registry = MissionRegistry::new();
        let id = MissionId::new_v4();
        let token = registry.register(id, 1).unwrap();
        assert!(registry.cancel(id));
        assert!(token.is_cancelled());

        registry.finish(id);
        assert!(!registry.cancel(id));
        assert!(!registry.cancel(MissionId::new_v4()));
    }

    #[test]
    fn test_finish_evicts_entry() {
        let registry = MissionRegistry::new();
        let id = MissionId::new_v4();
        registry.register(id, 1).unwrap();
        assert_eq!(registry.len(), 1);

        registry.finish(id);
        assert!(registry.is_empty());
        assert!(registry.snapshot(id).is_none());
        assert!(!registry.is_active(id));
        registry.update(id, |s| s.status = MissionStatus::Running);
        assert!(registry.snapshot(id).is_none());
    }

    #[test]
    fn test_update_changes_snapshot() {
        let registry = MissionRegistry::new();
        let id = MissionId::new_v4();
        registry.register(id, 2).unwrap();
        registry.update(id, |s| {
            s.status = MissionStatus::Running;
            s.current_phase = Some("01-auth".into());
            s.per_worker_status.insert(WorkerRole::Auth, WorkerStatus::Busy);
        });
        let snap = registry.snapshot(id).unwrap();
        assert_eq!(snap.status, MissionStatus::Running);
        assert_eq!(snap.per_worker_status[&WorkerRole::Auth], WorkerStatus::Busy);
        assert!(snap.active);
    }

    #[test]
    fn test_snapshot_from_events() {
        let id = MissionId::new_v4();
        let events = vec![
            event(
                id,
                1,
                AuditEventKind::MissionStarted {
                    procedure_hash: "h".into(),
                    phase_count: 3,
                    require_human_oversight: true,
                    max_retries: 1,
                },
            ),
            event(
                id,
                2,
                AuditEventKind::StatusChanged {
                    from: MissionStatus::Pending,
                    to: MissionStatus::Running,
                },
            ),
            event(
                id,
                3,
                AuditEventKind::PhaseStarted {
                    phase: "02-email".into(),
                    attempt: 1,
                    role: WorkerRole::DataExtraction,
                },
            ),
            event(
                id,
                4,
                AuditEventKind::StatusChanged {
                    from: MissionStatus::Running,
                    to: MissionStatus::Paused,
                },
            ),
        ];
        let snap = MissionStatusSnapshot::from_events(id, &events).unwrap();
        assert_eq!(snap.status, MissionStatus::Paused);
        assert_eq!(snap.phase_count, 3);
        assert_eq!(snap.current_phase.as_deref(), Some("02-email"));
        assert_eq!(snap.current_phase_index, Some(1));
        assert!(!snap.active);

        assert!(MissionStatusSnapshot::from_events(id, &[]).is_none());
    }
}
