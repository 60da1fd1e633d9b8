//! Append-only, per-mission JSONL journal.
//!
//! Both the checkpoint store and the audit log sit on top of this. Records are
//! kept in memory and, when a state directory is configured, mirrored to
//! `<dir>/missions/<mission_id>/<file>` as one JSON document per line.
//!
//! Each mission has its own lock: the sequence number is assigned, the line
//! is written and synced, and only then is the record visible to readers.
//! Appends for different missions never wait on each other.
//!
//! Journal calls do blocking file I/O. Async callers go through [`blocking`].

use crate::errors::StoreError;
use conductor_common::MissionId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// A journal record: belongs to one mission and carries its sequence number.
pub trait JournalRecord: Serialize + DeserializeOwned + Clone + Send {
    fn sequence(&self) -> u64;
}

/// Run blocking journal work on tokio's blocking pool.
pub async fn blocking<F, R>(f: F) -> Result<R, StoreError>
where
    F: FnOnce() -> Result<R, StoreError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
}

/// Records of one mission, loaded lazily.
struct MissionLog<T> {
    loaded: bool,
    records: Vec<T>,
    /// Length of the intact prefix when the file ends in a torn line.
    intact_len: Option<u64>,
}

impl<T> MissionLog<T> {
    fn unloaded() -> Self {
        Self {
            loaded: false,
            records: Vec::new(),
            intact_len: None,
        }
    }
}

type SharedLog<T> = Arc<Mutex<MissionLog<T>>>;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::LockPoisoned)
}

pub struct Journal<T> {
    dir: Option<PathBuf>,
    file_name: &'static str,
    missions: Mutex<HashMap<MissionId, SharedLog<T>>>,
}

impl<T: JournalRecord> Journal<T> {
    /// Journal that only lives in memory.
    pub fn in_memory(file_name: &'static str) -> Self {
        Self {
            dir: None,
            file_name,
            missions: Mutex::new(HashMap::new()),
        }
    }

    /// Journal persisted under `state_dir`.
    pub fn persistent(state_dir: &Path, file_name: &'static str) -> Self {
        Self {
            dir: Some(state_dir.to_path_buf()),
            file_name,
            missions: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }

    fn mission_file(&self, mission_id: MissionId) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| {
            dir.join("missions")
                .join(mission_id.to_string())
                .join(self.file_name)
        })
    }

    /// The mission's log handle, created unloaded on first use.
    fn log(&self, mission_id: MissionId) -> Result<SharedLog<T>, StoreError> {
        let mut missions = lock(&self.missions)?;
        Ok(missions
            .entry(mission_id)
            .or_insert_with(|| Arc::new(Mutex::new(MissionLog::unloaded())))
            .clone())
    }

    fn ensure_loaded(&self, mission_id: MissionId, log: &mut MissionLog<T>) -> Result<(), StoreError> {
        if !log.loaded {
            *log = self.load_from_disk(mission_id)?;
        }
        Ok(())
    }

    /// Append a record built from the next sequence number.
    ///
    /// Sequence numbers start at 1 and are strictly increasing per mission.
    pub fn append<F>(&self, mission_id: MissionId, build: F) -> Result<T, StoreError>
    where
        F: FnOnce(u64) -> T,
    {
        let shared = self.log(mission_id)?;
        let mut log = lock(&shared)?;
        self.ensure_loaded(mission_id, &mut log)?;

        let sequence = log.records.last().map(|r| r.sequence()).unwrap_or(0) + 1;
        let record = build(sequence);

        if let Some(path) = self.mission_file(mission_id) {
            if let Some(len) = log.intact_len {
                truncate_to(&path, len)?;
                tracing::warn!(path = %path.display(), len, "truncated torn journal tail");
                log.intact_len = None;
            }
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');
            write_line(&path, line.as_bytes())?;
        }

        tracing::debug!(
            mission = %mission_id,
            journal = self.file_name,
            sequence,
            "journal append"
        );

        log.records.push(record.clone());
        Ok(record)
    }

    /// All records of a mission, in sequence order.
    pub fn records(&self, mission_id: MissionId) -> Result<Vec<T>, StoreError> {
        let existing = lock(&self.missions)?.get(&mission_id).cloned();
        if let Some(shared) = existing {
            let mut log = lock(&shared)?;
            self.ensure_loaded(mission_id, &mut log)?;
            return Ok(log.records.clone());
        }

        // Unknown missions are not cached, so lookups of bogus ids stay free.
        let loaded = self.load_from_disk(mission_id)?;
        if loaded.records.is_empty() {
            return Ok(Vec::new());
        }
        let records = loaded.records.clone();
        lock(&self.missions)?
            .entry(mission_id)
            .or_insert_with(|| Arc::new(Mutex::new(loaded)));
        Ok(records)
    }

    pub fn last(&self, mission_id: MissionId) -> Result<Option<T>, StoreError> {
        Ok(self.records(mission_id)?.pop())
    }

    /// Drop the cached records of a mission. They are reloaded from disk on
    /// the next access; in-memory journals keep them.
    pub fn release(&self, mission_id: MissionId) -> Result<(), StoreError> {
        if self.is_persistent() {
            lock(&self.missions)?.remove(&mission_id);
        }
        Ok(())
    }

    /// Number of missions whose records are cached.
    pub fn cached(&self) -> usize {
        lock(&self.missions).map(|m| m.len()).unwrap_or(0)
    }

    /// Missions with at least one record, in memory or on disk.
    pub fn missions(&self) -> Result<Vec<MissionId>, StoreError> {
        let cached: Vec<(MissionId, SharedLog<T>)> = lock(&self.missions)?
            .iter()
            .map(|(id, log)| (*id, log.clone()))
            .collect();
        let mut ids = Vec::new();
        for (id, shared) in cached {
            if !lock(&shared)?.records.is_empty() {
                ids.push(id);
            }
        }

        if let Some(dir) = &self.dir {
            let missions_dir = dir.join("missions");
            if missions_dir.exists() {
                let entries = fs::read_dir(&missions_dir).map_err(|source| StoreError::Read {
                    path: missions_dir.clone(),
                    source,
                })?;
                for entry in entries.filter_map(|e| e.ok()) {
                    let has_file = entry.path().join(self.file_name).exists();
                    if let Some(id) = entry
                        .file_name()
                        .to_str()
                        .and_then(|name| name.parse::<MissionId>().ok())
                        && has_file
                        && !ids.contains(&id)
                    {
                        ids.push(id);
                    }
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    fn load_from_disk(&self, mission_id: MissionId) -> Result<MissionLog<T>, StoreError> {
        let mut log = MissionLog {
            loaded: true,
            records: Vec::new(),
            intact_len: None,
        };
        let Some(path) = self.mission_file(mission_id) else {
            return Ok(log);
        };
        if !path.exists() {
            return Ok(log);
        }

        let content = fs::read_to_string(&path).map_err(|source| StoreError::Read {
            path: path.clone(),
            source,
        })?;
        if !content.is_empty() && !content.ends_with('\n') {
            // A crash mid-append leaves a partial final line. It was never
            // acknowledged, so it is dropped and cut off before the next append.
            let intact = content.rfind('\n').map(|i| i + 1).unwrap_or(0);
            tracing::warn!(path = %path.display(), "ignoring torn journal tail");
            log.intact_len = Some(intact as u64);
        }
        let intact = log.intact_len.map(|len| len as usize).unwrap_or(content.len());

        for (index, line) in content[..intact].lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(record) => log.records.push(record),
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        path: path.clone(),
                        line: index + 1,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(log)
    }
}

fn truncate_to(path: &Path, len: u64) -> Result<(), StoreError> {
    let to_store_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(to_store_err)?;
    file.set_len(len).map_err(to_store_err)?;
    file.sync_data().map_err(to_store_err)?;
    Ok(())
}

fn write_line(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let to_store_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(to_store_err)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_store_err)?;
    file.write_all(bytes).map_err(to_store_err)?;
    file.sync_data().map_err(to_store_err)?;
    Ok(())
}
