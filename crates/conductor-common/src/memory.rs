//! Mission-scoped scratchpad shared by the workers of one mission.
//!
//! The memory is append-only: workers can add entries and read everything
//! recorded so far, but nothing is edited or removed in place. A rollback
//! replaces the whole store with the copy saved in a checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// Facts found in the target system (record ids, message subjects).
    Discovery,
    /// Conclusions drawn by a worker.
    Insight,
    /// Raw observations worth keeping for later phases.
    Observation,
    /// Errors encountered along the way.
    Error,
}

impl std::str::FromStr for MemoryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discovery" => Ok(MemoryCategory::Discovery),
            "insight" => Ok(MemoryCategory::Insight),
            "observation" => Ok(MemoryCategory::Observation),
            "error" => Ok(MemoryCategory::Error),
            other => Err(format!("Unknown memory category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub category: MemoryCategory,
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionMemory {
    entries: Vec<MemoryEntry>,
}

impl MissionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        category: MemoryCategory,
        key: &str,
        value: serde_json::Value,
        phase: Option<&str>,
    ) {
        self.entries.push(MemoryEntry {
            category,
            key: key.to_string(),
            value,
            phase: phase.map(str::to_string),
            recorded_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn by_category(&self, category: MemoryCategory) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    /// Most recent value recorded under `key`, in any category.
    pub fn latest(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| &e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_latest_prefers_newest_entry() {
        let mut memory = MissionMemory::new();
        memory.append(MemoryCategory::Discovery, "lead", json!("acme"), Some("01-auth"));
        memory.append(MemoryCategory::Insight, "lead", json!("globex"), None);
        assert_eq!(memory.latest("lead"), Some(&json!("globex")));
        assert!(memory.latest("missing").is_none());
    }

    #[test]
    fn test_by_category_filters() {
        let mut memory = MissionMemory::new();
        memory.append(MemoryCategory::Discovery, "a", json!(1), None);
        memory.append(MemoryCategory::Error, "b", json!(2), None);
        memory.append(MemoryCategory::Discovery, "c", json!(3), None);
        let keys: Vec<_> = memory
            .by_category(MemoryCategory::Discovery)
            .map(|e| e.key.as_str())
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(memory.len(), 3);
    }

    #[test]
    fn test_memory_survives_serialization() {
        let mut memory = MissionMemory::new();
        memory.append(MemoryCategory::Observation, "inbox", json!({"unread": 4}), None);
        let value = serde_json::to_value(&memory).unwrap();
        let restored: MissionMemory = serde_json::from_value(value).unwrap();
        assert_eq!(restored, memory);
    }
}
