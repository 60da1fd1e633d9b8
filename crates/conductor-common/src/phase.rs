use crate::procedure::ProcedureStep;
use crate::role::WorkerRole;
use serde::{Deserialize, Serialize};

/// Execution status of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    /// Completed and skipped phases are never run again on resume.
    pub fn is_settled(&self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Skipped)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A named, ordered group of procedure steps assigned to one worker role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Position in the plan, 1-based and zero padded ("01", "02").
    pub number: String,
    /// Unique name within the mission (e.g. "01-auth").
    pub name: String,
    pub role: WorkerRole,
    pub steps: Vec<ProcedureStep>,
    #[serde(default)]
    pub requires_approval: bool,
    /// Optional description seeded by a plan drafter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default)]
    pub attempts: u32,
}

impl Phase {
    pub fn new(index: usize, label: &str, role: WorkerRole) -> Self {
        let number = format!("{:02}", index + 1);
        Self {
            name: format!("{}-{}", number, label),
            number,
            role,
            steps: Vec::new(),
            requires_approval: false,
            description: None,
            status: PhaseStatus::Pending,
            attempts: 0,
        }
    }

    pub fn with_steps(mut self, steps: Vec<ProcedureStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    /// Zero-based index derived from the phase number.
    pub fn index(&self) -> usize {
        self.number.parse::<usize>().unwrap_or(1).saturating_sub(1)
    }
}

/// Structured outcome of one phase, as reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub status: PhaseStatus,
    pub summary: String,
    pub steps_completed: usize,
    pub steps_failed: usize,
    /// Structured summary of the actions taken, kept for audit.
    #[serde(default)]
    pub documentation: serde_json::Value,
    /// Number of attempts the engine spent on this phase.
    #[serde(default)]
    pub attempts: u32,
}

impl PhaseResult {
    pub fn completed(summary: &str, steps_completed: usize) -> Self {
        Self {
            status: PhaseStatus::Completed,
            summary: summary.to_string(),
            steps_completed,
            steps_failed: 0,
            documentation: serde_json::Value::Null,
            attempts: 0,
        }
    }

    pub fn failed(summary: &str, steps_completed: usize, steps_failed: usize) -> Self {
        Self {
            status: PhaseStatus::Failed,
            summary: summary.to_string(),
            steps_completed,
            steps_failed,
            documentation: serde_json::Value::Null,
            attempts: 0,
        }
    }

    pub fn skipped(reason: &str) -> Self {
        Self {
            status: PhaseStatus::Skipped,
            summary: reason.to_string(),
            steps_completed: 0,
            steps_failed: 0,
            documentation: serde_json::Value::Null,
            attempts: 0,
        }
    }

    pub fn with_documentation(mut self, documentation: serde_json::Value) -> Self {
        self.documentation = documentation;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == PhaseStatus::Completed
    }
}
