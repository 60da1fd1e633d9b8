use serde::{Deserialize, Serialize};

/// Worker specialisation a phase is dispatched to.
///
/// | Role              | Typical steps                              |
/// |-------------------|--------------------------------------------|
/// | `auth`            | logging in, entering credentials           |
/// | `data-extraction` | reading an inbox, scraping messages        |
/// | `record-update`   | writing CRM records, database updates      |
/// | `generic`         | anything the planner could not classify    |
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerRole {
    Auth,
    DataExtraction,
    RecordUpdate,
    #[default]
    Generic,
}

impl WorkerRole {
    pub const ALL: [WorkerRole; 4] = [
        WorkerRole::Auth,
        WorkerRole::DataExtraction,
        WorkerRole::RecordUpdate,
        WorkerRole::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Auth => "auth",
            WorkerRole::DataExtraction => "data-extraction",
            WorkerRole::RecordUpdate => "record-update",
            WorkerRole::Generic => "generic",
        }
    }

    /// Label used when the planner names a phase after its role.
    pub fn phase_label(&self) -> &'static str {
        match self {
            WorkerRole::Auth => "authentication",
            WorkerRole::DataExtraction => "data-extraction",
            WorkerRole::RecordUpdate => "record-update",
            WorkerRole::Generic => "generic",
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auth" => Ok(WorkerRole::Auth),
            "data-extraction" => Ok(WorkerRole::DataExtraction),
            "record-update" => Ok(WorkerRole::RecordUpdate),
            "generic" => Ok(WorkerRole::Generic),
            other => Err(format!(
                "Invalid worker role '{}'. Valid values: auth, data-extraction, record-update, generic",
                other
            )),
        }
    }
}
