use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One raw step of a procedure definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureStep {
    /// Free-text instruction handed to the worker.
    pub text: String,
    /// Optional grouping tag (e.g. "auth", "email", "crm").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Forces a human approval gate on the phase containing this step
    /// when the mission runs under oversight.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_approval: bool,
}

impl ProcedureStep {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            category: None,
            requires_approval: false,
        }
    }

    pub fn categorized(text: &str, category: &str) -> Self {
        Self {
            text: text.to_string(),
            category: Some(category.to_string()),
            requires_approval: false,
        }
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// The category tag, if present and not blank.
    pub fn tag(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// A declarative procedure: the input to a mission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<ProcedureStep>,
}

impl Procedure {
    pub fn new(steps: Vec<ProcedureStep>) -> Self {
        Self {
            name: None,
            description: None,
            steps,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Short human-readable task description, used when consulting a plan drafter.
    pub fn task_description(&self) -> String {
        match (&self.name, &self.description) {
            (Some(name), Some(desc)) => format!("{}: {}", name, desc),
            (Some(name), None) => name.clone(),
            (None, Some(desc)) => desc.clone(),
            (None, None) => format!("procedure with {} steps", self.steps.len()),
        }
    }

    /// SHA-256 over the serialized steps, hex encoded.
    ///
    /// Recorded with every checkpoint so a resume can refuse a procedure that
    /// changed underneath the mission.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(&self.steps).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        format!("{:x}", digest)
    }
}
