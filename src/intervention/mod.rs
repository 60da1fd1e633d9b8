//! Human-in-the-loop approval gates.
//!
//! A mission about to run an approval-gated phase files a
//! [`HumanInterventionRequest`] with the [`InterventionBroker`] and suspends
//! until someone (the CLI prompt, the HTTP surface, a test) resolves it.

pub mod broker;
pub mod prompt;

pub use broker::InterventionBroker;
pub use prompt::ApprovalPrompt;

use chrono::{DateTime, Utc};
use conductor_common::{MissionId, Phase, RequestId, WorkerRole};
use serde::{Deserialize, Serialize};

/// Actions offered on every approval request.
pub const APPROVAL_ACTIONS: [&str; 5] = ["approve", "reject", "skip", "pause", "redirect"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// Record updates write to systems of record, so they jump the queue.
    pub fn for_role(role: WorkerRole) -> Self {
        match role {
            WorkerRole::RecordUpdate => Priority::High,
            _ => Priority::Normal,
        }
    }
}

/// Decision a human takes on an approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InterventionAction {
    Approve,
    Reject,
    Skip,
    Pause,
    /// Run the phase, but on a different worker role.
    Redirect { role: WorkerRole },
}

impl InterventionAction {
    pub fn name(&self) -> &'static str {
        match self {
            InterventionAction::Approve => "approve",
            InterventionAction::Reject => "reject",
            InterventionAction::Skip => "skip",
            InterventionAction::Pause => "pause",
            InterventionAction::Redirect { .. } => "redirect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionResponse {
    #[serde(flatten)]
    pub action: InterventionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// True when the broker resolved the request because the wait expired.
    #[serde(default)]
    pub timed_out: bool,
}

impl InterventionResponse {
    pub fn new(action: InterventionAction) -> Self {
        Self {
            action,
            note: None,
            resolved_by: None,
            timed_out: false,
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }

    pub fn resolved_by(mut self, who: &str) -> Self {
        self.resolved_by = Some(who.to_string());
        self
    }

    /// Implicit pause recorded when an approval wait times out.
    pub fn timed_out() -> Self {
        Self {
            action: InterventionAction::Pause,
            note: Some("approval timed out".to_string()),
            resolved_by: Some("broker".to_string()),
            timed_out: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub response: InterventionResponse,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionContext {
    pub phase: String,
    pub phase_index: usize,
    pub role: WorkerRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInterventionRequest {
    pub id: RequestId,
    pub mission_id: MissionId,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    pub context: InterventionContext,
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl HumanInterventionRequest {
    pub fn for_phase(
        mission_id: MissionId,
        phase: &Phase,
        phase_index: usize,
        worker_id: Option<String>,
    ) -> Self {
        let description = phase.description.clone().unwrap_or_else(|| {
            phase
                .steps
                .iter()
                .map(|s| format!("- {}", s.text))
                .collect::<Vec<_>>()
                .join("\n")
        });
        Self {
            id: RequestId::new_v4(),
            mission_id,
            priority: Priority::for_role(phase.role),
            title: format!("Approve phase {} ({})", phase.name, phase.role),
            description,
            context: InterventionContext {
                phase: phase.name.clone(),
                phase_index,
                role: phase.role,
            },
            actions: APPROVAL_ACTIONS.iter().map(|a| a.to_string()).collect(),
            worker_id,
            created_at: Utc::now(),
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_common::ProcedureStep;

    #[test]
    fn test_request_for_record_update_is_high_priority() {
        let phase = Phase::new(2, "crm", WorkerRole::RecordUpdate)
            .with_steps(vec![ProcedureStep::new("Update the CRM record")]);
        let request = HumanInterventionRequest::for_phase(MissionId::new_v4(), &phase, 2, None);

        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.context.phase, "03-crm");
        assert_eq!(request.actions.len(), 5);
        assert!(request.description.contains("Update the CRM record"));
        assert!(!request.is_resolved());
    }

    #[test]
    fn test_response_json_shape() {
        let response: InterventionResponse =
            serde_json::from_str(r#"{"action":"redirect","role":"generic","note":"try again"}"#)
                .unwrap();
        assert_eq!(
            response.action,
            InterventionAction::Redirect {
                role: WorkerRole::Generic
            }
        );
        assert_eq!(response.note.as_deref(), Some("try again"));
        assert!(!response.timed_out);

        let skip: InterventionResponse = serde_json::from_str(r#"{"action":"skip"}"#).unwrap();
        assert_eq!(skip.action.name(), "skip");
    }

    #[test]
    fn test_timed_out_response_is_pause() {
        let response = InterventionResponse::timed_out();
        assert_eq!(response.action, InterventionAction::Pause);
        assert!(response.timed_out);
    }
}
