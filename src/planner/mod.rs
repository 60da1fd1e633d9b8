//! Phase planning: split a procedure's flat step list into ordered phases.
//!
//! Planning is pure and deterministic. When every step carries a category,
//! consecutive steps sharing a tag form one phase. Otherwise each step is
//! classified by keyword and a new phase opens whenever the role changes.

pub mod draft;

pub use draft::{DraftOutcome, DraftedPhase, DraftedPlan, HttpPlanDrafter, PlanDrafter};

use crate::errors::PlanningError;
use conductor_common::{Phase, ProcedureStep, WorkerRole};
use std::collections::HashMap;

/// Keywords per role, in classification order.
const KEYWORDS: &[(WorkerRole, &[&str])] = &[
    (
        WorkerRole::Auth,
        &["login", "log in", "sign in", "credential", "password", "authenticate"],
    ),
    (WorkerRole::DataExtraction, &["message", "inbox", "email", "mail"]),
    (WorkerRole::RecordUpdate, &["record", "update", "database", "crm"]),
];

const CATEGORY_ROLES: &[(&str, WorkerRole)] = &[
    ("auth", WorkerRole::Auth),
    ("authentication", WorkerRole::Auth),
    ("login", WorkerRole::Auth),
    ("email", WorkerRole::DataExtraction),
    ("inbox", WorkerRole::DataExtraction),
    ("data-extraction", WorkerRole::DataExtraction),
    ("extraction", WorkerRole::DataExtraction),
    ("crm", WorkerRole::RecordUpdate),
    ("record-update", WorkerRole::RecordUpdate),
    ("database", WorkerRole::RecordUpdate),
    ("records", WorkerRole::RecordUpdate),
];

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    /// Roles whose phases are gated when oversight is on.
    pub approval_roles: Vec<WorkerRole>,
    /// Gate every phase when oversight is on.
    pub approve_all_phases: bool,
    /// Extra category tags on top of the built-in table.
    pub category_roles: HashMap<String, WorkerRole>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            approval_roles: vec![WorkerRole::RecordUpdate],
            approve_all_phases: false,
            category_roles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhasePlanner {
    settings: PlannerSettings,
}

impl PhasePlanner {
    pub fn new(settings: PlannerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub fn plan(
        &self,
        steps: &[ProcedureStep],
        require_human_oversight: bool,
    ) -> Result<Vec<Phase>, PlanningError> {
        if steps.is_empty() {
            return Err(PlanningError::EmptyProcedure);
        }
        if let Some(index) = steps.iter().position(|s| s.text.trim().is_empty()) {
            return Err(PlanningError::BlankStep { index });
        }

        let groups = if steps.iter().all(|s| s.tag().is_some()) {
            self.group_by_category(steps)
        } else {
            self.group_by_role(steps)
        };

        let phases = groups
            .into_iter()
            .enumerate()
            .map(|(index, group)| {
                let gated = require_human_oversight && self.needs_approval(&group);
                Phase::new(index, &group.label, group.role)
                    .with_steps(group.steps)
                    .with_approval(gated)
            })
            .collect();
        Ok(phases)
    }

    /// Role for a category tag, or `Generic` when the tag is unknown.
    pub fn role_for_category(&self, tag: &str) -> WorkerRole {
        let key = tag.trim().to_lowercase();
        if let Some(role) = self.settings.category_roles.get(&key) {
            return *role;
        }
        CATEGORY_ROLES
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, role)| *role)
            .unwrap_or(WorkerRole::Generic)
    }

    fn group_by_category(&self, steps: &[ProcedureStep]) -> Vec<StepGroup> {
        let mut groups: Vec<StepGroup> = Vec::new();
        let mut open_tag: Option<String> = None;

        for step in steps {
            let tag = step.tag().unwrap_or_default().to_lowercase();
            match groups.last_mut() {
                Some(group) if open_tag.as_deref() == Some(tag.as_str()) => {
                    group.steps.push(step.clone())
                }
                _ => {
                    groups.push(StepGroup {
                        label: slug(&tag),
                        role: self.role_for_category(&tag),
                        steps: vec![step.clone()],
                    });
                    open_tag = Some(tag);
                }
            }
        }
        groups
    }

    fn group_by_role(&self, steps: &[ProcedureStep]) -> Vec<StepGroup> {
        let mut groups: Vec<StepGroup> = Vec::new();

        for step in steps {
            let role = match step.tag() {
                Some(tag) => Some(self.role_for_category(tag)),
                None => classify(&step.text),
            };
            match (groups.last_mut(), role) {
                // No keyword: stay with whatever phase is open.
                (Some(group), None) => group.steps.push(step.clone()),
                (Some(group), Some(role)) if group.role == role => group.steps.push(step.clone()),
                (_, role) => {
                    let role = role.unwrap_or(WorkerRole::Auth);
                    groups.push(StepGroup {
                        label: role.phase_label().to_string(),
                        role,
                        steps: vec![step.clone()],
                    });
                }
            }
        }
        groups
    }

    fn needs_approval(&self, group: &StepGroup) -> bool {
        self.settings.approve_all_phases
            || self.settings.approval_roles.contains(&group.role)
            || group.steps.iter().any(|s| s.requires_approval)
    }
}

struct StepGroup {
    label: String,
    role: WorkerRole,
    steps: Vec<ProcedureStep>,
}

/// Role of the earliest keyword found in `text`, if any.
pub fn classify(text: &str) -> Option<WorkerRole> {
    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .flat_map(|(role, words)| {
            words
                .iter()
                .filter_map(|w| lower.find(w).map(|pos| (pos, *role)))
        })
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, role)| role)
}

fn slug(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    for c in tag.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "phase".to_string()
    } else {
        trimmed.to_string()
    }
}
