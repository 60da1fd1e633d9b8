//! Optional plan-drafting collaborator.
//!
//! A drafter is a text-generation service that proposes phase descriptions
//! for a task. Its output is only ever used to seed descriptions: malformed
//! or missing drafts fall back to the keyword planner untouched.

use async_trait::async_trait;
use conductor_common::Phase;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftedPhase {
    #[serde(default)]
    pub name: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftedPlan {
    pub phases: Vec<DraftedPhase>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DraftOutcome {
    Drafted(DraftedPlan),
    /// The service answered, but not with a plan. Holds the raw body.
    Malformed(String),
    /// The service could not be reached or refused the request.
    Unavailable(String),
}

impl DraftOutcome {
    /// Parse a response body exactly once; no repair is attempted.
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<DraftedPlan>(body) {
            Ok(plan) => DraftOutcome::Drafted(plan),
            Err(_) => DraftOutcome::Malformed(body.to_string()),
        }
    }
}

#[async_trait]
pub trait PlanDrafter: Send + Sync {
    async fn draft(&self, task: &str, context: &serde_json::Value) -> DraftOutcome;
}

/// Drafter backed by an HTTP endpoint accepting `{task, context}` JSON.
pub struct HttpPlanDrafter {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpPlanDrafter {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl PlanDrafter for HttpPlanDrafter {
    async fn draft(&self, task: &str, context: &serde_json::Value) -> DraftOutcome {
        let request = serde_json::json!({ "task": task, "context": context });
        let resp = match self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return DraftOutcome::Unavailable(format!("request failed: {}", e)),
        };

        let resp = match resp.error_for_status() {
            Ok(resp) => resp,
            Err(e) => return DraftOutcome::Unavailable(format!("drafter returned error: {}", e)),
        };

        match resp.text().await {
            Ok(body) => DraftOutcome::from_body(&body),
            Err(e) => DraftOutcome::Unavailable(format!("failed to read response: {}", e)),
        }
    }
}

/// Copy drafted descriptions onto `phases` by position.
///
/// Returns true when the draft was applied. A draft whose phase count differs
/// from the plan is ignored.
pub fn seed_descriptions(phases: &mut [Phase], outcome: &DraftOutcome) -> bool {
    match outcome {
        DraftOutcome::Drafted(plan) if plan.phases.len() == phases.len() => {
            for (phase, drafted) in phases.iter_mut().zip(&plan.phases) {
                let description = drafted.description.trim();
                if !description.is_empty() {
                    phase.description = Some(description.to_string());
                }
            }
            true
        }
        DraftOutcome::Drafted(plan) => {
            tracing::warn!(
                drafted = plan.phases.len(),
                planned = phases.len(),
                "drafted plan does not match phase count, keeping keyword plan"
            );
            false
        }
        DraftOutcome::Malformed(raw) => {
            tracing::warn!(bytes = raw.len(), "drafter returned a malformed plan, keeping keyword plan");
            false
        }
        DraftOutcome::Unavailable(reason) => {
            tracing::warn!(reason = %reason, "drafter unavailable, keeping keyword plan");
            false
        }
    }
}
