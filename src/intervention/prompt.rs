use super::{
    HumanInterventionRequest, InterventionAction, InterventionBroker, InterventionResponse,
    Priority,
};
use anyhow::Result;
use conductor_common::WorkerRole;
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Terminal approval gate: answers broker requests from the keyboard.
pub struct ApprovalPrompt {
    /// Approve every request without asking (`--yes`).
    pub approve_all: bool,
}

impl ApprovalPrompt {
    pub fn new(approve_all: bool) -> Self {
        Self { approve_all }
    }

    pub fn decide(&mut self, request: &HumanInterventionRequest) -> Result<InterventionResponse> {
        print_request(request);

        if self.approve_all {
            println!("  {} (--yes flag)", style("Auto-approved").dim());
            return Ok(InterventionResponse::new(InterventionAction::Approve).resolved_by("cli"));
        }

        let action = self.prompt_user(request)?;
        Ok(InterventionResponse::new(action).resolved_by("cli"))
    }

    fn prompt_user(&mut self, request: &HumanInterventionRequest) -> Result<InterventionAction> {
        let options = &[
            "Yes, run this phase",
            "Yes, and auto-approve remaining phases (--yes)",
            "Skip this phase",
            "Redirect to another worker role",
            "Pause mission",
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Proceed with this phase?")
            .items(options)
            .default(0)
            .interact()?;

        match selection {
            0 => Ok(InterventionAction::Approve),
            1 => {
                self.approve_all = true;
                Ok(InterventionAction::Approve)
            }
            2 => Ok(InterventionAction::Skip),
            3 => {
                let role = prompt_role(request.context.role)?;
                Ok(InterventionAction::Redirect { role })
            }
            _ => Ok(InterventionAction::Pause),
        }
    }

    /// Answer every request the broker broadcasts until the broker goes away.
    ///
    /// Prompts run on the blocking pool so missions keep running meanwhile.
    pub fn spawn(self, broker: Arc<InterventionBroker>) -> JoinHandle<()> {
        let mut requests = broker.subscribe();
        tokio::spawn(async move {
            let mut prompt = self;
            loop {
                let request = match requests.recv().await {
                    Ok(request) => request,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "approval prompt fell behind");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                // Resolved elsewhere (HTTP) while we were busy.
                if broker.get(request.id).is_some_and(|r| r.is_resolved()) {
                    continue;
                }

                let outcome = tokio::task::spawn_blocking(move || {
                    let decision = prompt.decide(&request);
                    (prompt, request, decision)
                })
                .await;

                let (returned, request, decision) = match outcome {
                    Ok(parts) => parts,
                    Err(e) => {
                        tracing::error!(error = %e, "approval prompt task failed");
                        break;
                    }
                };
                prompt = returned;

                match decision {
                    Ok(response) => {
                        if let Err(e) = broker.resolve(request.id, response) {
                            println!("  {} {}", style("Not applied:").yellow(), e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "approval prompt unavailable, pausing mission");
                        let response = InterventionResponse::new(InterventionAction::Pause)
                            .with_note("approval prompt unavailable")
                            .resolved_by("cli");
                        let _ = broker.resolve(request.id, response);
                    }
                }
            }
        })
    }
}

fn prompt_role(current: WorkerRole) -> Result<WorkerRole> {
    let roles: Vec<WorkerRole> = WorkerRole::ALL
        .into_iter()
        .filter(|r| *r != current)
        .collect();
    let labels: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Run on which worker role?")
        .items(&labels)
        .default(0)
        .interact()?;

    Ok(roles.get(selection).copied().unwrap_or_default())
}

fn print_request(request: &HumanInterventionRequest) {
    let priority = match request.priority {
        Priority::High => style("high").red().bold(),
        Priority::Normal => style("normal").yellow(),
        Priority::Low => style("low").dim(),
    };
    println!();
    println!(
        "{} {} [{}]",
        style("Approval needed:").bold(),
        style(&request.title).cyan(),
        priority
    );
    for line in request.description.lines() {
        println!("  {}", style(line).dim());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_common::{MissionId, Phase};

    #[test]
    fn test_approve_all_skips_prompt() {
        let phase = Phase::new(0, "auth", WorkerRole::Auth);
        let request = HumanInterventionRequest::for_phase(MissionId::new_v4(), &phase, 0, None);
        let mut prompt = ApprovalPrompt::new(true);
        let response = prompt.decide(&request).unwrap();
        assert_eq!(response.action, InterventionAction::Approve);
        assert_eq!(response.resolved_by.as_deref(), Some("cli"));
    }

    #[tokio::test]
    async fn test_spawned_prompt_resolves_requests() {
        let broker = Arc::new(InterventionBroker::new());
        let handle = ApprovalPrompt::new(true).spawn(broker.clone());

        let phase = Phase::new(0, "auth", WorkerRole::Auth);
        let resolution = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            broker.request_approval(MissionId::new_v4(), &phase, 0, None),
        )
        .await
        .expect("prompt did not answer")
        .unwrap();
        assert_eq!(resolution.response.action, InterventionAction::Approve);
        handle.abort();
    }
}
