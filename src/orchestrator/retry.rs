//! Bounded retry of a single phase.
//!
//! Every attempt is audited when it starts and when it ends, and a
//! checkpoint is written right after it, whatever the outcome. Between two
//! attempts the recovery advisor picks a strategy that is applied before the
//! next one starts.

use super::run::MissionRun;
use super::state::{CheckpointOutcome, MissionState};
use crate::audit::AuditEventKind;
use crate::errors::OrchestratorError;
use crate::recovery::{RecoveryAction, RecoveryStrategy};
use conductor_common::{
    MemoryCategory, MissionContext, PhaseResult, PhaseStatus, WorkerStatus,
};
use serde_json::json;
use std::time::Duration;

pub(super) enum PhaseOutcome {
    Completed,
    Exhausted { error: String },
}

impl MissionRun<'_> {
    pub(super) async fn run_phase_with_retry(
        &mut self,
        index: usize,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        let total = self.max_retries + 1;
        let name = self.mission.phases[index].name.clone();
        self.mission.phases[index].status = PhaseStatus::Running;
        let mut last_error = String::new();
        let mut last_steps = (0, 0);

        for round in 1..=total {
            let attempt = self.state.next_attempt(&name);
            self.mission.phases[index].attempts = attempt;
            let phase = self.mission.phases[index].clone();

            self.record(AuditEventKind::PhaseStarted {
                phase: name.clone(),
                attempt,
                role: phase.role,
            })
            .await?;
            self.orch.registry.update(self.id(), |s| {
                s.per_worker_status.insert(phase.role, WorkerStatus::Busy);
            });

            let mut ctx = MissionContext::new(
                self.id(),
                index,
                attempt,
                self.state.memory.clone(),
                self.state.phase_results.clone(),
            );
            let result = self.pool.execute(&phase, &mut ctx).await;
            self.state.memory = ctx.into_memory();
            self.sync_workers();

            let error = match result {
                Ok(mut result) if result.is_success() => {
                    result.attempts = attempt;
                    let summary = result.summary.clone();
                    self.state.phase_results.insert(name.clone(), result);
                    self.mission.phases[index].status = PhaseStatus::Completed;
                    self.checkpoint(&name, attempt, CheckpointOutcome::AttemptSucceeded)
                        .await?;
                    self.record(AuditEventKind::PhaseCompleted {
                        phase: name.clone(),
                        attempt,
                        summary,
                    })
                    .await?;
                    tracing::info!(mission = %self.id(), phase = %name, attempt, "phase completed");
                    return Ok(PhaseOutcome::Completed);
                }
                Ok(result) => {
                    last_steps = (result.steps_completed, result.steps_failed);
                    format!("{} ({} steps failed)", result.summary, result.steps_failed)
                }
                Err(e) => e.to_string(),
            };

            self.state
                .memory
                .append(MemoryCategory::Error, "phase_error", json!(error), Some(&name));
            self.checkpoint(&name, attempt, CheckpointOutcome::AttemptFailed)
                .await?;
            self.record(AuditEventKind::PhaseFailed {
                phase: name.clone(),
                attempt,
                error: error.clone(),
            })
            .await?;
            tracing::warn!(mission = %self.id(), phase = %name, attempt, %error, "phase attempt failed");

            if round < total {
                let strategy = self.orch.advisor.analyze(&phase, &error, attempt);
                let applied = self.apply_strategy(index, strategy).await?;
                self.record(AuditEventKind::RecoveryApplied {
                    phase: name.clone(),
                    attempt,
                    strategy: applied,
                })
                .await?;
            }
            last_error = error;
        }

        let attempts = self.state.attempts.get(&name).copied().unwrap_or(total);
        let mut failed = PhaseResult::failed(&last_error, last_steps.0, last_steps.1);
        failed.attempts = attempts;
        self.state.phase_results.insert(name, failed);
        self.mission.phases[index].status = PhaseStatus::Failed;
        Ok(PhaseOutcome::Exhausted { error: last_error })
    }

    async fn apply_strategy(
        &mut self,
        index: usize,
        mut strategy: RecoveryStrategy,
    ) -> Result<RecoveryStrategy, OrchestratorError> {
        let name = self.mission.phases[index].name.clone();
        let role = self.mission.phases[index].role;
        tracing::info!(mission = %self.id(), phase = %name, strategy = %strategy.name, "applying recovery strategy");

        strategy.succeeded = match strategy.action {
            RecoveryAction::Rollback => {
                if let Some(checkpoint) = self
                    .orch
                    .checkpoints
                    .find_last(self.id(), MissionState::is_good_checkpoint)?
                {
                    let restored = MissionState::from_checkpoint(&checkpoint)?;
                    self.state.memory = restored.memory;
                    strategy.parameters["checkpoint"] = json!(checkpoint.sequence);
                }
                let teardown = self.pool.teardown(role).await;
                self.sync_workers();
                match teardown {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, "worker teardown failed during rollback");
                        false
                    }
                }
            }
            RecoveryAction::WaitThenRetry { delay_ms } => {
                let delay = self
                    .options
                    .retry_delay
                    .unwrap_or(Duration::from_millis(delay_ms));
                tokio::time::sleep(delay).await;
                true
            }
            RecoveryAction::SwapWorker { role: to } => {
                self.mission.phases[index].role = to;
                self.state.roles.insert(name, to);
                true
            }
        };
        Ok(strategy)
    }
}
