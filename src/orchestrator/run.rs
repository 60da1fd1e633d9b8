//! The control loop of a single mission.

use super::engine::{MissionFailure, MissionOptions, MissionOrchestrator};
use super::mission::Mission;
use super::retry::PhaseOutcome;
use super::state::{CheckpointOutcome, MissionState};
use crate::audit::{AuditEvent, AuditEventKind};
use crate::checkpoint::{Checkpoint, INITIALIZATION_PHASE};
use crate::errors::{BrokerError, OrchestratorError, StoreError};
use crate::intervention::InterventionAction;
use crate::journal;
use crate::workers::WorkerPool;
use conductor_common::{MissionId, MissionStatus, PhaseResult, PhaseStatus};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// What the approval gate decided for a phase.
enum Gate {
    Run,
    Skipped,
    Paused,
    Cancelled,
}

pub(super) struct MissionRun<'a> {
    pub(super) orch: &'a MissionOrchestrator,
    pub(super) mission: Mission,
    pub(super) state: MissionState,
    pub(super) pool: WorkerPool,
    pub(super) options: MissionOptions,
    pub(super) cancel: CancellationToken,
    /// Retries per phase for the current pass; lowered by mission recovery.
    pub(super) max_retries: u32,
    pub(super) failure: Option<MissionFailure>,
}

impl<'a> MissionRun<'a> {
    pub(super) fn id(&self) -> MissionId {
        self.mission.id
    }

    /// Append an audit event and forward it to the event channel, if any.
    ///
    /// The append runs on the blocking pool. Takes `&mut self` so the
    /// returned future stays `Send`: the worker pool is `Send` but not `Sync`.
    pub(super) async fn record(&mut self, kind: AuditEventKind) -> Result<AuditEvent, StoreError> {
        let audit = self.orch.audit.clone();
        let mission_id = self.id();
        let event = journal::blocking(move || audit.record(mission_id, kind)).await?;
        if let Some(tx) = &self.orch.event_tx {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                // A slow consumer misses events instead of stalling the mission;
                // the audit log has the full trail.
                Err(TrySendError::Full(dropped)) => {
                    tracing::warn!(
                        mission = %mission_id,
                        sequence = dropped.sequence,
                        "event channel full, dropping event"
                    );
                }
                // Nobody is watching.
                Err(TrySendError::Closed(_)) => {}
            }
        }
        Ok(event)
    }

    pub(super) async fn checkpoint(
        &mut self,
        phase: &str,
        attempt: u32,
        outcome: CheckpointOutcome,
    ) -> Result<Checkpoint, StoreError> {
        self.state.outcome = outcome;
        self.state.status = self.mission.status();
        let state = self.state.to_value()?;
        let store = self.orch.checkpoints.clone();
        let mission_id = self.id();
        let name = phase.to_string();
        let checkpoint =
            journal::blocking(move || store.create(mission_id, &name, attempt, state)).await?;
        tracing::debug!(
            mission = %mission_id,
            phase,
            attempt,
            sequence = checkpoint.sequence,
            "checkpoint written"
        );
        Ok(checkpoint)
    }

    pub(super) async fn transition(&mut self, next: MissionStatus) -> Result<(), OrchestratorError> {
        let from = self.mission.transition(next)?;
        tracing::info!(mission = %self.id(), %from, to = %next, "mission status changed");
        self.orch.registry.update(self.id(), |s| s.status = next);
        self.record(AuditEventKind::StatusChanged { from, to: next })
            .await?;
        Ok(())
    }

    pub(super) fn sync_workers(&self) {
        let statuses = self.pool.worker_statuses();
        self.orch
            .registry
            .update(self.id(), |s| s.per_worker_status = statuses);
    }

    /// First checkpoint and audit entry of a fresh mission, then the loop.
    pub(super) async fn start(&mut self, procedure_hash: String) -> Result<(), OrchestratorError> {
        self.checkpoint(INITIALIZATION_PHASE, 0, CheckpointOutcome::Initialized)
            .await?;
        let kind = AuditEventKind::MissionStarted {
            procedure_hash,
            phase_count: self.mission.phases.len(),
            require_human_oversight: self.options.require_human_oversight,
            max_retries: self.options.max_retries,
        };
        self.record(kind).await?;
        self.drive().await
    }

    pub(super) async fn resume(
        &mut self,
        from_checkpoint: u64,
        remaining_phases: usize,
        interrupted: Vec<(String, u32)>,
    ) -> Result<(), OrchestratorError> {
        for (phase, attempt) in interrupted {
            tracing::warn!(mission = %self.id(), %phase, attempt, "attempt interrupted before it finished");
            self.record(AuditEventKind::PhaseFailed {
                phase,
                attempt,
                error: "attempt interrupted before it finished".to_string(),
            })
            .await?;
        }
        self.record(AuditEventKind::MissionResumed {
            from_checkpoint,
            remaining_phases,
        })
        .await?;
        self.drive().await
    }

    /// Run phases until the mission settles into a stop state.
    pub(super) async fn drive(&mut self) -> Result<(), OrchestratorError> {
        self.transition(MissionStatus::Running).await?;

        loop {
            let Some(index) = self.mission.next_phase() else {
                return self.complete().await;
            };
            let name = self.mission.phases[index].name.clone();

            if self.cancel.is_cancelled() {
                return self.cancelled(Some(name)).await;
            }

            self.mission.current_phase = index;
            self.orch.registry.update(self.id(), |s| {
                s.current_phase = Some(name.clone());
                s.current_phase_index = Some(index);
            });

            if self.mission.phases[index].requires_approval {
                match self.approval_gate(index).await? {
                    Gate::Run => {}
                    Gate::Skipped => continue,
                    Gate::Paused | Gate::Cancelled => return Ok(()),
                }
            }

            match self.run_phase_with_retry(index).await? {
                PhaseOutcome::Completed => {}
                PhaseOutcome::Exhausted { error } => {
                    self.transition(MissionStatus::Error).await?;
                    if !self.try_mission_recovery(index).await? {
                        return self.fail(index, error).await;
                    }
                }
            }
        }
    }

    async fn approval_gate(&mut self, index: usize) -> Result<Gate, OrchestratorError> {
        self.transition(MissionStatus::WaitingOnHuman).await?;

        let phase = self.mission.phases[index].clone();
        let broker = self.orch.broker.clone();
        let worker_id = self.pool.worker_id(phase.role);
        let (request, waiter) = broker.submit(self.id(), &phase, index, worker_id)?;
        self.record(AuditEventKind::InterventionRequested {
            request_id: request.id,
            phase: phase.name.clone(),
        })
        .await?;

        let cancel = self.cancel.clone();
        let waited = tokio::select! {
            resolution = broker.wait(request.id, waiter, self.options.approval_timeout) => Some(resolution),
            _ = cancel.cancelled() => None,
        };

        let resolution = match waited {
            Some(Ok(resolution)) => resolution,
            // Withdrawn from outside the engine: nobody will answer, so stop here.
            Some(Err(BrokerError::Withdrawn(_))) => {
                self.transition(MissionStatus::Paused).await?;
                self.record(AuditEventKind::MissionPaused {
                    phase: phase.name.clone(),
                    reason: "approval request withdrawn".to_string(),
                })
                .await?;
                return Ok(Gate::Paused);
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                if let Err(e) = broker.withdraw(request.id) {
                    tracing::debug!(error = %e, "approval request already gone");
                }
                self.cancelled(Some(phase.name.clone())).await?;
                return Ok(Gate::Cancelled);
            }
        };

        let response = resolution.response;
        self.record(AuditEventKind::InterventionResolved {
            request_id: request.id,
            phase: phase.name.clone(),
            action: response.action.name().to_string(),
            timed_out: response.timed_out,
        })
        .await?;

        match response.action {
            InterventionAction::Approve => {
                self.transition(MissionStatus::Running).await?;
                Ok(Gate::Run)
            }
            InterventionAction::Redirect { role } => {
                tracing::info!(mission = %self.id(), phase = %phase.name, %role, "phase redirected");
                self.mission.phases[index].role = role;
                self.state.roles.insert(phase.name.clone(), role);
                self.transition(MissionStatus::Running).await?;
                Ok(Gate::Run)
            }
            InterventionAction::Skip | InterventionAction::Reject => {
                self.transition(MissionStatus::Running).await?;
                let reason = response
                    .note
                    .clone()
                    .unwrap_or_else(|| format!("{} by operator", response.action.name()));
                self.mission.phases[index].status = PhaseStatus::Skipped;
                self.state
                    .phase_results
                    .insert(phase.name.clone(), PhaseResult::skipped(&reason));
                self.checkpoint(&phase.name, 0, CheckpointOutcome::Skipped)
                    .await?;
                self.record(AuditEventKind::PhaseSkipped {
                    phase: phase.name.clone(),
                    reason,
                })
                .await?;
                Ok(Gate::Skipped)
            }
            InterventionAction::Pause => {
                self.transition(MissionStatus::Paused).await?;
                let reason = if response.timed_out {
                    "approval timed out".to_string()
                } else {
                    response
                        .note
                        .clone()
                        .unwrap_or_else(|| "paused by operator".to_string())
                };
                self.record(AuditEventKind::MissionPaused {
                    phase: phase.name.clone(),
                    reason,
                })
                .await?;
                Ok(Gate::Paused)
            }
        }
    }

    /// One recovery pass: back to the last good checkpoint, one retry fewer.
    ///
    /// Returns false when recovery is unavailable or already used.
    async fn try_mission_recovery(&mut self, index: usize) -> Result<bool, OrchestratorError> {
        if self.mission.recovery_used() || self.max_retries == 0 {
            return Ok(false);
        }
        let phase = self.mission.phases[index].name.clone();
        let max_retries = self.max_retries - 1;

        self.record(AuditEventKind::MissionRecoveryAttempted {
            phase: phase.clone(),
            max_retries,
        })
        .await?;
        tracing::warn!(mission = %self.id(), %phase, max_retries, "attempting mission recovery");

        if let Some(checkpoint) = self
            .orch
            .checkpoints
            .find_last(self.id(), MissionState::is_good_checkpoint)?
        {
            let restored = MissionState::from_checkpoint(&checkpoint)?;
            self.state.restore_from(restored);
            self.state.apply_to(&mut self.mission.phases);
        }
        self.pool.shutdown().await;
        self.sync_workers();

        self.max_retries = max_retries;
        self.transition(MissionStatus::Running).await?;
        Ok(true)
    }

    async fn complete(&mut self) -> Result<(), OrchestratorError> {
        let phases_skipped = self
            .mission
            .phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Skipped)
            .count();
        let phases_completed = self.mission.phases.len() - phases_skipped;
        self.transition(MissionStatus::Completed).await?;
        self.record(AuditEventKind::MissionCompleted {
            phases_completed,
            phases_skipped,
        })
        .await?;
        Ok(())
    }

    async fn fail(&mut self, index: usize, error: String) -> Result<(), OrchestratorError> {
        let phase = self.mission.phases[index].name.clone();
        let attempts = self.state.attempts.get(&phase).copied().unwrap_or(0);
        self.transition(MissionStatus::Failed).await?;
        self.record(AuditEventKind::MissionFailed {
            phase: phase.clone(),
            attempts,
            error: error.clone(),
        })
        .await?;
        tracing::error!(mission = %self.id(), %phase, attempts, %error, "mission failed");
        self.failure = Some(MissionFailure {
            phase,
            attempts,
            error,
        });
        Ok(())
    }

    async fn cancelled(&mut self, phase: Option<String>) -> Result<(), OrchestratorError> {
        self.transition(MissionStatus::Cancelled).await?;
        self.record(AuditEventKind::MissionCancelled { phase }).await?;
        Ok(())
    }
}
