use super::mission::Mission;
use super::registry::{MissionRegistry, MissionStatusSnapshot};
use super::run::MissionRun;
use super::state::MissionState;
use crate::audit::{AuditEvent, AuditEventKind, AuditLog};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::errors::{OrchestratorError, StoreError};
use crate::intervention::InterventionBroker;
use crate::journal;
use crate::planner::draft::seed_descriptions;
use crate::planner::{PhasePlanner, PlanDrafter};
use crate::recovery::RecoveryAdvisor;
use crate::workers::WorkerPool;
use conductor_common::{
    MissionId, MissionMemory, MissionStatus, Phase, PhaseResult, Procedure, WorkerFactory,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Per-mission knobs.
#[derive(Debug, Clone)]
pub struct MissionOptions {
    /// Use this id instead of a fresh one.
    pub mission_id: Option<MissionId>,
    pub require_human_oversight: bool,
    /// Extra attempts per phase beyond the first.
    pub max_retries: u32,
    /// Unanswered approvals resolve as a pause after this long.
    pub approval_timeout: Option<Duration>,
    /// Replaces the advisor's wait-then-retry delay.
    pub retry_delay: Option<Duration>,
}

impl Default for MissionOptions {
    fn default() -> Self {
        Self {
            mission_id: None,
            require_human_oversight: false,
            max_retries: 2,
            approval_timeout: None,
            retry_delay: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionFailure {
    pub phase: String,
    pub attempts: u32,
    pub error: String,
}

/// Everything a caller needs to know about a finished (or stopped) run.
#[derive(Debug, Clone, Serialize)]
pub struct MissionResult {
    pub mission_id: MissionId,
    pub status: MissionStatus,
    pub phases: Vec<Phase>,
    pub phase_results: BTreeMap<String, PhaseResult>,
    pub memory: MissionMemory,
    pub audit_trail: Vec<AuditEvent>,
    pub checkpoints: Vec<Checkpoint>,
    pub failure: Option<MissionFailure>,
    pub mission_recovery_attempted: bool,
}

impl MissionResult {
    pub fn is_success(&self) -> bool {
        self.status == MissionStatus::Completed
    }

    pub fn checkpoints_for(&self, phase: &str) -> Vec<&Checkpoint> {
        self.checkpoints.iter().filter(|c| c.phase == phase).collect()
    }

    /// Audit events of one kind, by their `type` name.
    pub fn events_named(&self, name: &str) -> Vec<&AuditEvent> {
        self.audit_trail
            .iter()
            .filter(|e| e.kind.name() == name)
            .collect()
    }
}

/// Runs procedures as supervised, checkpointed missions.
///
/// The orchestrator itself holds no per-mission state beyond the registry;
/// missions can run concurrently on a shared instance.
pub struct MissionOrchestrator {
    pub(super) checkpoints: Arc<CheckpointStore>,
    pub(super) audit: Arc<AuditLog>,
    pub(super) broker: Arc<InterventionBroker>,
    pub(super) registry: Arc<MissionRegistry>,
    pub(super) planner: PhasePlanner,
    pub(super) advisor: RecoveryAdvisor,
    pub(super) factory: Arc<dyn WorkerFactory>,
    pub(super) drafter: Option<Arc<dyn PlanDrafter>>,
    pub(super) event_tx: Option<mpsc::Sender<AuditEvent>>,
}

impl MissionOrchestrator {
    /// Orchestrator with in-memory journals.
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            checkpoints: Arc::new(CheckpointStore::in_memory()),
            audit: Arc::new(AuditLog::in_memory()),
            broker: Arc::new(InterventionBroker::new()),
            registry: Arc::new(MissionRegistry::new()),
            planner: PhasePlanner::default(),
            advisor: RecoveryAdvisor::default(),
            factory,
            drafter: None,
            event_tx: None,
        }
    }

    /// Orchestrator whose journals live under `state_dir`.
    pub fn persistent(factory: Arc<dyn WorkerFactory>, state_dir: &Path) -> Self {
        Self::new(factory)
            .with_checkpoint_store(Arc::new(CheckpointStore::persistent(state_dir)))
            .with_audit_log(Arc::new(AuditLog::persistent(state_dir)))
    }

    pub fn with_checkpoint_store(mut self, store: Arc<CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    pub fn with_audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_broker(mut self, broker: Arc<InterventionBroker>) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_planner(mut self, planner: PhasePlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_advisor(mut self, advisor: RecoveryAdvisor) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn with_drafter(mut self, drafter: Arc<dyn PlanDrafter>) -> Self {
        self.drafter = Some(drafter);
        self
    }

    /// Forward audit events to `tx` as they are written. Events are
    /// dropped, with a warning, while the channel is full.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<AuditEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn broker(&self) -> Arc<InterventionBroker> {
        self.broker.clone()
    }

    pub fn audit_log(&self) -> Arc<AuditLog> {
        self.audit.clone()
    }

    pub fn checkpoint_store(&self) -> Arc<CheckpointStore> {
        self.checkpoints.clone()
    }

    pub fn planner(&self) -> &PhasePlanner {
        &self.planner
    }

    pub async fn execute_mission(
        &self,
        procedure: &Procedure,
        require_human_oversight: bool,
        max_retries: u32,
    ) -> Result<MissionResult, OrchestratorError> {
        self.execute_mission_with(
            procedure,
            MissionOptions {
                require_human_oversight,
                max_retries,
                ..Default::default()
            },
        )
        .await
    }

    /// Phases `procedure` would run as, with drafted descriptions when a
    /// drafter is configured.
    pub async fn plan_mission(
        &self,
        procedure: &Procedure,
        require_human_oversight: bool,
    ) -> Result<Vec<Phase>, OrchestratorError> {
        let mut phases = self.planner.plan(&procedure.steps, require_human_oversight)?;
        self.seed_from_drafter(procedure, &mut phases).await;
        Ok(phases)
    }

    /// Plan `procedure` and run it to a stop state.
    ///
    /// Only planning and journal failures are errors; a mission that fails
    /// is a `MissionResult` with status `Failed`.
    pub async fn execute_mission_with(
        &self,
        procedure: &Procedure,
        options: MissionOptions,
    ) -> Result<MissionResult, OrchestratorError> {
        let phases = self
            .plan_mission(procedure, options.require_human_oversight)
            .await?;

        let mission_id = options.mission_id.unwrap_or_else(MissionId::new_v4);
        let hash = procedure.fingerprint();
        let cancel = self.registry.register(mission_id, phases.len())?;
        tracing::info!(mission = %mission_id, phases = phases.len(), "mission planned");

        let state = MissionState::initial(&hash, &phases);
        let mut run = MissionRun {
            orch: self,
            mission: Mission::new(mission_id, phases),
            state,
            pool: WorkerPool::new(mission_id, self.factory.clone()),
            max_retries: options.max_retries,
            options,
            cancel,
            failure: None,
        };

        let outcome = run.start(hash).await;
        self.finish(run, outcome).await
    }

    /// Continue a mission from its last checkpoint.
    ///
    /// `procedure` must be the one the mission was started with.
    pub async fn resume_mission(
        &self,
        mission_id: MissionId,
        procedure: &Procedure,
        options: MissionOptions,
    ) -> Result<MissionResult, OrchestratorError> {
        let (latest, events) = {
            let checkpoints = self.checkpoints.clone();
            let audit = self.audit.clone();
            journal::blocking(move || {
                Ok((checkpoints.latest(mission_id)?, audit.events(mission_id)?))
            })
            .await?
        };
        let latest = latest.ok_or(OrchestratorError::NothingToResume(mission_id))?;
        let mut state = MissionState::from_checkpoint(&latest)?;

        let actual = procedure.fingerprint();
        if state.procedure_hash != actual {
            return Err(OrchestratorError::ProcedureMismatch {
                mission_id,
                expected: state.procedure_hash,
                actual,
            });
        }

        let last_status = last_status(&events);
        if matches!(last_status, MissionStatus::Completed | MissionStatus::Cancelled) {
            return Err(OrchestratorError::NotResumable {
                mission_id,
                status: last_status,
            });
        }
        let interrupted = state.reconcile_attempts(&events);

        let mut phases = self
            .planner
            .plan(&procedure.steps, options.require_human_oversight)?;
        state.apply_to(&mut phases);
        let remaining_phases = phases.iter().filter(|p| !p.status.is_settled()).count();

        let cancel = self.registry.register(mission_id, phases.len())?;
        tracing::info!(
            mission = %mission_id,
            from = latest.sequence,
            remaining_phases,
            "resuming mission"
        );

        let mut run = MissionRun {
            orch: self,
            mission: Mission::resumed(mission_id, last_status, phases),
            state,
            pool: WorkerPool::new(mission_id, self.factory.clone()),
            max_retries: options.max_retries,
            options,
            cancel,
            failure: None,
        };

        let outcome = run
            .resume(latest.sequence, remaining_phases, interrupted)
            .await;
        self.finish(run, outcome).await
    }

    /// Ask a running mission to stop at its next phase boundary.
    ///
    /// Returns false when the mission is not running here.
    pub fn cancel_mission(&self, mission_id: MissionId) -> bool {
        let cancelled = self.registry.cancel(mission_id);
        if cancelled {
            tracing::info!(mission = %mission_id, "cancellation requested");
        }
        cancelled
    }

    pub fn mission_status(
        &self,
        mission_id: MissionId,
    ) -> Result<Option<MissionStatusSnapshot>, StoreError> {
        if let Some(mut snapshot) = self.registry.snapshot(mission_id) {
            snapshot.pending_interventions = self.broker.pending_count(mission_id);
            return Ok(Some(snapshot));
        }
        let events = self.audit.events(mission_id)?;
        Ok(MissionStatusSnapshot::from_events(mission_id, &events))
    }

    /// Missions running here plus those found in the journals.
    pub fn list_missions(&self) -> Result<Vec<MissionStatusSnapshot>, StoreError> {
        let mut snapshots = self.registry.snapshots();
        for snapshot in snapshots.iter_mut() {
            snapshot.pending_interventions = self.broker.pending_count(snapshot.mission_id);
        }
        let known: HashSet<MissionId> = snapshots.iter().map(|s| s.mission_id).collect();
        for mission_id in self.audit.missions()? {
            if known.contains(&mission_id) {
                continue;
            }
            let events = self.audit.events(mission_id)?;
            if let Some(snapshot) = MissionStatusSnapshot::from_events(mission_id, &events) {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by_key(|s| s.started_at);
        Ok(snapshots)
    }

    async fn seed_from_drafter(&self, procedure: &Procedure, phases: &mut [Phase]) {
        let Some(drafter) = &self.drafter else {
            return;
        };
        let context = serde_json::json!({
            "steps": procedure.steps,
            "phases": phases.iter().map(|p| &p.name).collect::<Vec<_>>(),
        });
        let outcome = drafter.draft(&procedure.task_description(), &context).await;
        seed_descriptions(phases, &outcome);
    }

    /// Release workers, the registry slot and the journal caches, then
    /// collect the journals.
    async fn finish(
        &self,
        mut run: MissionRun<'_>,
        outcome: Result<(), OrchestratorError>,
    ) -> Result<MissionResult, OrchestratorError> {
        run.pool.shutdown().await;
        run.sync_workers();
        let mission_id = run.id();
        self.registry.finish(mission_id);
        outcome?;

        let (audit_trail, checkpoints) = {
            let audit = self.audit.clone();
            let store = self.checkpoints.clone();
            journal::blocking(move || {
                let collected = (audit.events(mission_id)?, store.list(mission_id)?);
                audit.release(mission_id)?;
                store.release(mission_id)?;
                Ok(collected)
            })
            .await?
        };

        let result = MissionResult {
            mission_id,
            status: run.mission.status(),
            mission_recovery_attempted: run.mission.recovery_used(),
            phases: run.mission.phases,
            phase_results: run.state.phase_results,
            memory: run.state.memory,
            audit_trail,
            checkpoints,
            failure: run.failure,
        };
        tracing::info!(mission = %mission_id, status = %result.status, "mission finished");
        Ok(result)
    }
}

/// Status after the last recorded transition.
fn last_status(events: &[AuditEvent]) -> MissionStatus {
    events
        .iter()
        .rev()
        .find_map(|e| match e.kind {
            AuditEventKind::StatusChanged { to, .. } => Some(to),
            _ => None,
        })
        .unwrap_or(MissionStatus::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::INITIALIZATION_PHASE;
    use crate::intervention::{InterventionAction, InterventionResponse};
    use async_trait::async_trait;
    use conductor_common::{
        MemoryCategory, MissionContext, PhaseStatus, ProcedureStep, Worker, WorkerError,
        WorkerRole,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinHandle;

    const ALWAYS: u32 = u32::MAX;

    /// Shared script for every worker a [`ScriptedFactory`] hands out.
    #[derive(Default)]
    struct Script {
        /// Failures per phase name before the first success.
        failures: HashMap<String, u32>,
        delay: Option<Duration>,
        /// Phase whose worker panics instead of returning.
        panic_on: Option<String>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Script {
        fn failing(phase: &str, times: u32) -> Self {
            Self {
                failures: HashMap::from([(phase.to_string(), times)]),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_for(&self, phase: &str) -> usize {
            self.calls().iter().filter(|c| *c == phase).count()
        }
    }

    struct ScriptedWorker {
        id: String,
        role: WorkerRole,
        script: Arc<Script>,
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        fn id(&self) -> &str {
            &self.id
        }

        fn role(&self) -> WorkerRole {
            self.role
        }

        async fn execute_phase(
            &mut self,
            phase: &Phase,
            ctx: &mut MissionContext,
        ) -> Result<PhaseResult, WorkerError> {
            let now = self.script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.script.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.script.delay {
                tokio::time::sleep(delay).await;
            }
            let seen = {
                let mut calls = self.script.calls.lock().unwrap();
                calls.push(phase.name.clone());
                calls.iter().filter(|c| **c == phase.name).count() as u32
            };
            self.script.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.script.panic_on.as_deref() == Some(phase.name.as_str()) {
                panic!("browser session lost");
            }

            let failures = self.script.failures.get(&phase.name).copied().unwrap_or(0);
            if failures == ALWAYS || seen <= failures {
                return Err(WorkerError::Execution("connection reset by peer".into()));
            }
            ctx.remember(
                MemoryCategory::Discovery,
                "visited",
                json!(ctx.mission_id.to_string()),
                &phase.name,
            );
            Ok(PhaseResult::completed(&phase.name, phase.steps.len()))
        }
    }

    struct ScriptedFactory {
        script: Arc<Script>,
    }

    #[async_trait]
    impl WorkerFactory for ScriptedFactory {
        async fn create(
            &self,
            role: WorkerRole,
            mission_id: MissionId,
        ) -> Result<Box<dyn Worker>, WorkerError> {
            Ok(Box::new(ScriptedWorker {
                id: format!("{}-{}", role, &mission_id.to_string()[..8]),
                role,
                script: self.script.clone(),
            }))
        }
    }

    fn orchestrator(script: Script) -> (MissionOrchestrator, Arc<Script>) {
        let script = Arc::new(script);
        let factory = Arc::new(ScriptedFactory {
            script: script.clone(),
        });
        (MissionOrchestrator::new(factory), script)
    }

    fn procedure(categories: &[&str]) -> Procedure {
        Procedure::new(
            categories
                .iter()
                .enumerate()
                .map(|(i, c)| ProcedureStep::categorized(&format!("step {}", i + 1), c))
                .collect(),
        )
    }

    fn options(max_retries: u32) -> MissionOptions {
        MissionOptions {
            max_retries,
            retry_delay: Some(Duration::from_millis(1)),
            ..Default::default()
        }
    }

    /// Resolve every approval request with `action`.
    fn respond_with(broker: Arc<InterventionBroker>, action: InterventionAction) -> JoinHandle<()> {
        let mut requests = broker.subscribe();
        tokio::spawn(async move {
            while let Ok(request) = requests.recv().await {
                let _ = broker.resolve(request.id, InterventionResponse::new(action.clone()));
            }
        })
    }

    fn phase_checkpoints(result: &MissionResult) -> Vec<&Checkpoint> {
        result
            .checkpoints
            .iter()
            .filter(|c| c.phase != INITIALIZATION_PHASE)
            .collect()
    }

    #[tokio::test]
    async fn test_all_phases_succeed() {
        let (orch, script) = orchestrator(Script::default());
        let procedure = procedure(&["auth", "auth", "email", "email", "crm"]);

        let result = orch.execute_mission(&procedure, false, 1).await.unwrap();

        assert_eq!(result.status, MissionStatus::Completed);
        assert_eq!(result.phases.len(), 3);
        assert_eq!(phase_checkpoints(&result).len(), 3);
        assert_eq!(result.checkpoints[0].phase, INITIALIZATION_PHASE);
        assert_eq!(script.calls(), vec!["01-auth", "02-email", "03-crm"]);
        assert!(result.phases.iter().all(|p| p.status == PhaseStatus::Completed));
        assert!(result.failure.is_none());
        assert!(!result.mission_recovery_attempted);
        assert_eq!(result.memory.by_category(MemoryCategory::Discovery).count(), 3);
        assert_eq!(result.events_named("mission_completed").len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_sequences_increase() {
        let (orch, _) = orchestrator(Script::default());
        let result = orch
            .execute_mission(&procedure(&["auth", "email"]), false, 0)
            .await
            .unwrap();
        let sequences: Vec<u64> = result.checkpoints.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        let audit: Vec<u64> = result.audit_trail.iter().map(|e| e.sequence).collect();
        assert!(audit.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_empty_procedure_is_rejected_before_any_checkpoint() {
        let (orch, _) = orchestrator(Script::default());
        let err = orch
            .execute_mission(&Procedure::new(vec![]), false, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Planning(_)));
        assert!(orch.checkpoint_store().missions().unwrap().is_empty());
        assert!(orch.list_missions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skipped_phase_is_not_executed() {
        let (orch, script) = orchestrator(Script::default());
        let responder = respond_with(orch.broker(), InterventionAction::Skip);
        let procedure = procedure(&["auth", "crm", "email"]);

        let result = orch.execute_mission(&procedure, true, 1).await.unwrap();
        responder.abort();

        assert_eq!(result.status, MissionStatus::Completed);
        assert_eq!(result.phases[1].name, "02-crm");
        assert_eq!(result.phases[1].status, PhaseStatus::Skipped);
        assert_eq!(script.calls(), vec!["01-auth", "03-email"]);
        assert_eq!(result.phase_results["02-crm"].status, PhaseStatus::Skipped);
        assert_eq!(result.events_named("phase_skipped").len(), 1);
        assert_eq!(result.events_named("intervention_requested").len(), 1);

        let skipped = result.checkpoints_for("02-crm");
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].attempt, 0);
    }

    #[tokio::test]
    async fn test_redirect_runs_phase_on_other_role() {
        let (orch, _) = orchestrator(Script::default());
        let responder = respond_with(
            orch.broker(),
            InterventionAction::Redirect {
                role: WorkerRole::Generic,
            },
        );

        let result = orch
            .execute_mission(&procedure(&["crm"]), true, 0)
            .await
            .unwrap();
        responder.abort();

        assert_eq!(result.status, MissionStatus::Completed);
        assert_eq!(result.phases[0].role, WorkerRole::Generic);
        let started = result.events_named("phase_started");
        assert!(matches!(
            started[0].kind,
            AuditEventKind::PhaseStarted {
                role: WorkerRole::Generic,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fail_twice_then_succeed() {
        let (orch, script) = orchestrator(Script::failing("02-email", 2));
        let procedure = procedure(&["auth", "email", "crm"]);

        let result = orch
            .execute_mission_with(&procedure, options(2))
            .await
            .unwrap();

        assert_eq!(result.status, MissionStatus::Completed);
        let attempts: Vec<u32> = result
            .checkpoints_for("02-email")
            .iter()
            .map(|c| c.attempt)
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(script.calls_for("02-email"), 3);

        let failed = result.events_named("phase_failed");
        let completed: Vec<_> = result
            .events_named("phase_completed")
            .into_iter()
            .filter(|e| e.kind.phase() == Some("02-email"))
            .collect();
        assert_eq!(failed.len(), 2);
        assert_eq!(completed.len(), 1);
        assert_eq!(result.events_named("recovery_applied").len(), 2);
        assert_eq!(result.phases[1].status, PhaseStatus::Completed);
        assert_eq!(result.phase_results["02-email"].attempts, 3);
    }

    #[tokio::test]
    async fn test_always_failing_phase_fails_mission_after_one_recovery() {
        let (orch, script) = orchestrator(Script::failing("02-email", ALWAYS));
        let procedure = procedure(&["auth", "email", "crm"]);

        let result = orch
            .execute_mission_with(&procedure, options(1))
            .await
            .unwrap();

        assert_eq!(result.status, MissionStatus::Failed);
        assert!(result.mission_recovery_attempted);
        assert_eq!(result.events_named("mission_recovery_attempted").len(), 1);

        let error_transitions = result
            .audit_trail
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    AuditEventKind::StatusChanged {
                        to: MissionStatus::Error,
                        ..
                    }
                )
            })
            .count();
        assert!(error_transitions >= 1);

        // Two attempts on the first pass, one more after recovery.
        assert_eq!(script.calls_for("02-email"), 3);
        assert_eq!(script.calls_for("03-crm"), 0);
        assert_eq!(script.calls_for("01-auth"), 1);

        let failure = result.failure.unwrap();
        assert_eq!(failure.phase, "02-email");
        assert_eq!(failure.attempts, 3);
        assert!(failure.error.contains("connection reset"));
        assert_eq!(result.phases[1].status, PhaseStatus::Failed);
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_max_retries() {
        for max_retries in [0u32, 1, 3] {
            let (orch, _) = orchestrator(Script::failing("01-auth", ALWAYS));
            let result = orch
                .execute_mission_with(&procedure(&["auth"]), options(max_retries))
                .await
                .unwrap();

            let first_pass = result
                .audit_trail
                .iter()
                .take_while(|e| e.kind.name() != "mission_recovery_attempted")
                .filter(|e| e.kind.name() == "phase_failed")
                .count();
            assert_eq!(first_pass as u32, max_retries + 1, "max_retries={max_retries}");
            assert_eq!(result.status, MissionStatus::Failed);
            assert_eq!(result.mission_recovery_attempted, max_retries > 0);
        }
    }

    #[tokio::test]
    async fn test_one_phase_in_flight_at_a_time() {
        let (orch, script) = orchestrator(Script {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let result = orch
            .execute_mission(&procedure(&["auth", "email", "crm", "misc"]), false, 0)
            .await
            .unwrap();
        assert_eq!(result.status, MissionStatus::Completed);
        assert_eq!(script.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_missions_keep_separate_memory() {
        let (orch, script) = orchestrator(Script::default());
        let procedure = procedure(&["auth", "email"]);

        let (a, b) = tokio::join!(
            orch.execute_mission(&procedure, false, 0),
            orch.execute_mission(&procedure, false, 0),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.mission_id, b.mission_id);
        assert_eq!(script.calls().len(), 4);
        for result in [&a, &b] {
            assert_eq!(result.status, MissionStatus::Completed);
            let visited: Vec<_> = result
                .memory
                .by_category(MemoryCategory::Discovery)
                .map(|e| e.value.clone())
                .collect();
            assert_eq!(visited.len(), 2);
            assert!(visited
                .iter()
                .all(|v| *v == json!(result.mission_id.to_string())));
        }
        assert_eq!(orch.list_missions().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pause_then_resume() {
        let (orch, script) = orchestrator(Script::default());
        let procedure = procedure(&["auth", "email", "crm"]);
        let opts = MissionOptions {
            require_human_oversight: true,
            ..options(1)
        };

        let responder = respond_with(orch.broker(), InterventionAction::Pause);
        let paused = orch.execute_mission_with(&procedure, opts.clone()).await.unwrap();
        responder.abort();

        assert_eq!(paused.status, MissionStatus::Paused);
        assert_eq!(paused.events_named("mission_paused").len(), 1);
        assert_eq!(script.calls(), vec!["01-auth", "02-email"]);

        let responder = respond_with(orch.broker(), InterventionAction::Approve);
        let resumed = orch
            .resume_mission(paused.mission_id, &procedure, opts)
            .await
            .unwrap();
        responder.abort();

        assert_eq!(resumed.status, MissionStatus::Completed);
        assert_eq!(resumed.mission_id, paused.mission_id);
        assert_eq!(script.calls(), vec!["01-auth", "02-email", "03-crm"]);
        assert_eq!(resumed.events_named("mission_resumed").len(), 1);
        assert!(resumed.phase_results.contains_key("01-auth"));
    }

    #[tokio::test]
    async fn test_approval_timeout_pauses_mission() {
        let (orch, _) = orchestrator(Script::default());
        let opts = MissionOptions {
            require_human_oversight: true,
            approval_timeout: Some(Duration::from_millis(20)),
            ..options(0)
        };
        let result = orch
            .execute_mission_with(&procedure(&["crm"]), opts)
            .await
            .unwrap();
        assert_eq!(result.status, MissionStatus::Paused);
        let resolved = result.events_named("intervention_resolved");
        assert!(matches!(
            resolved[0].kind,
            AuditEventKind::InterventionResolved { timed_out: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_approval() {
        let (orch, script) = orchestrator(Script::default());
        let orch = Arc::new(orch);
        let mission_id = MissionId::new_v4();
        let mut requests = orch.broker().subscribe();

        let handle = {
            let orch = orch.clone();
            let opts = MissionOptions {
                mission_id: Some(mission_id),
                require_human_oversight: true,
                ..options(0)
            };
            tokio::spawn(async move {
                orch.execute_mission_with(&procedure(&["auth", "crm"]), opts)
                    .await
            })
        };

        let request = requests.recv().await.unwrap();
        assert_eq!(request.mission_id, mission_id);
        let snapshot = orch.mission_status(mission_id).unwrap().unwrap();
        assert_eq!(snapshot.pending_interventions, 1);
        assert!(orch.cancel_mission(mission_id));

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, MissionStatus::Cancelled);
        assert_eq!(script.calls(), vec!["01-auth"]);
        assert!(orch.broker().pending().is_empty());
        assert!(!orch.cancel_mission(mission_id));
    }

    #[tokio::test]
    async fn test_resume_checks() {
        let (orch, _) = orchestrator(Script::default());
        let unknown = MissionId::new_v4();
        let err = orch
            .resume_mission(unknown, &procedure(&["auth"]), options(0))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NothingToResume(id) if id == unknown));

        let done = orch
            .execute_mission(&procedure(&["auth"]), false, 0)
            .await
            .unwrap();

        let err = orch
            .resume_mission(done.mission_id, &procedure(&["email"]), options(0))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ProcedureMismatch { .. }));

        let err = orch
            .resume_mission(done.mission_id, &procedure(&["auth"]), options(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::NotResumable {
                status: MissionStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_resume_failed_mission_retries_failed_phase() {
        let script = Arc::new(Script::failing("02-email", 3));
        let factory = Arc::new(ScriptedFactory {
            script: script.clone(),
        });
        let orch = MissionOrchestrator::new(factory);
        let procedure = procedure(&["auth", "email"]);

        // One attempt, recovery unavailable: fails right away.
        let failed = orch
            .execute_mission_with(&procedure, options(0))
            .await
            .unwrap();
        assert_eq!(failed.status, MissionStatus::Failed);

        let resumed = orch
            .resume_mission(failed.mission_id, &procedure, options(2))
            .await
            .unwrap();
        assert_eq!(resumed.status, MissionStatus::Completed);
        assert_eq!(script.calls_for("01-auth"), 1);
        assert_eq!(script.calls_for("02-email"), 4);
        // Attempt numbers carry on across runs.
        let attempts: Vec<u32> = resumed
            .checkpoints_for("02-email")
            .iter()
            .map(|c| c.attempt)
            .collect();
        assert_eq!(attempts, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_event_channel_sees_every_audit_event() {
        let (tx, mut rx) = mpsc::channel(256);
        let (orch, _) = orchestrator(Script::default());
        let orch = orch.with_event_channel(tx);

        let result = orch
            .execute_mission(&procedure(&["auth", "email"]), false, 0)
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), result.audit_trail.len());
        assert_eq!(seen[0].kind.name(), "mission_started");
        assert_eq!(seen.last().unwrap().kind.name(), "mission_completed");
    }

    #[tokio::test]
    async fn test_status_after_finish_comes_from_journal() {
        let (orch, _) = orchestrator(Script::default());
        let result = orch
            .execute_mission(&procedure(&["auth", "email"]), false, 0)
            .await
            .unwrap();
        let snapshot = orch.mission_status(result.mission_id).unwrap().unwrap();
        assert_eq!(snapshot.status, MissionStatus::Completed);
        assert_eq!(snapshot.phase_count, 2);
        assert!(!snapshot.active);
        assert!(orch.mission_status(MissionId::new_v4()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persistent_journals_survive_new_orchestrator() {
        let dir = tempfile::tempdir().unwrap();
        let script = Arc::new(Script::default());
        let procedure = procedure(&["auth", "email"]);

        let first = MissionOrchestrator::persistent(
            Arc::new(ScriptedFactory {
                script: script.clone(),
            }),
            dir.path(),
        );
        let result = first.execute_mission(&procedure, false, 0).await.unwrap();

        let second = MissionOrchestrator::persistent(
            Arc::new(ScriptedFactory { script }),
            dir.path(),
        );
        let snapshot = second.mission_status(result.mission_id).unwrap().unwrap();
        assert_eq!(snapshot.status, MissionStatus::Completed);
        assert_eq!(snapshot.phase_count, 2);
        assert_eq!(
            second.checkpoint_store().list(result.mission_id).unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_resume_skips_attempt_number_of_interrupted_attempt() {
        let (orch, script) = orchestrator(Script::failing("02-email", 1));
        let procedure = procedure(&["auth", "email"]);

        let failed = orch
            .execute_mission_with(&procedure, options(0))
            .await
            .unwrap();
        assert_eq!(failed.status, MissionStatus::Failed);

        // A crash after this write leaves a started attempt with no checkpoint.
        orch.audit_log()
            .record(
                failed.mission_id,
                AuditEventKind::PhaseStarted {
                    phase: "02-email".into(),
                    attempt: 2,
                    role: WorkerRole::Generic,
                },
            )
            .unwrap();

        let resumed = orch
            .resume_mission(failed.mission_id, &procedure, options(2))
            .await
            .unwrap();
        assert_eq!(resumed.status, MissionStatus::Completed);
        assert_eq!(script.calls_for("02-email"), 2);

        let attempts: Vec<u32> = resumed
            .checkpoints_for("02-email")
            .iter()
            .map(|c| c.attempt)
            .collect();
        assert_eq!(attempts, vec![1, 3]);

        let started: Vec<u32> = resumed
            .audit_trail
            .iter()
            .filter_map(|e| match &e.kind {
                AuditEventKind::PhaseStarted { phase, attempt, .. } if phase == "02-email" => {
                    Some(*attempt)
                }
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![1, 2, 3]);
        assert!(resumed.audit_trail.iter().any(|e| matches!(
            &e.kind,
            AuditEventKind::PhaseFailed { phase, attempt: 2, error }
                if phase == "02-email" && error.contains("interrupted")
        )));
    }

    #[tokio::test]
    async fn test_worker_panic_fails_mission_cleanly() {
        let (orch, _) = orchestrator(Script {
            panic_on: Some("02-email".into()),
            ..Default::default()
        });

        let result = orch
            .execute_mission_with(&procedure(&["auth", "email"]), options(0))
            .await
            .unwrap();

        assert_eq!(result.status, MissionStatus::Failed);
        let failure = result.failure.as_ref().expect("failure recorded");
        assert_eq!(failure.phase, "02-email");
        assert!(failure.error.contains("panicked"));
        assert_eq!(result.checkpoints_for("02-email").len(), 1);
        assert!(!result.events_named("phase_failed").is_empty());

        let snapshot = orch.mission_status(result.mission_id).unwrap().unwrap();
        assert_eq!(snapshot.status, MissionStatus::Failed);
        assert!(!snapshot.active);
    }

    #[tokio::test]
    async fn test_full_event_channel_does_not_stall_mission() {
        let (tx, mut rx) = mpsc::channel(1);
        let (orch, _) = orchestrator(Script::default());
        let orch = orch.with_event_channel(tx);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            orch.execute_mission(&procedure(&["auth", "email"]), false, 0),
        )
        .await
        .expect("mission stalled on a full event channel")
        .unwrap();

        assert_eq!(result.status, MissionStatus::Completed);
        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind.name(), "mission_started");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finished_mission_releases_journal_cache() {
        let dir = tempfile::tempdir().unwrap();
        let orch = MissionOrchestrator::persistent(
            Arc::new(ScriptedFactory {
                script: Arc::new(Script::default()),
            }),
            dir.path(),
        );

        let result = orch
            .execute_mission(&procedure(&["auth", "email"]), false, 0)
            .await
            .unwrap();

        assert_eq!(orch.audit_log().cached(), 0);
        assert_eq!(orch.checkpoint_store().cached(), 0);
        assert_eq!(
            orch.checkpoint_store().list(result.mission_id).unwrap().len(),
            3
        );
        let snapshot = orch.mission_status(result.mission_id).unwrap().unwrap();
        assert_eq!(snapshot.status, MissionStatus::Completed);
    }
}
