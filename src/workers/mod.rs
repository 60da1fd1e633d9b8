//! Per-mission worker pool.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `command` | Shell-command automation backend |
//! | `directives` | Parser for the backend's stdout directives |
//!
//! A pool belongs to exactly one mission. Workers are created lazily per
//! role and live until they are torn down explicitly (rollback) or the pool
//! is shut down at the end of the mission.

pub mod command;
pub mod directives;

pub use command::{CommandSpec, CommandWorker, CommandWorkerFactory};

use conductor_common::{
    MissionContext, MissionId, Phase, PhaseResult, Worker, WorkerError, WorkerFactory, WorkerRole,
    WorkerStatus,
};
use futures::FutureExt;
use futures::future::join_all;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

pub struct WorkerPool {
    mission_id: MissionId,
    factory: Arc<dyn WorkerFactory>,
    workers: BTreeMap<WorkerRole, Box<dyn Worker>>,
    statuses: BTreeMap<WorkerRole, WorkerStatus>,
}

impl WorkerPool {
    pub fn new(mission_id: MissionId, factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            mission_id,
            factory,
            workers: BTreeMap::new(),
            statuses: BTreeMap::new(),
        }
    }

    pub fn mission_id(&self) -> MissionId {
        self.mission_id
    }

    /// Existing worker for `role`, or a fresh one from the factory.
    pub async fn get_or_create(&mut self, role: WorkerRole) -> Result<&mut dyn Worker, WorkerError> {
        if !self.workers.contains_key(&role) {
            let worker = self.factory.create(role, self.mission_id).await?;
            tracing::debug!(mission = %self.mission_id, role = %role, worker = worker.id(), "worker created");
            self.workers.insert(role, worker);
            self.statuses.insert(role, WorkerStatus::Idle);
        }
        match self.workers.get_mut(&role) {
            Some(worker) => Ok(worker.as_mut()),
            None => Err(WorkerError::Unavailable { role }),
        }
    }

    /// Run `phase` on the worker for its role, tracking the worker's status.
    ///
    /// A worker that panics fails the attempt and is dropped from the pool;
    /// the next phase for its role gets a fresh one.
    pub async fn execute(
        &mut self,
        phase: &Phase,
        ctx: &mut MissionContext,
    ) -> Result<PhaseResult, WorkerError> {
        let role = phase.role;
        let outcome = match self.get_or_create(role).await {
            Ok(worker) => {
                let id = worker.id().to_string();
                match AssertUnwindSafe(worker.execute_phase(phase, ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => {
                        tracing::debug!(worker = %id, phase = %phase.name, ok = result.is_ok(), "worker returned");
                        Ok(result)
                    }
                    Err(payload) => Err((id, panic_message(payload.as_ref()))),
                }
            }
            Err(e) => Ok(Err(e)),
        };

        let result = match outcome {
            Ok(result) => result,
            Err((id, message)) => {
                tracing::error!(mission = %self.mission_id, worker = %id, phase = %phase.name, %message, "worker panicked");
                self.workers.remove(&role);
                Err(WorkerError::Execution(format!(
                    "worker {} panicked: {}",
                    id, message
                )))
            }
        };

        let status = match &result {
            Ok(r) if r.is_success() => WorkerStatus::Idle,
            _ => WorkerStatus::Failed,
        };
        self.statuses.insert(role, status);
        result
    }

    pub fn worker_id(&self, role: WorkerRole) -> Option<String> {
        self.workers.get(&role).map(|w| w.id().to_string())
    }

    /// Shut down and forget the worker for `role`; the next use recreates it.
    pub async fn teardown(&mut self, role: WorkerRole) -> Result<(), WorkerError> {
        let Some(mut worker) = self.workers.remove(&role) else {
            return Ok(());
        };
        self.statuses.insert(role, WorkerStatus::Stopped);
        tracing::debug!(mission = %self.mission_id, role = %role, worker = worker.id(), "worker torn down");
        worker.shutdown().await
    }

    /// Shut down every worker. Errors are logged, not returned.
    pub async fn shutdown(&mut self) {
        let workers = std::mem::take(&mut self.workers);
        for role in workers.keys() {
            self.statuses.insert(*role, WorkerStatus::Stopped);
        }

        let results = join_all(workers.into_iter().map(|(role, mut worker)| async move {
            (role, worker.shutdown().await)
        }))
        .await;

        for (role, result) in results {
            if let Err(e) = result {
                tracing::warn!(mission = %self.mission_id, role = %role, error = %e, "worker shutdown failed");
            }
        }
    }

    pub fn worker_statuses(&self) -> BTreeMap<WorkerRole, WorkerStatus> {
        self.statuses.clone()
    }

    pub fn active_roles(&self) -> Vec<WorkerRole> {
        self.workers.keys().copied().collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            tracing::warn!(
                mission = %self.mission_id,
                workers = self.workers.len(),
                "worker pool dropped without shutdown"
            );
        }
    }
}
