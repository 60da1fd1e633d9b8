//! Automation backend bridge that runs one shell command per phase.

use super::directives::{self, WorkerOutput};
use async_trait::async_trait;
use conductor_common::{
    MissionContext, MissionId, Phase, PhaseResult, Worker, WorkerError, WorkerFactory, WorkerRole,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// How to launch the backend for each role.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub shell: String,
    pub default_command: String,
    pub role_commands: HashMap<WorkerRole, String>,
    pub timeout: Duration,
    pub working_dir: PathBuf,
}

impl CommandSpec {
    pub fn command_for(&self, role: WorkerRole) -> &str {
        self.role_commands
            .get(&role)
            .map(String::as_str)
            .unwrap_or(&self.default_command)
    }
}

pub struct CommandWorkerFactory {
    spec: CommandSpec,
}

impl CommandWorkerFactory {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl WorkerFactory for CommandWorkerFactory {
    async fn create(
        &self,
        role: WorkerRole,
        mission_id: MissionId,
    ) -> Result<Box<dyn Worker>, WorkerError> {
        let command = self.spec.command_for(role);
        if command.trim().is_empty() {
            return Err(WorkerError::Unavailable { role });
        }
        Ok(Box::new(CommandWorker::new(role, mission_id, &self.spec)))
    }
}

pub struct CommandWorker {
    id: String,
    role: WorkerRole,
    mission_id: MissionId,
    shell: String,
    command: String,
    timeout: Duration,
    working_dir: PathBuf,
    /// Session state reported via `@session`, replayed as env vars.
    session: BTreeMap<String, String>,
}

impl CommandWorker {
    pub fn new(role: WorkerRole, mission_id: MissionId, spec: &CommandSpec) -> Self {
        let short = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}", role, &short[..8]),
            role,
            mission_id,
            shell: spec.shell.clone(),
            command: spec.command_for(role).to_string(),
            timeout: spec.timeout,
            working_dir: spec.working_dir.clone(),
            session: BTreeMap::new(),
        }
    }

    pub fn session(&self) -> &BTreeMap<String, String> {
        &self.session
    }

    fn build_command(&self, phase: &Phase) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .env("CONDUCTOR_MISSION_ID", self.mission_id.to_string())
            .env("CONDUCTOR_PHASE", &phase.name)
            .env("CONDUCTOR_ROLE", self.role.as_str())
            .env("CONDUCTOR_WORKER_ID", &self.id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.session {
            cmd.env(format!("CONDUCTOR_SESSION_{}", key.to_uppercase()), value);
        }
        cmd
    }

    async fn run(&self, phase: &Phase, input: String) -> Result<String, WorkerError> {
        let mut child = self
            .build_command(phase)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            // A backend that ignores its input may close stdin early.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                tracing::debug!(worker = %self.id, error = %e, "backend closed stdin");
            }
            drop(stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(WorkerError::Spawn)?,
            Err(_) => {
                return Err(WorkerError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(WorkerError::NonZeroExit {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn apply(&mut self, phase: &Phase, ctx: &mut MissionContext, output: &WorkerOutput) {
        for (key, value) in &output.session {
            self.session.insert(key.clone(), value.clone());
        }
        for entry in &output.memory {
            ctx.remember(entry.category, &entry.key, entry.value.clone(), &phase.name);
        }
    }
}

#[async_trait]
impl Worker for CommandWorker {
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
        let input = json!({
            "mission_id": ctx.mission_id,
            "attempt": ctx.attempt,
            "phase": phase,
            "memory": ctx.memory(),
            "previous_results": ctx.previous_results(),
        });
        let input = serde_json::to_string(&input)
            .map_err(|e| WorkerError::Execution(format!("Failed to encode phase input: {}", e)))?;

        tracing::debug!(worker = %self.id, phase = %phase.name, command = %self.command, "running backend");
        let start = Instant::now();
        let stdout = self.run(phase, input).await?;
        let output = directives::parse(&stdout);
        self.apply(phase, ctx, &output);

        let (completed, failed) = if output.steps.is_empty() {
            (phase.steps.len(), 0)
        } else {
            (output.steps_completed(), output.steps_failed())
        };
        let summary = match output.summary_text() {
            s if s.is_empty() => format!("{} finished by {}", phase.name, self.id),
            s => s,
        };

        let documentation = json!({
            "worker": self.id,
            "command": self.command,
            "duration_ms": start.elapsed().as_millis() as u64,
            "steps": output.steps.iter().map(|s| json!({"ok": s.ok, "text": s.text})).collect::<Vec<_>>(),
            "session_keys": self.session.keys().collect::<Vec<_>>(),
        });

        let result = if failed > 0 {
            PhaseResult::failed(&summary, completed, failed)
        } else {
            PhaseResult::completed(&summary, completed)
        };
        Ok(result.with_documentation(documentation))
    }

    async fn shutdown(&mut self) -> Result<(), WorkerError> {
        tracing::debug!(worker = %self.id, "shutting down command worker");
        self.session.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_common::{MissionMemory, ProcedureStep};
    use tempfile::TempDir;

    fn spec(dir: &TempDir, command: &str) -> CommandSpec {
        CommandSpec {
            shell: "sh".to_string(),
            default_command: command.to_string(),
            role_commands: HashMap::new(),
            timeout: Duration::from_secs(10),
            working_dir: dir.path().to_path_buf(),
        }
    }

    fn ctx(mission_id: MissionId) -> MissionContext {
        MissionContext::new(mission_id, 0, 1, MissionMemory::new(), BTreeMap::new())
    }

    fn phase() -> Phase {
        Phase::new(0, "auth", WorkerRole::Auth).with_steps(vec![
            ProcedureStep::new("Open portal"),
            ProcedureStep::new("Log in"),
        ])
    }

    #[tokio::test]
    async fn test_successful_run_reports_steps_and_memory() {
        let dir = TempDir::new().unwrap();
        let mission = MissionId::new_v4();
        let spec = spec(
            &dir,
            "echo \"phase $CONDUCTOR_PHASE as $CONDUCTOR_ROLE\"; echo '@session TOKEN=t1'; echo '@memory discovery user=\"ops\"'",
        );
        let mut worker = CommandWorker::new(WorkerRole::Auth, mission, &spec);
        let mut ctx = ctx(mission);

        let result = worker.execute_phase(&phase(), &mut ctx).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.steps_completed, 2);
        assert_eq!(result.summary, "phase 01-auth as auth");
        assert_eq!(worker.session().get("TOKEN").map(String::as_str), Some("t1"));
        assert_eq!(ctx.memory().latest("user"), Some(&json!("ops")));
    }

    #[tokio::test]
    async fn test_session_is_replayed_into_next_phase() {
        let dir = TempDir::new().unwrap();
        let mission = MissionId::new_v4();
        let spec = spec(
            &dir,
            "if [ -n \"$CONDUCTOR_SESSION_TOKEN\" ]; then echo \"reused $CONDUCTOR_SESSION_TOKEN\"; else echo '@session token=abc'; fi",
        );
        let mut worker = CommandWorker::new(WorkerRole::Auth, mission, &spec);

        worker.execute_phase(&phase(), &mut ctx(mission)).await.unwrap();
        let second = worker.execute_phase(&phase(), &mut ctx(mission)).await.unwrap();
        assert_eq!(second.summary, "reused abc");
    }

    #[tokio::test]
    async fn test_failed_step_marks_result_failed() {
        let dir = TempDir::new().unwrap();
        let mission = MissionId::new_v4();
        let spec = spec(&dir, "echo '@step ok open'; echo '@step failed save'");
        let mut worker = CommandWorker::new(WorkerRole::RecordUpdate, mission, &spec);

        let result = worker.execute_phase(&phase(), &mut ctx(mission)).await.unwrap();
        assert!(!result.is_success());
        assert_eq!(result.steps_completed, 1);
        assert_eq!(result.steps_failed, 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_worker_error() {
        let dir = TempDir::new().unwrap();
        let mission = MissionId::new_v4();
        let spec = spec(&dir, "echo 'selector not found' >&2; exit 3");
        let mut worker = CommandWorker::new(WorkerRole::Generic, mission, &spec);

        let err = worker.execute_phase(&phase(), &mut ctx(mission)).await.unwrap_err();
        match err {
            WorkerError::NonZeroExit { exit_code, stderr } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "selector not found");
            }
            other => panic!("Expected NonZeroExit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_worker_error() {
        let dir = TempDir::new().unwrap();
        let mission = MissionId::new_v4();
        let mut spec = spec(&dir, "sleep 5");
        spec.timeout = Duration::from_millis(200);
        let mut worker = CommandWorker::new(WorkerRole::Generic, mission, &spec);

        let err = worker.execute_phase(&phase(), &mut ctx(mission)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_factory_uses_role_override() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec(&dir, "echo default");
        spec.role_commands
            .insert(WorkerRole::RecordUpdate, "echo crm".to_string());
        let factory = CommandWorkerFactory::new(spec);
        let mission = MissionId::new_v4();

        let mut worker = factory.create(WorkerRole::RecordUpdate, mission).await.unwrap();
        let result = worker.execute_phase(&phase(), &mut ctx(mission)).await.unwrap();
        assert_eq!(result.summary, "crm");
        assert!(worker.id().starts_with("record-update-"));
    }

    #[tokio::test]
    async fn test_factory_without_command_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let factory = CommandWorkerFactory::new(spec(&dir, "  "));
        let err = factory
            .create(WorkerRole::Auth, MissionId::new_v4())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WorkerError::Unavailable { role: WorkerRole::Auth }));
    }
}
