use anyhow::{Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use conductor_common::{MissionId, WorkerFactory};

use crate::conductor_config::ConductorToml;
use crate::init::CONDUCTOR_DIR;
use crate::orchestrator::{MissionOptions, MissionOrchestrator};
use crate::planner::{HttpPlanDrafter, PhasePlanner, PlanDrafter, PlannerSettings};
use crate::server::ServerConfig;
use crate::workers::{CommandSpec, CommandWorkerFactory};

/// Flags given on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub verbose: bool,
    pub yes: bool,
    pub oversight: bool,
    pub max_retries: Option<u32>,
    pub approval_timeout_secs: Option<u64>,
    pub port: Option<u16>,
    pub worker_cmd: Option<String>,
}

/// Runtime configuration for Conductor.
///
/// Merges `conductor.toml`, environment variables and CLI flags, in that
/// order of increasing precedence, and builds the engine components from
/// the result.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub conductor_dir: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    /// Approve every intervention without prompting.
    pub yes: bool,
    pub require_human_oversight: bool,
    pub max_retries: u32,
    pub approval_timeout: Option<Duration>,
    port: Option<u16>,
    worker_cmd: Option<String>,
    toml: ConductorToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, cli: CliOverrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .map_err(|e| anyhow::anyhow!("Failed to resolve project directory: {}", e))?;
        let conductor_dir = project_dir.join(CONDUCTOR_DIR);
        let toml = ConductorToml::load_or_default(&conductor_dir)?;

        let state_dir = std::env::var("CONDUCTOR_STATE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| toml.engine.state_dir.as_ref().map(PathBuf::from))
            .map(|dir| {
                if dir.is_absolute() {
                    dir
                } else {
                    project_dir.join(dir)
                }
            })
            .unwrap_or_else(|| conductor_dir.join("state"));
        let log_dir = conductor_dir.join("logs");

        let approval_timeout = cli
            .approval_timeout_secs
            .or(toml.oversight.approval_timeout_secs)
            .map(Duration::from_secs);

        Ok(Self {
            require_human_oversight: cli.oversight || toml.engine.require_human_oversight,
            max_retries: cli.max_retries.unwrap_or_else(|| toml.max_retries()),
            yes: cli.yes || toml.oversight.auto_approve,
            verbose: cli.verbose,
            approval_timeout,
            port: cli.port,
            worker_cmd: cli.worker_cmd,
            project_dir,
            conductor_dir,
            state_dir,
            log_dir,
            toml,
        })
    }

    pub fn toml(&self) -> &ConductorToml {
        &self.toml
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.state_dir, &self.log_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                anyhow::anyhow!("Failed to create directory {}: {}", dir.display(), e)
            })?;
        }
        Ok(())
    }

    pub fn mission_options(&self, mission_id: Option<MissionId>) -> MissionOptions {
        MissionOptions {
            mission_id,
            require_human_oversight: self.require_human_oversight,
            max_retries: self.max_retries,
            approval_timeout: self.approval_timeout,
            retry_delay: None,
        }
    }

    pub fn planner(&self) -> PhasePlanner {
        PhasePlanner::new(PlannerSettings {
            approval_roles: self.toml.planner.approval_roles.clone(),
            approve_all_phases: self.toml.planner.approve_all_phases,
            category_roles: self.toml.category_roles(),
        })
    }

    pub fn command_spec(&self) -> Result<CommandSpec> {
        let default_command = self
            .worker_cmd
            .clone()
            .or_else(|| self.toml.worker_command())
            .unwrap_or_default();
        let role_commands = self.toml.role_commands();
        if default_command.trim().is_empty() && role_commands.is_empty() {
            bail!(
                "No worker command configured. Set [worker] command in {}/conductor.toml, \
                 CONDUCTOR_WORKER_CMD, or pass --worker-cmd",
                CONDUCTOR_DIR
            );
        }
        Ok(CommandSpec {
            shell: self.toml.worker.shell.clone(),
            default_command,
            role_commands,
            timeout: Duration::from_secs(self.toml.worker.timeout_secs),
            working_dir: self.project_dir.clone(),
        })
    }

    pub fn drafter(&self) -> Option<Arc<dyn PlanDrafter>> {
        self.toml.drafter.endpoint.as_ref().map(|endpoint| {
            Arc::new(HttpPlanDrafter::new(
                endpoint,
                Duration::from_secs(self.toml.drafter.timeout_secs),
            )) as Arc<dyn PlanDrafter>
        })
    }

    /// Status server settings, when enabled in the file or by `--port`.
    pub fn server_config(&self) -> Option<ServerConfig> {
        if !self.toml.server.enabled && self.port.is_none() {
            return None;
        }
        Some(ServerConfig {
            host: self.toml.server.host.clone(),
            port: self.port.unwrap_or(self.toml.server.port),
            cors: self.toml.server.cors,
        })
    }

    /// Orchestrator with persistent journals and the configured planner,
    /// advisor and drafter.
    pub fn orchestrator(&self, factory: Arc<dyn WorkerFactory>) -> MissionOrchestrator {
        let orchestrator = MissionOrchestrator::persistent(factory, &self.state_dir)
            .with_planner(self.planner())
            .with_advisor(self.toml.engine.recovery.advisor());
        match self.drafter() {
            Some(drafter) => orchestrator.with_drafter(drafter),
            None => orchestrator,
        }
    }

    /// Orchestrator backed by the command automation backend.
    pub fn command_orchestrator(&self) -> Result<MissionOrchestrator> {
        let factory = Arc::new(CommandWorkerFactory::new(self.command_spec()?));
        Ok(self.orchestrator(factory))
    }

    /// Read-only orchestrator for inspecting journals; it never runs a phase.
    pub fn journal_reader(&self) -> MissionOrchestrator {
        let spec = CommandSpec {
            shell: self.toml.worker.shell.clone(),
            default_command: String::new(),
            role_commands: Default::default(),
            timeout: Duration::from_secs(self.toml.worker.timeout_secs),
            working_dir: self.project_dir.clone(),
        };
        self.orchestrator(Arc::new(CommandWorkerFactory::new(spec)))
    }
}
