use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use conductor_common::MissionId;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Run business procedures as supervised, checkpointed missions")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve every human intervention without prompting
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Write the log file as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by `run` and `resume`.
#[derive(Args, Clone, Debug, Default)]
pub struct MissionArgs {
    /// Gate sensitive phases behind human approval
    #[arg(long)]
    pub oversight: bool,

    /// Extra attempts per phase beyond the first
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Seconds to wait for an approval before pausing the mission
    #[arg(long)]
    pub approval_timeout: Option<u64>,

    /// Serve mission status and approvals over HTTP on this port
    #[arg(long)]
    pub port: Option<u16>,

    /// Shell command that performs one phase
    #[arg(long)]
    pub worker_cmd: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new conductor project
    Init,
    /// Plan and run a procedure as a new mission
    Run {
        /// Procedure file, or a name under .conductor/procedures/
        procedure: String,

        /// Use this mission id instead of a fresh one
        #[arg(long)]
        mission_id: Option<MissionId>,

        #[command(flatten)]
        mission: MissionArgs,
    },
    /// Continue a mission from its last checkpoint
    Resume {
        mission_id: MissionId,

        /// The procedure the mission was started with
        procedure: String,

        #[command(flatten)]
        mission: MissionArgs,
    },
    /// Show the phase plan for a procedure without running it
    Plan {
        procedure: String,

        /// Plan as if human oversight were on
        #[arg(long)]
        oversight: bool,
    },
    /// Show one mission, or every mission in the journals
    Status { mission_id: Option<MissionId> },
    /// Show or export a mission's audit trail
    Audit {
        mission_id: MissionId,

        /// Only events for this phase
        #[arg(long)]
        phase: Option<String>,

        /// Write the trail to a JSON file instead of printing it
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// List a mission's checkpoints
    Checkpoints {
        mission_id: MissionId,

        #[arg(long)]
        phase: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default conductor.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let _log_guard = cmd::init_logging(&cli, &project_dir)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run {
            procedure,
            mission_id,
            mission,
        } => {
            cmd::cmd_run(&cli, project_dir, procedure, *mission_id, mission).await?;
        }
        Commands::Resume {
            mission_id,
            procedure,
            mission,
        } => {
            cmd::cmd_resume(&cli, project_dir, *mission_id, procedure, mission).await?;
        }
        Commands::Plan {
            procedure,
            oversight,
        } => cmd::cmd_plan(&cli, project_dir, procedure, *oversight).await?,
        Commands::Status { mission_id } => cmd::cmd_status(&cli, project_dir, *mission_id)?,
        Commands::Audit {
            mission_id,
            phase,
            export,
        } => cmd::cmd_audit(
            &cli,
            project_dir,
            *mission_id,
            phase.as_deref(),
            export.as_deref(),
        )?,
        Commands::Checkpoints { mission_id, phase } => {
            cmd::cmd_checkpoints(&cli, project_dir, *mission_id, phase.as_deref())?
        }
        Commands::Config { command } => cmd::cmd_config(&cli, project_dir, command.clone())?,
    }

    Ok(())
}
