//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|----------------------------------------------------|
//! | `mission`       | `Run`, `Resume`, `Plan`                            |
//! | `inspect`       | `Status`, `Audit`, `Checkpoints`                   |
//! | `project`       | `Init`                                             |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod inspect;
pub mod mission;
pub mod project;

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::{Cli, MissionArgs};

pub use config::cmd_config;
pub use inspect::{cmd_audit, cmd_checkpoints, cmd_status};
pub use mission::{cmd_plan, cmd_resume, cmd_run};
pub use project::cmd_init;

/// Build the runtime config from global and mission flags.
pub fn load_config(
    cli: &Cli,
    project_dir: PathBuf,
    mission: Option<&MissionArgs>,
) -> Result<conductor::config::Config> {
    use conductor::config::{CliOverrides, Config};

    let mission = mission.cloned().unwrap_or_default();
    Config::new(
        project_dir,
        CliOverrides {
            verbose: cli.verbose,
            yes: cli.yes,
            oversight: mission.oversight,
            max_retries: mission.max_retries,
            approval_timeout_secs: mission.approval_timeout,
            port: mission.port,
            worker_cmd: mission.worker_cmd,
        },
    )
}

/// Log to `.conductor/logs` once the project is initialized, to stderr only before.
pub fn init_logging(
    cli: &Cli,
    project_dir: &Path,
) -> Result<Option<conductor::logging::WorkerGuard>> {
    use conductor::init::{get_conductor_dir, is_initialized};
    use conductor::logging::{LogOptions, init};

    let log_dir = is_initialized(project_dir).then(|| get_conductor_dir(project_dir).join("logs"));
    init(
        log_dir.as_deref(),
        LogOptions {
            verbose: cli.verbose,
            json: cli.log_json,
        },
    )
}
