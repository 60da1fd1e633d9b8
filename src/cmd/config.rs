//! Configuration view and validation commands: `conductor config`.

use anyhow::Result;
use std::path::PathBuf;

use super::super::{Cli, ConfigCommands};
use super::load_config;

pub fn cmd_config(cli: &Cli, project_dir: PathBuf, command: Option<ConfigCommands>) -> Result<()> {
    use conductor::conductor_config::{CONFIG_FILE, ConductorToml};
    use conductor::init::get_conductor_dir;

    let conductor_dir = get_conductor_dir(&project_dir);
    let config_path = conductor_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Conductor Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No conductor.toml found at {}", config_path.display());
                println!("Using defaults. Run 'conductor config init' to create one.");
            }
            println!();

            let config = load_config(cli, project_dir, None)?;
            let toml = config.toml();

            println!("[engine]");
            println!("  max_retries = {}", toml.engine.max_retries);
            println!(
                "  require_human_oversight = {}",
                toml.engine.require_human_oversight
            );
            println!(
                "  recovery = {}ms..{}ms, fallback role {}",
                toml.engine.recovery.base_delay_ms,
                toml.engine.recovery.max_delay_ms,
                toml.engine.recovery.fallback_role
            );
            println!();

            println!("[planner]");
            let roles: Vec<&str> = toml
                .planner
                .approval_roles
                .iter()
                .map(|r| r.as_str())
                .collect();
            println!("  approval_roles = {:?}", roles);
            println!("  approve_all_phases = {}", toml.planner.approve_all_phases);
            for (tag, role) in &toml.planner.categories {
                println!("  categories.{} = \"{}\"", tag, role);
            }
            println!();

            println!("[worker]");
            println!("  shell = \"{}\"", toml.worker.shell);
            if let Some(command) = &toml.worker.command {
                println!("  command = \"{}\"", command);
            }
            println!("  timeout_secs = {}", toml.worker.timeout_secs);
            for (role, command) in &toml.worker.roles {
                println!("  roles.{} = \"{}\"", role, command);
            }
            println!();

            if let Some(endpoint) = &toml.drafter.endpoint {
                println!("[drafter]");
                println!("  endpoint = \"{}\"", endpoint);
                println!();
            }

            println!("Effective values (with env/CLI overrides):");
            println!("  state_dir = {}", config.state_dir.display());
            println!("  max_retries = {}", config.max_retries);
            println!(
                "  require_human_oversight = {}",
                config.require_human_oversight
            );
            match config.command_spec() {
                Ok(spec) => println!("  worker command = \"{}\"", spec.default_command),
                Err(_) => println!("  worker command = (not configured)"),
            }
            match config.server_config() {
                Some(server) => println!("  server = {}:{}", server.host, server.port),
                None => println!("  server = disabled"),
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = if config_path.exists() {
                ConductorToml::load(&config_path)?
            } else {
                println!("No conductor.toml found. Checking defaults.");
                ConductorToml::default()
            };
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("conductor.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&conductor_dir)?;
            ConductorToml::default().save(&config_path)?;

            println!("Created conductor.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [engine] max_retries, require_human_oversight");
            println!("  - [worker] command and per-role [worker.roles]");
            println!("  - [oversight] approval_timeout_secs, auto_approve");
            println!();
        }
    }

    Ok(())
}
