//! Mission execution: `conductor run`, `conductor resume` and `conductor plan`.

use anyhow::{Result, bail};
use conductor_common::{MissionId, MissionStatus, Procedure};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use conductor::config::Config;
use conductor::orchestrator::MissionResult;

use super::super::{Cli, MissionArgs};
use super::load_config;

enum Launch {
    Start,
    Resume,
}

fn load(config: &Config, procedure: &str) -> Result<Procedure> {
    use conductor::procedure::{load_procedure, resolve_procedure};

    let Some(path) = resolve_procedure(procedure, &config.conductor_dir) else {
        bail!(
            "Procedure '{}' not found. Pass a file path or a name under .conductor/procedures/",
            procedure
        );
    };
    load_procedure(&path)
}

pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    procedure: &str,
    mission_id: Option<MissionId>,
    args: &MissionArgs,
) -> Result<()> {
    let config = load_config(cli, project_dir, Some(args))?;
    config.ensure_directories()?;
    let procedure = load(&config, procedure)?;
    let mission_id = mission_id.unwrap_or_else(MissionId::new_v4);

    drive(&config, &procedure, mission_id, Launch::Start).await
}

pub async fn cmd_resume(
    cli: &Cli,
    project_dir: PathBuf,
    mission_id: MissionId,
    procedure: &str,
    args: &MissionArgs,
) -> Result<()> {
    let config = load_config(cli, project_dir, Some(args))?;
    config.ensure_directories()?;
    let procedure = load(&config, procedure)?;

    drive(&config, &procedure, mission_id, Launch::Resume).await
}

pub async fn cmd_plan(
    cli: &Cli,
    project_dir: PathBuf,
    procedure: &str,
    oversight: bool,
) -> Result<()> {
    let config = load_config(cli, project_dir, None)?;
    let procedure = load(&config, procedure)?;
    let orchestrator = config.journal_reader();
    let phases = orchestrator
        .plan_mission(&procedure, oversight || config.require_human_oversight)
        .await?;

    println!();
    if let Some(name) = &procedure.name {
        println!("Procedure: {}", name);
    }
    println!("Fingerprint: {}", procedure.fingerprint());
    println!();
    println!(
        "{:<24} {:<16} {:<9} Steps",
        "Phase", "Role", "Approval"
    );
    println!(
        "{:<24} {:<16} {:<9} -----",
        "------------------------", "----------------", "--------"
    );
    for phase in &phases {
        let approval = if phase.requires_approval { "yes" } else { "-" };
        println!(
            "{:<24} {:<16} {:<9} {}",
            phase.name,
            phase.role.as_str(),
            approval,
            phase.steps.len()
        );
        if let Some(description) = &phase.description {
            println!("  {}", console::style(description).dim());
        }
        if cli.verbose {
            for step in &phase.steps {
                println!("    - {}", step.text);
            }
        }
    }
    println!();
    println!("{} phases", phases.len());
    println!();
    Ok(())
}

async fn drive(
    config: &Config,
    procedure: &Procedure,
    mission_id: MissionId,
    launch: Launch,
) -> Result<()> {
    use conductor::intervention::ApprovalPrompt;
    use conductor::server::spawn_server;
    use conductor::ui::MissionUI;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    let interactive = std::io::stderr().is_terminal();
    let (tx, rx) = mpsc::channel(64);
    let orchestrator = Arc::new(config.command_orchestrator()?.with_event_channel(tx));

    let total = orchestrator
        .planner()
        .plan(&procedure.steps, config.require_human_oversight)?
        .len() as u64;
    let ui = if interactive {
        MissionUI::new(total, config.verbose)
    } else {
        MissionUI::hidden(total)
    };
    let ui_task = ui.spawn(rx);

    let shutdown = CancellationToken::new();
    let server = match config.server_config() {
        Some(server_config) => {
            let (addr, handle) =
                spawn_server(&server_config, orchestrator.clone(), shutdown.clone()).await?;
            println!("Status server listening on http://{}", addr);
            Some(handle)
        }
        None => None,
    };

    let prompt = config
        .require_human_oversight
        .then(|| ApprovalPrompt::new(config.yes).spawn(orchestrator.broker()));

    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling mission {} at the next phase boundary...", mission_id);
                orchestrator.cancel_mission(mission_id);
            }
        })
    };

    let options = config.mission_options(Some(mission_id));
    let outcome = match launch {
        Launch::Start => orchestrator.execute_mission_with(procedure, options).await,
        Launch::Resume => {
            orchestrator
                .resume_mission(mission_id, procedure, options)
                .await
        }
    };

    // Every task holding the orchestrator must be gone before the UI sees
    // its channel close.
    interrupt.abort();
    let _ = interrupt.await;
    if let Some(prompt) = prompt {
        prompt.abort();
    }
    shutdown.cancel();
    if let Some(server) = server {
        let _ = server.await;
    }
    drop(orchestrator);
    let ui = ui_task.await?;

    let result = outcome?;
    if interactive {
        ui.print_summary(&result);
    } else {
        print_plain_summary(&result);
    }
    report(&result)
}

fn print_plain_summary(result: &MissionResult) {
    println!("Mission {}: {}", result.mission_id, result.status);
    for phase in &result.phases {
        println!(
            "  {:<24} {:<10} {} attempt(s)",
            phase.name,
            phase.status.to_string(),
            phase.attempts
        );
    }
    if let Some(failure) = &result.failure {
        println!(
            "Failed at {} after {} attempt(s): {}",
            failure.phase, failure.attempts, failure.error
        );
    }
}

fn report(result: &MissionResult) -> Result<()> {
    match result.status {
        MissionStatus::Completed => Ok(()),
        MissionStatus::Failed | MissionStatus::Error => {
            bail!(
                "Mission {} failed. Fix the cause and run `conductor resume {} <procedure>`",
                result.mission_id,
                result.mission_id
            )
        }
        MissionStatus::Cancelled => bail!("Mission {} was cancelled", result.mission_id),
        _ => {
            println!(
                "Mission {} stopped while {}. Continue with `conductor resume {} <procedure>`",
                result.mission_id, result.status, result.mission_id
            );
            Ok(())
        }
    }
}
