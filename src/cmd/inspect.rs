//! Mission inspection: `conductor status`, `conductor audit` and `conductor checkpoints`.
//!
//! All three read the journals only; nothing here runs a phase.

use anyhow::{Result, bail};
use conductor_common::MissionId;
use std::path::{Path, PathBuf};

use super::super::Cli;
use super::load_config;

pub fn cmd_status(cli: &Cli, project_dir: PathBuf, mission_id: Option<MissionId>) -> Result<()> {
    use conductor::init::is_initialized;

    if !is_initialized(&project_dir) {
        println!();
        println!("Project: Not initialized");
        println!();
        println!("Run 'conductor init' to initialize the project.");
        println!();
        return Ok(());
    }

    let config = load_config(cli, project_dir, None)?;
    let orchestrator = config.journal_reader();

    let Some(mission_id) = mission_id else {
        let missions = orchestrator.list_missions()?;
        println!();
        if missions.is_empty() {
            println!("No missions yet. Run 'conductor run <procedure>' to start one.");
            println!();
            return Ok(());
        }
        println!(
            "{:<36}  {:<16} {:<8} {:<24} Started",
            "Mission", "Status", "Phases", "Current phase"
        );
        for snapshot in &missions {
            println!(
                "{:<36}  {:<16} {:<8} {:<24} {}",
                snapshot.mission_id.to_string(),
                snapshot.status.to_string(),
                snapshot.phase_count,
                snapshot.current_phase.as_deref().unwrap_or("-"),
                snapshot.started_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        println!();
        return Ok(());
    };

    let Some(snapshot) = orchestrator.mission_status(mission_id)? else {
        bail!("Mission {} not found", mission_id);
    };

    println!();
    println!("Mission {}", snapshot.mission_id);
    println!("==========================================");
    println!("Status:        {}", snapshot.status);
    println!(
        "Current phase: {}",
        snapshot.current_phase.as_deref().unwrap_or("-")
    );
    println!("Phases:        {}", snapshot.phase_count);
    println!(
        "Started:       {}",
        snapshot.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "Updated:       {}",
        snapshot.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if !snapshot.per_worker_status.is_empty() {
        println!();
        println!("Workers:");
        for (role, status) in &snapshot.per_worker_status {
            println!("  {:<16} {:?}", role.as_str(), status);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_audit(
    cli: &Cli,
    project_dir: PathBuf,
    mission_id: MissionId,
    phase: Option<&str>,
    export: Option<&Path>,
) -> Result<()> {
    let config = load_config(cli, project_dir, None)?;
    let audit = config.journal_reader().audit_log();

    if let Some(output) = export {
        let count = audit.export(mission_id, output)?;
        println!("Exported {} audit events to {}", count, output.display());
        return Ok(());
    }

    let events = match phase {
        Some(phase) => audit.events_for_phase(mission_id, phase)?,
        None => audit.events(mission_id)?,
    };
    if events.is_empty() {
        bail!("No audit events for mission {}", mission_id);
    }

    println!();
    for event in &events {
        println!(
            "{:>4}  {}  {:<28} {}",
            event.sequence,
            event.timestamp.format("%H:%M:%S%.3f"),
            event.kind.name(),
            event.kind.phase().unwrap_or("")
        );
        if cli.verbose {
            println!("      {}", serde_json::to_string(&event.kind)?);
        }
    }
    println!();
    println!("{} events", events.len());
    println!();
    Ok(())
}

pub fn cmd_checkpoints(
    cli: &Cli,
    project_dir: PathBuf,
    mission_id: MissionId,
    phase: Option<&str>,
) -> Result<()> {
    use conductor::orchestrator::MissionState;

    let config = load_config(cli, project_dir, None)?;
    let store = config.journal_reader().checkpoint_store();

    let checkpoints = match phase {
        Some(phase) => store.for_phase(mission_id, phase)?,
        None => store.list(mission_id)?,
    };
    if checkpoints.is_empty() {
        bail!("No checkpoints for mission {}", mission_id);
    }

    println!();
    println!(
        "{:>4}  {:<24} {:<8} {:<18} {:<16} Created",
        "Seq", "Phase", "Attempt", "Outcome", "Status"
    );
    for checkpoint in &checkpoints {
        let (outcome, status) = match MissionState::from_checkpoint(checkpoint) {
            Ok(state) => (
                serde_json::to_value(state.outcome)?
                    .as_str()
                    .unwrap_or("-")
                    .to_string(),
                state.status.to_string(),
            ),
            Err(_) => ("unreadable".to_string(), "-".to_string()),
        };
        println!(
            "{:>4}  {:<24} {:<8} {:<18} {:<16} {}",
            checkpoint.sequence,
            checkpoint.phase,
            checkpoint.attempt,
            outcome,
            status,
            checkpoint.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    Ok(())
}
