use crate::audit::{AuditEvent, AuditEventKind};
use crate::orchestrator::MissionResult;
use crate::ui::icons::{CHECK, CROSS, HAND, PAUSE, RECOVERY, RETRY, RUNNING, SKIP, SPARKLE, STOP};
use conductor_common::MissionStatus;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Terminal UI for a running mission, driven entirely by audit events.
///
/// Two bars are stacked vertically:
/// - Phase bar: settled phases out of the plan
/// - Attempt spinner: the attempt in flight and its latest status
pub struct MissionUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    attempt_bar: ProgressBar,
    verbose: bool,
}

impl MissionUI {
    pub fn new(total_phases: u64, verbose: bool) -> Self {
        Self::with_target(total_phases, verbose, ProgressDrawTarget::stderr())
    }

    /// UI that renders nothing, for non-interactive runs.
    pub fn hidden(total_phases: u64) -> Self {
        Self::with_target(total_phases, false, ProgressDrawTarget::hidden())
    }

    fn with_target(total_phases: u64, verbose: bool, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let phase_bar = multi.add(ProgressBar::new(total_phases));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let attempt_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let attempt_bar = multi.add(ProgressBar::new_spinner());
        attempt_bar.set_style(attempt_style);
        attempt_bar.set_prefix(" Phase");

        Self {
            multi,
            phase_bar,
            attempt_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn settled_phases(&self) -> u64 {
        self.phase_bar.position()
    }

    pub fn handle(&self, event: &AuditEvent) {
        match &event.kind {
            AuditEventKind::MissionStarted {
                phase_count,
                require_human_oversight,
                ..
            } => {
                self.phase_bar.set_length(*phase_count as u64);
                let oversight = if *require_human_oversight {
                    " (human oversight)"
                } else {
                    ""
                };
                self.print_line(format!(
                    "{} Mission {} started{}",
                    RUNNING,
                    style(event.mission_id).cyan(),
                    oversight
                ));
            }
            AuditEventKind::MissionResumed {
                from_checkpoint,
                remaining_phases,
            } => {
                let total = self.phase_bar.length().unwrap_or(0);
                self.phase_bar
                    .set_position(total.saturating_sub(*remaining_phases as u64));
                self.print_line(format!(
                    "{} Resuming from checkpoint {} ({} phases left)",
                    RUNNING,
                    style(from_checkpoint).cyan(),
                    remaining_phases
                ));
            }
            AuditEventKind::StatusChanged { to, .. } => {
                if self.verbose {
                    self.print_line(format!("    {} {}", style("→").dim(), style(to).dim()));
                }
            }
            AuditEventKind::PhaseStarted {
                phase,
                attempt,
                role,
            } => {
                self.phase_bar.set_message(style(phase).yellow().to_string());
                self.attempt_bar.set_message(format!(
                    "{} attempt {} on {}",
                    phase,
                    style(attempt).cyan(),
                    style(role).dim()
                ));
                self.attempt_bar
                    .enable_steady_tick(Duration::from_millis(100));
            }
            AuditEventKind::PhaseCompleted { phase, attempt, .. } => {
                self.phase_bar.inc(1);
                self.attempt_bar.set_message(format!("{} {} done", CHECK, phase));
                self.print_line(format!(
                    "{} Phase {} complete (attempt {})",
                    SPARKLE,
                    style(phase).green().bold(),
                    attempt
                ));
            }
            AuditEventKind::PhaseFailed {
                phase,
                attempt,
                error,
            } => {
                self.print_line(format!(
                    "    {} {} attempt {} failed: {}",
                    CROSS,
                    phase,
                    attempt,
                    style(error).red()
                ));
            }
            AuditEventKind::PhaseSkipped { phase, reason } => {
                self.phase_bar.inc(1);
                self.print_line(format!(
                    "{} Phase {} skipped: {}",
                    SKIP,
                    style(phase).yellow(),
                    reason
                ));
            }
            AuditEventKind::RecoveryApplied { strategy, .. } => {
                self.print_line(format!(
                    "    {} {}",
                    RETRY,
                    style(format!("recovery: {}", strategy.name)).yellow()
                ));
            }
            AuditEventKind::InterventionRequested { request_id, phase } => {
                self.attempt_bar
                    .set_message(format!("{} waiting for approval of {}", HAND, phase));
                self.print_line(format!(
                    "{} Approval needed for {} (request {})",
                    HAND,
                    style(phase).yellow().bold(),
                    style(request_id).dim()
                ));
            }
            AuditEventKind::InterventionResolved {
                phase,
                action,
                timed_out,
                ..
            } => {
                let how = if *timed_out { " (timed out)" } else { "" };
                self.print_line(format!(
                    "    {} {} {}{}",
                    style("→").dim(),
                    phase,
                    style(action).cyan(),
                    how
                ));
            }
            AuditEventKind::MissionRecoveryAttempted { phase, max_retries } => {
                self.print_line(format!(
                    "{} Mission recovery from {} ({} retries left per phase)",
                    RECOVERY,
                    style(phase).yellow(),
                    max_retries
                ));
            }
            AuditEventKind::MissionCompleted { .. } => {
                self.attempt_bar.finish_and_clear();
                self.phase_bar
                    .finish_with_message(style("completed").green().to_string());
            }
            AuditEventKind::MissionFailed { phase, error, .. } => {
                self.attempt_bar.finish_and_clear();
                self.phase_bar.abandon_with_message(format!(
                    "{} failed at {}: {}",
                    CROSS,
                    style(phase).red().bold(),
                    error
                ));
            }
            AuditEventKind::MissionPaused { phase, reason } => {
                self.attempt_bar.finish_and_clear();
                self.phase_bar
                    .abandon_with_message(format!("{} paused before {}: {}", PAUSE, phase, reason));
            }
            AuditEventKind::MissionCancelled { phase } => {
                self.attempt_bar.finish_and_clear();
                let at = phase.as_deref().unwrap_or("start");
                self.phase_bar
                    .abandon_with_message(format!("{} cancelled at {}", STOP, at));
            }
        }
    }

    /// Drain `events` into the UI until the sender side is dropped.
    pub fn spawn(self, mut events: mpsc::Receiver<AuditEvent>) -> JoinHandle<Self> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(&event);
            }
            self
        })
    }

    /// Final block printed after the mission returns.
    pub fn print_summary(&self, result: &MissionResult) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        let status = match result.status {
            MissionStatus::Completed => style(result.status).green().bold(),
            MissionStatus::Paused | MissionStatus::WaitingOnHuman => {
                style(result.status).yellow().bold()
            }
            _ => style(result.status).red().bold(),
        };
        self.print_line(format!("Mission {}: {}", result.mission_id, status));
        for phase in &result.phases {
            let summary = result
                .phase_results
                .get(&phase.name)
                .map(|r| r.summary.as_str())
                .unwrap_or("");
            self.print_line(format!(
                "  {:<24} {:<10} {:>2} attempt(s)  {}",
                phase.name,
                phase.status.to_string(),
                phase.attempts,
                style(summary).dim()
            ));
        }
        if let Some(failure) = &result.failure {
            self.print_line(format!(
                "{} {} after {} attempt(s): {}",
                CROSS,
                style(&failure.phase).red(),
                failure.attempts,
                failure.error
            ));
        }
        self.print_line(format!(
            "{}  {} checkpoints, {} audit events",
            style("Journals:").dim(),
            result.checkpoints.len(),
            result.audit_trail.len()
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }
}
