//! Directive parsing from automation backend output.
//!
//! A command worker reports structured facts on stdout, one per line:
//! - `@session KEY=VALUE` carries session state into later phases
//! - `@step ok <text>` / `@step failed <text>` reports one sub-step
//! - `@memory <category> <key>=<value>` appends to the mission memory
//!
//! Every other non-empty line is part of the human-readable summary.

use conductor_common::MemoryCategory;
use regex::Regex;
use std::sync::LazyLock;

static SESSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@session\s+([A-Za-z_][A-Za-z0-9_]*)=(.*)$").unwrap());

static STEP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@step\s+(ok|failed)\s*(.*)$").unwrap());

static MEMORY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@memory\s+([a-z]+)\s+([^=\s]+)=(.*)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub ok: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDirective {
    pub category: MemoryCategory,
    pub key: String,
    pub value: serde_json::Value,
}

/// Everything extracted from one run of the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerOutput {
    pub session: Vec<(String, String)>,
    pub steps: Vec<StepReport>,
    pub memory: Vec<MemoryDirective>,
    pub summary: Vec<String>,
}

impl WorkerOutput {
    pub fn steps_completed(&self) -> usize {
        self.steps.iter().filter(|s| s.ok).count()
    }

    pub fn steps_failed(&self) -> usize {
        self.steps.iter().filter(|s| !s.ok).count()
    }

    pub fn summary_text(&self) -> String {
        self.summary.join("\n")
    }
}

pub fn parse(output: &str) -> WorkerOutput {
    let mut parsed = WorkerOutput::default();

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(cap) = SESSION_REGEX.captures(line) {
            parsed
                .session
                .push((cap[1].to_string(), cap[2].trim().to_string()));
            continue;
        }

        if let Some(cap) = STEP_REGEX.captures(line) {
            parsed.steps.push(StepReport {
                ok: &cap[1] == "ok",
                text: cap[2].trim().to_string(),
            });
            continue;
        }

        if let Some(cap) = MEMORY_REGEX.captures(line) {
            match cap[1].parse::<MemoryCategory>() {
                Ok(category) => parsed.memory.push(MemoryDirective {
                    category,
                    key: cap[2].to_string(),
                    value: parse_value(cap[3].trim()),
                }),
                Err(e) => tracing::warn!(line, error = %e, "ignoring memory directive"),
            }
            continue;
        }

        if line.starts_with('@') {
            tracing::warn!(line, "unrecognised worker directive");
            continue;
        }

        parsed.summary.push(line.to_string());
    }

    parsed
}

/// JSON when it parses as JSON, otherwise the raw string.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
