//! Procedure files.
//!
//! A procedure is a YAML or JSON document with an optional `name` and
//! `description` and a list of `steps`. The format is picked from the file
//! extension; anything that is not `.json` is read as YAML.

use anyhow::{Context, Result, bail};
use conductor_common::Procedure;
use std::path::{Path, PathBuf};

pub fn load_procedure(path: &Path) -> Result<Procedure> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read procedure: {}", path.display()))?;
    let procedure = parse_procedure(&content, is_json(path))
        .with_context(|| format!("Failed to parse procedure: {}", path.display()))?;
    if procedure.steps.iter().any(|s| s.text.trim().is_empty()) {
        bail!("Procedure {} has a step with no text", path.display());
    }
    Ok(procedure)
}

pub fn parse_procedure(content: &str, json: bool) -> Result<Procedure> {
    if json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Resolve a procedure argument: an existing path, or a bare name looked
/// up under `.conductor/procedures/` with a `.yaml`, `.yml` or `.json` suffix.
pub fn resolve_procedure(arg: &str, conductor_dir: &Path) -> Option<PathBuf> {
    let direct = PathBuf::from(arg);
    if direct.is_file() {
        return Some(direct);
    }
    let dir = conductor_dir.join("procedures");
    ["yaml", "yml", "json"]
        .iter()
        .map(|ext| dir.join(format!("{}.{}", arg, ext)))
        .find(|p| p.is_file())
}
