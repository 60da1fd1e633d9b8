//! Project initialization.
//!
//! `conductor init` creates the `.conductor/` directory in a project:
//!
//! ```text
//! .conductor/
//! ├── conductor.toml       # Engine, planner, worker and server settings
//! ├── state/               # Mission journals (checkpoints and audit trail)
//! │   └── missions/
//! ├── logs/                # Daily rolling log files
//! └── procedures/          # Procedure definitions
//!     └── example.yaml
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::conductor_config::CONFIG_FILE;

/// The name of the Conductor project directory.
pub const CONDUCTOR_DIR: &str = ".conductor";

const DEFAULT_CONFIG: &str = r#"# Conductor configuration. Every section is optional.

[engine]
max_retries = 2
require_human_oversight = false

[engine.recovery]
base_delay_ms = 2000
max_delay_ms = 30000

[planner]
approval_roles = ["record-update"]
approve_all_phases = false

[oversight]
# approval_timeout_secs = 600
auto_approve = false

[worker]
shell = "sh"
# command = "./automation/run-phase.sh"
timeout_secs = 300

# [worker.roles]
# auth = "./automation/login.sh"

# [drafter]
# endpoint = "http://localhost:8080/draft"

[server]
enabled = false
host = "127.0.0.1"
port = 3150
"#;

const EXAMPLE_PROCEDURE: &str = r#"name: update-customer-address
description: Change a customer's mailing address in the CRM.
steps:
  - text: Log in to the CRM portal
  - text: Find the customer record by account number
    category: lookup
  - text: Update the mailing address on the record
    requires_approval: true
"#;

/// Result of initializing a Conductor project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the `.conductor` directory
    pub conductor_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Initialize a Conductor project in `project_dir`.
///
/// Re-running on an existing project fills in whatever is missing and
/// never overwrites existing files.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let conductor_dir = project_dir.join(CONDUCTOR_DIR);
    let created = !conductor_dir.exists();

    for dir in [
        conductor_dir.clone(),
        conductor_dir.join("state").join("missions"),
        conductor_dir.join("logs"),
        conductor_dir.join("procedures"),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    write_if_missing(&conductor_dir.join(CONFIG_FILE), DEFAULT_CONFIG)?;
    write_if_missing(
        &conductor_dir.join("procedures").join("example.yaml"),
        EXAMPLE_PROCEDURE,
    )?;

    Ok(InitResult {
        conductor_dir,
        created,
    })
}

fn write_if_missing(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to create {}", path.display()))
}

/// Check if a project is already initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(CONDUCTOR_DIR).exists()
}

pub fn get_conductor_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CONDUCTOR_DIR)
}
