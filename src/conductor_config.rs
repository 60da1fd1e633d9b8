//! Configuration file for Conductor.
//!
//! Reads `.conductor/conductor.toml`. Every section is optional and falls
//! back to sensible defaults. Environment variables override the file, and
//! CLI flags override both (see [`crate::config::Config`]).
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! max_retries = 2
//! require_human_oversight = false
//! state_dir = ".conductor/state"
//!
//! [engine.recovery]
//! base_delay_ms = 2000
//! max_delay_ms = 30000
//! fallback_role = "generic"
//!
//! [planner]
//! approval_roles = ["record-update"]
//! approve_all_phases = false
//!
//! [planner.categories]
//! billing = "record-update"
//!
//! [oversight]
//! approval_timeout_secs = 600
//! auto_approve = false
//!
//! [worker]
//! shell = "sh"
//! command = "./automation/run-phase.sh"
//! timeout_secs = 300
//!
//! [worker.roles]
//! auth = "./automation/login.sh"
//!
//! [drafter]
//! endpoint = "http://localhost:8080/draft"
//! timeout_secs = 30
//!
//! [server]
//! enabled = false
//! host = "127.0.0.1"
//! port = 3150
//! cors = false
//! ```

use anyhow::{Context, Result};
use conductor_common::WorkerRole;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::recovery::RecoveryAdvisor;

pub const CONFIG_FILE: &str = "conductor.toml";

/// Recovery advisor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Role a phase is swapped to when its worker cannot find its target.
    #[serde(default)]
    pub fallback_role: WorkerRole,
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            fallback_role: WorkerRole::default(),
        }
    }
}

impl RecoverySection {
    pub fn advisor(&self) -> RecoveryAdvisor {
        RecoveryAdvisor::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.fallback_role,
        )
    }
}

/// Engine-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub require_human_oversight: bool,
    /// Journal directory, relative to the project directory.
    #[serde(default)]
    pub state_dir: Option<String>,
    #[serde(default)]
    pub recovery: RecoverySection,
}

fn default_max_retries() -> u32 {
    2
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            require_human_oversight: false,
            state_dir: None,
            recovery: RecoverySection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSection {
    /// Roles whose phases are gated under oversight.
    #[serde(default = "default_approval_roles")]
    pub approval_roles: Vec<WorkerRole>,
    #[serde(default)]
    pub approve_all_phases: bool,
    /// Extra category tag -> role mappings.
    #[serde(default)]
    pub categories: HashMap<String, String>,
}

fn default_approval_roles() -> Vec<WorkerRole> {
    vec![WorkerRole::RecordUpdate]
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            approval_roles: default_approval_roles(),
            approve_all_phases: false,
            categories: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OversightSection {
    /// Unanswered approvals pause the mission after this many seconds.
    #[serde(default)]
    pub approval_timeout_secs: Option<u64>,
    /// Approve every request without prompting.
    #[serde(default)]
    pub auto_approve: bool,
}

/// Command-driven automation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_worker_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-role command overrides, keyed by role name.
    #[serde(default)]
    pub roles: HashMap<String, String>,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_worker_timeout_secs() -> u64 {
    300
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            command: None,
            timeout_secs: default_worker_timeout_secs(),
            roles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrafterSection {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_drafter_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_drafter_timeout_secs() -> u64 {
    30
}

impl Default for DrafterSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_drafter_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3150
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            cors: false,
        }
    }
}

/// The complete conductor.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConductorToml {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub oversight: OversightSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub drafter: DrafterSection,
    #[serde(default)]
    pub server: ServerSection,
}

impl ConductorToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `<conductor_dir>/conductor.toml`, or defaults when it is absent.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let config_path = conductor_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Backend command: file, then `CONDUCTOR_WORKER_CMD`.
    pub fn worker_command(&self) -> Option<String> {
        self.worker
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| std::env::var("CONDUCTOR_WORKER_CMD").ok())
            .filter(|c| !c.trim().is_empty())
    }

    /// `CONDUCTOR_MAX_RETRIES` overrides the file.
    pub fn max_retries(&self) -> u32 {
        std::env::var("CONDUCTOR_MAX_RETRIES")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.engine.max_retries)
    }

    pub fn category_roles(&self) -> HashMap<String, WorkerRole> {
        self.planner
            .categories
            .iter()
            .filter_map(|(tag, role)| {
                role.parse::<WorkerRole>()
                    .ok()
                    .map(|r| (tag.trim().to_lowercase(), r))
            })
            .collect()
    }

    pub fn role_commands(&self) -> HashMap<WorkerRole, String> {
        self.worker
            .roles
            .iter()
            .filter_map(|(role, cmd)| role.parse::<WorkerRole>().ok().map(|r| (r, cmd.clone())))
            .collect()
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (tag, role) in &self.planner.categories {
            if role.parse::<WorkerRole>().is_err() {
                warnings.push(format!(
                    "Unknown role '{}' for category '{}' in [planner.categories]",
                    role, tag
                ));
            }
        }
        for role in self.worker.roles.keys() {
            if role.parse::<WorkerRole>().is_err() {
                warnings.push(format!("Unknown role '{}' in [worker.roles]", role));
            }
        }
        if self.engine.recovery.base_delay_ms > self.engine.recovery.max_delay_ms {
            warnings.push(format!(
                "engine.recovery.base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.engine.recovery.base_delay_ms, self.engine.recovery.max_delay_ms
            ));
        }
        if self.worker.timeout_secs == 0 {
            warnings.push("worker.timeout_secs must be greater than 0".to_string());
        }
        if self.oversight.approval_timeout_secs == Some(0) {
            warnings.push("oversight.approval_timeout_secs of 0 pauses every approval".to_string());
        }
        if self.worker_command().is_none() && self.worker.roles.is_empty() {
            warnings.push(
                "No worker command configured: set [worker] command or CONDUCTOR_WORKER_CMD"
                    .to_string(),
            );
        }
        if let Some(endpoint) = &self.drafter.endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            warnings.push(format!("drafter.endpoint '{}' is not an http(s) URL", endpoint));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = ConductorToml::parse("").unwrap();
        assert_eq!(config.engine.max_retries, 2);
        assert!(!config.engine.require_human_oversight);
        assert_eq!(config.planner.approval_roles, vec![WorkerRole::RecordUpdate]);
        assert_eq!(config.worker.shell, "sh");
        assert_eq!(config.worker.timeout_secs, 300);
        assert_eq!(config.server.port, 3150);
        assert!(config.drafter.endpoint.is_none());
    }

    #[test]
    fn test_parse_full_file() {
        let content = r#"
[engine]
max_retries = 4
require_human_oversight = true
state_dir = "journals"

[engine.recovery]
base_delay_ms = 10
max_delay_ms = 100
fallback_role = "data-extraction"

[planner]
approval_roles = ["auth", "record-update"]
approve_all_phases = true

[planner.categories]
Billing = "record-update"
bogus = "wizard"

[oversight]
approval_timeout_secs = 60

[worker]
command = "./run.sh"
timeout_secs = 5

[worker.roles]
auth = "./login.sh"

[server]
enabled = true
port = 9000
"#;
        let config = ConductorToml::parse(content).unwrap();
        assert_eq!(config.engine.max_retries, 4);
        assert_eq!(config.engine.state_dir.as_deref(), Some("journals"));
        assert_eq!(
            config.engine.recovery.fallback_role,
            WorkerRole::DataExtraction
        );
        assert_eq!(config.planner.approval_roles.len(), 2);
        assert_eq!(
            config.category_roles().get("billing"),
            Some(&WorkerRole::RecordUpdate)
        );
        assert!(!config.category_roles().contains_key("bogus"));
        assert_eq!(config.role_commands()[&WorkerRole::Auth], "./login.sh");
        assert_eq!(config.oversight.approval_timeout_secs, Some(60));
        assert!(config.server.enabled);

        let warnings = config.validate();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("wizard"));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let err = ConductorToml::parse("[engine\nmax_retries = ").unwrap_err();
        assert!(err.to_string().contains("conductor.toml"));
    }

    #[test]
    fn test_validate_delay_bounds() {
        let mut config = ConductorToml::default();
        config.worker.command = Some("./run.sh".into());
        config.engine.recovery.base_delay_ms = 5_000;
        config.engine.recovery.max_delay_ms = 1_000;
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("base_delay_ms")));
    }

    #[test]
    fn test_save_and_load_or_default() {
        let dir = tempdir().unwrap();
        let loaded = ConductorToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.engine.max_retries, 2);

        let mut config = ConductorToml::default();
        config.engine.max_retries = 7;
        config.worker.command = Some("./backend".into());
        config.save(&dir.path().join(CONFIG_FILE)).unwrap();

        let loaded = ConductorToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.engine.max_retries, 7);
        assert_eq!(loaded.worker.command.as_deref(), Some("./backend"));
    }

    #[test]
    fn test_advisor_from_recovery_section() {
        let section = RecoverySection {
            base_delay_ms: 100,
            max_delay_ms: 250,
            fallback_role: WorkerRole::Generic,
        };
        let advisor = section.advisor();
        assert_eq!(advisor.delay_for(1), Duration::from_millis(100));
        assert_eq!(advisor.delay_for(5), Duration::from_millis(250));
    }
}
