//! Configuration management for Shipwright
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (SHIPWRIGHT_*)
//! 3. Config file (~/.config/shipwright/config.toml)
//! 4. Default values

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tracker::BackendKind;
use crate::workflow::Phase;
use crate::{Error, Result};

/// Agent-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Path to the claude executable
    pub claude_path: String,

    /// Model to use for Claude
    pub model: Option<String>,

    /// Upper bound on a single agent invocation
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            claude_path: "claude".to_string(),
            model: None, // Let claude use its default
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Issue tracker selection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Which backend supplies work
    pub backend: BackendKind,

    /// SQLite file for the local tracker (defaults to `<repo>/.shipwright/issues.db`)
    pub local_db: Option<PathBuf>,

    /// Repository for the remote tracker, `owner/repo`
    pub github_repo: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            local_db: None,
            github_repo: None,
        }
    }
}

/// Port ranges handed out to runs
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortsConfig {
    /// First port of the primary (backend) range
    pub primary_start: u16,

    /// First port of the secondary (frontend) range
    pub secondary_start: u16,

    /// Number of slots in each range
    pub slots: u16,

    /// Directory holding slot claims (defaults to `~/.cache/shipwright/ports`)
    pub reservations_dir: Option<PathBuf>,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            primary_start: 9100,
            secondary_start: 9200,
            slots: 15,
            reservations_dir: None,
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Run state directory (defaults to `<repo>/.shipwright/runs`)
    pub state_dir: Option<PathBuf>,

    /// Workspace directory (defaults to `<repo>/.shipwright/trees`)
    pub trees_dir: Option<PathBuf>,

    /// Directory of `<name>.md` files overriding the embedded templates
    pub templates_dir: Option<PathBuf>,
}

/// Pipeline behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Patch cycles the review phase may attempt before giving up
    pub max_resolution_iterations: u32,

    /// Attempts per phase (1 = no retry)
    pub default_max_attempts: u32,

    /// Per-phase attempt overrides keyed by phase name
    pub phase_attempts: BTreeMap<String, u32>,

    /// Attempts for port allocation and workspace provisioning
    pub resource_retries: u32,

    /// Initial backoff between resource attempts, doubled each time
    #[serde(with = "humantime_serde")]
    pub resource_backoff: Duration,

    /// Branch to fork workspaces from (main/master autodetected otherwise)
    pub base_branch: Option<String>,

    /// Merge the run branch into the base branch after shipping
    pub merge_on_ship: bool,

    /// Close the originating issue when the run succeeds
    pub close_issue_on_success: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_resolution_iterations: 3,
            default_max_attempts: 2,
            phase_attempts: BTreeMap::new(),
            resource_retries: 3,
            resource_backoff: Duration::from_secs(2),
            base_branch: None,
            merge_on_ship: false,
            close_issue_on_success: true,
        }
    }
}

impl WorkflowConfig {
    /// Attempts allowed for a phase
    pub fn max_attempts(&self, phase: Phase) -> u32 {
        self.phase_attempts
            .get(phase.name())
            .copied()
            .unwrap_or(self.default_max_attempts)
            .max(1)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Agent configuration
    pub agent: AgentConfig,

    /// Issue tracker configuration
    pub tracker: TrackerConfig,

    /// Port allocation
    pub ports: PortsConfig,

    /// Filesystem layout
    pub paths: PathsConfig,

    /// Pipeline behaviour
    pub workflow: WorkflowConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/shipwright/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("shipwright").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - SHIPWRIGHT_CLAUDE_PATH: Path to claude executable
    /// - SHIPWRIGHT_MODEL: Model to use
    /// - SHIPWRIGHT_TRACKER: `local` or `remote`
    /// - SHIPWRIGHT_GITHUB_REPO: `owner/repo` for the remote tracker
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(claude_path) = std::env::var("SHIPWRIGHT_CLAUDE_PATH") {
            self.agent.claude_path = claude_path;
        }

        if let Ok(model) = std::env::var("SHIPWRIGHT_MODEL") {
            self.agent.model = Some(model);
        }

        if let Ok(backend) = std::env::var("SHIPWRIGHT_TRACKER") {
            self.tracker.backend = backend.parse().map_err(Error::Config)?;
        }

        if let Ok(repo) = std::env::var("SHIPWRIGHT_GITHUB_REPO") {
            self.tracker.github_repo = Some(repo);
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(
        mut self,
        claude_path: Option<String>,
        model: Option<String>,
        backend: Option<BackendKind>,
    ) -> Self {
        if let Some(path) = claude_path {
            self.agent.claude_path = path;
        }

        if let Some(m) = model {
            self.agent.model = Some(m);
        }

        if let Some(b) = backend {
            self.tracker.backend = b;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(
        claude_path: Option<String>,
        model: Option<String>,
        backend: Option<BackendKind>,
    ) -> Result<Self> {
        Ok(Self::load()?
            .with_env_overrides()?
            .with_cli_overrides(claude_path, model, backend))
    }

    /// Directory holding one subdirectory per run
    pub fn state_dir(&self, repo_root: &Path) -> PathBuf {
        self.paths
            .state_dir
            .clone()
            .unwrap_or_else(|| repo_root.join(".shipwright").join("runs"))
    }

    /// Directory holding one workspace per run
    pub fn trees_dir(&self, repo_root: &Path) -> PathBuf {
        self.paths
            .trees_dir
            .clone()
            .unwrap_or_else(|| repo_root.join(".shipwright").join("trees"))
    }

    /// SQLite file backing the local tracker
    pub fn local_db(&self, repo_root: &Path) -> PathBuf {
        self.tracker
            .local_db
            .clone()
            .unwrap_or_else(|| repo_root.join(".shipwright").join("issues.db"))
    }

    /// Directory holding port slot claims; shared by every repo on the machine
    pub fn reservations_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.ports.reservations_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| Error::Config("Could not determine cache directory".to_string()))?;
        Ok(cache_dir.join("shipwright").join("ports"))
    }
}
