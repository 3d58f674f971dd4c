//! Durable, versioned storage of workflow runs
//!
//! Layout under the state directory:
//!
//! ```text
//! <root>/<run_id>/state.json          the WorkflowRun record
//! <root>/<run_id>/lease               present while an orchestrator owns the run
//! <root>/<run_id>/abort               external abort request
//! <root>/<run_id>/outputs/<name>.json structured phase results
//! <root>/<run_id>/agents/<agent>/     raw agent transcripts
//! ```
//!
//! The store does not arbitrate between writers. Callers hold a [`RunLease`]
//! before calling [`StateStore::save`].

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::run::{validate_run_id, WorkflowRun, SCHEMA_VERSION};
use crate::{Error, Result};

const STATE_FILE: &str = "state.json";
const LEASE_FILE: &str = "lease";
const ABORT_FILE: &str = "abort";
const OUTPUTS_DIR: &str = "outputs";
const AGENTS_DIR: &str = "agents";

#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn state_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(STATE_FILE)
    }

    pub fn exists(&self, run_id: &str) -> bool {
        self.state_path(run_id).exists()
    }

    /// Load a run, failing with `NotFound` if it was never saved
    pub fn load(&self, run_id: &str) -> Result<WorkflowRun> {
        validate_run_id(run_id)?;
        let path = self.state_path(run_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(Error::NotFound(format!("run {}", run_id)));
            }
            Err(e) => return Err(e.into()),
        };

        // Check the version before the typed parse so an old or newer record
        // is reported as such instead of as a missing field
        let value: serde_json::Value = serde_json::from_str(&contents)?;
        let found = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if found != u64::from(SCHEMA_VERSION) {
            return Err(Error::SchemaMismatch {
                found,
                expected: SCHEMA_VERSION,
            });
        }

        let run: WorkflowRun = serde_json::from_value(value)?;
        debug!(run_id, status = %run.status, phases = run.phase_history.len(), "Loaded run state");
        Ok(run)
    }

    /// Persist a run atomically
    pub fn save(&self, run: &WorkflowRun) -> Result<()> {
        validate_run_id(&run.run_id)?;
        let mut buf = serde_json::to_string_pretty(run)?;
        buf.push('\n');
        write_atomic(&self.state_path(&run.run_id), buf.as_bytes())?;
        debug!(run_id = %run.run_id, status = %run.status, "Saved run state");
        Ok(())
    }

    /// Every run whose status is pending or running
    pub fn list_active(&self) -> Result<Vec<WorkflowRun>> {
        let mut runs: Vec<WorkflowRun> = self
            .list()?
            .into_iter()
            .filter(|r| r.status.is_active())
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    /// Every readable run record; unreadable ones are logged and skipped
    pub fn list(&self) -> Result<Vec<WorkflowRun>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(run_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.exists(&run_id) {
                continue;
            }
            match self.load(&run_id) {
                Ok(run) => runs.push(run),
                Err(e) => warn!(run_id, error = %e, "Skipping unreadable run state"),
            }
        }
        Ok(runs)
    }

    /// Take exclusive ownership of a run
    pub fn acquire_lease(&self, run_id: &str) -> Result<RunLease> {
        validate_run_id(run_id)?;
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(LEASE_FILE);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "pid={}", std::process::id())?;
                writeln!(file, "acquired_at={}", Utc::now().to_rfc3339())?;
                debug!(run_id, "Acquired run lease");
                Ok(RunLease {
                    path,
                    run_id: run_id.to_string(),
                })
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                Err(Error::LeaseHeld(run_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_leased(&self, run_id: &str) -> bool {
        self.run_dir(run_id).join(LEASE_FILE).exists()
    }

    /// Remove a lease left behind by a dead process
    pub fn break_lease(&self, run_id: &str) -> Result<()> {
        remove_if_exists(&self.run_dir(run_id).join(LEASE_FILE))
    }

    /// Ask the owning orchestrator to stop at the next phase boundary
    pub fn request_abort(&self, run_id: &str) -> Result<()> {
        let path = self.run_dir(run_id).join(ABORT_FILE);
        write_atomic(&path, Utc::now().to_rfc3339().as_bytes())
    }

    pub fn abort_requested(&self, run_id: &str) -> bool {
        self.run_dir(run_id).join(ABORT_FILE).exists()
    }

    pub fn clear_abort(&self, run_id: &str) -> Result<()> {
        remove_if_exists(&self.run_dir(run_id).join(ABORT_FILE))
    }

    /// Store a structured phase result; returns its reference
    pub fn write_output<T: Serialize>(&self, run_id: &str, name: &str, value: &T) -> Result<String> {
        let path = self
            .run_dir(run_id)
            .join(OUTPUTS_DIR)
            .join(format!("{}.json", name));
        let mut buf = serde_json::to_string_pretty(value)?;
        buf.push('\n');
        write_atomic(&path, buf.as_bytes())?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Read back a structured phase result
    pub fn read_output(&self, output_ref: &str) -> Result<serde_json::Value> {
        let contents = fs::read_to_string(output_ref)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Directory for an agent's raw transcript
    pub fn agent_log_dir(&self, run_id: &str, agent_name: &str) -> PathBuf {
        self.run_dir(run_id).join(AGENTS_DIR).join(agent_name)
    }
}

/// Exclusive ownership of a run, released on drop
#[derive(Debug)]
pub struct RunLease {
    path: PathBuf,
    run_id: String,
}

impl RunLease {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != IoErrorKind::NotFound {
                warn!(run_id = %self.run_id, error = %e, "Failed to release run lease");
            }
        }
    }
}

/// Write to a sibling temp file, sync, then rename over the target
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Other(format!("path has no parent: {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{}.tmp", file_name));

    let mut file = File::create(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
