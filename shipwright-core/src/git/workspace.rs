//! Isolated per-run workspaces
//!
//! A workspace is a git worktree at `<trees_dir>/<run_id>` checked out to the
//! run's branch. [`WorkspaceManager::validate`] compares three views of it:
//! the run record, the filesystem, and git's worktree registry. Mismatches are
//! reported, never repaired here.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::branch::BranchingOptions;
use super::metadata::WorkspaceMetadata;
use super::repo::GitRepo;
use super::worktree::normalize;
use crate::state::WorkflowRun;
use crate::{Error, Result};

/// One disagreement found by [`WorkspaceManager::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    /// Recorded path is not the path derived from the run id
    PathMismatch { recorded: PathBuf, expected: PathBuf },
    /// Workspace directory does not exist
    MissingDirectory,
    /// Directory exists but git does not know it as a worktree
    NotRegistered,
    /// Worktree is checked out to another branch (or detached)
    BranchMismatch { expected: String, actual: Option<String> },
    /// Branch ref is gone
    MissingBranch,
    /// Metadata file names another run
    ForeignMetadata { run_id: String },
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyIssue::PathMismatch { recorded, expected } => write!(
                f,
                "recorded workspace {} differs from derived {}",
                recorded.display(),
                expected.display()
            ),
            ConsistencyIssue::MissingDirectory => write!(f, "workspace directory is missing"),
            ConsistencyIssue::NotRegistered => {
                write!(f, "workspace directory is not a registered worktree")
            }
            ConsistencyIssue::BranchMismatch { expected, actual } => write!(
                f,
                "worktree is on {} instead of {}",
                actual.as_deref().unwrap_or("a detached HEAD"),
                expected
            ),
            ConsistencyIssue::MissingBranch => write!(f, "branch does not exist"),
            ConsistencyIssue::ForeignMetadata { run_id } => {
                write!(f, "workspace metadata belongs to run {}", run_id)
            }
        }
    }
}

/// Outcome of a three-way workspace check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub run_id: String,
    pub workspace_path: PathBuf,
    pub issues: Vec<ConsistencyIssue>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }

    /// Convert a failing report into a `Consistency` error
    pub fn into_result(self) -> Result<()> {
        if self.is_consistent() {
            return Ok(());
        }
        let details: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        Err(Error::Consistency(format!(
            "workspace {} for run {}: {}",
            self.workspace_path.display(),
            self.run_id,
            details.join("; ")
        )))
    }
}

/// Creates, checks and removes run workspaces
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    repo_root: PathBuf,
    trees_dir: PathBuf,
    base_branch: Option<String>,
}

impl WorkspaceManager {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        trees_dir: impl Into<PathBuf>,
        base_branch: Option<String>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            trees_dir: trees_dir.into(),
            base_branch,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Where a run's workspace lives
    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.trees_dir.join(run_id)
    }

    fn open(&self) -> Result<GitRepo> {
        GitRepo::open(&self.repo_root)
    }

    /// Create the workspace, or confirm an existing one
    ///
    /// Stale registrations are pruned first. A missing directory is
    /// (re)created on the run's branch, reusing the branch if it survives.
    /// An existing directory that fails validation is left untouched and
    /// reported as a `Consistency` error.
    pub fn provision(&self, run: &WorkflowRun) -> Result<PathBuf> {
        let repo = self.open()?;
        let path = self.path_for(&run.run_id);
        repo.prune_worktrees()?;

        if path.exists() {
            self.validate(run)?.into_result()?;
            debug!(run_id = %run.run_id, path = %path.display(), "Workspace already provisioned");
        } else {
            let options = BranchingOptions {
                base_branch: self.base_branch.clone(),
                remote: None,
            };
            let base = repo.find_branching_point(&options)?;
            repo.create_worktree(&path, &run.branch_name, &base.commit)?;
            WorkspaceMetadata::new(&run.run_id, &run.branch_name, &base.commit).save(&path)?;
            info!(
                run_id = %run.run_id,
                branch = %run.branch_name,
                base = %base.reference,
                path = %path.display(),
                "Provisioned workspace"
            );
        }

        if let Some(ports) = &run.ports {
            ports.write_env_file(&path)?;
        }

        Ok(path)
    }

    /// Compare the run record, the filesystem and git's worktree registry
    pub fn validate(&self, run: &WorkflowRun) -> Result<ConsistencyReport> {
        let repo = self.open()?;
        let expected = self.path_for(&run.run_id);
        let mut issues = Vec::new();

        if normalize(&run.workspace_path) != normalize(&expected) {
            issues.push(ConsistencyIssue::PathMismatch {
                recorded: run.workspace_path.clone(),
                expected: expected.clone(),
            });
        }

        if !repo.branch_exists(&run.branch_name) {
            issues.push(ConsistencyIssue::MissingBranch);
        }

        if !expected.is_dir() {
            issues.push(ConsistencyIssue::MissingDirectory);
        } else {
            match repo.find_worktree(&expected)? {
                None => issues.push(ConsistencyIssue::NotRegistered),
                Some(entry) if entry.branch.as_deref() != Some(run.branch_name.as_str()) => {
                    issues.push(ConsistencyIssue::BranchMismatch {
                        expected: run.branch_name.clone(),
                        actual: entry.branch,
                    });
                }
                Some(_) => {}
            }

            if let Some(metadata) = WorkspaceMetadata::load(&expected)? {
                if metadata.run_id != run.run_id {
                    issues.push(ConsistencyIssue::ForeignMetadata {
                        run_id: metadata.run_id,
                    });
                }
            }
        }

        if !issues.is_empty() {
            warn!(run_id = %run.run_id, issues = issues.len(), "Workspace inconsistent");
        }

        Ok(ConsistencyReport {
            run_id: run.run_id.clone(),
            workspace_path: expected,
            issues,
        })
    }

    /// Remove the workspace and its registration. The branch is kept.
    pub fn reclaim(&self, run: &WorkflowRun) -> Result<()> {
        let repo = self.open()?;
        let path = self.path_for(&run.run_id);

        if path.exists() || repo.find_worktree(&path)?.is_some() {
            repo.remove_worktree(&path)?;
            info!(run_id = %run.run_id, path = %path.display(), "Reclaimed workspace");
        } else {
            debug!(run_id = %run.run_id, "Workspace already reclaimed");
        }
        Ok(())
    }

    /// Merge the run's branch into the base branch in the main checkout
    pub fn merge(&self, run: &WorkflowRun) -> Result<String> {
        let repo = self.open()?;
        let options = BranchingOptions {
            base_branch: self.base_branch.clone(),
            remote: None,
        };
        let base = repo.find_branching_point(&options)?;

        let current = repo.current_branch()?;
        if current.as_deref() != Some(base.branch_name.as_str()) {
            return Err(Error::Consistency(format!(
                "main checkout is on {} but merges go into {}",
                current.as_deref().unwrap_or("a detached HEAD"),
                base.branch_name
            )));
        }

        let message = format!("Merge {} (run {})", run.branch_name, run.run_id);
        if let Err(e) = repo.git(&["merge", "--no-ff", "-m", &message, &run.branch_name]) {
            // Leave the main checkout as it was before the merge
            if let Err(abort) = repo.git(&["merge", "--abort"]) {
                warn!(run_id = %run.run_id, error = %abort, "Failed to abort merge");
            }
            return Err(e);
        }
        let commit = repo.branch_commit(&base.branch_name)?;
        info!(run_id = %run.run_id, into = %base.branch_name, commit = %commit, "Merged run branch");
        Ok(commit)
    }
}
