//! Git worktree creation and management

use std::path::{Path, PathBuf};

use tracing::debug;

use super::repo::GitRepo;
use crate::{Error, Result};

/// A worktree as reported by `git worktree list --porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    /// Short branch name, `None` when detached
    pub branch: Option<String>,
}

impl GitRepo {
    /// Create a worktree at `worktree_dir` checked out to `branch`
    ///
    /// A missing branch is created at `start_commit`; an existing one is
    /// checked out as-is so a re-created workspace keeps earlier commits.
    pub fn create_worktree(
        &self,
        worktree_dir: &Path,
        branch: &str,
        start_commit: &str,
    ) -> Result<()> {
        if worktree_dir.exists() {
            return Err(Error::Consistency(format!(
                "Worktree directory already exists at {}",
                worktree_dir.display()
            )));
        }

        if let Some(parent) = worktree_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let dir = worktree_dir.to_string_lossy();
        if self.branch_exists(branch) {
            debug!(branch, "Reusing existing branch for worktree");
            self.git(&["worktree", "add", &dir, branch])?;
        } else {
            self.git(&["worktree", "add", "-b", branch, &dir, start_commit])?;
        }

        Ok(())
    }

    /// Remove a worktree and its registration
    pub fn remove_worktree(&self, worktree_dir: &Path) -> Result<()> {
        let dir = worktree_dir.to_string_lossy();
        if self.git(&["worktree", "remove", "--force", &dir]).is_err() {
            // Not registered (or registration broken): clear the directory by hand
            if worktree_dir.exists() {
                std::fs::remove_dir_all(worktree_dir)?;
            }
        }
        self.prune_worktrees()
    }

    /// Drop registrations whose directories are gone
    pub fn prune_worktrees(&self) -> Result<()> {
        self.git(&["worktree", "prune"])?;
        Ok(())
    }

    /// List all worktrees for this repository, including the main checkout
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        let stdout = self.git(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&stdout))
    }

    /// Registered worktree at `path`, if any
    pub fn find_worktree(&self, path: &Path) -> Result<Option<WorktreeEntry>> {
        let wanted = normalize(path);
        Ok(self
            .list_worktrees()?
            .into_iter()
            .find(|w| normalize(&w.path) == wanted))
    }
}

fn parse_worktree_list(porcelain: &str) -> Vec<WorktreeEntry> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                worktrees.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(entry) = current.as_mut() {
                let short = branch.strip_prefix("refs/heads/").unwrap_or(branch);
                entry.branch = Some(short.to_string());
            }
        }
    }
    if let Some(entry) = current {
        worktrees.push(entry);
    }

    worktrees
}

/// Canonical form for comparing paths git reports with paths we computed
pub(crate) fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
