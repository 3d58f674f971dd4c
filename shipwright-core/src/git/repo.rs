//! Git repository detection and operations

use std::path::{Path, PathBuf};
use std::process::Command;

use git2::{BranchType, Repository};

use crate::{Error, Result};

/// A git repository wrapper providing the operations workspaces need
pub struct GitRepo {
    repo: Repository,
    root: PathBuf,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl GitRepo {
    /// Open a git repository at the given path
    ///
    /// This will search upward from the given path to find the repository root.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let repo = Repository::discover(path).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                Error::Config(format!(
                    "Not a git repository: {}. Run 'git init' first or navigate to a git repository.",
                    path.display()
                ))
            } else {
                Error::Git(e)
            }
        })?;

        let root = repo
            .workdir()
            .ok_or_else(|| Error::Config("Bare repositories are not supported".to_string()))?
            .to_path_buf();

        Ok(Self { repo, root })
    }

    /// Open the main checkout even when `path` is inside a linked worktree
    pub fn open_main(path: impl AsRef<Path>) -> Result<Self> {
        let repo = Self::open(path)?;
        if !repo.repo.is_worktree() {
            return Ok(repo);
        }
        // The common dir is `<main>/.git` for a linked worktree
        let output = repo.git(&["rev-parse", "--git-common-dir"])?;
        let common = repo.root.join(output.trim());
        let main_root = common
            .parent()
            .ok_or_else(|| Error::Config(format!("Unexpected git dir {}", common.display())))?;
        Self::open(main_root)
    }

    /// Get the repository root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if the given path is inside a git repository
    pub fn is_git_repo(path: impl AsRef<Path>) -> bool {
        Repository::discover(path.as_ref()).is_ok()
    }

    /// Get the current branch name, `None` for detached or unborn HEAD
    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = match self.repo.head() {
            Ok(h) => h,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(Error::Git(e)),
        };

        if head.is_branch() {
            Ok(head.shorthand().map(|s| s.to_string()))
        } else {
            Ok(None)
        }
    }

    /// Whether a local branch exists
    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    /// Commit SHA a local branch points at
    pub fn branch_commit(&self, name: &str) -> Result<String> {
        let branch = self
            .repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| Error::NotFound(format!("branch {}", name)))?;
        let commit = branch.get().peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Run a git subcommand in the repository root, returning stdout
    pub(crate) fn git(&self, args: &[&str]) -> Result<String> {
        run_git(self.root(), args)
    }

    /// Get access to the underlying git2 repository
    pub fn inner(&self) -> &Repository {
        &self.repo
    }
}

pub(crate) fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::Other(format!("Failed to run git {}: {}", args.join(" "), e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Other(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
