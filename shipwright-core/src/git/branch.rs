//! Base branch detection

use super::repo::GitRepo;
use crate::{Error, Result};

/// Options for determining the branching point
#[derive(Debug, Clone, Default)]
pub struct BranchingOptions {
    /// Explicit base branch override
    pub base_branch: Option<String>,
    /// Remote name to prefer (defaults to "origin")
    pub remote: Option<String>,
}

/// Information about a branching point
#[derive(Debug, Clone)]
pub struct BranchingPoint {
    /// The reference to branch from (e.g., "origin/main")
    pub reference: String,
    /// The commit SHA at the branching point
    pub commit: String,
    /// The branch name (e.g., "main")
    pub branch_name: String,
}

impl GitRepo {
    /// Find the trunk new workspaces fork from
    ///
    /// Priority:
    /// 1. Explicit base branch from options
    /// 2. Local main
    /// 3. Local master
    /// 4. <remote>/main
    /// 5. <remote>/master
    pub fn find_branching_point(&self, options: &BranchingOptions) -> Result<BranchingPoint> {
        if let Some(ref base) = options.base_branch {
            return self.resolve_branch_reference(base);
        }

        let remote = options.remote.as_deref().unwrap_or("origin");
        let candidates = [
            "main".to_string(),
            "master".to_string(),
            format!("{}/main", remote),
            format!("{}/master", remote),
        ];

        for candidate in &candidates {
            if let Ok(point) = self.resolve_branch_reference(candidate) {
                return Ok(point);
            }
        }

        Err(Error::Config(
            "No suitable base branch found. Expected main or master, or set workflow.base_branch"
                .to_string(),
        ))
    }

    /// Resolve a branch reference to a branching point
    fn resolve_branch_reference(&self, reference: &str) -> Result<BranchingPoint> {
        let repo = self.inner();

        if let Ok(local_ref) = repo.find_reference(&format!("refs/heads/{}", reference)) {
            let commit = local_ref.peel_to_commit()?;
            return Ok(BranchingPoint {
                reference: reference.to_string(),
                commit: commit.id().to_string(),
                branch_name: reference.to_string(),
            });
        }

        if let Ok(remote_ref) = repo.find_reference(&format!("refs/remotes/{}", reference)) {
            let commit = remote_ref.peel_to_commit()?;
            let branch_name = reference
                .split('/')
                .next_back()
                .unwrap_or(reference)
                .to_string();

            return Ok(BranchingPoint {
                reference: reference.to_string(),
                commit: commit.id().to_string(),
                branch_name,
            });
        }

        Err(Error::Config(format!("Branch '{}' not found", reference)))
    }
}
