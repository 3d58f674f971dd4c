//! Metadata file stored in each workspace

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Metadata file name stored in each workspace
pub const METADATA_FILE: &str = ".shipwright-worktree.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    /// Run that owns the workspace
    pub run_id: String,

    /// Branch checked out in the workspace
    pub branch: String,

    /// Trunk commit the branch was forked from
    pub base_commit: String,

    #[serde(with = "humantime_serde")]
    pub created_at: SystemTime,
}

impl WorkspaceMetadata {
    pub fn new(
        run_id: impl Into<String>,
        branch: impl Into<String>,
        base_commit: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            branch: branch.into(),
            base_commit: base_commit.into(),
            created_at: SystemTime::now(),
        }
    }

    /// Load metadata from a workspace directory, `None` if absent
    pub fn load(workspace: &Path) -> Result<Option<Self>> {
        let path = workspace.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let metadata = toml::from_str(&contents).map_err(|e| {
            Error::Consistency(format!("Unreadable {}: {}", path.display(), e))
        })?;
        Ok(Some(metadata))
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("Failed to serialize metadata: {}", e)))?;
        fs::write(workspace.join(METADATA_FILE), contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        assert!(WorkspaceMetadata::load(dir.path()).unwrap().is_none());

        let metadata = WorkspaceMetadata::new("r1", "chore-issue-1-adw-r1", "abc123");
        metadata.save(dir.path()).unwrap();

        let loaded = WorkspaceMetadata::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.run_id, "r1");
        assert_eq!(loaded.branch, "chore-issue-1-adw-r1");
        assert_eq!(loaded.base_commit, "abc123");
    }

    #[test]
    fn test_corrupt_metadata_is_consistency_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(METADATA_FILE), "not = [valid").unwrap();
        assert!(matches!(
            WorkspaceMetadata::load(dir.path()),
            Err(Error::Consistency(_))
        ));
    }
}
