//! Git operations for Shipwright
//!
//! Repository detection, worktree plumbing, and the per-run workspace manager.

mod branch;
mod metadata;
pub(crate) mod repo;
mod workspace;
mod worktree;

pub use branch::{BranchingOptions, BranchingPoint};
pub use metadata::{WorkspaceMetadata, METADATA_FILE};
pub use repo::GitRepo;
pub use workspace::{ConsistencyIssue, ConsistencyReport, WorkspaceManager};
pub use worktree::WorktreeEntry;
