//! Shipwright Core - drives a coding agent through a plan, build, test,
//! review, document and ship pipeline
//!
//! Each run gets its own git worktree and port pair, keeps its progress in a
//! durable state record, and can be resumed after a crash. Issues come from a
//! pluggable [`tracker::IssueTracker`].

pub mod agent;
pub mod config;
pub mod error;
pub mod git;
pub mod ports;
pub mod secrets;
pub mod state;
pub mod tracker;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use ports::{PortAllocation, PortAllocator};
pub use state::{StateStore, WorkflowRun};
pub use tracker::{BackendKind, IssueDetails, IssueRef, IssueStatus, IssueTracker};
pub use workflow::{Orchestrator, Phase, PhaseOptions};
