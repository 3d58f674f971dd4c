//! Shipwright GitHub - GitHub issues as a Shipwright tracker backend
//!
//! This crate reads and updates issues through the GitHub API and exposes
//! them through [`RemoteTracker`].

mod client;
pub mod dependencies;
mod error;
pub mod issues;
pub mod tracker;

pub use client::GitHubClient;
pub use dependencies::{DependencyGraph, IssueDependencies};
pub use error::{Error, Result};
pub use issues::{Issue, IssueFilter, IssueState};
pub use tracker::RemoteTracker;
