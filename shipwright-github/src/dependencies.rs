//! Dependency parsing and readiness over issue bodies
//!
//! GitHub has no native blocking edge, so dependencies are written into
//! issue bodies as `Depends on #12`, `Blocked by #3, #4` or
//! `Discovered from #7`.

use crate::Issue;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Reference to an issue, possibly in another repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueRef {
    /// Repository owner (None for same repo)
    pub owner: Option<String>,
    /// Repository name (None for same repo)
    pub repo: Option<String>,
    /// Issue number
    pub number: u64,
}

impl IssueRef {
    /// Create a reference to an issue in the current repository
    pub fn local(number: u64) -> Self {
        Self {
            owner: None,
            repo: None,
            number,
        }
    }

    /// Create a reference to an issue in another repository
    pub fn external(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: Some(owner.into()),
            repo: Some(repo.into()),
            number,
        }
    }

    /// Check if this is a local (same repo) reference
    pub fn is_local(&self) -> bool {
        self.owner.is_none() && self.repo.is_none()
    }
}

impl std::fmt::Display for IssueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.owner, &self.repo) {
            (Some(owner), Some(repo)) => write!(f, "{}/{}#{}", owner, repo, self.number),
            _ => write!(f, "#{}", self.number),
        }
    }
}

/// Parsed dependencies from an issue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueDependencies {
    /// Issues this depends on
    pub depends_on: Vec<IssueRef>,
    /// Issues that block this
    pub blocked_by: Vec<IssueRef>,
    /// Issue this one was found while working on
    pub discovered_from: Option<IssueRef>,
}

impl IssueDependencies {
    /// Parse dependencies from issue body text
    pub fn parse(body: &str) -> Self {
        Self {
            depends_on: parse_issue_refs(body, &["Depends on", "depends on", "Depend on", "depend on"]),
            blocked_by: parse_issue_refs(body, &["Blocked by", "blocked by"]),
            discovered_from: parse_issue_refs(body, &["Discovered from", "discovered from"])
                .into_iter()
                .next(),
        }
    }

    /// All blocking dependency numbers in this repository
    pub fn all_local_deps(&self) -> Vec<u64> {
        let mut nums = Vec::new();
        for r in self.depends_on.iter().chain(&self.blocked_by) {
            if r.is_local() && !nums.contains(&r.number) {
                nums.push(r.number);
            }
        }
        nums
    }
}

/// Dependency graph over the open issues of a repository
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Map from issue number to issues it depends on
    pub dependencies: HashMap<u64, Vec<u64>>,
    /// Issues whose dependencies are all closed
    pub ready: HashSet<u64>,
    /// Issues with at least one open dependency
    pub blocked: HashSet<u64>,
}

impl DependencyGraph {
    /// Build a graph from the open issues
    ///
    /// A dependency counts as met when it is not among `open_issues`.
    pub fn from_issues(open_issues: &[Issue]) -> Self {
        let mut graph = Self::default();
        let open: HashSet<u64> = open_issues.iter().map(|i| i.number).collect();

        for issue in open_issues {
            let local_deps = IssueDependencies::parse(&issue.body).all_local_deps();
            let unmet = local_deps.iter().any(|d| open.contains(d));

            if !local_deps.is_empty() {
                graph.dependencies.insert(issue.number, local_deps);
            }
            if unmet {
                graph.blocked.insert(issue.number);
            } else {
                graph.ready.insert(issue.number);
            }
        }

        graph
    }

    pub fn is_ready(&self, number: u64) -> bool {
        self.ready.contains(&number)
    }
}

/// Parse issue references after any of `patterns`
fn parse_issue_refs(body: &str, patterns: &[&str]) -> Vec<IssueRef> {
    let mut refs = Vec::new();

    for pattern in patterns {
        for part in body.split(pattern).skip(1) {
            let line_end = part.find('\n').unwrap_or(part.len());
            let line = &part[..line_end];

            // Comma-separated: "#123, #456" or "owner/repo#123"
            for segment in line.split(',') {
                if let Some(r) = parse_single_issue_ref(segment) {
                    if !refs.contains(&r) {
                        refs.push(r);
                    }
                }
            }
        }
    }

    refs
}

/// Parse a single issue reference like "#123" or "owner/repo#123"
fn parse_single_issue_ref(s: &str) -> Option<IssueRef> {
    let s = s.trim();
    let hash_pos = s.find('#')?;
    let before_hash = &s[..hash_pos];
    let after_hash = &s[hash_pos + 1..];

    let num_str: String = after_hash
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let number = num_str.parse::<u64>().ok()?;

    if before_hash.is_empty() {
        return Some(IssueRef::local(number));
    }

    let (owner, repo) = before_hash.split_once('/')?;
    let (owner, repo) = (owner.trim(), repo.trim());
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(IssueRef::external(owner, repo, number))
}
