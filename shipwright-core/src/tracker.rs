//! Issue tracker facade
//!
//! Both the embedded local tracker and the hosted remote tracker implement
//! [`IssueTracker`]. Claiming an issue (moving it to `in_progress`) is advisory:
//! two orchestrators racing for the same issue may both succeed.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which tracker backend owns an issue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "remote" | "github" => Ok(BackendKind::Remote),
            other => Err(format!(
                "unknown tracker backend '{}', expected local or remote",
                other
            )),
        }
    }
}

/// Reference to a unit of work in a tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub backend_kind: BackendKind,
    pub external_id: String,
    /// Lineage only; the parent does not own this issue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_from: Option<Box<IssueRef>>,
}

impl IssueRef {
    pub fn new(backend_kind: BackendKind, external_id: impl Into<String>) -> Self {
        Self {
            backend_kind,
            external_id: external_id.into(),
            discovered_from: None,
        }
    }

    pub fn local(external_id: impl Into<String>) -> Self {
        Self::new(BackendKind::Local, external_id)
    }

    pub fn remote(external_id: impl Into<String>) -> Self {
        Self::new(BackendKind::Remote, external_id)
    }

    pub fn with_discovered_from(mut self, parent: IssueRef) -> Self {
        self.discovered_from = Some(Box::new(parent));
        self
    }
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend_kind, self.external_id)
    }
}

/// Lifecycle status as seen through the facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Blocked => "blocked",
            IssueStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(IssueStatus::Open),
            "in_progress" => Ok(IssueStatus::InProgress),
            "blocked" => Ok(IssueStatus::Blocked),
            "closed" => Ok(IssueStatus::Closed),
            other => Err(format!("unknown issue status '{}'", other)),
        }
    }
}

/// Everything the pipeline needs to know about an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDetails {
    pub issue_ref: IssueRef,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub status: IssueStatus,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
}

impl IssueDetails {
    /// Work class used in branch names: `feature`, `bug` or `chore`
    pub fn work_class(&self) -> &'static str {
        let candidates = self
            .issue_type
            .iter()
            .chain(self.labels.iter())
            .map(|s| s.to_lowercase());

        for candidate in candidates {
            match candidate.as_str() {
                "bug" | "fix" | "bugfix" => return "bug",
                "feature" | "enhancement" | "feat" => return "feature",
                "chore" | "task" => return "chore",
                _ => {}
            }
        }
        "chore"
    }
}

/// Uniform contract over the local and remote trackers
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Backend this tracker serves
    fn kind(&self) -> BackendKind;

    /// Open issues not blocked by an open dependency and not already claimed
    async fn fetch_ready(&self) -> Result<Vec<IssueRef>>;

    async fn fetch(&self, issue: &IssueRef) -> Result<IssueDetails>;

    /// Setting `InProgress` claims the issue
    async fn update_status(&self, issue: &IssueRef, status: IssueStatus) -> Result<()>;

    async fn close(&self, issue: &IssueRef, reason: &str) -> Result<()>;

    /// Create a new issue linked to `parent` by a discovered-from edge
    async fn create_linked(&self, parent: &IssueRef, title: &str, priority: u8)
        -> Result<IssueRef>;
}

/// Reject a reference that belongs to another backend
pub fn ensure_backend(expected: BackendKind, issue: &IssueRef) -> Result<()> {
    if issue.backend_kind != expected {
        return Err(Error::Config(format!(
            "issue {} does not belong to the {} tracker",
            issue, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(issue_type: Option<&str>, labels: &[&str]) -> IssueDetails {
        IssueDetails {
            issue_ref: IssueRef::local("sw-1"),
            title: "Add export".to_string(),
            body: String::new(),
            status: IssueStatus::Open,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            issue_type: issue_type.map(str::to_string),
            priority: None,
        }
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("local".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!("Remote".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert_eq!("github".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert!("jira".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_issue_ref_serialization_omits_empty_lineage() {
        let json = serde_json::to_string(&IssueRef::remote("42")).unwrap();
        assert_eq!(json, r#"{"backend_kind":"remote","external_id":"42"}"#);

        let child = IssueRef::local("sw-7").with_discovered_from(IssueRef::local("sw-3"));
        let back: IssueRef = serde_json::from_str(&serde_json::to_string(&child).unwrap()).unwrap();
        assert_eq!(back.discovered_from.unwrap().external_id, "sw-3");
    }

    #[test]
    fn test_work_class() {
        assert_eq!(details(Some("bug"), &[]).work_class(), "bug");
        assert_eq!(details(None, &["enhancement"]).work_class(), "feature");
        assert_eq!(details(None, &["docs"]).work_class(), "chore");
    }

    #[test]
    fn test_ensure_backend() {
        assert!(ensure_backend(BackendKind::Local, &IssueRef::local("sw-1")).is_ok());
        let err = ensure_backend(BackendKind::Local, &IssueRef::remote("1")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
