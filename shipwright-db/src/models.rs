//! Data models for tracker records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipwright_core::{IssueDetails, IssueRef, IssueStatus};

use crate::error::{Error, Result};

/// Highest (least urgent) priority a local issue may carry
pub const MAX_PRIORITY: u8 = 4;

/// Priority given to issues created without one
pub const DEFAULT_PRIORITY: u8 = 2;

/// Issue row as stored in the `issues` table
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Issue {
    /// Insertion order, used only to break ordering ties
    pub seq: i64,

    /// Public identifier, `sw-<n>`
    pub id: String,

    pub title: String,
    pub description: String,

    /// One of `open`, `in_progress`, `blocked`, `closed`
    pub status: String,

    /// 0 is most urgent
    pub priority: i64,

    pub issue_type: String,

    /// JSON array of label strings
    pub labels: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

impl Issue {
    pub fn status(&self) -> Result<IssueStatus> {
        self.status.parse().map_err(Error::InvalidData)
    }

    pub fn labels(&self) -> Result<Vec<String>> {
        Ok(serde_json::from_str(&self.labels)?)
    }

    /// Convert to the tracker facade's view of the issue
    pub fn to_details(&self, discovered_from: Option<&str>) -> Result<IssueDetails> {
        let mut issue_ref = IssueRef::local(&self.id);
        if let Some(parent) = discovered_from {
            issue_ref = issue_ref.with_discovered_from(IssueRef::local(parent));
        }

        Ok(IssueDetails {
            issue_ref,
            title: self.title.clone(),
            body: self.description.clone(),
            status: self.status()?,
            labels: self.labels()?,
            issue_type: Some(self.issue_type.clone()),
            priority: u8::try_from(self.priority).ok(),
        })
    }
}

/// Input for creating an issue
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub priority: Option<u8>,
    pub issue_type: Option<String>,
    pub labels: Vec<String>,
}

impl NewIssue {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_type(mut self, issue_type: impl Into<String>) -> Self {
        self.issue_type = Some(issue_type.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }
}

/// Kind of edge between two issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    /// The issue cannot start until its target is closed
    Blocks,
    /// The issue was found while working on its target
    DiscoveredFrom,
    /// The issue is a sub-task of its target
    ParentChild,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Blocks => "blocks",
            DependencyType::DiscoveredFrom => "discovered-from",
            DependencyType::ParentChild => "parent-child",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blocks" => Ok(DependencyType::Blocks),
            "discovered-from" => Ok(DependencyType::DiscoveredFrom),
            "parent-child" => Ok(DependencyType::ParentChild),
            other => Err(Error::InvalidData(format!(
                "unknown dependency type '{}'",
                other
            ))),
        }
    }
}

/// Edge row as stored in the `dependencies` table
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dependency {
    pub issue_id: String,
    pub depends_on_id: String,
    pub dep_type: String,
    pub created_at: DateTime<Utc>,
}

impl Dependency {
    pub fn kind(&self) -> Result<DependencyType> {
        self.dep_type.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, priority: i64) -> Issue {
        let now = Utc::now();
        Issue {
            seq: 1,
            id: "sw-1".to_string(),
            title: "Add CSV export".to_string(),
            description: "Reports need CSV".to_string(),
            status: status.to_string(),
            priority,
            issue_type: "feature".to_string(),
            labels: r#"["reports"]"#.to_string(),
            created_at: now,
            updated_at: now,
            closed_at: None,
            close_reason: None,
        }
    }

    #[test]
    fn test_to_details() {
        let details = row("in_progress", 1).to_details(Some("sw-0")).unwrap();
        assert_eq!(details.issue_ref, IssueRef::local("sw-1").with_discovered_from(IssueRef::local("sw-0")));
        assert_eq!(details.status, IssueStatus::InProgress);
        assert_eq!(details.labels, vec!["reports".to_string()]);
        assert_eq!(details.priority, Some(1));
        assert_eq!(details.work_class(), "feature");
    }

    #[test]
    fn test_to_details_rejects_unknown_status() {
        assert!(matches!(
            row("wontfix", 1).to_details(None),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_dependency_type_parse() {
        for kind in [
            DependencyType::Blocks,
            DependencyType::DiscoveredFrom,
            DependencyType::ParentChild,
        ] {
            assert_eq!(kind.as_str().parse::<DependencyType>().unwrap(), kind);
        }
        assert!("related".parse::<DependencyType>().is_err());
        assert_eq!(
            serde_json::to_string(&DependencyType::DiscoveredFrom).unwrap(),
            r#""discovered-from""#
        );
    }
}
