//! [`IssueTracker`] implementation over GitHub issues
//!
//! Claims are expressed with the `in-progress` label and blocking with the
//! `blocked` label; dependencies live in issue bodies.

use async_trait::async_trait;
use shipwright_core::tracker::ensure_backend;
use shipwright_core::{BackendKind, IssueDetails, IssueRef, IssueStatus, IssueTracker};
use tracing::{info, warn};

use crate::dependencies::{DependencyGraph, IssueDependencies};
use crate::issues::{Issue, IssueState, PRIORITY_LABEL_PREFIX};
use crate::{Error, GitHubClient};

/// Label marking a claimed issue
pub const IN_PROGRESS_LABEL: &str = "in-progress";

/// Label marking an issue that cannot proceed
pub const BLOCKED_LABEL: &str = "blocked";

/// Priority assumed for issues without a `priority:<n>` label
const DEFAULT_PRIORITY: u8 = 2;

/// Remote backend of the tracker facade
#[derive(Debug)]
pub struct RemoteTracker {
    client: GitHubClient,
}

impl RemoteTracker {
    pub fn new(client: GitHubClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GitHubClient {
        &self.client
    }
}

#[async_trait]
impl IssueTracker for RemoteTracker {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn fetch_ready(&self) -> shipwright_core::Result<Vec<IssueRef>> {
        let open = self.client.list_open_issues().await?;
        Ok(select_ready(&open)
            .into_iter()
            .map(|n| IssueRef::remote(n.to_string()))
            .collect())
    }

    async fn fetch(&self, issue: &IssueRef) -> shipwright_core::Result<IssueDetails> {
        let number = issue_number(issue)?;
        let fetched = self.client.get_issue(number).await?;
        Ok(to_details(&fetched))
    }

    async fn update_status(
        &self,
        issue: &IssueRef,
        status: IssueStatus,
    ) -> shipwright_core::Result<()> {
        let number = issue_number(issue)?;

        match status {
            IssueStatus::InProgress => {
                let current = self.client.get_issue(number).await?;
                if current.state == IssueState::Closed {
                    return Err(shipwright_core::Error::Tracker(format!(
                        "cannot claim closed issue {}",
                        issue
                    )));
                }
                self.client.remove_label(number, BLOCKED_LABEL).await?;
                self.client.add_label(number, IN_PROGRESS_LABEL).await?;
            }
            IssueStatus::Open => {
                let current = self.client.get_issue(number).await?;
                if current.state == IssueState::Closed {
                    self.client.set_state(number, IssueState::Open).await?;
                }
                self.client.remove_label(number, IN_PROGRESS_LABEL).await?;
                self.client.remove_label(number, BLOCKED_LABEL).await?;
            }
            IssueStatus::Blocked => {
                self.client.remove_label(number, IN_PROGRESS_LABEL).await?;
                self.client.add_label(number, BLOCKED_LABEL).await?;
            }
            IssueStatus::Closed => return self.close(issue, "Closed").await,
        }

        info!(issue = %issue, status = %status, "Updated issue status");
        Ok(())
    }

    async fn close(&self, issue: &IssueRef, reason: &str) -> shipwright_core::Result<()> {
        let number = issue_number(issue)?;

        self.client.comment(number, reason).await?;
        if let Err(e) = self.client.remove_label(number, IN_PROGRESS_LABEL).await {
            warn!(issue = %issue, error = %e, "Failed to remove in-progress label");
        }
        self.client.set_state(number, IssueState::Closed).await?;

        info!(issue = %issue, "Closed issue");
        Ok(())
    }

    async fn create_linked(
        &self,
        parent: &IssueRef,
        title: &str,
        priority: u8,
    ) -> shipwright_core::Result<IssueRef> {
        let parent_number = issue_number(parent)?;

        let created = self
            .client
            .create_issue(
                title,
                &linked_body(parent_number),
                vec![format!("{}{}", PRIORITY_LABEL_PREFIX, priority)],
            )
            .await?;

        info!(issue = created.number, parent = %parent, "Created linked issue");
        Ok(IssueRef::remote(created.number.to_string()).with_discovered_from(parent.clone()))
    }
}

fn issue_number(issue: &IssueRef) -> shipwright_core::Result<u64> {
    ensure_backend(BackendKind::Remote, issue)?;
    let trimmed = issue.external_id.trim().trim_start_matches('#');
    trimmed.parse().map_err(|_| {
        shipwright_core::Error::from(Error::Parse(format!(
            "'{}' is not an issue number",
            issue.external_id
        )))
    })
}

/// Open, unclaimed, non-PR issues whose dependencies are all closed
///
/// Ordered by priority, then age.
fn select_ready(open_issues: &[Issue]) -> Vec<u64> {
    let graph = DependencyGraph::from_issues(open_issues);

    let mut ready: Vec<&Issue> = open_issues
        .iter()
        .filter(|i| i.state == IssueState::Open)
        .filter(|i| !i.is_pull_request())
        .filter(|i| !i.has_label(IN_PROGRESS_LABEL) && !i.has_label(BLOCKED_LABEL))
        .filter(|i| graph.is_ready(i.number))
        .collect();

    ready.sort_by_key(|i| (i.priority().unwrap_or(DEFAULT_PRIORITY), i.created_at, i.number));
    ready.into_iter().map(|i| i.number).collect()
}

fn to_details(issue: &Issue) -> IssueDetails {
    let status = if issue.state == IssueState::Closed {
        IssueStatus::Closed
    } else if issue.has_label(IN_PROGRESS_LABEL) {
        IssueStatus::InProgress
    } else if issue.has_label(BLOCKED_LABEL) {
        IssueStatus::Blocked
    } else {
        IssueStatus::Open
    };

    let mut issue_ref = IssueRef::remote(issue.number.to_string());
    if let Some(parent) = IssueDependencies::parse(&issue.body).discovered_from {
        if parent.is_local() {
            issue_ref = issue_ref.with_discovered_from(IssueRef::remote(parent.number.to_string()));
        }
    }

    IssueDetails {
        issue_ref,
        title: issue.title.clone(),
        body: issue.body.clone(),
        status,
        labels: issue.labels.clone(),
        issue_type: None,
        priority: issue.priority(),
    }
}

fn linked_body(parent_number: u64) -> String {
    format!(
        "Discovered from #{}\n\nFound while working on the parent issue.",
        parent_number
    )
}
