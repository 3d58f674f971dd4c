//! Issue fetching and management

use crate::{Error, GitHubClient, Result};
use chrono::{DateTime, Utc};
use octocrab::models::issues::Issue as OctocrabIssue;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Label prefix carrying an issue's priority, e.g. `priority:1`
pub const PRIORITY_LABEL_PREFIX: &str = "priority:";

/// Issue state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl From<octocrab::models::IssueState> for IssueState {
    fn from(state: octocrab::models::IssueState) -> Self {
        match state {
            octocrab::models::IssueState::Open => IssueState::Open,
            octocrab::models::IssueState::Closed => IssueState::Closed,
            _ => IssueState::Open, // Default to open for unknown states
        }
    }
}

/// GitHub issue representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Issue number
    pub number: u64,
    /// Issue title
    pub title: String,
    /// Issue body/description
    pub body: String,
    /// Current state (open/closed)
    pub state: IssueState,
    /// Labels attached to the issue
    pub labels: Vec<String>,
    /// When the issue was created
    pub created_at: DateTime<Utc>,
    /// When the issue was last updated
    pub updated_at: DateTime<Utc>,
    /// Associated pull request URL (if this issue is a PR)
    pub pull_request_url: Option<String>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request_url.is_some()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }

    /// Priority from the first `priority:<n>` label
    pub fn priority(&self) -> Option<u8> {
        self.labels.iter().find_map(|label| {
            label
                .strip_prefix(PRIORITY_LABEL_PREFIX)
                .and_then(|n| n.trim().parse().ok())
        })
    }
}

impl From<OctocrabIssue> for Issue {
    fn from(issue: OctocrabIssue) -> Self {
        Issue {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            state: issue.state.into(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            pull_request_url: issue.pull_request.map(|pr| pr.url.to_string()),
        }
    }
}

/// Filter options for listing issues
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    /// Filter by state (default: open)
    pub state: Option<IssueState>,
    /// Filter by labels (all must match)
    pub labels: Vec<String>,
    /// Page size (default: 100)
    pub per_page: Option<u8>,
}

impl GitHubClient {
    /// Fetch a single issue by number
    pub async fn get_issue(&self, number: u64) -> Result<Issue> {
        debug!(number, "Fetching issue");

        let issue = self
            .client()
            .issues(self.owner(), self.repo())
            .get(number)
            .await
            .map_err(|e| not_found_or_api(e, number))?;

        Ok(issue.into())
    }

    /// List all issues matching `filter` (paginating through all pages)
    pub async fn list_all_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        debug!(?filter, "Listing all issues with pagination");

        let mut all_issues = Vec::new();
        let per_page = filter.per_page.unwrap_or(100);

        let mut page_num = 1u32;
        loop {
            let issues_handler = self.client().issues(self.owner(), self.repo());
            let mut builder = issues_handler.list().per_page(per_page).page(page_num);

            if let Some(state) = filter.state {
                builder = builder.state(match state {
                    IssueState::Open => octocrab::params::State::Open,
                    IssueState::Closed => octocrab::params::State::Closed,
                });
            }

            if !filter.labels.is_empty() {
                builder = builder.labels(&filter.labels);
            }

            let issues = builder.send().await.map_err(Error::Api)?;
            let items: Vec<Issue> = issues.items.into_iter().map(Issue::from).collect();

            if items.is_empty() {
                break;
            }

            let last_page = items.len() < usize::from(per_page);
            all_issues.extend(items);
            if last_page {
                break;
            }
            page_num += 1;
        }

        info!(count = all_issues.len(), "Fetched all issues");

        Ok(all_issues)
    }

    /// List open issues only
    pub async fn list_open_issues(&self) -> Result<Vec<Issue>> {
        self.list_all_issues(&IssueFilter {
            state: Some(IssueState::Open),
            ..Default::default()
        })
        .await
    }

    /// Create an issue
    pub async fn create_issue(&self, title: &str, body: &str, labels: Vec<String>) -> Result<Issue> {
        let issue = self
            .client()
            .issues(self.owner(), self.repo())
            .create(title)
            .body(body)
            .labels(labels)
            .send()
            .await?;

        info!(number = issue.number, title = %title, "Created issue");
        Ok(issue.into())
    }

    pub async fn add_label(&self, number: u64, label: &str) -> Result<()> {
        self.client()
            .issues(self.owner(), self.repo())
            .add_labels(number, &[label.to_string()])
            .await
            .map_err(|e| not_found_or_api(e, number))?;
        debug!(number, label = %label, "Added label");
        Ok(())
    }

    /// Remove a label; removing a label the issue does not carry succeeds
    pub async fn remove_label(&self, number: u64, label: &str) -> Result<()> {
        let issue = self.get_issue(number).await?;
        if !issue.has_label(label) {
            return Ok(());
        }

        self.client()
            .issues(self.owner(), self.repo())
            .remove_label(number, label)
            .await
            .map_err(|e| not_found_or_api(e, number))?;
        debug!(number, label = %label, "Removed label");
        Ok(())
    }

    pub async fn comment(&self, number: u64, body: &str) -> Result<()> {
        self.client()
            .issues(self.owner(), self.repo())
            .create_comment(number, body)
            .await
            .map_err(|e| not_found_or_api(e, number))?;
        Ok(())
    }

    pub async fn set_state(&self, number: u64, state: IssueState) -> Result<()> {
        let state = match state {
            IssueState::Open => octocrab::models::IssueState::Open,
            IssueState::Closed => octocrab::models::IssueState::Closed,
        };
        self.client()
            .issues(self.owner(), self.repo())
            .update(number)
            .state(state)
            .send()
            .await
            .map_err(|e| not_found_or_api(e, number))?;
        Ok(())
    }
}

fn not_found_or_api(e: octocrab::Error, number: u64) -> Error {
    match &e {
        octocrab::Error::GitHub { source, .. } if source.message.contains("Not Found") => {
            Error::IssueNotFound(number)
        }
        _ => Error::Api(e),
    }
}
