//! [`IssueTracker`] implementation over the local database

use std::path::Path;

use async_trait::async_trait;
use shipwright_core::tracker::ensure_backend;
use shipwright_core::{BackendKind, IssueDetails, IssueRef, IssueStatus, IssueTracker};

use crate::models::{NewIssue, MAX_PRIORITY};
use crate::Database;

/// Local backend of the tracker facade
#[derive(Clone)]
pub struct LocalTracker {
    db: Database,
}

impl LocalTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the tracker database at `path`
    pub async fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        Ok(Self::new(Database::new(path).await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl IssueTracker for LocalTracker {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn fetch_ready(&self) -> shipwright_core::Result<Vec<IssueRef>> {
        let issues = self.db.issues().ready().await?;
        Ok(issues.into_iter().map(|i| IssueRef::local(i.id)).collect())
    }

    async fn fetch(&self, issue: &IssueRef) -> shipwright_core::Result<IssueDetails> {
        ensure_backend(BackendKind::Local, issue)?;
        let row = self.db.issues().get(&issue.external_id).await?;
        let parent = self.db.dependencies().discovered_from(&row.id).await?;
        Ok(row.to_details(parent.as_deref())?)
    }

    async fn update_status(
        &self,
        issue: &IssueRef,
        status: IssueStatus,
    ) -> shipwright_core::Result<()> {
        ensure_backend(BackendKind::Local, issue)?;
        let issues = self.db.issues();

        if status == IssueStatus::InProgress {
            let current = issues.get(&issue.external_id).await?;
            if current.status == IssueStatus::Closed.as_str() {
                return Err(shipwright_core::Error::Tracker(format!(
                    "cannot claim closed issue {}",
                    issue
                )));
            }
        }

        issues.update_status(&issue.external_id, status).await?;
        tracing::info!(issue = %issue, status = %status, "Updated issue status");
        Ok(())
    }

    async fn close(&self, issue: &IssueRef, reason: &str) -> shipwright_core::Result<()> {
        ensure_backend(BackendKind::Local, issue)?;
        self.db.issues().close(&issue.external_id, reason).await?;
        tracing::info!(issue = %issue, reason = %reason, "Closed issue");
        Ok(())
    }

    async fn create_linked(
        &self,
        parent: &IssueRef,
        title: &str,
        priority: u8,
    ) -> shipwright_core::Result<IssueRef> {
        ensure_backend(BackendKind::Local, parent)?;
        let parent_row = self.db.issues().get(&parent.external_id).await?;

        let created = self
            .db
            .issues()
            .create_discovered(
                NewIssue::new(title)
                    .with_description(format!(
                        "Discovered while working on {}: {}",
                        parent_row.id, parent_row.title
                    ))
                    .with_priority(priority.min(MAX_PRIORITY)),
                &parent_row.id,
            )
            .await?;

        tracing::info!(issue = %created.id, parent = %parent, "Created linked issue");
        Ok(IssueRef::local(created.id).with_discovered_from(IssueRef::local(parent_row.id)))
    }
}
