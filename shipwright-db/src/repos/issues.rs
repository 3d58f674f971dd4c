//! Issue repository for CRUD operations on local issues

use chrono::Utc;
use shipwright_core::IssueStatus;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{DependencyType, Issue, NewIssue, DEFAULT_PRIORITY, MAX_PRIORITY};

/// Repository for managing local issues
pub struct IssueRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> IssueRepository<'a> {
    /// Create a new issue repository
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new issue; its id is `sw-<n>` with `n` one past the highest so far
    pub async fn create(&self, issue: NewIssue) -> Result<Issue> {
        let mut conn = self.pool.acquire().await?;
        let created = insert_issue(&mut conn, &issue).await?;
        tracing::debug!(issue = %created.id, title = %created.title, "Created local issue");
        Ok(created)
    }

    /// Create an issue together with its `discovered-from` edge to `parent_id`
    ///
    /// Both writes share one transaction: an unknown parent leaves no issue
    /// behind.
    pub async fn create_discovered(&self, issue: NewIssue, parent_id: &str) -> Result<Issue> {
        let mut tx = self.pool.begin().await?;
        let created = insert_issue(&mut tx, &issue).await?;

        sqlx::query(
            r#"
            INSERT INTO dependencies (issue_id, depends_on_id, dep_type, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&created.id)
        .bind(parent_id)
        .bind(DependencyType::DiscoveredFrom.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_foreign_key_violation() => {
                Error::NotFound(format!("issue {}", parent_id))
            }
            _ => Error::from(e),
        })?;

        tx.commit().await?;
        tracing::debug!(issue = %created.id, parent = %parent_id, "Created discovered issue");
        Ok(created)
    }

    /// Get an issue by id
    pub async fn get(&self, id: &str) -> Result<Issue> {
        sqlx::query_as::<_, Issue>("SELECT * FROM issues WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("issue {}", id)))
    }

    /// List issues, optionally only those with `status`
    pub async fn list(&self, status: Option<IssueStatus>) -> Result<Vec<Issue>> {
        let issues = match status {
            Some(status) => {
                sqlx::query_as::<_, Issue>(
                    "SELECT * FROM issues WHERE status = ? ORDER BY priority, created_at, seq",
                )
                .bind(status.as_str())
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Issue>("SELECT * FROM issues ORDER BY priority, created_at, seq")
                    .fetch_all(self.pool)
                    .await?
            }
        };
        Ok(issues)
    }

    /// Open issues with no `blocks` dependency on an issue that is still open
    ///
    /// Ordered by priority, then age.
    pub async fn ready(&self) -> Result<Vec<Issue>> {
        let issues = sqlx::query_as::<_, Issue>(
            r#"
            SELECT i.* FROM issues i
            WHERE i.status = 'open'
              AND NOT EXISTS (
                  SELECT 1 FROM dependencies d
                  JOIN issues blocker ON blocker.id = d.depends_on_id
                  WHERE d.issue_id = i.id
                    AND d.dep_type = 'blocks'
                    AND blocker.status != 'closed'
              )
            ORDER BY i.priority, i.created_at, i.seq
            "#,
        )
        .fetch_all(self.pool)
        .await?;
        Ok(issues)
    }

    /// Set the status of an issue
    ///
    /// Closing goes through [`IssueRepository::close`] so a reason is recorded.
    pub async fn update_status(&self, id: &str, status: IssueStatus) -> Result<Issue> {
        if status == IssueStatus::Closed {
            return self.close(id, "closed").await;
        }

        let result = sqlx::query(
            r#"
            UPDATE issues
            SET status = ?, updated_at = ?, closed_at = NULL, close_reason = NULL
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("issue {}", id)));
        }

        tracing::debug!(issue = %id, status = %status, "Updated local issue status");
        self.get(id).await
    }

    /// Close an issue with a reason
    pub async fn close(&self, id: &str, reason: &str) -> Result<Issue> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE issues
            SET status = 'closed', updated_at = ?, closed_at = ?, close_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(reason)
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("issue {}", id)));
        }

        tracing::debug!(issue = %id, reason = %reason, "Closed local issue");
        self.get(id).await
    }
}

async fn insert_issue(conn: &mut SqliteConnection, issue: &NewIssue) -> Result<Issue> {
    if issue.title.trim().is_empty() {
        return Err(Error::InvalidData("issue title must not be empty".to_string()));
    }
    let priority = issue.priority.unwrap_or(DEFAULT_PRIORITY);
    if priority > MAX_PRIORITY {
        return Err(Error::InvalidData(format!(
            "priority {} is out of range 0-{}",
            priority, MAX_PRIORITY
        )));
    }

    let now = Utc::now();
    let labels_json = serde_json::to_string(&issue.labels)?;

    // seq is the rowid, so SQLite picks MAX(seq) + 1 for it as well
    let result = sqlx::query(
        r#"
        INSERT INTO issues (
            id, title, description, status, priority, issue_type,
            labels, created_at, updated_at
        )
        VALUES (
            'sw-' || (SELECT COALESCE(MAX(seq), 0) + 1 FROM issues),
            ?, ?, 'open', ?, ?, ?, ?, ?
        )
        "#,
    )
    .bind(&issue.title)
    .bind(&issue.description)
    .bind(i64::from(priority))
    .bind(issue.issue_type.as_deref().unwrap_or("task"))
    .bind(&labels_json)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let created = sqlx::query_as::<_, Issue>("SELECT * FROM issues WHERE seq = ?")
        .bind(result.last_insert_rowid())
        .fetch_one(&mut *conn)
        .await?;
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("issues.db")).await.unwrap();
        (temp_dir, db)
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let (_dir, db) = setup().await;
        let repo = db.issues();

        let first = repo.create(NewIssue::new("First")).await.unwrap();
        let second = repo
            .create(NewIssue::new("Second").with_priority(0).with_type("bug"))
            .await
            .unwrap();

        assert_eq!(first.id, "sw-1");
        assert_eq!(second.id, "sw-2");
        assert_eq!(first.priority, i64::from(DEFAULT_PRIORITY));
        assert_eq!(first.issue_type, "task");
        assert_eq!(second.issue_type, "bug");
        assert_eq!(second.status, "open");
    }

    #[tokio::test]
    async fn test_create_discovered_links_parent() {
        let (_dir, db) = setup().await;
        let parent = db.issues().create(NewIssue::new("Parent")).await.unwrap();

        let child = db
            .issues()
            .create_discovered(NewIssue::new("Follow-up"), &parent.id)
            .await
            .unwrap();
        let lineage = db.dependencies().discovered_from(&child.id).await.unwrap();
        assert_eq!(lineage.as_deref(), Some(parent.id.as_str()));
    }

    #[tokio::test]
    async fn test_create_discovered_unknown_parent_rolls_back() {
        let (_dir, db) = setup().await;
        let repo = db.issues();

        let result = repo
            .create_discovered(NewIssue::new("Orphan"), "sw-99")
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(repo.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let (_dir, db) = setup().await;
        let repo = db.issues();

        assert!(matches!(
            repo.create(NewIssue::new("  ")).await,
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(
            repo.create(NewIssue::new("Too low").with_priority(5)).await,
            Err(Error::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_get_missing_issue() {
        let (_dir, db) = setup().await;
        assert!(matches!(db.issues().get("sw-99").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_status_updates_and_close() {
        let (_dir, db) = setup().await;
        let repo = db.issues();
        let issue = repo.create(NewIssue::new("Claim me")).await.unwrap();

        let claimed = repo.update_status(&issue.id, IssueStatus::InProgress).await.unwrap();
        assert_eq!(claimed.status, "in_progress");

        let closed = repo.close(&issue.id, "shipped").await.unwrap();
        assert_eq!(closed.status, "closed");
        assert_eq!(closed.close_reason.as_deref(), Some("shipped"));
        assert!(closed.closed_at.is_some());

        let reopened = repo.update_status(&issue.id, IssueStatus::Open).await.unwrap();
        assert_eq!(reopened.status, "open");
        assert!(reopened.close_reason.is_none());

        assert!(matches!(
            repo.update_status("sw-42", IssueStatus::Open).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ready_orders_by_priority_and_skips_claimed() {
        let (_dir, db) = setup().await;
        let repo = db.issues();

        let low = repo.create(NewIssue::new("Low").with_priority(3)).await.unwrap();
        let urgent = repo.create(NewIssue::new("Urgent").with_priority(0)).await.unwrap();
        let claimed = repo.create(NewIssue::new("Claimed").with_priority(0)).await.unwrap();
        repo.update_status(&claimed.id, IssueStatus::InProgress).await.unwrap();

        let ready: Vec<String> = repo.ready().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ready, vec![urgent.id, low.id]);
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let (_dir, db) = setup().await;
        let repo = db.issues();
        let a = repo.create(NewIssue::new("A")).await.unwrap();
        repo.create(NewIssue::new("B")).await.unwrap();
        repo.close(&a.id, "done").await.unwrap();

        assert_eq!(repo.list(None).await.unwrap().len(), 2);
        let closed = repo.list(Some(IssueStatus::Closed)).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, a.id);
    }
}
