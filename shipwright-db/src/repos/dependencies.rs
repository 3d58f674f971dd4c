//! Dependency edges between local issues

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{Error, Result};
use crate::models::{Dependency, DependencyType};

/// Repository for issue dependency edges
pub struct DependencyRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DependencyRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record that `issue_id` depends on `depends_on_id`
    ///
    /// Adding an edge that already exists is a no-op.
    pub async fn add(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: DependencyType,
    ) -> Result<()> {
        if issue_id == depends_on_id {
            return Err(Error::InvalidData(format!(
                "issue {} cannot depend on itself",
                issue_id
            )));
        }
        for id in [issue_id, depends_on_id] {
            let exists: Option<(i64,)> = sqlx::query_as("SELECT seq FROM issues WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool)
                .await?;
            if exists.is_none() {
                return Err(Error::NotFound(format!("issue {}", id)));
            }
        }

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, dep_type, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(issue_id)
        .bind(depends_on_id)
        .bind(dep_type.as_str())
        .bind(Utc::now())
        .execute(self.pool)
        .await?;

        tracing::debug!(issue = %issue_id, depends_on = %depends_on_id, kind = %dep_type, "Added dependency");
        Ok(())
    }

    /// Remove an edge, returning whether it existed
    pub async fn remove(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: DependencyType,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM dependencies WHERE issue_id = ? AND depends_on_id = ? AND dep_type = ?",
        )
        .bind(issue_id)
        .bind(depends_on_id)
        .bind(dep_type.as_str())
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Edges going out of `issue_id`
    pub async fn list_for(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let deps = sqlx::query_as::<_, Dependency>(
            "SELECT * FROM dependencies WHERE issue_id = ? ORDER BY created_at",
        )
        .bind(issue_id)
        .fetch_all(self.pool)
        .await?;
        Ok(deps)
    }

    /// Issues that depend on `issue_id`
    pub async fn dependents(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let deps = sqlx::query_as::<_, Dependency>(
            "SELECT * FROM dependencies WHERE depends_on_id = ? ORDER BY created_at",
        )
        .bind(issue_id)
        .fetch_all(self.pool)
        .await?;
        Ok(deps)
    }

    /// Issue that `issue_id` was discovered from, if any
    pub async fn discovered_from(&self, issue_id: &str) -> Result<Option<String>> {
        let parent: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT depends_on_id FROM dependencies
            WHERE issue_id = ? AND dep_type = 'discovered-from'
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(issue_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(parent.map(|(id,)| id))
    }
}
