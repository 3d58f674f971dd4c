//! Embedded issue tracker for Shipwright
//!
//! Issues and their dependency edges live in a single SQLite file. The
//! [`LocalTracker`] exposes them through the core tracker facade.

pub mod error;
pub mod models;
pub mod repos;
pub mod tracker;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub use error::{Error, Result};
pub use models::{Dependency, DependencyType, Issue, NewIssue};
pub use repos::{DependencyRepository, IssueRepository};
pub use tracker::LocalTracker;

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the tracker database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Io(format!("Failed to create database directory: {}", e)))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Migration(e.to_string()))?;

        tracing::debug!(path = %db_path.display(), "Opened tracker database");
        Ok(Self { pool })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the issues repository
    pub fn issues(&self) -> IssueRepository<'_> {
        IssueRepository::new(&self.pool)
    }

    /// Get the dependencies repository
    pub fn dependencies(&self) -> DependencyRepository<'_> {
        DependencyRepository::new(&self.pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("tracker.db");

        let _db = Database::new(&db_path).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_database_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("tracker.db")).await.unwrap();

        for table in ["issues", "dependencies"] {
            let result: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
            )
            .bind(table)
            .fetch_one(db.pool())
            .await
            .unwrap();
            assert_eq!(result.0, 1, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tracker.db");

        let db = Database::new(&path).await.unwrap();
        db.issues().create(NewIssue::new("Persist me")).await.unwrap();
        db.pool().close().await;

        let db = Database::new(&path).await.unwrap();
        assert_eq!(db.issues().get("sw-1").await.unwrap().title, "Persist me");
    }
}
