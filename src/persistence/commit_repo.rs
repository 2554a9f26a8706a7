//! Append-only commit log repository.

use std::sync::Arc;

use chrono::Utc;

use crate::models::{CommitRecord, EditSet, MessageId, Revision};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for accepted commit records. Rows are never updated.
#[derive(Clone)]
pub struct CommitRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct CommitRow {
    revision: String,
    edit_set: String,
    accepted_at: String,
}

impl CommitRow {
    fn into_record(self) -> Result<CommitRecord> {
        let edit_set: EditSet = serde_json::from_str(&self.edit_set)
            .map_err(|e| AppError::Db(format!("invalid edit_set: {e}")))?;
        let accepted_at = chrono::DateTime::parse_from_rfc3339(&self.accepted_at)
            .map_err(|e| AppError::Db(format!("invalid accepted_at: {e}")))?
            .with_timezone(&Utc);

        Ok(CommitRecord {
            revision: Revision::new(self.revision),
            edit_set,
            accepted_at,
        })
    }
}

impl CommitRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a commit record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails, including when a record
    /// for the same origin message already exists.
    pub async fn append(&self, record: &CommitRecord) -> Result<()> {
        let edit_set = serde_json::to_string(&record.edit_set)?;

        sqlx::query(
            "INSERT INTO commit_record
                (revision, origin_message, agent, base_revision, edit_set, accepted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(record.revision.as_str())
        .bind(record.edit_set.origin_message.as_str())
        .bind(record.edit_set.agent.as_str())
        .bind(record.edit_set.base_revision.as_str())
        .bind(&edit_set)
        .bind(record.accepted_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Commit produced from a given origin message, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_origin(&self, origin: &MessageId) -> Result<Option<CommitRecord>> {
        let row: Option<CommitRow> = sqlx::query_as(
            "SELECT revision, edit_set, accepted_at FROM commit_record WHERE origin_message = ?1",
        )
        .bind(origin.as_str())
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(CommitRow::into_record).transpose()
    }

    /// All commit records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<CommitRecord>> {
        let rows: Vec<CommitRow> = sqlx::query_as(
            "SELECT revision, edit_set, accepted_at FROM commit_record ORDER BY accepted_at ASC",
        )
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(CommitRow::into_record).collect()
    }

    /// Number of commit records.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM commit_record")
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
