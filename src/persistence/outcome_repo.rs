//! Pipeline outcome ledger, keyed by origin message.
//!
//! Backs the at-most-once handling guarantee across process restarts: once
//! an outcome is recorded for a message, replays return it unchanged.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::{AgentId, MessageId, PipelineOutcome};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for terminal pipeline outcomes.
#[derive(Clone)]
pub struct OutcomeRepo {
    db: Arc<Database>,
}

impl OutcomeRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record the outcome for `message_id`. The first recorded outcome wins.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn record(
        &self,
        message_id: &MessageId,
        agent: &AgentId,
        outcome: &PipelineOutcome,
    ) -> Result<()> {
        let detail = serde_json::to_string(outcome)?;

        sqlx::query(
            "INSERT OR IGNORE INTO pipeline_outcome (message_id, agent, outcome, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(message_id.as_str())
        .bind(agent.as_str())
        .bind(outcome.label())
        .bind(&detail)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Previously recorded outcome for `message_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query or decoding fails.
    pub async fn get(&self, message_id: &MessageId) -> Result<Option<PipelineOutcome>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT detail FROM pipeline_outcome WHERE message_id = ?1")
                .bind(message_id.as_str())
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(|(detail,)| {
            serde_json::from_str(&detail)
                .map_err(|e| AppError::Db(format!("invalid pipeline outcome: {e}")))
        })
        .transpose()
    }

    /// Delete outcomes recorded before `before`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pipeline_outcome WHERE created_at < ?1")
            .bind(before.to_rfc3339())
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
