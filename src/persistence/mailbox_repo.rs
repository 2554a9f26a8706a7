//! `SQLite`-backed mailbox store.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;

use crate::bus::mailbox::MailboxStore;
use crate::clock::Timestamp;
use crate::models::{AgentId, Direction, Message, MessageId, Payload};
use crate::pipeline::extract::FENCE_OPEN;
use crate::{AppError, Result};

use super::db::Database;

/// Repository for durable message replicas.
#[derive(Clone)]
pub struct MailboxRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    agent: String,
    direction: String,
    payload: String,
    cycle: i64,
    timestamp_ms: i64,
    reply_to: Option<String>,
    created_at: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        let direction = parse_direction(&self.direction)?;
        let payload: Payload = serde_json::from_str(&self.payload)
            .map_err(|e| AppError::Db(format!("invalid payload: {e}")))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Message {
            id: MessageId::new(self.id),
            agent: AgentId::new(self.agent),
            direction,
            payload,
            timestamp: Timestamp(u64::try_from(self.timestamp_ms).unwrap_or_default()),
            cycle: u64::try_from(self.cycle).unwrap_or_default(),
            reply_to: self.reply_to.map(MessageId::new),
            created_at,
        })
    }
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s {
        "inbound" => Ok(Direction::Inbound),
        "outbound" => Ok(Direction::Outbound),
        other => Err(AppError::Db(format!("invalid message direction: {other}"))),
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| AppError::Db(format!("value out of range: {value}")))
}

const SELECT_COLUMNS: &str =
    "SELECT id, agent, direction, payload, cycle, timestamp_ms, reply_to, created_at FROM message";

impl MailboxRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a message. Re-inserting the same id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert(&self, message: &Message) -> Result<()> {
        let payload = serde_json::to_string(&message.payload)?;

        sqlx::query(
            "INSERT OR IGNORE INTO message
                (id, agent, direction, payload, cycle, timestamp_ms, reply_to, acknowledged, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
        )
        .bind(message.id.as_str())
        .bind(message.agent.as_str())
        .bind(message.direction.as_str())
        .bind(&payload)
        .bind(to_i64(message.cycle)?)
        .bind(to_i64(message.timestamp.as_millis())?)
        .bind(message.reply_to.as_ref().map(MessageId::as_str))
        .bind(message.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Fetch the message with the highest cycle for `agent`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn latest(&self, agent: &AgentId) -> Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE agent = ?1 ORDER BY cycle DESC LIMIT 1"
        ))
        .bind(agent.as_str())
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(MessageRow::into_message).transpose()
    }

    /// Fetch a single message by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &MessageId) -> Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id.as_str())
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(MessageRow::into_message).transpose()
    }

    /// Inbound messages not yet acknowledged, ordered by cycle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn unacknowledged(&self, agent: &AgentId) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS}
             WHERE agent = ?1 AND direction = 'inbound' AND acknowledged = 0
             ORDER BY cycle ASC"
        ))
        .bind(agent.as_str())
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Outbound messages that carry a change marker but have no recorded
    /// pipeline outcome, ordered by agent then cycle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn unhandled_responses(&self) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT m.id, m.agent, m.direction, m.payload, m.cycle, m.timestamp_ms, m.reply_to, m.created_at
             FROM message m
             LEFT JOIN pipeline_outcome o ON o.message_id = m.id
             WHERE m.direction = 'outbound' AND o.message_id IS NULL AND instr(m.payload, ?1) > 0
             ORDER BY m.agent ASC, m.cycle ASC",
        )
        .bind(FENCE_OPEN)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Mark a message acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_acknowledged(&self, id: &MessageId) -> Result<()> {
        sqlx::query("UPDATE message SET acknowledged = 1 WHERE id = ?1")
            .bind(id.as_str())
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete messages created before `before` that no consumer still
    /// needs: acknowledged inbound messages and every outbound message.
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_expired(&self, before: chrono::DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM message
             WHERE (acknowledged = 1 OR direction = 'outbound') AND created_at < ?1",
        )
        .bind(before.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected())
    }
}

impl MailboxStore for MailboxRepo {
    fn read_latest<'a>(&'a self, agent: &'a AgentId) -> BoxFuture<'a, Result<Option<Message>>> {
        Box::pin(self.latest(agent))
    }

    fn append<'a>(&'a self, _agent: &'a AgentId, message: &'a Message) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.insert(message))
    }

    fn list_unacknowledged<'a>(
        &'a self,
        agent: &'a AgentId,
    ) -> BoxFuture<'a, Result<Vec<Message>>> {
        Box::pin(self.unacknowledged(agent))
    }

    fn acknowledge<'a>(&'a self, id: &'a MessageId) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.mark_acknowledged(id))
    }

    fn read_backlog(&self) -> BoxFuture<'_, Result<Vec<Message>>> {
        Box::pin(self.unhandled_responses())
    }
}
