//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and may be
//! re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS message (
    id              TEXT PRIMARY KEY NOT NULL,
    agent           TEXT NOT NULL,
    direction       TEXT NOT NULL CHECK(direction IN ('inbound','outbound')),
    payload         TEXT NOT NULL,
    cycle           INTEGER NOT NULL,
    timestamp_ms    INTEGER NOT NULL,
    reply_to        TEXT,
    acknowledged    INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS commit_record (
    revision        TEXT PRIMARY KEY NOT NULL,
    origin_message  TEXT NOT NULL UNIQUE,
    agent           TEXT NOT NULL,
    base_revision   TEXT NOT NULL,
    edit_set        TEXT NOT NULL,
    accepted_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_outcome (
    message_id      TEXT PRIMARY KEY NOT NULL,
    agent           TEXT NOT NULL,
    outcome         TEXT NOT NULL CHECK(outcome IN ('committed','rejected','skipped')),
    detail          TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_message_agent_cycle ON message(agent, cycle);
CREATE INDEX IF NOT EXISTS idx_message_pending ON message(agent, direction, acknowledged);
CREATE INDEX IF NOT EXISTS idx_commit_accepted ON commit_record(accepted_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
