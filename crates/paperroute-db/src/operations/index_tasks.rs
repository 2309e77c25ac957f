//! Index retry queue operations.

use crate::database::Database;
use crate::error::DbResult;
use chrono::{DateTime, Utc};
use paperroute_core::{IndexOperation, IndexStatus, IndexTask};
use rusqlite::{params, OptionalExtension};

const COLUMNS: &str =
    "artifact_id, operation, attempts, next_attempt_at, status, last_error, created_at, updated_at";

/// Number of index tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexTaskCounts {
    pub pending: i64,
    pub failed_transient: i64,
    pub awaiting_reindex: i64,
    pub abandoned: i64,
    pub indexed: i64,
}

impl Database {
    /// Insert or update an index task. The stored attempt count never
    /// decreases, even if a stale copy is written.
    pub fn upsert_index_task(&self, task: &IndexTask) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO index_tasks (artifact_id, operation, attempts, next_attempt_at, status, last_error, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(artifact_id) DO UPDATE SET
                operation = excluded.operation,
                attempts = MAX(index_tasks.attempts, excluded.attempts),
                next_attempt_at = excluded.next_attempt_at,
                status = excluded.status,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
            params![
                task.artifact_id,
                task.operation.as_str(),
                task.attempts,
                task.next_attempt_at.to_rfc3339(),
                task.status.as_str(),
                task.last_error,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get an index task by artifact ID.
    pub fn get_index_task(&self, artifact_id: &str) -> DbResult<Option<IndexTask>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM index_tasks WHERE artifact_id = ?1"),
                params![artifact_id],
                row_to_index_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Whether the artifact has been confirmed indexed.
    pub fn is_indexed(&self, artifact_id: &str) -> DbResult<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM index_tasks WHERE artifact_id = ?1 AND status = 'indexed'",
            params![artifact_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// List index tasks, optionally filtered by status, oldest first.
    pub fn list_index_tasks(&self, status: Option<IndexStatus>) -> DbResult<Vec<IndexTask>> {
        let conn = self.conn()?;

        let tasks = match status {
            Some(s) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM index_tasks WHERE status = ?1 ORDER BY created_at ASC"
                ))?;
                let rows = stmt.query_map(params![s.as_str()], row_to_index_task)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM index_tasks ORDER BY created_at ASC"
                ))?;
                let rows = stmt.query_map([], row_to_index_task)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(tasks)
    }

    /// Tasks still tracked by the retry queue (everything not yet indexed).
    pub fn open_index_tasks(&self) -> DbResult<Vec<IndexTask>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM index_tasks WHERE status != 'indexed' ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map([], row_to_index_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Remove an index task. Returns whether a row existed.
    pub fn delete_index_task(&self, artifact_id: &str) -> DbResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM index_tasks WHERE artifact_id = ?1",
            params![artifact_id],
        )?;
        Ok(rows > 0)
    }

    /// Get index task counts by status.
    pub fn index_task_counts(&self) -> DbResult<IndexTaskCounts> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM index_tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = IndexTaskCounts::default();
        for row in rows {
            let (status, count) = row?;
            match IndexStatus::from_str(&status) {
                Some(IndexStatus::Pending) => counts.pending = count,
                Some(IndexStatus::FailedTransient) => counts.failed_transient = count,
                Some(IndexStatus::AwaitingReindex) => counts.awaiting_reindex = count,
                Some(IndexStatus::Abandoned) => counts.abandoned = count,
                Some(IndexStatus::Indexed) => counts.indexed = count,
                None => {}
            }
        }
        Ok(counts)
    }
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_index_task(row: &rusqlite::Row) -> rusqlite::Result<IndexTask> {
    let operation: String = row.get(1)?;
    let next_attempt_at: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(IndexTask {
        artifact_id: row.get(0)?,
        operation: IndexOperation::from_str(&operation).unwrap_or_default(),
        attempts: row.get(2)?,
        next_attempt_at: parse_time(&next_attempt_at),
        status: IndexStatus::from_str(&status).unwrap_or_default(),
        last_error: row.get(5)?,
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}
