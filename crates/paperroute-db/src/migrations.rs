//! Schema creation and upgrades, tracked through `PRAGMA user_version`.

use crate::error::DbResult;
use rusqlite::Connection;
use tracing::info;

/// Ordered upgrade steps; step `n` moves the schema from version `n` to `n + 1`.
const STEPS: &[fn(&Connection) -> DbResult<()>] = &[create_initial_schema];

pub const SCHEMA_VERSION: i32 = STEPS.len() as i32;

/// Apply every step the database has not seen yet.
pub fn initialize_schema(conn: &Connection) -> DbResult<()> {
    let mut version = get_schema_version(conn)?;

    while version < SCHEMA_VERSION {
        info!("Applying queue schema step {}", version + 1);
        STEPS[version as usize](conn)?;
        version += 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> DbResult<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn create_initial_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        r#"
        -- Index retry queue. Rows with status 'indexed' are confirmations
        -- and are never picked up again.
        CREATE TABLE IF NOT EXISTS index_tasks (
            artifact_id TEXT PRIMARY KEY,
            operation TEXT NOT NULL DEFAULT 'index',
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_index_tasks_status ON index_tasks(status);
        CREATE INDEX IF NOT EXISTS idx_index_tasks_next ON index_tasks(next_attempt_at);

        -- Terminal ingestion jobs, kept for manual reprocessing
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            state TEXT NOT NULL,
            failed_stage TEXT,
            error_kind TEXT,
            error TEXT,
            output_path TEXT,
            indexed INTEGER NOT NULL DEFAULT 0,
            arrived_at TEXT NOT NULL,
            finished_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
        CREATE INDEX IF NOT EXISTS idx_jobs_finished ON jobs(finished_at);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
