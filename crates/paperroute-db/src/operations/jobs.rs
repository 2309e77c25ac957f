//! Job history operations.

use crate::database::Database;
use crate::error::DbResult;
use chrono::{DateTime, Utc};
use paperroute_core::{Fingerprint, IngestionJob, JobState, Stage};
use rusqlite::params;
use std::path::PathBuf;

const COLUMNS: &str = "id, source_path, fingerprint, state, failed_stage, error_kind, error, output_path, indexed, arrived_at, finished_at";

impl Database {
    /// Record (or update) a job.
    pub fn record_job(&self, job: &IngestionJob) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO jobs (id, source_path, fingerprint, state, failed_stage, error_kind, error, output_path, indexed, arrived_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                job.id,
                job.path.to_string_lossy(),
                job.fingerprint.as_str(),
                job.state.as_str(),
                job.failed_stage.map(|s| s.as_str()),
                job.error_kind,
                job.error,
                job.output_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                job.indexed,
                job.arrived_at.to_rfc3339(),
                job.finished_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// List jobs, most recent first.
    pub fn list_jobs(&self, state: Option<JobState>, limit: i64) -> DbResult<Vec<IngestionJob>> {
        let conn = self.conn()?;

        let jobs = match state {
            Some(s) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM jobs WHERE state = ?1 ORDER BY arrived_at DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![s.as_str(), limit], row_to_job)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM jobs ORDER BY arrived_at DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit], row_to_job)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(jobs)
    }

    /// Delete jobs that finished before `cutoff`.
    pub fn prune_jobs(&self, cutoff: DateTime<Utc>) -> DbResult<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "DELETE FROM jobs WHERE finished_at IS NOT NULL AND finished_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(count)
    }
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<IngestionJob> {
    let source_path: String = row.get(1)?;
    let fingerprint: String = row.get(2)?;
    let state: String = row.get(3)?;
    let failed_stage: Option<String> = row.get(4)?;
    let output_path: Option<String> = row.get(7)?;
    let arrived_at: String = row.get(9)?;
    let finished_at: Option<String> = row.get(10)?;

    Ok(IngestionJob {
        id: row.get(0)?,
        path: PathBuf::from(source_path),
        fingerprint: Fingerprint::new(fingerprint),
        arrived_at: DateTime::parse_from_rfc3339(&arrived_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        state: JobState::from_str(&state).unwrap_or_default(),
        failed_stage: failed_stage.as_deref().and_then(Stage::from_str),
        error_kind: row.get(5)?,
        error: row.get(6)?,
        output_path: output_path.map(PathBuf::from),
        indexed: row.get(8)?,
        finished_at: finished_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_and_list_jobs() {
        let db = Database::open_in_memory().unwrap();

        let mut failed = IngestionJob::new("/inbox/a.pdf", Fingerprint::new("a"));
        failed.start();
        failed.fail(Stage::Reconciliation, "unreadable_document", "no text extracted");
        db.record_job(&failed).unwrap();

        let mut done = IngestionJob::new("/inbox/b.pdf", Fingerprint::new("b"));
        done.start();
        done.complete(PathBuf::from("/archive/b.md"), true);
        db.record_job(&done).unwrap();

        let all = db.list_jobs(None, 10).unwrap();
        assert_eq!(all.len(), 2);

        let failed_jobs = db.list_jobs(Some(JobState::Failed), 10).unwrap();
        assert_eq!(failed_jobs.len(), 1);
        assert_eq!(failed_jobs[0].failed_stage, Some(Stage::Reconciliation));
        assert_eq!(failed_jobs[0].error_kind.as_deref(), Some("unreadable_document"));
        assert_eq!(failed_jobs[0].fingerprint.as_str(), "a");
    }

    #[test]
    fn test_prune_jobs() {
        let db = Database::open_in_memory().unwrap();

        let mut job = IngestionJob::new("/inbox/a.pdf", Fingerprint::new("a"));
        job.complete(PathBuf::from("/archive/a.md"), false);
        db.record_job(&job).unwrap();

        assert_eq!(db.prune_jobs(Utc::now() - Duration::hours(1)).unwrap(), 0);
        assert_eq!(db.prune_jobs(Utc::now() + Duration::seconds(1)).unwrap(), 1);
        assert!(db.list_jobs(None, 10).unwrap().is_empty());
    }
}
