//! SQLite-backed run history.
//! Survives restarts; the scheduler reads the last completion time per job
//! kind from here to decide whether a catch-up run is owed.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use salesops_core::error::{Result, SalesOpsError};
use salesops_core::types::{JobKind, RunOutcome, RunStatus};
use std::path::Path;

/// Persistent log of every completed run.
pub struct RunHistoryDb {
    conn: Connection,
}

impl RunHistoryDb {
    /// Open or create the history database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| SalesOpsError::Database(format!("open {}: {e}", path.display())))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS run_history (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,             -- 'etl', 'backup', 'report'
                status TEXT NOT NULL,           -- 'succeeded', 'failed', 'degraded_with_issues'
                issues TEXT NOT NULL DEFAULT '[]',  -- JSON array
                error TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_history_kind_finished
                ON run_history (kind, finished_at);
            ",
        )?;
        Ok(())
    }

    /// Append a run outcome.
    pub fn record(&self, outcome: &RunOutcome) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO run_history
             (id, kind, status, issues, error, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                outcome.id,
                outcome.kind.as_str(),
                outcome.status.as_str(),
                serde_json::to_string(&outcome.issues)?,
                outcome.error,
                outcome.started_at.to_rfc3339(),
                outcome.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// End time of the most recent completed run of `kind`.
    pub fn last_finished(&self, kind: JobKind) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT finished_at FROM run_history WHERE kind = ?1
                 ORDER BY finished_at DESC LIMIT 1",
                [kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|s| parse_time(&s)))
    }

    /// Most recent runs, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<RunOutcome>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, status, issues, error, started_at, finished_at
             FROM run_history ORDER BY finished_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut outcomes = Vec::new();
        for row in rows {
            let (id, kind, status, issues, error, started_at, finished_at) = row?;
            let (Some(kind), Some(status)) = (JobKind::parse(&kind), RunStatus::parse(&status)) else {
                tracing::warn!("⚠️ Skipping unreadable history row {id}");
                continue;
            };
            let (Some(started_at), Some(finished_at)) = (parse_time(&started_at), parse_time(&finished_at)) else {
                tracing::warn!("⚠️ Skipping history row {id} with bad timestamps");
                continue;
            };
            outcomes.push(RunOutcome {
                id,
                kind,
                status,
                issues: serde_json::from_str(&issues).unwrap_or_default(),
                error,
                started_at,
                finished_at,
            });
        }
        Ok(outcomes)
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
