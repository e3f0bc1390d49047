use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::types::{Firing, RunOutcome, RunRecord};

/// Initialise the ledger schema in `conn`.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id           TEXT NOT NULL PRIMARY KEY,
            job          TEXT NOT NULL,
            slot         TEXT NOT NULL,   -- RFC 3339, UTC
            kind         TEXT NOT NULL,
            started_at   TEXT NOT NULL,
            finished_at  TEXT,
            outcome      TEXT NOT NULL,
            detail       TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_runs_job_slot ON runs (job, slot);
        CREATE INDEX IF NOT EXISTS idx_runs_started ON runs (started_at);
        ",
    )?;
    Ok(())
}

/// Append-only history of scheduler firings, backed by SQLite.
///
/// Every query runs on the blocking pool; the handle is cheap to clone.
#[derive(Clone)]
pub struct RunLedger {
    conn: Arc<Mutex<Connection>>,
}

impl RunLedger {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SchedulerError::Ledger(format!("{}: {e}", parent.display())))?;
        }
        Self::new(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await
        .map_err(|e| SchedulerError::Ledger(e.to_string()))?
    }

    /// Insert a `running` row for `firing`.
    pub async fn record_start(&self, firing: &Firing, started_at: DateTime<Utc>) -> Result<()> {
        let firing = firing.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO runs (id, job, slot, kind, started_at, finished_at, outcome, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, 'running', NULL)",
                params![
                    firing.run_id,
                    firing.job,
                    firing.slot.to_rfc3339(),
                    firing.kind.to_string(),
                    started_at.to_rfc3339(),
                ],
            )?;
            debug!(run_id = %firing.run_id, slot = %firing.slot, "run recorded");
            Ok(())
        })
        .await
    }

    /// Close a `running` row.
    pub async fn record_finish(
        &self,
        run_id: &str,
        finished_at: DateTime<Utc>,
        outcome: RunOutcome,
        detail: Option<String>,
    ) -> Result<()> {
        let run_id = run_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE runs SET finished_at = ?1, outcome = ?2, detail = ?3 WHERE id = ?4",
                params![finished_at.to_rfc3339(), outcome.to_string(), detail, run_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Record a firing that never reached the runner.
    pub async fn record_skipped(
        &self,
        firing: &Firing,
        at: DateTime<Utc>,
        outcome: RunOutcome,
        detail: impl Into<String>,
    ) -> Result<()> {
        let firing = firing.clone();
        let detail = detail.into();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO runs (id, job, slot, kind, started_at, finished_at, outcome, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7)",
                params![
                    firing.run_id,
                    firing.job,
                    firing.slot.to_rfc3339(),
                    firing.kind.to_string(),
                    at.to_rfc3339(),
                    outcome.to_string(),
                    detail,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Whether the runner was invoked for `job` at `slot`.
    pub async fn ran_for_slot(&self, job: &str, slot: DateTime<Utc>) -> Result<bool> {
        let job = job.to_string();
        self.with_conn(move |conn| {
            let hit: Option<String> = conn
                .query_row(
                    "SELECT id FROM runs
                     WHERE job = ?1 AND slot = ?2
                       AND outcome IN ('running', 'succeeded', 'failed', 'panicked')
                     LIMIT 1",
                    params![job, slot.to_rfc3339()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hit.is_some())
        })
        .await
    }

    /// Most recent rows first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, job, slot, kind, started_at, finished_at, outcome, detail
                 FROM runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,         // id
                        row.get::<_, String>(1)?,         // job
                        row.get::<_, String>(2)?,         // slot
                        row.get::<_, String>(3)?,         // kind
                        row.get::<_, String>(4)?,         // started_at
                        row.get::<_, Option<String>>(5)?, // finished_at
                        row.get::<_, String>(6)?,         // outcome
                        row.get::<_, Option<String>>(7)?, // detail
                    ))
                })?
                .filter_map(|r| {
                    let (id, job, slot, kind, started_at, finished_at, outcome, detail) = r.ok()?;
                    Some(RunRecord {
                        id,
                        job,
                        slot: parse_ts(&slot)?,
                        kind: kind.parse().ok()?,
                        started_at: parse_ts(&started_at)?,
                        finished_at: finished_at.as_deref().and_then(parse_ts),
                        outcome: outcome.parse().ok()?,
                        detail,
                    })
                })
                .collect();
            Ok(rows)
        })
        .await
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
