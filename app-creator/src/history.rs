//! Journal of finished runs, backed by SQLite.
//!
//! A run's `Context` dies with the run; this journal only keeps what the run
//! produced, for later inspection with `app-creator history`.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::workflow::{Progress, Verdict};

/// One recorded run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: Option<i64>,
    pub specification: String,
    pub verdict: Verdict,
    pub reviews: u32,
    pub artifact: String,
    /// Paths written by the packager; empty when packaging was skipped.
    pub files: Vec<String>,
    pub progress: Vec<Progress>,
    pub started_at: String,
    pub finished_at: String,
}

/// Run journal store.
pub struct History {
    db: Mutex<Connection>,
}

impl History {
    /// Open or create a history database.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)
            .with_context(|| format!("Failed to open history database {}", path.display()))?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                specification TEXT NOT NULL,
                verdict TEXT NOT NULL,
                reviews INTEGER NOT NULL,
                artifact TEXT NOT NULL,
                files TEXT NOT NULL,
                progress TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_finished
                ON runs(finished_at);",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Store a finished run and return its id.
    pub fn record(&self, run: &RunRecord) -> Result<i64> {
        let files = serde_json::to_string(&run.files)?;
        let progress = serde_json::to_string(&run.progress)?;
        let db = self.lock()?;
        db.execute(
            "INSERT INTO runs (specification, verdict, reviews, artifact, files, progress, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                run.specification,
                run.verdict.to_string(),
                run.reviews,
                run.artifact,
                files,
                progress,
                run.started_at,
                run.finished_at,
            ],
        )?;
        let id = db.last_insert_rowid();
        tracing::debug!(id, verdict = %run.verdict, "Recorded run");
        Ok(id)
    }

    /// Fetch one run by id.
    pub fn get(&self, id: i64) -> Result<Option<RunRecord>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT id, specification, verdict, reviews, artifact, files, progress, started_at, finished_at
             FROM runs WHERE id = ?1",
        )?;
        let raw = stmt
            .query_row(rusqlite::params![id], RawRow::from_row)
            .optional()?;
        raw.map(RawRow::into_record).transpose()
    }

    /// Most recent runs first.
    pub fn recent(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT id, specification, verdict, reviews, artifact, files, progress, started_at, finished_at
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::into_record).collect()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| anyhow::anyhow!("history database lock poisoned"))
    }
}

/// Column values before JSON/enum decoding.
struct RawRow {
    id: i64,
    specification: String,
    verdict: String,
    reviews: u32,
    artifact: String,
    files: String,
    progress: String,
    started_at: String,
    finished_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            specification: row.get(1)?,
            verdict: row.get(2)?,
            reviews: row.get(3)?,
            artifact: row.get(4)?,
            files: row.get(5)?,
            progress: row.get(6)?,
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<RunRecord> {
        Ok(RunRecord {
            id: Some(self.id),
            specification: self.specification,
            verdict: self.verdict.parse().map_err(anyhow::Error::msg)?,
            reviews: self.reviews,
            artifact: self.artifact,
            files: serde_json::from_str(&self.files).context("Corrupt files column")?,
            progress: serde_json::from_str(&self.progress).context("Corrupt progress column")?,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}
