//! Stage-run history: per-stage outcomes recorded under the batch id.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{connect, parse_datetime, Result};
use crate::models::Retailer;

/// One recorded stage outcome.
#[derive(Debug, Clone)]
pub struct StageRunRow {
    pub retailer: Retailer,
    pub batch_id: String,
    pub stage: String,
    pub status: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// SQLite-backed repository for stage-run history.
pub struct RunRepository {
    db_path: PathBuf,
}

impl RunRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS stage_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                retailer TEXT NOT NULL,
                batch_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                error TEXT,
                finished_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_stage_runs_batch
                ON stage_runs(retailer, batch_id);
        "#,
        )?;
        Ok(())
    }

    /// Record one stage outcome.
    pub fn record(&self, row: &StageRunRow) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO stage_runs
                (retailer, batch_id, stage, status, duration_ms, error, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                row.retailer.as_str(),
                row.batch_id,
                row.stage,
                row.status,
                row.duration_ms as i64,
                row.error,
                row.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Stage outcomes for one batch, in execution order.
    pub fn for_batch(&self, retailer: Retailer, batch_id: &str) -> Result<Vec<StageRunRow>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT * FROM stage_runs WHERE retailer = ? AND batch_id = ? ORDER BY id")?;
        let rows = stmt
            .query_map(params![retailer.as_str(), batch_id], row_to_run)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent batch id with recorded stages for a retailer.
    pub fn latest_batch(&self, retailer: Retailer) -> Result<Option<String>> {
        let conn = self.connect()?;
        use rusqlite::OptionalExtension;
        let id = conn
            .query_row(
                "SELECT batch_id FROM stage_runs WHERE retailer = ? ORDER BY id DESC LIMIT 1",
                params![retailer.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

fn row_to_run(row: &Row) -> rusqlite::Result<StageRunRow> {
    Ok(StageRunRow {
        retailer: Retailer::from_str(&row.get::<_, String>("retailer")?)
            .unwrap_or(Retailer::Amazon),
        batch_id: row.get("batch_id")?,
        stage: row.get("stage")?,
        status: row.get("status")?,
        duration_ms: row.get::<_, i64>("duration_ms")? as u64,
        error: row.get("error")?,
        finished_at: parse_datetime(&row.get::<_, String>("finished_at")?),
    })
}
