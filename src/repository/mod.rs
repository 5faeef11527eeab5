//! Repository layer for SQLite persistence.
//!
//! Each repository owns its table schema and maps rows to domain models.
//! Timestamps are stored as RFC3339 TEXT; dynamic field maps as JSON TEXT.

mod detail;
mod item_master;
mod listing;
mod runs;
mod selectors;
pub mod writer;

pub use detail::DetailRepository;
pub use item_master::{ItemMasterRepository, ReconcileAction};
pub use listing::ListingRepository;
pub use runs::{RunRepository, StageRunRow};
pub use selectors::{
    FieldLocator, PageSelectors, SelectorRepository, SelectorRow, CONTAINER_FIELD, DETAIL_PAGE,
};
pub use writer::{BulkWriter, RecordSink, WriteOutcome};

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

/// Errors from the repository layer.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Open a connection with the pragmas every repository relies on.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    "#,
    )?;
    Ok(conn)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
