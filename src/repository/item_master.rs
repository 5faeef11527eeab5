//! Item-master repository: cross-batch (retailer, item_id) → SKU.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::debug;

use super::{connect, parse_datetime, Result};
use crate::models::{ItemMasterRecord, Retailer};

/// What the reconciliation decision table did with one item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Inserted,
    Updated,
    Skipped,
}

/// SQLite-backed repository for item-master rows.
pub struct ItemMasterRepository {
    db_path: PathBuf,
}

impl ItemMasterRepository {
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
            CREATE TABLE IF NOT EXISTS item_master (
                retailer TEXT NOT NULL,
                item_id TEXT NOT NULL,
                sku TEXT,
                first_seen_batch TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (retailer, item_id)
            );
        "#,
        )?;
        Ok(())
    }

    /// Fetch one master row.
    pub fn get(&self, retailer: Retailer, item_id: &str) -> Result<Option<ItemMasterRecord>> {
        let conn = self.connect()?;
        let row = conn.query_row(
            "SELECT * FROM item_master WHERE retailer = ? AND item_id = ?",
            params![retailer.as_str(), item_id],
            row_to_master,
        );
        match row {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Count master rows for a retailer.
    pub fn count(&self, retailer: Retailer) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM item_master WHERE retailer = ?",
            params![retailer.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Apply the reconciliation decision table for one sighted item id.
    ///
    /// Exactly: no row → insert; existing row with empty SKU and a
    /// non-empty new SKU → update once; existing row with empty SKU and
    /// no new SKU → skip; existing row with non-empty SKU → always skip.
    pub fn reconcile(
        &self,
        retailer: Retailer,
        item_id: &str,
        new_sku: Option<&str>,
        batch_id: &str,
    ) -> Result<ReconcileAction> {
        let new_sku = new_sku.map(str::trim).filter(|s| !s.is_empty());

        let existing = self.get(retailer, item_id)?;
        match existing {
            None => {
                let conn = self.connect()?;
                conn.execute(
                    r#"
                    INSERT INTO item_master (retailer, item_id, sku, first_seen_batch, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        retailer.as_str(),
                        item_id,
                        new_sku,
                        batch_id,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                Ok(ReconcileAction::Inserted)
            }
            Some(row) if row.sku.as_deref().map_or(true, |s| s.is_empty()) => match new_sku {
                Some(sku) => {
                    let conn = self.connect()?;
                    conn.execute(
                        "UPDATE item_master SET sku = ?1, updated_at = ?2
                         WHERE retailer = ?3 AND item_id = ?4",
                        params![sku, Utc::now().to_rfc3339(), retailer.as_str(), item_id],
                    )?;
                    Ok(ReconcileAction::Updated)
                }
                None => Ok(ReconcileAction::Skipped),
            },
            Some(row) => {
                debug!(
                    "item {}:{} already has sku {:?}, leaving as-is",
                    retailer, item_id, row.sku
                );
                Ok(ReconcileAction::Skipped)
            }
        }
    }
}

fn row_to_master(row: &Row) -> rusqlite::Result<ItemMasterRecord> {
    Ok(ItemMasterRecord {
        retailer: Retailer::from_str(&row.get::<_, String>("retailer")?)
            .unwrap_or(Retailer::Amazon),
        item_id: row.get("item_id")?,
        sku: row.get("sku")?,
        first_seen_batch: row.get("first_seen_batch")?,
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
    })
}
