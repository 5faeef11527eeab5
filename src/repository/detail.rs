//! Detail table repository.
//!
//! One detail snapshot per (retailer, batch_id, product_url) per batch,
//! written once by the enrichment stage and never updated afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Row};

use super::writer::RecordSink;
use super::{connect, parse_datetime, Result};
use crate::models::{DetailRecord, RankSet, Retailer};

/// SQLite-backed repository for detail rows.
pub struct DetailRepository {
    db_path: PathBuf,
}

impl DetailRepository {
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
            CREATE TABLE IF NOT EXISTS details (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                retailer TEXT NOT NULL,
                batch_id TEXT NOT NULL,
                calendar_week TEXT NOT NULL,
                product_url TEXT NOT NULL,

                item_id TEXT,
                sku TEXT,
                review_count INTEGER,
                rating_avg REAL,
                star_histogram TEXT NOT NULL DEFAULT '{}',
                specs TEXT NOT NULL DEFAULT '{}',
                similar TEXT NOT NULL DEFAULT '[]',

                -- Listing data carried forward into the snapshot
                listing_fields TEXT NOT NULL DEFAULT '{}',
                main_rank INTEGER,
                bsr_rank INTEGER,
                promotion_rank INTEGER,
                trend_rank INTEGER,

                crawled_at TEXT NOT NULL,

                UNIQUE(retailer, batch_id, product_url)
            );

            CREATE INDEX IF NOT EXISTS idx_details_batch
                ON details(retailer, batch_id);
            CREATE INDEX IF NOT EXISTS idx_details_item
                ON details(retailer, item_id);
        "#,
        )?;
        Ok(())
    }

    /// All detail rows for a batch, insertion order.
    pub fn for_batch(&self, retailer: Retailer, batch_id: &str) -> Result<Vec<DetailRecord>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM details WHERE retailer = ? AND batch_id = ? ORDER BY id")?;
        let rows = stmt
            .query_map(params![retailer.as_str(), batch_id], row_to_detail)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count detail rows for a batch.
    pub fn count_for_batch(&self, retailer: Retailer, batch_id: &str) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM details WHERE retailer = ? AND batch_id = ?",
            params![retailer.as_str(), batch_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl RecordSink for DetailRepository {
    type Record = DetailRecord;

    fn exists(&mut self, record: &DetailRecord) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM details WHERE retailer = ? AND batch_id = ? AND product_url = ?",
            params![
                record.retailer.as_str(),
                record.batch_id,
                record.product_url
            ],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn insert_many(&mut self, records: &[&DetailRecord]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for record in records {
            tx.execute(
                r#"
                INSERT INTO details (
                    retailer, batch_id, calendar_week, product_url,
                    item_id, sku, review_count, rating_avg,
                    star_histogram, specs, similar, listing_fields,
                    main_rank, bsr_rank, promotion_rank, trend_rank,
                    crawled_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                "#,
                params![
                    record.retailer.as_str(),
                    record.batch_id,
                    record.calendar_week,
                    record.product_url,
                    record.item_id,
                    record.sku,
                    record.review_count,
                    record.rating_avg,
                    serde_json::to_string(&record.star_histogram)?,
                    serde_json::to_string(&record.specs)?,
                    serde_json::to_string(&record.similar)?,
                    serde_json::to_string(&record.listing_fields)?,
                    record.ranks.main,
                    record.ranks.bsr,
                    record.ranks.promotion,
                    record.ranks.trend,
                    record.crawled_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn update(&mut self, record: &DetailRecord) -> Result<()> {
        // Detail snapshots are write-once per batch; an update here means
        // a resumed run re-processed the product. Keep the first snapshot.
        tracing::debug!(
            "detail row already present for {} in {}, keeping first snapshot",
            record.product_url,
            record.batch_id
        );
        Ok(())
    }

    fn describe(&self, record: &DetailRecord) -> String {
        serde_json::to_string(record).unwrap_or_else(|_| record.product_url.clone())
    }
}

fn row_to_detail(row: &Row) -> rusqlite::Result<DetailRecord> {
    let star_histogram: BTreeMap<u8, u32> =
        serde_json::from_str(&row.get::<_, String>("star_histogram")?).unwrap_or_default();
    let specs: BTreeMap<String, Option<String>> =
        serde_json::from_str(&row.get::<_, String>("specs")?).unwrap_or_default();
    let similar: Vec<String> =
        serde_json::from_str(&row.get::<_, String>("similar")?).unwrap_or_default();
    let listing_fields: BTreeMap<String, Option<String>> =
        serde_json::from_str(&row.get::<_, String>("listing_fields")?).unwrap_or_default();

    Ok(DetailRecord {
        retailer: Retailer::from_str(&row.get::<_, String>("retailer")?)
            .unwrap_or(Retailer::Amazon),
        batch_id: row.get("batch_id")?,
        calendar_week: row.get("calendar_week")?,
        product_url: row.get("product_url")?,
        item_id: row.get("item_id")?,
        sku: row.get("sku")?,
        review_count: row.get("review_count")?,
        rating_avg: row.get("rating_avg")?,
        star_histogram,
        specs,
        similar,
        listing_fields,
        ranks: RankSet {
            main: row.get("main_rank")?,
            bsr: row.get("bsr_rank")?,
            promotion: row.get("promotion_rank")?,
            trend: row.get("trend_rank")?,
        },
        crawled_at: parse_datetime(&row.get::<_, String>("crawled_at")?),
    })
}
