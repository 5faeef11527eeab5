//! Listing table repository.
//!
//! Rows are unique per (retailer, batch_id, product_url). A product sighted
//! again within the same batch by a different listing pass updates only the
//! sighting page type's rank column, under the retailer's merge policy;
//! rows are never deleted (append-only history across batches).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Row};

use super::writer::RecordSink;
use super::{connect, parse_datetime, Result};
use crate::models::{ListingObservation, ListingRow, RankMergePolicy, RankSet, Retailer};

/// SQLite-backed repository for listing rows.
pub struct ListingRepository {
    db_path: PathBuf,
    policy: RankMergePolicy,
}

impl ListingRepository {
    pub fn new(db_path: &Path, policy: RankMergePolicy) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
            policy,
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
            CREATE TABLE IF NOT EXISTS listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                retailer TEXT NOT NULL,
                batch_id TEXT NOT NULL,
                calendar_week TEXT NOT NULL,
                product_url TEXT NOT NULL,

                -- One rank column per listing page family
                main_rank INTEGER,
                bsr_rank INTEGER,
                promotion_rank INTEGER,
                trend_rank INTEGER,

                -- Dynamic commerce fields as JSON (name, price, ...)
                fields TEXT NOT NULL DEFAULT '{}',

                crawled_at TEXT NOT NULL,

                UNIQUE(retailer, batch_id, product_url)
            );

            CREATE INDEX IF NOT EXISTS idx_listings_batch
                ON listings(retailer, batch_id);
        "#,
        )?;
        Ok(())
    }

    /// All listing rows for a batch, primary rank ascending, nulls last.
    pub fn for_batch(&self, retailer: Retailer, batch_id: &str) -> Result<Vec<ListingRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM listings
            WHERE retailer = ? AND batch_id = ?
            ORDER BY COALESCE(main_rank, bsr_rank, promotion_rank, trend_rank) ASC NULLS LAST
        "#,
        )?;

        let rows = stmt
            .query_map(params![retailer.as_str(), batch_id], row_to_listing)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count listing rows for a batch.
    pub fn count_for_batch(&self, retailer: Retailer, batch_id: &str) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM listings WHERE retailer = ? AND batch_id = ?",
            params![retailer.as_str(), batch_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Fetch one row by its natural key.
    pub fn get(
        &self,
        retailer: Retailer,
        batch_id: &str,
        product_url: &str,
    ) -> Result<Option<ListingRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM listings WHERE retailer = ? AND batch_id = ? AND product_url = ?",
        )?;
        let row = stmt.query_row(
            params![retailer.as_str(), batch_id, product_url],
            row_to_listing,
        );
        match row {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Distinct batch ids for a retailer, newest first.
    pub fn recent_batches(&self, retailer: Retailer, limit: u32) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT batch_id, MAX(crawled_at) AS latest FROM listings
            WHERE retailer = ?
            GROUP BY batch_id
            ORDER BY latest DESC
            LIMIT ?
        "#,
        )?;
        let ids = stmt
            .query_map(params![retailer.as_str(), limit], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

impl RecordSink for ListingRepository {
    type Record = ListingObservation;

    fn exists(&mut self, record: &ListingObservation) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM listings WHERE retailer = ? AND batch_id = ? AND product_url = ?",
            params![
                record.retailer.as_str(),
                record.batch_id,
                record.product_url
            ],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn insert_many(&mut self, records: &[&ListingObservation]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for record in records {
            let ranks = record.ranks();
            tx.execute(
                r#"
                INSERT INTO listings (
                    retailer, batch_id, calendar_week, product_url,
                    main_rank, bsr_rank, promotion_rank, trend_rank,
                    fields, crawled_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    record.retailer.as_str(),
                    record.batch_id,
                    record.calendar_week,
                    record.product_url,
                    ranks.main,
                    ranks.bsr,
                    ranks.promotion,
                    ranks.trend,
                    serde_json::to_string(&record.fields)?,
                    record.crawled_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn update(&mut self, record: &ListingObservation) -> Result<()> {
        let conn = self.connect()?;
        // Only the sighting page type's rank column is touched; the rank
        // column name comes from a closed enum, never from input.
        let column = record.page_type.rank_column();
        let sql = match self.policy {
            RankMergePolicy::Overwrite => format!(
                "UPDATE listings SET {col} = ?1
                 WHERE retailer = ?2 AND batch_id = ?3 AND product_url = ?4",
                col = column
            ),
            RankMergePolicy::FillIfAbsent => format!(
                "UPDATE listings SET {col} = COALESCE({col}, ?1)
                 WHERE retailer = ?2 AND batch_id = ?3 AND product_url = ?4",
                col = column
            ),
        };
        conn.execute(
            &sql,
            params![
                record.rank,
                record.retailer.as_str(),
                record.batch_id,
                record.product_url
            ],
        )?;
        Ok(())
    }

    fn describe(&self, record: &ListingObservation) -> String {
        serde_json::to_string(record).unwrap_or_else(|_| record.product_url.clone())
    }
}

fn row_to_listing(row: &Row) -> rusqlite::Result<ListingRow> {
    let fields_str: String = row.get("fields")?;
    let fields: BTreeMap<String, Option<String>> =
        serde_json::from_str(&fields_str).unwrap_or_default();

    Ok(ListingRow {
        retailer: Retailer::from_str(&row.get::<_, String>("retailer")?)
            .unwrap_or(Retailer::Amazon),
        batch_id: row.get("batch_id")?,
        calendar_week: row.get("calendar_week")?,
        product_url: row.get("product_url")?,
        ranks: RankSet {
            main: row.get::<_, Option<u32>>("main_rank")?,
            bsr: row.get::<_, Option<u32>>("bsr_rank")?,
            promotion: row.get::<_, Option<u32>>("promotion_rank")?,
            trend: row.get::<_, Option<u32>>("trend_rank")?,
        },
        fields,
        crawled_at: parse_datetime(&row.get::<_, String>("crawled_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageType;
    use crate::repository::writer::BulkWriter;
    use chrono::Utc;

    fn observation(page_type: PageType, url: &str, rank: u32) -> ListingObservation {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Some("Pixel 9".to_string()));
        fields.insert("price".to_string(), Some("699.00".to_string()));
        ListingObservation {
            retailer: Retailer::Amazon,
            batch_id: "a_20250123_143045".to_string(),
            calendar_week: "w4".to_string(),
            page_type,
            product_url: url.to_string(),
            rank,
            fields,
            crawled_at: Utc::now(),
        }
    }

    fn temp_repo(policy: RankMergePolicy) -> (tempfile::TempDir, ListingRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = ListingRepository::new(&dir.path().join("test.db"), policy).unwrap();
        (dir, repo)
    }

    #[test]
    fn duplicate_sighting_updates_rank_column_not_row_count() {
        let (_dir, mut repo) = temp_repo(RankMergePolicy::Overwrite);
        let writer = BulkWriter::default();

        let main = vec![
            observation(PageType::Main, "https://www.amazon.com/dp/B0TEST01", 1),
            observation(PageType::Main, "https://www.amazon.com/dp/B0TEST02", 2),
        ];
        let outcome = writer.upsert(&mut repo, &main);
        assert_eq!(outcome.inserted, 2);

        let bsr = vec![observation(
            PageType::Bsr,
            "https://www.amazon.com/dp/B0TEST01",
            5,
        )];
        let outcome = writer.upsert(&mut repo, &bsr);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.inserted, 0);

        let rows = repo
            .for_batch(Retailer::Amazon, "a_20250123_143045")
            .unwrap();
        assert_eq!(rows.len(), 2);
        let merged = rows
            .iter()
            .find(|r| r.product_url.ends_with("B0TEST01"))
            .unwrap();
        assert_eq!(merged.ranks.main, Some(1));
        assert_eq!(merged.ranks.bsr, Some(5));
    }

    #[test]
    fn reupserting_same_input_is_idempotent() {
        let (_dir, mut repo) = temp_repo(RankMergePolicy::Overwrite);
        let writer = BulkWriter::default();
        let records = vec![
            observation(PageType::Main, "https://www.amazon.com/dp/B0TEST01", 1),
            observation(PageType::Main, "https://www.amazon.com/dp/B0TEST02", 2),
        ];

        writer.upsert(&mut repo, &records);
        let second = writer.upsert(&mut repo, &records);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(
            repo.count_for_batch(Retailer::Amazon, "a_20250123_143045")
                .unwrap(),
            2
        );
    }

    #[test]
    fn fill_if_absent_keeps_first_rank() {
        let (_dir, mut repo) = temp_repo(RankMergePolicy::FillIfAbsent);
        let writer = BulkWriter::default();
        let url = "https://www.amazon.com/dp/B0TEST01";

        writer.upsert(&mut repo, &[observation(PageType::Bsr, url, 3)]);
        writer.upsert(&mut repo, &[observation(PageType::Bsr, url, 9)]);

        let row = repo
            .get(Retailer::Amazon, "a_20250123_143045", url)
            .unwrap()
            .unwrap();
        assert_eq!(row.ranks.bsr, Some(3));
    }

    #[test]
    fn written_row_reads_back_field_for_field() {
        let (_dir, mut repo) = temp_repo(RankMergePolicy::Overwrite);
        let obs = observation(PageType::Main, "https://www.amazon.com/dp/B0TEST01", 1);
        BulkWriter::default().upsert(&mut repo, std::slice::from_ref(&obs));

        let row = repo
            .get(Retailer::Amazon, &obs.batch_id, &obs.product_url)
            .unwrap()
            .unwrap();
        assert_eq!(row.fields, obs.fields);
        assert_eq!(row.calendar_week, obs.calendar_week);
        assert_eq!(row.ranks, obs.ranks());
    }

    #[test]
    fn batch_ordering_is_primary_rank_with_nulls_last() {
        let (_dir, mut repo) = temp_repo(RankMergePolicy::Overwrite);
        let writer = BulkWriter::default();
        writer.upsert(
            &mut repo,
            &[
                observation(PageType::Main, "https://www.amazon.com/dp/B0TEST03", 3),
                observation(PageType::Main, "https://www.amazon.com/dp/B0TEST01", 1),
                observation(PageType::Bsr, "https://www.amazon.com/dp/B0TEST09", 2),
            ],
        );

        let rows = repo
            .for_batch(Retailer::Amazon, "a_20250123_143045")
            .unwrap();
        let primaries: Vec<Option<u32>> = rows.iter().map(|r| r.ranks.primary()).collect();
        assert_eq!(primaries, vec![Some(1), Some(2), Some(3)]);
    }
}
