//! Existence-checked bulk upserts with tiered retry.
//!
//! Storage hiccups must never cost a whole batch of crawled records, so
//! inserts escalate through three tiers: full batches, smaller sub-batches,
//! then single rows. Each tier is one transaction per attempt (the sink
//! rolls a failed attempt back before the next tier runs), and a row that
//! fails alone is logged with its full serialized form and skipped.

use tracing::{error, warn};

use super::Result;

/// Storage target the writer upserts into.
///
/// `insert_many` must be all-or-nothing: one transaction committed on
/// success and rolled back on failure.
pub trait RecordSink {
    type Record;

    /// Whether a row with this record's natural key already exists.
    fn exists(&mut self, record: &Self::Record) -> Result<bool>;

    /// Insert all records in one transaction.
    fn insert_many(&mut self, records: &[&Self::Record]) -> Result<()>;

    /// Apply one record as an update, in its own transaction.
    fn update(&mut self, record: &Self::Record) -> Result<()>;

    /// Serialized form of a record for skip logs; detailed enough to
    /// reproduce the write by hand.
    fn describe(&self, record: &Self::Record) -> String;
}

/// Counts from one upsert call. Every input record lands in exactly one
/// bucket: `inserted + updated + skipped` equals the input length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Bulk writer with existence classification and tiered insert retry.
#[derive(Debug, Clone, Copy)]
pub struct BulkWriter {
    batch_size: usize,
    retry_size: usize,
}

impl Default for BulkWriter {
    fn default() -> Self {
        Self::new(20, 5)
    }
}

impl BulkWriter {
    pub fn new(batch_size: usize, retry_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            retry_size: retry_size.max(1),
        }
    }

    /// Upsert `records` into `sink`, returning per-bucket counts.
    ///
    /// Existing rows (by natural key) are routed to `update`, one
    /// transaction each; new rows are inserted through the tier ladder.
    /// No failure short of the store being unreachable aborts the
    /// remaining rows.
    pub fn upsert<S: RecordSink>(&self, sink: &mut S, records: &[S::Record]) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        if records.is_empty() {
            return outcome;
        }

        let mut updates: Vec<&S::Record> = Vec::new();
        let mut inserts: Vec<&S::Record> = Vec::new();
        for record in records {
            match sink.exists(record) {
                Ok(true) => updates.push(record),
                Ok(false) => inserts.push(record),
                Err(e) => {
                    // Route to insert; a broken store will surface again
                    // there and the row gets skip-logged, not lost silently.
                    warn!("existence check failed ({}), treating as new", e);
                    inserts.push(record);
                }
            }
        }

        for record in updates {
            match sink.update(record) {
                Ok(()) => outcome.updated += 1,
                Err(e) => {
                    error!(
                        "update failed, skipping row: {}: {}",
                        e,
                        sink.describe(record)
                    );
                    outcome.skipped += 1;
                }
            }
        }

        for chunk in inserts.chunks(self.batch_size) {
            self.insert_tiered(sink, chunk, &mut outcome);
        }

        outcome
    }

    fn insert_tiered<S: RecordSink>(
        &self,
        sink: &mut S,
        chunk: &[&S::Record],
        outcome: &mut WriteOutcome,
    ) {
        if self.try_insert(sink, chunk) {
            outcome.inserted += chunk.len();
            return;
        }
        warn!(
            "batch insert of {} rows failed, retrying in sub-batches of {}",
            chunk.len(),
            self.retry_size
        );

        for sub in chunk.chunks(self.retry_size) {
            if self.try_insert(sink, sub) {
                outcome.inserted += sub.len();
                continue;
            }
            warn!(
                "sub-batch insert of {} rows failed, falling back to single rows",
                sub.len()
            );
            for record in sub {
                if self.try_insert(sink, std::slice::from_ref(record)) {
                    outcome.inserted += 1;
                } else {
                    error!("row insert failed, skipping: {}", sink.describe(record));
                    outcome.skipped += 1;
                }
            }
        }
    }

    fn try_insert<S: RecordSink>(&self, sink: &mut S, records: &[&S::Record]) -> bool {
        match sink.insert_many(records) {
            Ok(()) => true,
            Err(e) => {
                warn!("insert attempt of {} rows failed: {}", records.len(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemSink {
        rows: Vec<String>,
        poison: Option<String>,
        fail_updates: bool,
        touched: bool,
    }

    impl MemSink {
        fn new() -> Self {
            Self {
                rows: Vec::new(),
                poison: None,
                fail_updates: false,
                touched: false,
            }
        }
    }

    impl RecordSink for MemSink {
        type Record = String;

        fn exists(&mut self, record: &String) -> Result<bool> {
            self.touched = true;
            Ok(self.rows.contains(record))
        }

        fn insert_many(&mut self, records: &[&String]) -> Result<()> {
            self.touched = true;
            if let Some(poison) = &self.poison {
                if records.iter().any(|r| *r == poison) {
                    return Err(crate::repository::RepositoryError::Invalid(
                        "constraint violation".into(),
                    ));
                }
            }
            self.rows.extend(records.iter().map(|r| (*r).clone()));
            Ok(())
        }

        fn update(&mut self, record: &String) -> Result<()> {
            self.touched = true;
            if self.fail_updates {
                return Err(crate::repository::RepositoryError::Invalid(
                    "update failed".into(),
                ));
            }
            let _ = record;
            Ok(())
        }

        fn describe(&self, record: &String) -> String {
            record.clone()
        }
    }

    #[test]
    fn empty_upsert_never_touches_storage() {
        let mut sink = MemSink::new();
        let outcome = BulkWriter::default().upsert(&mut sink, &[]);
        assert_eq!(outcome, WriteOutcome::default());
        assert!(!sink.touched);
    }

    #[test]
    fn poisoned_record_is_isolated_and_skipped() {
        let mut sink = MemSink::new();
        sink.poison = Some("rec07".to_string());
        let records: Vec<String> = (1..=20).map(|i| format!("rec{:02}", i)).collect();

        let outcome = BulkWriter::new(20, 5).upsert(&mut sink, &records);
        assert_eq!(outcome.inserted, 19);
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(sink.rows.len(), 19);
        assert!(!sink.rows.contains(&"rec07".to_string()));
    }

    #[test]
    fn existing_rows_route_to_update() {
        let mut sink = MemSink::new();
        sink.rows.push("known".to_string());
        let records = vec!["known".to_string(), "new".to_string()];

        let outcome = BulkWriter::default().upsert(&mut sink, &records);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn failed_update_skips_without_blocking_rest() {
        let mut sink = MemSink::new();
        sink.rows.push("a".to_string());
        sink.rows.push("b".to_string());
        sink.fail_updates = true;
        let records = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let outcome = BulkWriter::default().upsert(&mut sink, &records);
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.inserted, 1);
    }

    #[test]
    fn every_record_lands_in_exactly_one_bucket() {
        let mut sink = MemSink::new();
        sink.poison = Some("rec13".to_string());
        sink.rows.push("rec02".to_string());
        let records: Vec<String> = (1..=30).map(|i| format!("rec{:02}", i)).collect();

        let outcome = BulkWriter::new(10, 3).upsert(&mut sink, &records);
        assert_eq!(
            outcome.inserted + outcome.updated + outcome.skipped,
            records.len()
        );
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.updated, 1);
    }
}
