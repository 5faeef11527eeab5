//! End-to-end store behavior through the public API: listing upserts,
//! detail snapshots, and item-master reconciliation against one database.

use std::collections::BTreeMap;

use chrono::Utc;
use tempfile::TempDir;

use shelfwatch::models::{
    DetailRecord, ListingObservation, ListingRow, PageType, RankMergePolicy, RankSet, Retailer,
};
use shelfwatch::repository::{
    BulkWriter, DetailRepository, ItemMasterRepository, ListingRepository, ReconcileAction,
};

const BATCH: &str = "a_20250123_143045";

fn observation(page_type: PageType, url: &str, rank: u32) -> ListingObservation {
    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), Some(format!("Product r{}", rank)));
    fields.insert("price".to_string(), Some("499.99".to_string()));
    ListingObservation {
        retailer: Retailer::Amazon,
        batch_id: BATCH.to_string(),
        calendar_week: "w4".to_string(),
        page_type,
        product_url: url.to_string(),
        rank,
        fields,
        crawled_at: Utc::now(),
    }
}

fn setup() -> (TempDir, ListingRepository, DetailRepository, ItemMasterRepository) {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("shelfwatch.db");
    let listings = ListingRepository::new(&db, RankMergePolicy::Overwrite).unwrap();
    let details = DetailRepository::new(&db).unwrap();
    let master = ItemMasterRepository::new(&db).unwrap();
    (dir, listings, details, master)
}

#[test]
fn listing_key_stays_unique_across_repeated_upserts() {
    let (_dir, mut listings, _details, _master) = setup();
    let writer = BulkWriter::new(20, 5);

    let main: Vec<ListingObservation> = (1..=30)
        .map(|i| {
            observation(
                PageType::Main,
                &format!("https://www.amazon.com/dp/B{:09}", i),
                i,
            )
        })
        .collect();

    // Three identical upserts; rows never duplicate.
    for pass in 0..3 {
        let outcome = writer.upsert(&mut listings, &main);
        if pass == 0 {
            assert_eq!(outcome.inserted, 30);
        } else {
            assert_eq!(outcome.inserted, 0);
            assert_eq!(outcome.updated, 30);
        }
        assert_eq!(outcome.inserted + outcome.updated + outcome.skipped, 30);
    }
    assert_eq!(listings.count_for_batch(Retailer::Amazon, BATCH).unwrap(), 30);

    // A bsr pass over three of the same products fills the second rank
    // column on the same rows.
    let bsr: Vec<ListingObservation> = (1..=3)
        .map(|i| {
            observation(
                PageType::Bsr,
                &format!("https://www.amazon.com/dp/B{:09}", i),
                i,
            )
        })
        .collect();
    let outcome = writer.upsert(&mut listings, &bsr);
    assert_eq!(outcome.updated, 3);
    assert_eq!(listings.count_for_batch(Retailer::Amazon, BATCH).unwrap(), 30);

    let rows = listings.for_batch(Retailer::Amazon, BATCH).unwrap();
    let merged = rows
        .iter()
        .find(|r| r.product_url.ends_with("B000000002"))
        .unwrap();
    assert_eq!(merged.ranks.main, Some(2));
    assert_eq!(merged.ranks.bsr, Some(2));
}

#[test]
fn detail_snapshot_written_once_and_read_back() {
    let (_dir, _listings, mut details, _master) = setup();
    let writer = BulkWriter::new(20, 5);

    let listing = ListingRow {
        retailer: Retailer::Amazon,
        batch_id: BATCH.to_string(),
        calendar_week: "w4".to_string(),
        product_url: "https://www.amazon.com/dp/B000000001".to_string(),
        ranks: RankSet::single(PageType::Main, 1),
        fields: BTreeMap::new(),
        crawled_at: Utc::now(),
    };
    let mut record = DetailRecord::from_listing(&listing, Some("B000000001".to_string()));
    record.sku = Some("GA05570-US".to_string());
    record.review_count = Some(218);
    record.rating_avg = Some(4.3);

    let outcome = writer.upsert(&mut details, std::slice::from_ref(&record));
    assert_eq!(outcome.inserted, 1);

    let rows = details.for_batch(Retailer::Amazon, BATCH).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].sku, record.sku);
    assert_eq!(rows[0].review_count, record.review_count);
    assert_eq!(rows[0].item_id, record.item_id);
}

#[test]
fn item_master_reconciliation_is_idempotent_and_sku_never_regresses() {
    let (_dir, _listings, _details, master) = setup();

    // First batch sees the item without a SKU.
    assert_eq!(
        master
            .reconcile(Retailer::Amazon, "B000000001", None, "a_1")
            .unwrap(),
        ReconcileAction::Inserted
    );
    // A later batch supplies one; it sticks exactly once.
    assert_eq!(
        master
            .reconcile(Retailer::Amazon, "B000000001", Some("GA05570-US"), "a_2")
            .unwrap(),
        ReconcileAction::Updated
    );
    // Re-running the same reconciliation changes nothing further.
    for _ in 0..2 {
        assert_eq!(
            master
                .reconcile(Retailer::Amazon, "B000000001", Some("OTHER-SKU"), "a_3")
                .unwrap(),
            ReconcileAction::Skipped
        );
    }

    assert_eq!(master.count(Retailer::Amazon).unwrap(), 1);
    let row = master.get(Retailer::Amazon, "B000000001").unwrap().unwrap();
    assert_eq!(row.sku.as_deref(), Some("GA05570-US"));
    assert_eq!(row.first_seen_batch, "a_1");
}
