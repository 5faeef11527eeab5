//! Detail records: one enrichment snapshot per product per batch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ListingRow, Retailer};

/// A listing row enriched from the product's detail page.
///
/// Created once per (retailer, batch_id, product_url) and never updated;
/// history accumulates across batches. Detail fields stay null when the
/// detail crawl degraded to listing-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailRecord {
    pub retailer: Retailer,
    pub batch_id: String,
    pub calendar_week: String,
    pub product_url: String,
    /// Retailer item identifier parsed from the canonical URL
    /// (ASIN, SKU id, item id), not from page content.
    pub item_id: Option<String>,
    /// Manufacturer SKU/model code extracted from the detail page,
    /// when the retailer exposes one. Feeds item-master reconciliation.
    pub sku: Option<String>,
    pub review_count: Option<u32>,
    pub rating_avg: Option<f64>,
    /// Review counts bucketed by star value, 1 through 5.
    pub star_histogram: BTreeMap<u8, u32>,
    /// Specification fields: storage, color, carrier, bundle, ...
    pub specs: BTreeMap<String, Option<String>>,
    /// URLs of similar products surfaced on the detail page.
    pub similar: Vec<String>,
    /// Listing fields carried forward from the listing row.
    pub listing_fields: BTreeMap<String, Option<String>>,
    /// Rank columns carried forward from the listing row.
    pub ranks: super::RankSet,
    pub crawled_at: DateTime<Utc>,
}

impl DetailRecord {
    /// A detail record holding only listing data; the degraded fallback
    /// when the detail crawl fails for a product.
    pub fn from_listing(listing: &ListingRow, item_id: Option<String>) -> Self {
        Self {
            retailer: listing.retailer,
            batch_id: listing.batch_id.clone(),
            calendar_week: listing.calendar_week.clone(),
            product_url: listing.product_url.clone(),
            item_id,
            sku: None,
            review_count: None,
            rating_avg: None,
            star_histogram: BTreeMap::new(),
            specs: BTreeMap::new(),
            similar: Vec::new(),
            listing_fields: listing.fields.clone(),
            ranks: listing.ranks.clone(),
            crawled_at: Utc::now(),
        }
    }
}
