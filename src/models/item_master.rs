//! Item-master rows: cross-batch identity for retailer item ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Retailer;

/// Best-known SKU for a (retailer, item_id), independent of any batch.
///
/// A non-empty SKU is never overwritten; a row created with an empty SKU
/// may be filled exactly once when a later batch surfaces one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMasterRecord {
    pub retailer: Retailer,
    pub item_id: String,
    pub sku: Option<String>,
    pub first_seen_batch: String,
    pub updated_at: DateTime<Utc>,
}
