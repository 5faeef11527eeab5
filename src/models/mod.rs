//! Domain models for batches, listings, details, and item-master rows.

mod batch;
mod detail;
mod item_master;
mod listing;

pub use batch::{calendar_week, new_batch_id, Batch, PageType, Retailer};
pub use detail::DetailRecord;
pub use item_master::ItemMasterRecord;
pub use listing::{ListingObservation, ListingRow, RankMergePolicy, RankSet};
