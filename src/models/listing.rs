//! Listing records: one row per product observed on a listing-type page.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PageType, Retailer};

/// How a rank column behaves when the same product is sighted again
/// within the same batch by a later listing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMergePolicy {
    /// The new sighting always rewrites the page type's rank column.
    Overwrite,
    /// The new sighting only fills the column if it is still null.
    FillIfAbsent,
}

/// Per-page-type rank columns of a stored listing row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankSet {
    pub main: Option<u32>,
    pub bsr: Option<u32>,
    pub promotion: Option<u32>,
    pub trend: Option<u32>,
}

impl RankSet {
    /// A rank set with a single column populated.
    pub fn single(page_type: PageType, rank: u32) -> Self {
        let mut set = Self::default();
        set.set(page_type, rank);
        set
    }

    pub fn get(&self, page_type: PageType) -> Option<u32> {
        match page_type {
            PageType::Main => self.main,
            PageType::Bsr => self.bsr,
            PageType::Promotion => self.promotion,
            PageType::Trend => self.trend,
        }
    }

    pub fn set(&mut self, page_type: PageType, rank: u32) {
        let slot = match page_type {
            PageType::Main => &mut self.main,
            PageType::Bsr => &mut self.bsr,
            PageType::Promotion => &mut self.promotion,
            PageType::Trend => &mut self.trend,
        };
        *slot = Some(rank);
    }

    /// The rank used for detail-stage ordering: the first populated column
    /// in main, bsr, promotion, trend order.
    pub fn primary(&self) -> Option<u32> {
        self.main.or(self.bsr).or(self.promotion).or(self.trend)
    }

    /// Merge another sighting's columns into this set under a policy.
    /// Only columns populated on `other` are considered.
    pub fn merge(&mut self, other: &RankSet, policy: RankMergePolicy) {
        for page_type in [
            PageType::Main,
            PageType::Bsr,
            PageType::Promotion,
            PageType::Trend,
        ] {
            if let Some(rank) = other.get(page_type) {
                match policy {
                    RankMergePolicy::Overwrite => self.set(page_type, rank),
                    RankMergePolicy::FillIfAbsent => {
                        if self.get(page_type).is_none() {
                            self.set(page_type, rank);
                        }
                    }
                }
            }
        }
    }
}

/// A single product sighting produced by a listing crawl stage.
///
/// Observations carry one rank for one page type; the repository folds
/// them into [`ListingRow`]s with per-page-type rank columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingObservation {
    pub retailer: Retailer,
    pub batch_id: String,
    pub calendar_week: String,
    pub page_type: PageType,
    /// Canonical absolute product URL; the natural key with batch_id.
    pub product_url: String,
    /// 1-based position in extraction order within this pass.
    pub rank: u32,
    /// Dynamic commerce fields (name, price, shipping, discount, ...).
    /// A failed extraction leaves the field present with a null value.
    pub fields: BTreeMap<String, Option<String>>,
    pub crawled_at: DateTime<Utc>,
}

impl ListingObservation {
    pub fn ranks(&self) -> RankSet {
        RankSet::single(self.page_type, self.rank)
    }
}

/// A stored listing row, unique per (retailer, batch_id, product_url).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRow {
    pub retailer: Retailer,
    pub batch_id: String,
    pub calendar_week: String,
    pub product_url: String,
    pub ranks: RankSet,
    pub fields: BTreeMap<String, Option<String>>,
    pub crawled_at: DateTime<Utc>,
}

impl From<&ListingObservation> for ListingRow {
    fn from(obs: &ListingObservation) -> Self {
        Self {
            retailer: obs.retailer,
            batch_id: obs.batch_id.clone(),
            calendar_week: obs.calendar_week.clone(),
            product_url: obs.product_url.clone(),
            ranks: obs.ranks(),
            fields: obs.fields.clone(),
            crawled_at: obs.crawled_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrite_rewrites_sighted_column_only() {
        let mut ranks = RankSet::single(PageType::Main, 3);
        ranks.set(PageType::Bsr, 10);
        ranks.merge(&RankSet::single(PageType::Bsr, 7), RankMergePolicy::Overwrite);
        assert_eq!(ranks.main, Some(3));
        assert_eq!(ranks.bsr, Some(7));
    }

    #[test]
    fn merge_fill_if_absent_keeps_existing() {
        let mut ranks = RankSet::single(PageType::Bsr, 10);
        ranks.merge(
            &RankSet::single(PageType::Bsr, 7),
            RankMergePolicy::FillIfAbsent,
        );
        assert_eq!(ranks.bsr, Some(10));
        ranks.merge(
            &RankSet::single(PageType::Main, 2),
            RankMergePolicy::FillIfAbsent,
        );
        assert_eq!(ranks.main, Some(2));
    }

    #[test]
    fn primary_rank_prefers_main() {
        let mut ranks = RankSet::single(PageType::Trend, 5);
        assert_eq!(ranks.primary(), Some(5));
        ranks.set(PageType::Main, 9);
        assert_eq!(ranks.primary(), Some(9));
    }
}
