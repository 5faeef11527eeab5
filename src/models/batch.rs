//! Batch identity: one batch per pipeline run.
//!
//! A batch id is retailer-prefixed and timestamped to the second
//! (e.g. `a_20250123_143045`). Every row written during a run carries
//! the batch id, which makes re-runs and reconciliation groupable.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Retailers the pipeline knows how to crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retailer {
    Amazon,
    BestBuy,
    Walmart,
}

impl Retailer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::BestBuy => "bestbuy",
            Self::Walmart => "walmart",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "amazon" => Some(Self::Amazon),
            "bestbuy" => Some(Self::BestBuy),
            "walmart" => Some(Self::Walmart),
            _ => None,
        }
    }

    /// Single-letter batch-id prefix for this retailer.
    pub fn prefix(&self) -> char {
        match self {
            Self::Amazon => 'a',
            Self::BestBuy => 'b',
            Self::Walmart => 'w',
        }
    }
}

impl std::fmt::Display for Retailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Retailer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_str(s).ok_or_else(|| {
            format!(
                "unknown retailer '{}'. Valid retailers: amazon, bestbuy, walmart",
                s
            )
        })
    }
}

/// Listing page families a crawl stage can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Main,
    Bsr,
    Promotion,
    Trend,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Bsr => "bsr",
            Self::Promotion => "promotion",
            Self::Trend => "trend",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "main" => Some(Self::Main),
            "bsr" => Some(Self::Bsr),
            "promotion" => Some(Self::Promotion),
            "trend" => Some(Self::Trend),
            _ => None,
        }
    }

    /// Column in the listing table that holds this page type's rank.
    pub fn rank_column(&self) -> &'static str {
        match self {
            Self::Main => "main_rank",
            Self::Bsr => "bsr_rank",
            Self::Promotion => "promotion_rank",
            Self::Trend => "trend_rank",
        }
    }
}

impl std::fmt::Display for PageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a batch id for a retailer at the given instant.
///
/// Unknown retailers (None) fall back to the `x` prefix. Collisions within
/// the same second are accepted; one operator runs one pipeline at a time.
pub fn new_batch_id(retailer: Option<Retailer>, at: DateTime<Utc>) -> String {
    let prefix = retailer.map(|r| r.prefix()).unwrap_or('x');
    format!("{}_{}", prefix, at.format("%Y%m%d_%H%M%S"))
}

/// Calendar-week tag for the given instant, ISO-8601 week numbering.
pub fn calendar_week(at: DateTime<Utc>) -> String {
    format!("w{}", at.iso_week().week())
}

/// One complete pipeline run. Immutable once created; threads through
/// every row written during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub retailer: Retailer,
    pub calendar_week: String,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Create a fresh batch for a run starting now.
    pub fn create(retailer: Retailer) -> Self {
        let now = Utc::now();
        Self {
            batch_id: new_batch_id(Some(retailer), now),
            retailer,
            calendar_week: calendar_week(now),
            created_at: now,
        }
    }

    /// Rebuild a batch handle for resuming an earlier run under its id.
    pub fn resume(retailer: Retailer, batch_id: &str) -> Self {
        let now = Utc::now();
        Self {
            batch_id: batch_id.to_string(),
            retailer,
            calendar_week: calendar_week(now),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn batch_id_is_prefixed_and_timestamped() {
        let at = Utc.with_ymd_and_hms(2025, 1, 23, 14, 30, 45).unwrap();
        assert_eq!(
            new_batch_id(Some(Retailer::Amazon), at),
            "a_20250123_143045"
        );
        assert_eq!(
            new_batch_id(Some(Retailer::BestBuy), at),
            "b_20250123_143045"
        );
        assert_eq!(
            new_batch_id(Some(Retailer::Walmart), at),
            "w_20250123_143045"
        );
    }

    #[test]
    fn unknown_retailer_gets_x_prefix() {
        let at = Utc.with_ymd_and_hms(2025, 1, 23, 14, 30, 45).unwrap();
        assert_eq!(new_batch_id(None, at), "x_20250123_143045");
    }

    #[test]
    fn calendar_week_uses_iso_numbering() {
        // 2025-01-23 falls in ISO week 4.
        let at = Utc.with_ymd_and_hms(2025, 1, 23, 0, 0, 0).unwrap();
        assert_eq!(calendar_week(at), "w4");
        // 2024-12-30 belongs to ISO week 1 of 2025.
        let at = Utc.with_ymd_and_hms(2024, 12, 30, 0, 0, 0).unwrap();
        assert_eq!(calendar_week(at), "w1");
    }

    #[test]
    fn page_type_round_trips() {
        for pt in [
            PageType::Main,
            PageType::Bsr,
            PageType::Promotion,
            PageType::Trend,
        ] {
            assert_eq!(PageType::from_str(pt.as_str()), Some(pt));
        }
        assert_eq!(PageType::from_str("weekly"), None);
    }
}
