//! Crawl stages: listing collection and detail enrichment.

mod detail;
mod listing;

pub use detail::{dedupe_listings, DetailCrawl};
pub use listing::ListingCrawl;

use std::time::Duration;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::browser::Browser;

/// Errors that abort a whole crawl stage. Anything below stage level
/// (field, record, page) is recovered in place and never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("no {what} configured for {retailer}/{page_type}")]
    MissingConfig {
        what: &'static str,
        retailer: &'static str,
        page_type: String,
    },

    #[error("invalid item-id pattern: {0}")]
    BadItemIdPattern(#[from] regex::Error),
}

/// Timing knobs for crawl stages. All waits are explicit and bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pacing {
    /// Jittered settle delay after navigation, milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: (u64, u64),
    /// Re-checks when a page rendered fewer items than expected.
    #[serde(default = "default_content_retries")]
    pub content_retries: u32,
    /// Base delay between content re-checks, milliseconds.
    #[serde(default = "default_content_retry_ms")]
    pub content_retry_ms: u64,
    /// Items a listing page is expected to render per page.
    #[serde(default = "default_expected_per_page")]
    pub expected_per_page: usize,
    /// Hard bound on pages walked per listing stage.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_settle_ms() -> (u64, u64) {
    (1200, 2600)
}

fn default_content_retries() -> u32 {
    3
}

fn default_content_retry_ms() -> u64 {
    1500
}

fn default_expected_per_page() -> usize {
    10
}

fn default_max_pages() -> u32 {
    50
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            content_retries: default_content_retries(),
            content_retry_ms: default_content_retry_ms(),
            expected_per_page: default_expected_per_page(),
            max_pages: default_max_pages(),
        }
    }
}

impl Pacing {
    /// Settle-delay range as an inclusive range for the jitter helpers.
    pub fn settle_range(&self) -> std::ops::RangeInclusive<u64> {
        self.settle_ms.0..=self.settle_ms.1
    }
}

/// Count elements matching a selector in rendered HTML.
pub(crate) fn count_matches(html: &str, selector: &Selector) -> usize {
    Html::parse_document(html).select(selector).count()
}

/// Re-read page content until at least `expected` containers rendered,
/// with bounded attempts and growing backoff. Returns the last HTML seen;
/// dynamic listings often trickle in after the document settles.
pub(crate) async fn wait_for_items(
    browser: &mut dyn Browser,
    mut html: String,
    selector: &Selector,
    expected: usize,
    retries: u32,
    base_delay: Duration,
) -> String {
    let mut found = count_matches(&html, selector);
    let mut attempt = 0;
    while found < expected && attempt < retries {
        attempt += 1;
        let backoff = base_delay * attempt;
        debug!(
            "{} of {} items rendered, re-checking in {:?} (attempt {}/{})",
            found, expected, backoff, attempt, retries
        );
        tokio::time::sleep(backoff).await;
        match browser.content().await {
            Ok(next) => {
                html = next;
                found = count_matches(&html, selector);
            }
            Err(e) => {
                warn!("content re-check failed: {}", e);
                break;
            }
        }
    }
    html
}

/// Canonicalize a possibly-relative product link against a base URL:
/// absolute, no query, no fragment.
pub(crate) fn canonical_url(base: &str, link: &str) -> Option<String> {
    let base = url::Url::parse(base).ok()?;
    let mut joined = base.join(link).ok()?;
    joined.set_query(None);
    joined.set_fragment(None);
    Some(joined.to_string())
}
