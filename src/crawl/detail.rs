//! Detail enrichment stage: one snapshot per listed product.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use regex::Regex;
use scraper::Html;
use tracing::{debug, info, warn};

use super::{canonical_url, CrawlError, Pacing};
use crate::antibot::{AntiBotHandler, ChallengeOutcome};
use crate::browser::Browser;
use crate::extract;
use crate::models::{DetailRecord, ListingRow, RankMergePolicy};
use crate::repository::PageSelectors;
use crate::retailers::{parse_item_id, RetailerProfile};
use crate::session::SessionStore;
use crate::utils::jitter_sleep;

/// Cap on similar-product references carried per record.
const MAX_SIMILAR: usize = 12;

/// Deduplicate a batch's listings by product URL, keeping rank order.
///
/// The first occurrence wins for carried-forward listing fields; later
/// occurrences only augment rank columns under the retailer's merge policy.
pub fn dedupe_listings(rows: Vec<ListingRow>, policy: RankMergePolicy) -> Vec<ListingRow> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut deduped: Vec<ListingRow> = Vec::new();
    for row in rows {
        match seen.get(&row.product_url) {
            Some(&idx) => {
                let ranks = row.ranks.clone();
                deduped[idx].ranks.merge(&ranks, policy);
            }
            None => {
                seen.insert(row.product_url.clone(), deduped.len());
                deduped.push(row);
            }
        }
    }
    deduped
}

/// Generic detail-page enricher, parameterized by the retailer profile's
/// item-id URL pattern and the detail selector set.
pub struct DetailCrawl<'a> {
    browser: &'a mut dyn Browser,
    antibot: &'a AntiBotHandler,
    selectors: &'a PageSelectors,
    pacing: &'a Pacing,
    item_id_re: Regex,
}

impl<'a> DetailCrawl<'a> {
    pub fn new(
        browser: &'a mut dyn Browser,
        antibot: &'a AntiBotHandler,
        selectors: &'a PageSelectors,
        pacing: &'a Pacing,
        profile: &RetailerProfile,
    ) -> Result<Self, CrawlError> {
        Ok(Self {
            browser,
            antibot,
            selectors,
            pacing,
            item_id_re: profile.item_id_regex()?,
        })
    }

    /// Enrich every listing row, in the given (rank) order.
    ///
    /// A product whose detail crawl fails is never dropped: it degrades to
    /// a listing-only record with detail fields left null. The first
    /// successfully enriched record pins the browser session to disk.
    pub async fn enrich(
        &mut self,
        listings: &[ListingRow],
        session: Option<&SessionStore>,
    ) -> Vec<DetailRecord> {
        let mut records = Vec::with_capacity(listings.len());
        let mut session_saved = false;

        for listing in listings {
            let item_id = parse_item_id(&self.item_id_re, &listing.product_url);
            match self.crawl_detail(listing, item_id.clone()).await {
                Ok(record) => {
                    if !session_saved {
                        if let Some(store) = session {
                            if let Err(e) = store.save(listing.retailer, self.browser).await {
                                warn!("session save failed: {}", e);
                            }
                            session_saved = true;
                        }
                    }
                    records.push(record);
                }
                Err(e) => {
                    warn!(
                        "detail crawl failed for {} ({}), keeping listing data",
                        listing.product_url, e
                    );
                    records.push(DetailRecord::from_listing(listing, item_id));
                }
            }
        }

        info!(
            "enriched {} of {} products",
            records
                .iter()
                .filter(|r| r.review_count.is_some() || r.sku.is_some())
                .count(),
            listings.len()
        );
        records
    }

    async fn crawl_detail(
        &mut self,
        listing: &ListingRow,
        item_id: Option<String>,
    ) -> Result<DetailRecord> {
        self.browser.navigate(&listing.product_url).await?;
        jitter_sleep(self.pacing.settle_range()).await;

        let mut html = self.browser.content().await?;
        if self.antibot.detect(&html) {
            // Detail pages get the longer manual window; the handler was
            // built with it by the caller.
            match self.antibot.resolve(&html, self.browser).await {
                ChallengeOutcome::Resolved => html = self.browser.content().await?,
                ChallengeOutcome::Unresolved => bail!("unresolved bot challenge"),
            }
        }

        // Review aggregates and similar-product carousels lazy-render
        // below the fold; nudge them before the first extraction pass.
        if self.browser.scroll_by(1800).await.is_ok() {
            jitter_sleep(self.pacing.settle_range()).await;
            if let Ok(fresh) = self.browser.content().await {
                html = fresh;
            }
        }

        let mut record = DetailRecord::from_listing(listing, item_id);
        self.apply_fields(&html, &listing.product_url, &mut record);

        // Some fields only render after an interaction (expand a collapsed
        // spec table, open the reviews sub-view). Each interaction is
        // isolated: a failed expand never costs the already-visible fields.
        for (name, locator) in &self.selectors.fields {
            if !name.starts_with("expand_") {
                continue;
            }
            let control = match scraper::Selector::parse(&locator.selector) {
                Ok(sel) => sel,
                Err(_) => continue,
            };
            if super::count_matches(&html, &control) == 0 {
                continue;
            }
            if let Err(e) = self.browser.click(&locator.selector).await {
                debug!("interaction {} failed: {}", name, e);
                continue;
            }
            jitter_sleep(self.pacing.settle_range()).await;
            match self.browser.content().await {
                Ok(fresh) => {
                    html = fresh;
                    self.apply_fields(&html, &listing.product_url, &mut record);
                }
                Err(e) => debug!("re-read after {} failed: {}", name, e),
            }
        }

        Ok(record)
    }

    /// Second and later passes only fill fields still missing.
    fn apply_fields(&self, html: &str, base_url: &str, record: &mut DetailRecord) {
        let document = Html::parse_document(html);

        for (name, locator) in &self.selectors.fields {
            match name.as_str() {
                "review_count" => {
                    if record.review_count.is_none() {
                        record.review_count = extract::from_document(&document, locator)
                            .as_deref()
                            .and_then(extract::parse_count);
                    }
                }
                "rating_avg" => {
                    if record.rating_avg.is_none() {
                        record.rating_avg = extract::from_document(&document, locator)
                            .as_deref()
                            .and_then(extract::parse_rating);
                    }
                }
                "sku" => {
                    if record.sku.is_none() {
                        record.sku = extract::from_document(&document, locator);
                    }
                }
                "similar" => {
                    if record.similar.is_empty() {
                        let mut similar: Vec<String> = extract::all_from_document(&document, locator)
                            .iter()
                            .filter_map(|link| canonical_url(base_url, link))
                            .collect();
                        similar.dedup();
                        similar.truncate(MAX_SIMILAR);
                        record.similar = similar;
                    }
                }
                _ if name.starts_with("star_") => {
                    if let Ok(star) = name["star_".len()..].parse::<u8>() {
                        if !record.star_histogram.contains_key(&star) {
                            if let Some(count) = extract::from_document(&document, locator)
                                .as_deref()
                                .and_then(extract::parse_count)
                            {
                                record.star_histogram.insert(star, count);
                            }
                        }
                    }
                }
                _ if name.starts_with("expand_") => {}
                _ => {
                    // Everything else is a specification field; spec_
                    // prefixes are stripped for the stored key.
                    let key = name.strip_prefix("spec_").unwrap_or(name).to_string();
                    let entry = record.specs.entry(key).or_insert(None);
                    if entry.is_none() {
                        *entry = extract::from_document(&document, locator);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::MockBrowser;
    use crate::models::{PageType, RankSet, Retailer};
    use crate::repository::FieldLocator;
    use crate::retailers;
    use chrono::Utc;
    use std::time::Duration;

    fn listing(url: &str, rank: u32) -> ListingRow {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Some(format!("Product {}", rank)));
        ListingRow {
            retailer: Retailer::Amazon,
            batch_id: "a_20250123_143045".to_string(),
            calendar_week: "w4".to_string(),
            product_url: url.to_string(),
            ranks: RankSet::single(PageType::Main, rank),
            fields,
            crawled_at: Utc::now(),
        }
    }

    fn detail_selectors() -> PageSelectors {
        let mut fields = BTreeMap::new();
        fields.insert(
            "review_count".to_string(),
            FieldLocator::text("#review-count"),
        );
        fields.insert("rating_avg".to_string(), FieldLocator::text("#rating"));
        fields.insert("sku".to_string(), FieldLocator::text("#model"));
        fields.insert("spec_storage".to_string(), FieldLocator::text("#storage"));
        fields.insert("spec_color".to_string(), FieldLocator::text("#color"));
        fields.insert("similar".to_string(), FieldLocator::attr(".similar a", "href"));
        fields.insert("star_5".to_string(), FieldLocator::text("#star5"));
        fields.insert("star_1".to_string(), FieldLocator::text("#star1"));
        fields.insert(
            "expand_reviews".to_string(),
            FieldLocator::text("#see-all-reviews"),
        );
        PageSelectors {
            url_template: None,
            container: None,
            fields,
        }
    }

    fn pacing() -> Pacing {
        Pacing {
            settle_ms: (0, 1),
            content_retries: 1,
            content_retry_ms: 1,
            expected_per_page: 1,
            max_pages: 5,
        }
    }

    fn antibot() -> AntiBotHandler {
        AntiBotHandler::new(&["robot or human"], &[], &[])
            .with_manual_wait(Duration::from_millis(2))
    }

    const DETAIL_PAGE: &str = r#"<html><body>
        <div id="model">SM-TEST-9</div>
        <div id="rating">4.4 out of 5 stars</div>
        <div id="review-count">1,204 ratings</div>
        <div id="storage">256 GB</div>
        <div class="similar">
            <a href="/dp/B0SIMILAR1">s1</a>
            <a href="/dp/B0SIMILAR2?ref=x">s2</a>
        </div>
        <div id="star5">840</div>
        <div id="star1">31</div>
    </body></html>"#;

    #[tokio::test]
    async fn detail_page_enriches_listing_record() {
        let url = "https://www.amazon.com/Pixel/dp/B0TESTAAAA";
        let mut browser = MockBrowser::new().page(url, DETAIL_PAGE);
        let sel = detail_selectors();
        let pacing = pacing();
        let antibot = antibot();
        let mut stage = DetailCrawl::new(
            &mut browser,
            &antibot,
            &sel,
            &pacing,
            retailers::profile(Retailer::Amazon),
        )
        .unwrap();

        let records = stage.enrich(&[listing(url, 1)], None).await;
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.item_id.as_deref(), Some("B0TESTAAAA"));
        assert_eq!(record.sku.as_deref(), Some("SM-TEST-9"));
        assert_eq!(record.review_count, Some(1204));
        assert_eq!(record.rating_avg, Some(4.4));
        assert_eq!(
            record.specs.get("storage").and_then(|v| v.as_deref()),
            Some("256 GB")
        );
        assert_eq!(record.specs.get("color"), Some(&None));
        assert_eq!(record.star_histogram.get(&5), Some(&840));
        assert_eq!(record.star_histogram.get(&1), Some(&31));
        assert_eq!(record.similar.len(), 2);
        assert!(record.similar[1].ends_with("/dp/B0SIMILAR2"));
        assert_eq!(record.listing_fields.get("name").unwrap().as_deref(), Some("Product 1"));
    }

    #[tokio::test]
    async fn failed_detail_crawl_degrades_to_listing_only() {
        let url = "https://www.amazon.com/Pixel/dp/B0TESTBBBB";
        let mut browser = MockBrowser::new().fail_navigation(url);
        let sel = detail_selectors();
        let pacing = pacing();
        let antibot = antibot();
        let mut stage = DetailCrawl::new(
            &mut browser,
            &antibot,
            &sel,
            &pacing,
            retailers::profile(Retailer::Amazon),
        )
        .unwrap();

        let records = stage.enrich(&[listing(url, 3)], None).await;
        assert_eq!(records.len(), 1);
        let record = &records[0];
        // Identifier still parses from the URL; detail fields stay null.
        assert_eq!(record.item_id.as_deref(), Some("B0TESTBBBB"));
        assert_eq!(record.review_count, None);
        assert_eq!(record.ranks.main, Some(3));
        assert_eq!(
            record.listing_fields.get("name").unwrap().as_deref(),
            Some("Product 3")
        );
    }

    #[tokio::test]
    async fn post_interaction_pass_fills_missing_fields() {
        let url = "https://www.amazon.com/Pixel/dp/B0TESTCCCC";
        let before = r#"<html><body>
            <div id="model">SM-TEST-9</div>
            <button id="see-all-reviews">See all reviews</button>
        </body></html>"#;
        let after = r#"<html><body>
            <div id="model">SM-TEST-CHANGED</div>
            <div id="review-count">88 ratings</div>
        </body></html>"#;
        // The page shows `before` through the scroll pass; only the
        // expand click reveals `after`.
        let mut browser = MockBrowser::new().page_states(url, &[before, before, after]);
        let sel = detail_selectors();
        let pacing = pacing();
        let antibot = antibot();
        let mut stage = DetailCrawl::new(
            &mut browser,
            &antibot,
            &sel,
            &pacing,
            retailers::profile(Retailer::Amazon),
        )
        .unwrap();

        let records = stage.enrich(&[listing(url, 1)], None).await;
        let record = &records[0];
        assert_eq!(browser.clicks, vec!["#see-all-reviews".to_string()]);
        // First pass won the sku; second pass only filled what was missing.
        assert_eq!(record.sku.as_deref(), Some("SM-TEST-9"));
        assert_eq!(record.review_count, Some(88));
    }

    #[tokio::test]
    async fn first_success_pins_the_session() {
        let url = "https://www.amazon.com/Pixel/dp/B0TESTAAAA";
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let mut browser = MockBrowser::new()
            .page(url, DETAIL_PAGE)
            .with_cookies(vec![crate::browser::SessionCookie {
                name: "session-id".to_string(),
                value: "abc".to_string(),
                domain: ".amazon.com".to_string(),
                path: "/".to_string(),
                secure: true,
                http_only: true,
            }]);
        let sel = detail_selectors();
        let pacing = pacing();
        let antibot = antibot();
        let mut stage = DetailCrawl::new(
            &mut browser,
            &antibot,
            &sel,
            &pacing,
            retailers::profile(Retailer::Amazon),
        )
        .unwrap();

        stage.enrich(&[listing(url, 1)], Some(&store)).await;
        assert!(dir.path().join("amazon_cookies.json").exists());
    }

    #[test]
    fn dedupe_merges_rank_columns_first_wins() {
        let url = "https://www.amazon.com/dp/B0TEST01";
        let mut a = listing(url, 2);
        a.fields
            .insert("price".to_string(), Some("899.00".to_string()));
        let mut b = listing(url, 7);
        b.ranks = RankSet::single(PageType::Bsr, 7);
        b.fields
            .insert("price".to_string(), Some("879.00".to_string()));
        let c = listing("https://www.amazon.com/dp/B0TEST02", 3);

        let deduped = dedupe_listings(vec![a, b, c], RankMergePolicy::Overwrite);
        assert_eq!(deduped.len(), 2);
        let merged = &deduped[0];
        assert_eq!(merged.ranks.main, Some(2));
        assert_eq!(merged.ranks.bsr, Some(7));
        // First occurrence's fields carried forward.
        assert_eq!(merged.fields.get("price").unwrap().as_deref(), Some("899.00"));
    }
}
