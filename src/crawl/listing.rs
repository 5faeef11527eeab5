//! Listing crawl stage: ranked product summaries from catalog pages.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use super::{canonical_url, count_matches, wait_for_items, CrawlError, Pacing};
use crate::antibot::{AntiBotHandler, ChallengeOutcome};
use crate::browser::Browser;
use crate::extract;
use crate::models::{Batch, ListingObservation, PageType};
use crate::repository::PageSelectors;
use crate::utils::jitter_sleep;

/// Generic listing collector for one (retailer, page_type).
///
/// Walks the page family's URL template (paginated when the template
/// carries a `{page}` placeholder), assigning ranks strictly in extraction
/// order: the first container on the first page is rank `start_rank`, and a
/// rank is never reassigned within a run.
pub struct ListingCrawl<'a> {
    browser: &'a mut dyn Browser,
    antibot: &'a AntiBotHandler,
    selectors: &'a PageSelectors,
    pacing: &'a Pacing,
}

impl<'a> ListingCrawl<'a> {
    pub fn new(
        browser: &'a mut dyn Browser,
        antibot: &'a AntiBotHandler,
        selectors: &'a PageSelectors,
        pacing: &'a Pacing,
    ) -> Self {
        Self {
            browser,
            antibot,
            selectors,
            pacing,
        }
    }

    /// Collect up to `target` records, numbering them from `start_rank`.
    pub async fn collect(
        &mut self,
        batch: &Batch,
        page_type: PageType,
        target: usize,
        start_rank: u32,
    ) -> Result<Vec<ListingObservation>, CrawlError> {
        let template = self.selectors.url_template.clone().ok_or_else(|| {
            CrawlError::MissingConfig {
                what: "url template",
                retailer: batch.retailer.as_str(),
                page_type: page_type.to_string(),
            }
        })?;
        let container = self
            .selectors
            .container
            .clone()
            .ok_or_else(|| CrawlError::MissingConfig {
                what: "container selector",
                retailer: batch.retailer.as_str(),
                page_type: page_type.to_string(),
            })?;
        let container_sel = Selector::parse(&container.selector).map_err(|e| {
            warn!("container selector '{}' is invalid: {:?}", container.selector, e);
            CrawlError::MissingConfig {
                what: "parsable container selector",
                retailer: batch.retailer.as_str(),
                page_type: page_type.to_string(),
            }
        })?;

        let paginated = template.contains("{page}");
        let mut records: Vec<ListingObservation> = Vec::new();
        let mut rank = start_rank;
        let mut page_no: u32 = 1;

        while records.len() < target && page_no <= self.pacing.max_pages {
            let url = if paginated {
                template.replace("{page}", &page_no.to_string())
            } else {
                template.clone()
            };

            let quota = target - records.len();
            let page_records = self
                .crawl_page(&url, batch, page_type, &container_sel, quota, &mut rank)
                .await;

            if page_records.is_empty() {
                // Zero records means the catalog is exhausted (or the page
                // is broken); either way, walking further pages is wasted
                // traffic that bot detection notices.
                info!(
                    "{}/{} page {} yielded no records, stopping stage",
                    batch.retailer, page_type, page_no
                );
                break;
            }
            records.extend(page_records);

            if !paginated {
                break;
            }
            page_no += 1;
        }

        info!(
            "{}/{} collected {} records over {} page(s)",
            batch.retailer,
            page_type,
            records.len(),
            page_no.min(self.pacing.max_pages)
        );
        Ok(records)
    }

    /// Crawl one page; every failure path returns an empty list.
    async fn crawl_page(
        &mut self,
        url: &str,
        batch: &Batch,
        page_type: PageType,
        container_sel: &Selector,
        quota: usize,
        rank: &mut u32,
    ) -> Vec<ListingObservation> {
        if let Err(e) = self.browser.navigate(url).await {
            warn!("page load failed for {}: {}", url, e);
            return Vec::new();
        }
        jitter_sleep(self.pacing.settle_range()).await;

        let mut html = match self.browser.content().await {
            Ok(html) => html,
            Err(e) => {
                warn!("could not read page content for {}: {}", url, e);
                return Vec::new();
            }
        };

        if self.antibot.detect(&html) {
            match self.antibot.resolve(&html, self.browser).await {
                ChallengeOutcome::Resolved => match self.browser.content().await {
                    Ok(fresh) => html = fresh,
                    Err(e) => {
                        warn!("could not re-read page after challenge: {}", e);
                        return Vec::new();
                    }
                },
                ChallengeOutcome::Unresolved => {
                    warn!("unresolved challenge on {}, treating page as empty", url);
                    return Vec::new();
                }
            }
        }

        let html = wait_for_items(
            self.browser,
            html,
            container_sel,
            self.pacing.expected_per_page.min(quota),
            self.pacing.content_retries,
            Duration::from_millis(self.pacing.content_retry_ms),
        )
        .await;

        let document = Html::parse_document(&html);
        let mut page_records = Vec::new();
        for element in document.select(container_sel) {
            if page_records.len() >= quota {
                debug!("page quota of {} reached, truncating", quota);
                break;
            }

            let mut fields: BTreeMap<String, Option<String>> = BTreeMap::new();
            for (name, locator) in &self.selectors.fields {
                if name == "product_url" {
                    continue;
                }
                fields.insert(name.clone(), extract::from_fragment(&element, locator));
            }

            let product_url = self
                .selectors
                .fields
                .get("product_url")
                .and_then(|locator| extract::from_fragment(&element, locator))
                .and_then(|link| canonical_url(url, &link));

            let Some(product_url) = product_url else {
                // A container without a product link is not a record;
                // skip it and keep walking the page.
                debug!("container without product url on {}, skipped", url);
                continue;
            };

            let assigned = *rank;
            *rank += 1;
            page_records.push(ListingObservation {
                retailer: batch.retailer,
                batch_id: batch.batch_id.clone(),
                calendar_week: batch.calendar_week.clone(),
                page_type,
                product_url,
                rank: assigned,
                fields,
                crawled_at: Utc::now(),
            });
        }

        debug!(
            "{} records extracted from {} ({} containers rendered)",
            page_records.len(),
            url,
            count_matches(&html, container_sel)
        );
        page_records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::MockBrowser;
    use crate::models::Retailer;
    use crate::repository::FieldLocator;

    fn batch() -> Batch {
        Batch {
            batch_id: "a_20250123_143045".to_string(),
            retailer: Retailer::Amazon,
            calendar_week: "w4".to_string(),
            created_at: Utc::now(),
        }
    }

    fn selectors(template: &str) -> PageSelectors {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldLocator::text("a.title"));
        fields.insert("price".to_string(), FieldLocator::text(".price"));
        fields.insert(
            "product_url".to_string(),
            FieldLocator::attr("a.title", "href"),
        );
        PageSelectors {
            url_template: Some(template.to_string()),
            container: Some(FieldLocator::text(".item")),
            fields,
        }
    }

    fn pacing() -> Pacing {
        Pacing {
            settle_ms: (0, 1),
            content_retries: 1,
            content_retry_ms: 1,
            expected_per_page: 1,
            max_pages: 10,
        }
    }

    fn antibot() -> AntiBotHandler {
        AntiBotHandler::new(&["robot or human"], &[], &[])
            .with_manual_wait(Duration::from_millis(2))
    }

    fn item(id: u32) -> String {
        format!(
            "<div class='item'><a class='title' href='/dp/B0TEST{:04}?ref=x'>Phone {}</a><span class='price'>${}.00</span></div>",
            id, id, 100 + id
        )
    }

    fn page_of(ids: std::ops::Range<u32>) -> String {
        let items: String = ids.map(item).collect();
        format!("<html><body>{}</body></html>", items)
    }

    #[tokio::test]
    async fn ranks_are_sequential_across_pages() {
        let mut browser = MockBrowser::new()
            .page("https://example.com/s?page=1", &page_of(1..4))
            .page("https://example.com/s?page=2", &page_of(4..7))
            .page("https://example.com/s?page=3", "<html></html>");
        let sel = selectors("https://example.com/s?page={page}");
        let pacing = pacing();
        let antibot = antibot();
        let mut stage = ListingCrawl::new(&mut browser, &antibot, &sel, &pacing);

        let records = stage.collect(&batch(), PageType::Main, 5, 1).await.unwrap();
        assert_eq!(records.len(), 5);
        let ranks: Vec<u32> = records.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        // Quota reached mid-page-2: the sixth item is truncated.
        assert!(records
            .iter()
            .all(|r| r.product_url.starts_with("https://example.com/dp/B0TEST")));
        assert!(!records.iter().any(|r| r.product_url.contains("?ref")));
    }

    #[tokio::test]
    async fn empty_page_stops_the_stage() {
        let mut browser = MockBrowser::new()
            .page("https://example.com/s?page=1", &page_of(1..4))
            .page("https://example.com/s?page=2", "<html><body></body></html>")
            .page("https://example.com/s?page=3", &page_of(7..9));
        let sel = selectors("https://example.com/s?page={page}");
        let pacing = pacing();
        let antibot = antibot();
        let mut stage = ListingCrawl::new(&mut browser, &antibot, &sel, &pacing);

        let records = stage
            .collect(&batch(), PageType::Main, 20, 1)
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        // Page 3 was never visited.
        assert_eq!(browser.visited.len(), 2);
    }

    #[tokio::test]
    async fn navigation_failure_yields_partial_results() {
        let mut browser = MockBrowser::new()
            .page("https://example.com/s?page=1", &page_of(1..3))
            .fail_navigation("https://example.com/s?page=2");
        let sel = selectors("https://example.com/s?page={page}");
        let pacing = pacing();
        let antibot = antibot();
        let mut stage = ListingCrawl::new(&mut browser, &antibot, &sel, &pacing);

        let records = stage
            .collect(&batch(), PageType::Main, 10, 1)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn failed_field_extractors_still_emit_the_record() {
        let html = "<html><body><div class='item'>\
            <a class='title' href='/dp/B0TESTAAAA'></a>\
            </div></body></html>";
        let mut browser = MockBrowser::new().page("https://example.com/deals", html);
        let sel = selectors("https://example.com/deals");
        let pacing = pacing();
        let antibot = antibot();
        let mut stage = ListingCrawl::new(&mut browser, &antibot, &sel, &pacing);

        let records = stage
            .collect(&batch(), PageType::Promotion, 10, 1)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.rank, 1);
        assert_eq!(record.page_type, PageType::Promotion);
        assert_eq!(record.batch_id, "a_20250123_143045");
        assert_eq!(record.fields.get("name"), Some(&None));
        assert_eq!(record.fields.get("price"), Some(&None));
    }

    #[tokio::test]
    async fn single_shot_template_visits_one_page() {
        let mut browser =
            MockBrowser::new().page("https://example.com/trending", &page_of(1..4));
        let sel = selectors("https://example.com/trending");
        let pacing = pacing();
        let antibot = antibot();
        let mut stage = ListingCrawl::new(&mut browser, &antibot, &sel, &pacing);

        let records = stage
            .collect(&batch(), PageType::Trend, 10, 1)
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(browser.visited.len(), 1);
    }

    #[tokio::test]
    async fn missing_template_is_a_stage_error() {
        let mut browser = MockBrowser::new();
        let mut sel = selectors("https://example.com/s");
        sel.url_template = None;
        let pacing = pacing();
        let antibot = antibot();
        let mut stage = ListingCrawl::new(&mut browser, &antibot, &sel, &pacing);

        let err = stage
            .collect(&batch(), PageType::Main, 10, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::MissingConfig { .. }));
    }
}
