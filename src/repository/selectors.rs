//! Selector configuration store.
//!
//! Field locators and page URL templates live in a queryable table keyed by
//! (retailer, page_type, field), not in code: when a retailer changes
//! markup, the fix is a row update, not a release. Only active-flagged rows
//! are served. A SHA-256 hash of the active set per retailer is tracked so
//! a run can warn when selectors changed since the previous batch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{connect, Result};
use crate::models::Retailer;

/// Page-type key for detail pages; listing page types use
/// [`crate::models::PageType::as_str`].
pub const DETAIL_PAGE: &str = "detail";

/// Reserved field name marking the per-item container on listing pages.
pub const CONTAINER_FIELD: &str = "container";

/// How to locate one field inside a page or container fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLocator {
    /// CSS selector, scoped to the container for listing fields.
    pub selector: String,
    /// Attribute to read instead of the text content (e.g. `href`).
    pub attr: Option<String>,
    /// Value to use when extraction fails; None means null.
    pub fallback: Option<String>,
}

impl FieldLocator {
    pub fn text(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            attr: None,
            fallback: None,
        }
    }

    pub fn attr(selector: &str, attr: &str) -> Self {
        Self {
            selector: selector.to_string(),
            attr: Some(attr.to_string()),
            fallback: None,
        }
    }
}

/// The selector set a crawl stage works with, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct PageSelectors {
    pub url_template: Option<String>,
    pub container: Option<FieldLocator>,
    pub fields: BTreeMap<String, FieldLocator>,
}

/// One stored selector row, as listed by the CLI.
#[derive(Debug, Clone)]
pub struct SelectorRow {
    pub page_type: String,
    pub field: String,
    pub locator: FieldLocator,
    pub active: bool,
}

/// SQLite-backed selector configuration store.
pub struct SelectorRepository {
    db_path: PathBuf,
}

impl SelectorRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS selector_entries (
                retailer TEXT NOT NULL,
                page_type TEXT NOT NULL,
                field TEXT NOT NULL,
                selector TEXT NOT NULL,
                attr TEXT,
                fallback TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (retailer, page_type, field)
            );

            CREATE TABLE IF NOT EXISTS url_templates (
                retailer TEXT NOT NULL,
                page_type TEXT NOT NULL,
                template TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (retailer, page_type)
            );

            CREATE TABLE IF NOT EXISTS selector_state (
                retailer TEXT PRIMARY KEY,
                config_hash TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    /// Active field locators for (retailer, page_type).
    pub fn get_selectors(
        &self,
        retailer: Retailer,
        page_type: &str,
    ) -> Result<BTreeMap<String, FieldLocator>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT field, selector, attr, fallback FROM selector_entries
            WHERE retailer = ? AND page_type = ? AND active = 1
            ORDER BY field
        "#,
        )?;
        let rows = stmt
            .query_map(params![retailer.as_str(), page_type], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    FieldLocator {
                        selector: row.get(1)?,
                        attr: row.get(2)?,
                        fallback: row.get(3)?,
                    },
                ))
            })?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// Active URL template for (retailer, page_type), if configured.
    pub fn get_url_template(&self, retailer: Retailer, page_type: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let template = conn
            .query_row(
                "SELECT template FROM url_templates
                 WHERE retailer = ? AND page_type = ? AND active = 1",
                params![retailer.as_str(), page_type],
                |row| row.get(0),
            )
            .optional()?;
        Ok(template)
    }

    /// Everything a stage needs for one (retailer, page_type), in one load.
    pub fn page_selectors(&self, retailer: Retailer, page_type: &str) -> Result<PageSelectors> {
        let mut fields = self.get_selectors(retailer, page_type)?;
        let container = fields.remove(CONTAINER_FIELD);
        Ok(PageSelectors {
            url_template: self.get_url_template(retailer, page_type)?,
            container,
            fields,
        })
    }

    /// All selector rows for a retailer, for the CLI listing.
    pub fn list(&self, retailer: Retailer, page_type: Option<&str>) -> Result<Vec<SelectorRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT page_type, field, selector, attr, fallback, active
            FROM selector_entries
            WHERE retailer = ?1 AND (?2 IS NULL OR page_type = ?2)
            ORDER BY page_type, field
        "#,
        )?;
        let rows = stmt
            .query_map(params![retailer.as_str(), page_type], |row| {
                Ok(SelectorRow {
                    page_type: row.get(0)?,
                    field: row.get(1)?,
                    locator: FieldLocator {
                        selector: row.get(2)?,
                        attr: row.get(3)?,
                        fallback: row.get(4)?,
                    },
                    active: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Insert or replace one selector row (operator tuning surface).
    pub fn upsert_entry(
        &self,
        retailer: Retailer,
        page_type: &str,
        field: &str,
        locator: &FieldLocator,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO selector_entries
                (retailer, page_type, field, selector, attr, fallback, active, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
            "#,
            params![
                retailer.as_str(),
                page_type,
                field,
                locator.selector,
                locator.attr,
                locator.fallback,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Insert or replace a page URL template.
    pub fn set_url_template(
        &self,
        retailer: Retailer,
        page_type: &str,
        template: &str,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO url_templates
                (retailer, page_type, template, active, updated_at)
            VALUES (?1, ?2, ?3, 1, ?4)
            "#,
            params![retailer.as_str(), page_type, template, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Flip the active flag on one selector row. Returns whether a row matched.
    pub fn set_active(
        &self,
        retailer: Retailer,
        page_type: &str,
        field: &str,
        active: bool,
    ) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE selector_entries SET active = ?1, updated_at = ?2
             WHERE retailer = ?3 AND page_type = ?4 AND field = ?5",
            params![
                active as i64,
                Utc::now().to_rfc3339(),
                retailer.as_str(),
                page_type,
                field
            ],
        )?;
        Ok(changed > 0)
    }

    /// Whether the active selector set changed since the stored hash.
    pub fn check_changed(&self, retailer: Retailer) -> Result<bool> {
        let conn = self.connect()?;
        let current = self.active_config_hash(retailer)?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT config_hash FROM selector_state WHERE retailer = ?",
                params![retailer.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.as_ref() != Some(&current))
    }

    /// Record the current active selector set's hash for a retailer.
    pub fn store_hash(&self, retailer: Retailer) -> Result<()> {
        let hash = self.active_config_hash(retailer)?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO selector_state (retailer, config_hash, updated_at)
             VALUES (?1, ?2, ?3)",
            params![retailer.as_str(), hash, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn active_config_hash(&self, retailer: Retailer) -> Result<String> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT page_type, field, selector, COALESCE(attr, ''), COALESCE(fallback, '')
            FROM selector_entries
            WHERE retailer = ? AND active = 1
            ORDER BY page_type, field
        "#,
        )?;
        let mut hasher = Sha256::new();
        let rows = stmt.query_map(params![retailer.as_str()], |row| {
            Ok(format!(
                "{}\x1f{}\x1f{}\x1f{}\x1f{}",
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        for row in rows {
            hasher.update(row?.as_bytes());
            hasher.update(b"\n");
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Seed the store with the built-in per-retailer defaults.
    ///
    /// Existing rows win: operators tune selectors in place and re-running
    /// `init` must not clobber them.
    pub fn seed_defaults(&self) -> Result<usize> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        let mut seeded = 0;

        for (retailer, page_type, field, selector, attr, fallback) in default_selectors() {
            seeded += conn.execute(
                r#"
                INSERT OR IGNORE INTO selector_entries
                    (retailer, page_type, field, selector, attr, fallback, active, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
                "#,
                params![retailer.as_str(), page_type, field, selector, attr, fallback, now],
            )?;
        }
        for (retailer, page_type, template) in default_url_templates() {
            seeded += conn.execute(
                r#"
                INSERT OR IGNORE INTO url_templates
                    (retailer, page_type, template, active, updated_at)
                VALUES (?1, ?2, ?3, 1, ?4)
                "#,
                params![retailer.as_str(), page_type, template, now],
            )?;
        }
        Ok(seeded)
    }
}

type SelectorSeed = (
    Retailer,
    &'static str,
    &'static str,
    &'static str,
    Option<&'static str>,
    Option<&'static str>,
);

/// Built-in selector defaults. These chase each retailer's current markup
/// and are expected to drift; they are seeds, not guarantees.
fn default_selectors() -> Vec<SelectorSeed> {
    use Retailer::*;
    vec![
        // Amazon search results
        (Amazon, "main", "container", "[data-component-type='s-search-result']", None, None),
        (Amazon, "main", "name", "h2 a span, h2 span.a-text-normal", None, None),
        (Amazon, "main", "product_url", "h2 a.a-link-normal, a.a-link-normal.s-no-outline", Some("href"), None),
        (Amazon, "main", "price", ".a-price .a-offscreen", None, None),
        (Amazon, "main", "list_price", ".a-price.a-text-price .a-offscreen", None, None),
        (Amazon, "main", "rating", "span.a-icon-alt", None, None),
        (Amazon, "main", "reviews", "span.a-size-base.s-underline-text", None, None),
        (Amazon, "main", "shipping", "[aria-label*='delivery'] .a-color-base", None, Some("standard")),
        // Amazon best sellers
        (Amazon, "bsr", "container", "#gridItemRoot, .zg-grid-general-faceout", None, None),
        (Amazon, "bsr", "name", ".p13n-sc-truncate-desktop-type2, ._cDEzb_p13n-sc-css-line-clamp-3_g3dy1", None, None),
        (Amazon, "bsr", "product_url", "a.a-link-normal", Some("href"), None),
        (Amazon, "bsr", "price", "._cDEzb_p13n-sc-price_3mJ9Z, .p13n-sc-price", None, None),
        (Amazon, "bsr", "rating", ".a-icon-row .a-icon-alt", None, None),
        // Amazon deals
        (Amazon, "promotion", "container", "[data-testid='product-card']", None, None),
        (Amazon, "promotion", "name", ".ProductCard-title span", None, None),
        (Amazon, "promotion", "product_url", "a[data-testid='product-card-link']", Some("href"), None),
        (Amazon, "promotion", "price", ".a-price .a-offscreen", None, None),
        (Amazon, "promotion", "discount", ".BadgeAutomatedLabel-badgeAutomatedLabel", None, None),
        // Amazon detail page
        (Amazon, "detail", "review_count", "#acrCustomerReviewText", None, None),
        (Amazon, "detail", "rating_avg", "span[data-hook='rating-out-of-text'], #acrPopover .a-icon-alt", None, None),
        (Amazon, "detail", "sku", "#productDetails_techSpec_section_1 tr.po-model_name td.a-span9, tr.po-model_name td.a-span9", None, None),
        (Amazon, "detail", "spec_storage", "tr.po-memory_storage_capacity td.a-span9", None, None),
        (Amazon, "detail", "spec_color", "tr.po-color td.a-span9, #variation_color_name .selection", None, None),
        (Amazon, "detail", "spec_carrier", "tr.po-wireless_provider td.a-span9", None, None),
        (Amazon, "detail", "similar", "#sims-consolidated-2_feature_div li a.a-link-normal", Some("href"), None),
        (Amazon, "detail", "star_5", "#histogramTable tr:nth-child(1) .a-text-right", None, None),
        (Amazon, "detail", "star_4", "#histogramTable tr:nth-child(2) .a-text-right", None, None),
        (Amazon, "detail", "star_3", "#histogramTable tr:nth-child(3) .a-text-right", None, None),
        (Amazon, "detail", "star_2", "#histogramTable tr:nth-child(4) .a-text-right", None, None),
        (Amazon, "detail", "star_1", "#histogramTable tr:nth-child(5) .a-text-right", None, None),
        (Amazon, "detail", "expand_reviews", "a[data-hook='see-all-reviews-link-foot']", None, None),
        // BestBuy search results
        (BestBuy, "main", "container", ".sku-item", None, None),
        (BestBuy, "main", "name", ".sku-title a", None, None),
        (BestBuy, "main", "product_url", ".sku-title a", Some("href"), None),
        (BestBuy, "main", "price", "[data-testid='customer-price'] span[aria-hidden='true']", None, None),
        (BestBuy, "main", "model", ".sku-attribute-title:nth-child(1) .sku-value", None, None),
        (BestBuy, "main", "sku_code", ".sku-attribute-title:nth-child(2) .sku-value", None, None),
        (BestBuy, "main", "rating", ".c-ratings-reviews .visually-hidden", None, None),
        // BestBuy best sellers
        (BestBuy, "bsr", "container", ".product-list-item", None, None),
        (BestBuy, "bsr", "name", ".product-list-item-title a", None, None),
        (BestBuy, "bsr", "product_url", ".product-list-item-title a", Some("href"), None),
        (BestBuy, "bsr", "price", ".priceView-customer-price span[aria-hidden='true']", None, None),
        // BestBuy deals
        (BestBuy, "promotion", "container", ".offer-item", None, None),
        (BestBuy, "promotion", "name", ".offer-item-title", None, None),
        (BestBuy, "promotion", "product_url", "a.offer-link", Some("href"), None),
        (BestBuy, "promotion", "discount", ".offer-savings", None, None),
        // BestBuy detail page
        (BestBuy, "detail", "review_count", ".c-reviews.order-2", None, None),
        (BestBuy, "detail", "rating_avg", ".ugc-c-review-average", None, None),
        (BestBuy, "detail", "sku", ".sku .product-data-value", None, None),
        (BestBuy, "detail", "spec_storage", ".spec-row[data-spec='Storage Capacity'] .spec-value", None, None),
        (BestBuy, "detail", "spec_color", ".spec-row[data-spec='Color'] .spec-value", None, None),
        (BestBuy, "detail", "spec_carrier", ".spec-row[data-spec='Carrier'] .spec-value", None, None),
        (BestBuy, "detail", "similar", ".related-products a.product-link", Some("href"), None),
        (BestBuy, "detail", "expand_specs", "button.c-button-link.specs-toggle", None, None),
        // Walmart browse results
        (Walmart, "main", "container", "[data-item-id]", None, None),
        (Walmart, "main", "name", "[data-automation-id='product-title']", None, None),
        (Walmart, "main", "product_url", "a[link-identifier]", Some("href"), None),
        (Walmart, "main", "price", "[data-automation-id='product-price'] .w_iUH7", None, None),
        (Walmart, "main", "shipping", "[data-automation-id='fulfillment-badge']", None, Some("standard")),
        // Walmart trending
        (Walmart, "trend", "container", "[data-item-id]", None, None),
        (Walmart, "trend", "name", "[data-automation-id='product-title']", None, None),
        (Walmart, "trend", "product_url", "a[link-identifier]", Some("href"), None),
        (Walmart, "trend", "price", "[data-automation-id='product-price'] .w_iUH7", None, None),
        // Walmart detail page
        (Walmart, "detail", "review_count", "[data-testid='reviews-and-ratings'] [itemprop='reviewCount']", None, None),
        (Walmart, "detail", "rating_avg", "[data-testid='reviews-and-ratings'] [itemprop='ratingValue']", None, None),
        (Walmart, "detail", "sku", "[data-testid='product-spec-Model']", None, None),
        (Walmart, "detail", "spec_color", "[data-testid='variant-group-Color'] .selected", None, None),
        (Walmart, "detail", "spec_carrier", "[data-testid='variant-group-Carrier'] .selected", None, None),
        (Walmart, "detail", "similar", "[data-testid='similar-items'] a", Some("href"), None),
        (Walmart, "detail", "expand_specs", "button[aria-label='Specifications']", None, None),
    ]
}

fn default_url_templates() -> Vec<(Retailer, &'static str, &'static str)> {
    use Retailer::*;
    vec![
        (Amazon, "main", "https://www.amazon.com/s?k=cell+phone&page={page}"),
        (Amazon, "bsr", "https://www.amazon.com/Best-Sellers-Cell-Phones-Accessories/zgbs/wireless/ref=zg_bs_pg_{page}?pg={page}"),
        (Amazon, "promotion", "https://www.amazon.com/deals?page={page}"),
        (BestBuy, "main", "https://www.bestbuy.com/site/searchpage.jsp?st=cell+phones&cp={page}"),
        (BestBuy, "bsr", "https://www.bestbuy.com/site/mobile-cell-phones/best-selling-cell-phones/pcmcat1591132221892.c"),
        (BestBuy, "promotion", "https://www.bestbuy.com/site/electronics/top-deals/pcmcat1563299784494.c"),
        (Walmart, "main", "https://www.walmart.com/browse/cell-phones/1105910_7551331?page={page}"),
        (Walmart, "trend", "https://www.walmart.com/shop/trending"),
    ]
}
