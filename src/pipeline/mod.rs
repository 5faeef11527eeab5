//! Pipeline orchestration: fixed stage order under one batch id.
//!
//! A run executes its retailer's stages strictly in sequence. A stage
//! failure is recorded and the next stage still runs (best-effort total
//! completion); the only hard precondition is the detail stage's non-empty
//! product set. The browser session is released on every exit path, and
//! the terminal report always enumerates per-stage outcomes.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::antibot::AntiBotHandler;
use crate::browser::Browser;
use crate::config::Settings;
use crate::crawl::{dedupe_listings, DetailCrawl, ListingCrawl};
use crate::models::{Batch, PageType, Retailer};
use crate::notify::{self, Notifier};
use crate::repository::{
    BulkWriter, DetailRepository, ItemMasterRepository, ListingRepository, ReconcileAction,
    RunRepository, SelectorRepository, StageRunRow, DETAIL_PAGE,
};
use crate::retailers::{self, RetailerProfile};
use crate::session::SessionStore;

/// Pipeline stages. Listing stages map 1:1 to a page type; `Detail` and
/// `Reconcile` consume what the listing stages stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Main,
    Bsr,
    Promotion,
    Trend,
    Detail,
    Reconcile,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Bsr => "bsr",
            Self::Promotion => "promotion",
            Self::Trend => "trend",
            Self::Detail => "detail",
            Self::Reconcile => "reconcile",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "main" => Some(Self::Main),
            "bsr" => Some(Self::Bsr),
            "promotion" => Some(Self::Promotion),
            "trend" => Some(Self::Trend),
            "detail" => Some(Self::Detail),
            "reconcile" => Some(Self::Reconcile),
            _ => None,
        }
    }

    /// The listing page family this stage crawls, if it is a listing stage.
    pub fn page_type(&self) -> Option<PageType> {
        match self {
            Self::Main => Some(PageType::Main),
            Self::Bsr => Some(PageType::Bsr),
            Self::Promotion => Some(PageType::Promotion),
            Self::Trend => Some(PageType::Trend),
            Self::Detail | Self::Reconcile => None,
        }
    }

    /// Whether this stage drives the browser.
    fn needs_browser(&self) -> bool {
        !matches!(self, Self::Reconcile)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_str(s).ok_or_else(|| {
            format!(
                "unknown stage '{}'. Valid stages: main, bsr, promotion, trend, detail, reconcile",
                s
            )
        })
    }
}

/// Terminal status of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        })
    }
}

/// One stage's outcome in the terminal report.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration: Duration,
    pub error: Option<String>,
    /// Human summary ("87 inserted, 3 updated") for successful stages.
    pub summary: Option<String>,
}

/// Terminal report of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub retailer: Retailer,
    pub batch_id: String,
    pub resumed_from: Option<Stage>,
    pub stages: Vec<StageReport>,
    pub elapsed: Duration,
    /// Set when the run aborted on an unexpected error.
    pub error: Option<String>,
}

impl RunReport {
    /// A run succeeds when at least one stage succeeded.
    pub fn succeeded(&self) -> bool {
        self.stages
            .iter()
            .any(|s| s.status == StageStatus::Success)
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }
}

/// Orchestrates one retailer's stages over one exclusive browser session
/// and record store.
pub struct Pipeline {
    settings: Settings,
    profile: &'static RetailerProfile,
    browser: Box<dyn Browser>,
    notifier: Box<dyn Notifier>,
    listing_repo: ListingRepository,
    detail_repo: DetailRepository,
    master_repo: ItemMasterRepository,
    selector_repo: SelectorRepository,
    run_repo: RunRepository,
    writer: BulkWriter,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        retailer: Retailer,
        browser: Box<dyn Browser>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self> {
        let profile = retailers::profile(retailer);
        let db = settings.db_path();
        if let Some(parent) = db.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data dir {:?}", parent))?;
        }
        let writer = BulkWriter::new(settings.write_batch_size, settings.write_retry_size);
        Ok(Self {
            listing_repo: ListingRepository::new(&db, profile.rank_merge)
                .context("failed to open listing store")?,
            detail_repo: DetailRepository::new(&db).context("failed to open detail store")?,
            master_repo: ItemMasterRepository::new(&db)
                .context("failed to open item-master store")?,
            selector_repo: SelectorRepository::new(&db)
                .context("failed to open selector store")?,
            run_repo: RunRepository::new(&db).context("failed to open run store")?,
            settings,
            profile,
            browser,
            notifier,
            writer,
        })
    }

    /// Run the pipeline for `batch`, optionally resuming at a named stage.
    ///
    /// The browser is released on every exit path; the report is delivered
    /// to the notifier fire-and-forget before returning.
    pub async fn run(&mut self, batch: &Batch, resume_from: Option<Stage>) -> Result<RunReport> {
        let started = Instant::now();
        let result = self.run_inner(batch, resume_from).await;
        self.browser.close().await;

        match result {
            Ok(mut report) => {
                report.elapsed = started.elapsed();
                notify::dispatch(self.notifier.as_ref(), &report).await;
                Ok(report)
            }
            Err(e) => {
                error!("pipeline aborted: {:#}", e);
                let report = RunReport {
                    retailer: batch.retailer,
                    batch_id: batch.batch_id.clone(),
                    resumed_from: resume_from,
                    stages: Vec::new(),
                    elapsed: started.elapsed(),
                    error: Some(format!("{:#}", e)),
                };
                notify::dispatch(self.notifier.as_ref(), &report).await;
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self, batch: &Batch, resume_from: Option<Stage>) -> Result<RunReport> {
        if let Some(from) = resume_from {
            if !self.profile.stages.contains(&from) {
                bail!(
                    "stage '{}' is not part of the {} pipeline",
                    from,
                    batch.retailer
                );
            }
            info!("resuming batch {} from stage {}", batch.batch_id, from);
        } else {
            info!("starting batch {} for {}", batch.batch_id, batch.retailer);
        }

        match self.selector_repo.check_changed(batch.retailer) {
            Ok(true) => {
                warn!(
                    "selector configuration for {} changed since the last run",
                    batch.retailer
                );
                self.selector_repo.store_hash(batch.retailer)?;
            }
            Ok(false) => {}
            Err(e) => warn!("selector drift check failed: {}", e),
        }

        let active: Vec<Stage> = {
            let mut skipping = resume_from.is_some();
            self.profile
                .stages
                .iter()
                .copied()
                .filter(|stage| {
                    if skipping && Some(*stage) == resume_from {
                        skipping = false;
                    }
                    !skipping
                })
                .collect()
        };

        // Cookie replay happens once, before the first browser stage; a
        // missing or stale session degrades to unauthenticated browsing.
        if active.iter().any(Stage::needs_browser) {
            let session = SessionStore::new(&self.settings.sessions_dir());
            match session.load(self.profile, self.browser.as_mut()).await {
                Ok(true) => info!("restored previous {} session", batch.retailer),
                Ok(false) => info!("no previous {} session", batch.retailer),
                Err(e) => warn!("session restore failed, continuing without: {}", e),
            }
        }

        let mut reports = Vec::with_capacity(self.profile.stages.len());
        for stage in self.profile.stages {
            if !active.contains(stage) {
                reports.push(StageReport {
                    stage: *stage,
                    status: StageStatus::Skipped,
                    duration: Duration::ZERO,
                    error: None,
                    summary: None,
                });
                self.record_stage(batch, reports.last().expect("just pushed"));
                continue;
            }

            info!("stage {} starting", stage);
            let stage_started = Instant::now();
            let outcome = self.execute_stage(batch, *stage).await;
            let duration = stage_started.elapsed();

            let report = match outcome {
                Ok(summary) => {
                    info!("stage {} succeeded: {}", stage, summary);
                    StageReport {
                        stage: *stage,
                        status: StageStatus::Success,
                        duration,
                        error: None,
                        summary: Some(summary),
                    }
                }
                Err(e) => {
                    // Record and move on; later stages still get their shot.
                    warn!("stage {} failed: {:#}", stage, e);
                    StageReport {
                        stage: *stage,
                        status: StageStatus::Failed,
                        duration,
                        error: Some(format!("{:#}", e)),
                        summary: None,
                    }
                }
            };
            self.record_stage(batch, &report);
            reports.push(report);
        }

        Ok(RunReport {
            retailer: batch.retailer,
            batch_id: batch.batch_id.clone(),
            resumed_from: resume_from,
            stages: reports,
            elapsed: Duration::ZERO,
            error: None,
        })
    }

    fn record_stage(&self, batch: &Batch, report: &StageReport) {
        let row = StageRunRow {
            retailer: batch.retailer,
            batch_id: batch.batch_id.clone(),
            stage: report.stage.to_string(),
            status: report.status.to_string(),
            duration_ms: report.duration.as_millis() as u64,
            error: report.error.clone(),
            finished_at: Utc::now(),
        };
        if let Err(e) = self.run_repo.record(&row) {
            warn!("could not record stage outcome: {}", e);
        }
    }

    async fn execute_stage(&mut self, batch: &Batch, stage: Stage) -> Result<String> {
        match stage {
            Stage::Main | Stage::Bsr | Stage::Promotion | Stage::Trend => {
                self.run_listing_stage(batch, stage.page_type().expect("listing stage"))
                    .await
            }
            Stage::Detail => self.run_detail_stage(batch).await,
            Stage::Reconcile => self.run_reconcile_stage(batch),
        }
    }

    async fn run_listing_stage(&mut self, batch: &Batch, page_type: PageType) -> Result<String> {
        let selectors = self
            .selector_repo
            .page_selectors(batch.retailer, page_type.as_str())?;
        let antibot = AntiBotHandler::new(
            self.profile.challenge_keywords,
            self.profile.challenge_signatures,
            self.profile.challenge_controls,
        )
        .with_manual_wait(self.settings.manual_wait());

        let records = {
            let mut crawl = ListingCrawl::new(
                self.browser.as_mut(),
                &antibot,
                &selectors,
                &self.settings.pacing,
            );
            crawl
                .collect(batch, page_type, self.settings.listing_target, 1)
                .await?
        };
        if records.is_empty() {
            bail!("no records collected; selectors may have drifted");
        }

        let outcome = self.writer.upsert(&mut self.listing_repo, &records);
        Ok(format!(
            "{} collected: {} inserted, {} updated, {} skipped",
            records.len(),
            outcome.inserted,
            outcome.updated,
            outcome.skipped
        ))
    }

    async fn run_detail_stage(&mut self, batch: &Batch) -> Result<String> {
        let listings = self
            .listing_repo
            .for_batch(batch.retailer, &batch.batch_id)?;
        if listings.is_empty() {
            // Hard precondition: nothing to enrich means fail fast, no
            // crawling.
            bail!("no products collected for batch {}", batch.batch_id);
        }
        let listings = dedupe_listings(listings, self.profile.rank_merge);

        let selectors = self
            .selector_repo
            .page_selectors(batch.retailer, DETAIL_PAGE)?;
        let antibot = AntiBotHandler::new(
            self.profile.challenge_keywords,
            self.profile.challenge_signatures,
            self.profile.challenge_controls,
        )
        .with_manual_wait(self.settings.detail_manual_wait());
        let session = SessionStore::new(&self.settings.sessions_dir());

        let records = {
            let mut crawl = DetailCrawl::new(
                self.browser.as_mut(),
                &antibot,
                &selectors,
                &self.settings.pacing,
                self.profile,
            )?;
            crawl.enrich(&listings, Some(&session)).await
        };

        let outcome = self.writer.upsert(&mut self.detail_repo, &records);
        Ok(format!(
            "{} products: {} inserted, {} updated, {} skipped",
            records.len(),
            outcome.inserted,
            outcome.updated,
            outcome.skipped
        ))
    }

    fn run_reconcile_stage(&mut self, batch: &Batch) -> Result<String> {
        let details = self
            .detail_repo
            .for_batch(batch.retailer, &batch.batch_id)?;
        if details.is_empty() {
            bail!("no detail rows for batch {}", batch.batch_id);
        }

        // First non-empty SKU per distinct item id wins for this batch.
        let mut by_item: std::collections::BTreeMap<String, Option<String>> =
            std::collections::BTreeMap::new();
        for detail in &details {
            let Some(item_id) = detail.item_id.clone() else {
                continue;
            };
            let entry = by_item.entry(item_id).or_insert(None);
            if entry.is_none() {
                *entry = detail
                    .sku
                    .clone()
                    .filter(|s| !s.trim().is_empty());
            }
        }

        let (mut inserted, mut updated, mut skipped) = (0u32, 0u32, 0u32);
        for (item_id, sku) in &by_item {
            match self.master_repo.reconcile(
                batch.retailer,
                item_id,
                sku.as_deref(),
                &batch.batch_id,
            ) {
                Ok(ReconcileAction::Inserted) => inserted += 1,
                Ok(ReconcileAction::Updated) => updated += 1,
                Ok(ReconcileAction::Skipped) => skipped += 1,
                Err(e) => {
                    warn!("reconcile failed for item {}: {}", item_id, e);
                    skipped += 1;
                }
            }
        }
        Ok(format!(
            "{} items: {} inserted, {} updated, {} skipped",
            by_item.len(),
            inserted,
            updated,
            skipped
        ))
    }
}
