//! `init` command: create the data directory, schema, and selector seeds.

use anyhow::{Context, Result};
use console::style;

use crate::config::Settings;
use crate::models::{RankMergePolicy, Retailer};
use crate::repository::{
    DetailRepository, ItemMasterRepository, ListingRepository, RunRepository, SelectorRepository,
};

pub async fn cmd_init(settings: &Settings) -> Result<()> {
    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("failed to create data dir {:?}", settings.data_dir))?;
    std::fs::create_dir_all(settings.sessions_dir())
        .context("failed to create sessions dir")?;

    let db = settings.db_path();
    // Opening each repository creates its tables. The merge policy here is
    // irrelevant; schema init is policy-free.
    ListingRepository::new(&db, RankMergePolicy::Overwrite)?;
    DetailRepository::new(&db)?;
    ItemMasterRepository::new(&db)?;
    RunRepository::new(&db)?;
    let selectors = SelectorRepository::new(&db)?;
    let seeded = selectors.seed_defaults()?;
    for retailer in [Retailer::Amazon, Retailer::BestBuy, Retailer::Walmart] {
        selectors.store_hash(retailer)?;
    }

    println!(
        "{} {:?} ({} selector rows seeded)",
        style("Initialized").green().bold(),
        settings.data_dir,
        seeded
    );
    Ok(())
}
