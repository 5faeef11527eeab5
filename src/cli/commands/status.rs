//! `status` command: recent batches and their stage outcomes.

use anyhow::Result;
use console::style;

use crate::config::Settings;
use crate::models::{RankMergePolicy, Retailer};
use crate::repository::{DetailRepository, ListingRepository, RunRepository};

pub async fn cmd_status(settings: &Settings, retailer: Option<Retailer>) -> Result<()> {
    let db = settings.db_path();
    if !db.exists() {
        println!("No database at {:?}. Run `shelf init` first.", db);
        return Ok(());
    }

    let retailers = match retailer {
        Some(r) => vec![r],
        None => vec![Retailer::Amazon, Retailer::BestBuy, Retailer::Walmart],
    };

    let runs = RunRepository::new(&db)?;
    let listings = ListingRepository::new(&db, RankMergePolicy::Overwrite)?;
    let details = DetailRepository::new(&db)?;

    for retailer in retailers {
        println!("{}", style(retailer.to_string()).bold());

        let Some(batch_id) = runs.latest_batch(retailer)? else {
            println!("  no runs recorded\n");
            continue;
        };

        let listing_count = listings.count_for_batch(retailer, &batch_id)?;
        let detail_count = details.count_for_batch(retailer, &batch_id)?;
        println!(
            "  latest batch {} ({} listings, {} details)",
            style(&batch_id).bold(),
            listing_count,
            detail_count
        );

        for row in runs.for_batch(retailer, &batch_id)? {
            let status = match row.status.as_str() {
                "success" => style(row.status.clone()).green(),
                "failed" => style(row.status.clone()).red(),
                _ => style(row.status.clone()).dim(),
            };
            println!(
                "    {:<10} {:<8} {:>6.1}s  {}",
                row.stage,
                status,
                row.duration_ms as f64 / 1000.0,
                row.error.as_deref().unwrap_or("")
            );
        }

        let recent = listings.recent_batches(retailer, 5)?;
        if recent.len() > 1 {
            println!("  recent batches: {}", recent.join(", "));
        }
        println!();
    }
    Ok(())
}
