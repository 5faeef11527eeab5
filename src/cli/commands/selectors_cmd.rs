//! `selectors` command: inspect and toggle selector configuration.

use anyhow::{bail, Result};
use console::style;

use crate::config::Settings;
use crate::models::Retailer;
use crate::repository::SelectorRepository;

pub async fn cmd_selectors_list(
    settings: &Settings,
    retailer: Retailer,
    page_type: Option<String>,
) -> Result<()> {
    let repo = SelectorRepository::new(&settings.db_path())?;
    let rows = repo.list(retailer, page_type.as_deref())?;
    if rows.is_empty() {
        println!("No selector rows for {}. Run `shelf init` to seed defaults.", retailer);
        return Ok(());
    }

    for row in rows {
        let flag = if row.active {
            style("active").green()
        } else {
            style("off").red()
        };
        let attr = row
            .locator
            .attr
            .as_deref()
            .map(|a| format!(" @{}", a))
            .unwrap_or_default();
        println!(
            "  {:<6} {:<10} {:<16} {}{}",
            flag, row.page_type, row.field, row.locator.selector, attr
        );
    }
    Ok(())
}

pub async fn cmd_selectors_set_active(
    settings: &Settings,
    retailer: Retailer,
    page_type: &str,
    field: &str,
    active: bool,
) -> Result<()> {
    let repo = SelectorRepository::new(&settings.db_path())?;
    if !repo.set_active(retailer, page_type, field, active)? {
        bail!(
            "no selector row for {}/{}/{}",
            retailer,
            page_type,
            field
        );
    }
    println!(
        "{} {}/{}/{}",
        if active {
            style("Enabled").green()
        } else {
            style("Disabled").yellow()
        },
        retailer,
        page_type,
        field
    );
    Ok(())
}
