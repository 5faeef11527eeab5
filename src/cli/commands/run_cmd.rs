//! `run` command: execute the pipeline for one retailer.

use anyhow::{bail, Result};
use console::style;

use crate::browser::ChromeBrowser;
use crate::config::Settings;
use crate::models::{Batch, Retailer};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::pipeline::{Pipeline, RunReport, Stage, StageStatus};

pub async fn cmd_run(
    settings: &Settings,
    retailer: Retailer,
    resume_from: Option<Stage>,
    batch_id: Option<String>,
    limit: Option<usize>,
    headed: bool,
) -> Result<()> {
    let mut settings = settings.clone();
    if let Some(limit) = limit {
        settings.listing_target = limit;
    }
    if headed {
        settings.browser.headless = false;
    }

    let batch = match batch_id {
        Some(id) => Batch::resume(retailer, &id),
        None => Batch::create(retailer),
    };
    println!(
        "{} batch {} for {} (week {})",
        style("Running").cyan().bold(),
        style(&batch.batch_id).bold(),
        retailer,
        batch.calendar_week
    );

    let browser = Box::new(ChromeBrowser::new(settings.browser.clone()));
    let notifier: Box<dyn Notifier> = match &settings.notify_webhook {
        Some(endpoint) => Box::new(WebhookNotifier::new(endpoint)),
        None => Box::new(LogNotifier),
    };

    let mut pipeline = Pipeline::new(settings, retailer, browser, notifier)?;
    let report = pipeline.run(&batch, resume_from).await?;
    print_report(&report);

    if !report.succeeded() {
        bail!("every stage failed for batch {}", report.batch_id);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    for stage in &report.stages {
        let status = match stage.status {
            StageStatus::Success => style("success").green(),
            StageStatus::Failed => style("failed").red(),
            StageStatus::Skipped => style("skipped").dim(),
        };
        let detail = stage
            .summary
            .as_deref()
            .or(stage.error.as_deref())
            .unwrap_or("");
        println!(
            "  {:<10} {:<8} {:>7.1}s  {}",
            stage.stage,
            status,
            stage.duration.as_secs_f64(),
            detail
        );
    }
    println!(
        "\n{} batch {} in {:.1}s",
        if report.succeeded() {
            style("Finished").green().bold()
        } else {
            style("Failed").red().bold()
        },
        report.batch_id,
        report.elapsed.as_secs_f64()
    );
}
