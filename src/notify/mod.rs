//! Outbound run notifications.
//!
//! Notification is fire-and-forget: the pipeline reports its outcome and
//! moves on; a sink that is down must never fail the run that it is
//! reporting on.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::pipeline::{RunReport, StageStatus};

/// Outcome sink for finished (or aborted) pipeline runs.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &RunReport) -> Result<()>;
}

/// Deliver a report, swallowing and logging sink failures.
pub async fn dispatch(notifier: &dyn Notifier, report: &RunReport) {
    if let Err(e) = notifier.notify(report).await {
        warn!("run notification failed: {}", e);
    }
}

/// Default sink: the run summary goes to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &RunReport) -> Result<()> {
        for stage in &report.stages {
            info!(
                "stage {} -> {} in {:.1}s{}",
                stage.stage,
                stage.status,
                stage.duration.as_secs_f64(),
                stage
                    .error
                    .as_deref()
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default()
            );
        }
        info!(
            "batch {} finished in {:.1}s: {} succeeded, {} failed, {} skipped",
            report.batch_id,
            report.elapsed.as_secs_f64(),
            report.count(StageStatus::Success),
            report.count(StageStatus::Failed),
            report.count(StageStatus::Skipped),
        );
        Ok(())
    }
}

/// POSTs the run report as JSON to a configured endpoint. The receiving
/// side owns turning it into email or chat alerts.
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, report: &RunReport) -> Result<()> {
        let stage_results: serde_json::Map<String, serde_json::Value> = report
            .stages
            .iter()
            .map(|s| {
                (
                    s.stage.to_string(),
                    serde_json::Value::String(s.status.to_string()),
                )
            })
            .collect();
        let failed_stages: Vec<String> = report
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Failed)
            .map(|s| s.stage.to_string())
            .collect();

        let payload = serde_json::json!({
            "retailer": report.retailer.as_str(),
            "batch_id": report.batch_id,
            "stage_results": stage_results,
            "failed_stages": failed_stages,
            "elapsed_seconds": report.elapsed.as_secs(),
            "error_message": report.error,
            "resumed_from": report.resumed_from.map(|s| s.to_string()),
        });

        self.client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
