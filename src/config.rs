//! Settings loading: TOML file plus environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::browser::ChromeConfig;
use crate::crawl::Pacing;

/// Runtime settings for the pipeline.
///
/// Everything has a default; a missing config file means a default run
/// against the default data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the database and session files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Target number of records per listing stage.
    #[serde(default = "default_listing_target")]
    pub listing_target: usize,

    /// Crawl timing knobs.
    #[serde(default)]
    pub pacing: Pacing,

    /// Insert batch size for the bulk writer.
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,

    /// Sub-batch size the writer retries failed batches with.
    #[serde(default = "default_write_retry_size")]
    pub write_retry_size: usize,

    /// Manual challenge window on listing pages, seconds.
    #[serde(default = "default_manual_wait_secs")]
    pub manual_wait_secs: u64,

    /// Manual challenge window on detail pages, seconds. Detail pages are
    /// more bot-sensitive and get the longer window.
    #[serde(default = "default_detail_manual_wait_secs")]
    pub detail_manual_wait_secs: u64,

    /// Webhook endpoint for run reports; unset means log-only.
    #[serde(default)]
    pub notify_webhook: Option<String>,

    /// Browser session configuration.
    #[serde(default)]
    pub browser: ChromeConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shelfwatch")
}

fn default_listing_target() -> usize {
    100
}

fn default_write_batch_size() -> usize {
    20
}

fn default_write_retry_size() -> usize {
    5
}

fn default_manual_wait_secs() -> u64 {
    45
}

fn default_detail_manual_wait_secs() -> u64 {
    75
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            listing_target: default_listing_target(),
            pacing: Pacing::default(),
            write_batch_size: default_write_batch_size(),
            write_retry_size: default_write_retry_size(),
            manual_wait_secs: default_manual_wait_secs(),
            detail_manual_wait_secs: default_detail_manual_wait_secs(),
            notify_webhook: None,
            browser: ChromeConfig::default(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("shelfwatch.db")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn manual_wait(&self) -> Duration {
        Duration::from_secs(self.manual_wait_secs)
    }

    pub fn detail_manual_wait(&self) -> Duration {
        Duration::from_secs(self.detail_manual_wait_secs)
    }
}

/// Load settings from the first config file found, then apply overrides.
///
/// Search order: explicit `--config` path, `./shelfwatch.toml`, then
/// `<config dir>/shelfwatch/config.toml`. `SHELFWATCH_DATA_DIR` and the
/// `--data-dir` flag override the configured data directory.
pub fn load_settings(
    config_path: Option<&Path>,
    data_dir_override: Option<&Path>,
) -> Result<Settings> {
    let mut settings = match find_config(config_path) {
        Some(path) => {
            debug!("loading settings from {:?}", path);
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config file {:?}", path))?
        }
        None => {
            debug!("no config file found, using defaults");
            Settings::default()
        }
    };

    if let Ok(dir) = std::env::var("SHELFWATCH_DATA_DIR") {
        settings.data_dir = PathBuf::from(dir);
    }
    if let Some(dir) = data_dir_override {
        settings.data_dir = dir.to_path_buf();
    }
    Ok(settings)
}

fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("shelfwatch.toml");
    if local.exists() {
        return Some(local);
    }
    let global = dirs::config_dir()?.join("shelfwatch").join("config.toml");
    global.exists().then_some(global)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_are_missing() {
        let settings: Settings = toml::from_str(
            r#"
            listing_target = 25

            [pacing]
            expected_per_page = 24
        "#,
        )
        .unwrap();
        assert_eq!(settings.listing_target, 25);
        assert_eq!(settings.pacing.expected_per_page, 24);
        assert_eq!(settings.pacing.content_retries, 3);
        assert_eq!(settings.write_batch_size, 20);
        assert_eq!(settings.write_retry_size, 5);
        assert!(settings.browser.headless);
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "listing_target = 7\n").unwrap();

        let settings = load_settings(Some(&path), None).unwrap();
        assert_eq!(settings.listing_target, 7);
    }

    #[test]
    fn data_dir_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(None, Some(dir.path())).unwrap();
        assert_eq!(settings.data_dir, dir.path());
        assert!(settings.db_path().ends_with("shelfwatch.db"));
    }
}
