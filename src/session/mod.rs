//! Per-retailer browser session persistence.
//!
//! Cookies are serialized to a retailer-keyed JSON file so a later stage
//! (or a resumed run) observes the same catalog view the listing stages
//! saw. Everything here is best-effort: a missing or stale session file
//! degrades to unauthenticated browsing, never aborts a stage.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::browser::{Browser, SessionCookie};
use crate::models::Retailer;
use crate::retailers::RetailerProfile;

/// File-backed cookie store, one JSON blob per retailer.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path(&self, retailer: Retailer) -> PathBuf {
        self.dir.join(format!("{}_cookies.json", retailer.as_str()))
    }

    /// Serialize the browser's current cookies for this retailer.
    pub async fn save(&self, retailer: Retailer, browser: &mut dyn Browser) -> Result<()> {
        let cookies = browser.cookies().await?;
        let path = self.path(retailer);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&cookies)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write session file {:?}", path))?;
        info!("Saved {} cookies to {:?}", cookies.len(), path);
        Ok(())
    }

    /// Replay a stored session into the browser, if one exists.
    ///
    /// Navigates to the retailer's home domain first so the cookies attach
    /// to the right origin. Returns whether a session was found and
    /// applied. Login verification (for retailers that gate reviews behind
    /// an account) is advisory: an inconclusive check is logged, the run
    /// continues.
    pub async fn load(
        &self,
        profile: &RetailerProfile,
        browser: &mut dyn Browser,
    ) -> Result<bool> {
        let path = self.path(profile.retailer);
        if !path.exists() {
            debug!("no saved session for {}", profile.retailer);
            return Ok(false);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read session file {:?}", path))?;
        let cookies: Vec<SessionCookie> = match serde_json::from_str(&content) {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!("session file {:?} is not valid JSON ({}), ignoring", path, e);
                return Ok(false);
            }
        };

        browser.navigate(profile.home_url).await?;
        if let Err(e) = browser.set_cookies(&cookies).await {
            // Individual cookie failures are already swallowed below this;
            // a wholesale failure still must not abort the calling stage.
            warn!("cookie replay for {} failed: {}", profile.retailer, e);
            return Ok(false);
        }
        info!(
            "Restored {} cookies for {}",
            cookies.len(),
            profile.retailer
        );

        if let Some(indicator) = profile.account_indicator {
            match browser.exists(indicator).await {
                Ok(true) => debug!("{} session looks signed in", profile.retailer),
                Ok(false) => warn!(
                    "{} session restored but account indicator missing; reviews may be hidden",
                    profile.retailer
                ),
                Err(e) => warn!(
                    "could not verify login state for {}: {}",
                    profile.retailer, e
                ),
            }
        }

        Ok(true)
    }
}
