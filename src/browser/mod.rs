//! Browser capability for retailer pages.
//!
//! Crawl stages depend on this trait, not on an automation driver: a
//! browser can navigate, hand back rendered HTML, click and hold elements,
//! scroll, and exchange cookies. The chromiumoxide-backed implementation
//! lives behind the `browser` cargo feature; tests drive stages through a
//! scripted mock.

mod chrome;
#[cfg(test)]
pub mod mock;

pub use chrome::{ChromeBrowser, ChromeConfig};

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Cookie exchanged with a browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

/// What a crawl stage needs from a browser session.
#[async_trait]
pub trait Browser: Send {
    /// Navigate to a URL and wait for the document to settle.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Rendered HTML of the current page.
    async fn content(&mut self) -> Result<String>;

    /// Whether an element matching the selector is currently present.
    async fn exists(&mut self, selector: &str) -> Result<bool>;

    /// Click the first element matching the selector.
    async fn click(&mut self, selector: &str) -> Result<()>;

    /// Press and hold the first element matching the selector.
    async fn hold(&mut self, selector: &str, duration: Duration) -> Result<()>;

    /// Scroll the viewport vertically by a pixel delta.
    async fn scroll_by(&mut self, pixels: i64) -> Result<()>;

    /// All cookies of the current session.
    async fn cookies(&mut self) -> Result<Vec<SessionCookie>>;

    /// Replay cookies into the session; individual failures are best-effort.
    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<()>;

    /// Release the underlying session. Always called at run end.
    async fn close(&mut self);
}
