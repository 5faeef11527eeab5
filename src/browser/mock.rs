//! Scripted browser for stage tests.
//!
//! Pages are keyed by URL; each URL holds a queue of rendered states so a
//! test can model content that changes between reads (a challenge page
//! clearing after an interaction, late-rendering listings). The front
//! state is consumed when more states remain, and the last state repeats.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};

use super::{Browser, SessionCookie};

#[derive(Default)]
pub struct MockBrowser {
    pages: HashMap<String, VecDeque<String>>,
    nav_failures: HashSet<String>,
    current: Option<String>,
    pub visited: Vec<String>,
    pub clicks: Vec<String>,
    pub holds: Vec<(String, Duration)>,
    pub scrolls: Vec<i64>,
    cookie_jar: Vec<SessionCookie>,
    pub closed: bool,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve one fixed rendered state for a URL.
    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages
            .entry(url.to_string())
            .or_default()
            .push_back(html.to_string());
        self
    }

    /// Serve a sequence of rendered states for a URL, in read order.
    pub fn page_states(mut self, url: &str, states: &[&str]) -> Self {
        let queue = self.pages.entry(url.to_string()).or_default();
        for state in states {
            queue.push_back((*state).to_string());
        }
        self
    }

    /// Make navigation to a URL fail.
    pub fn fail_navigation(mut self, url: &str) -> Self {
        self.nav_failures.insert(url.to_string());
        self
    }

    pub fn with_cookies(mut self, cookies: Vec<SessionCookie>) -> Self {
        self.cookie_jar = cookies;
        self
    }

    pub fn stored_cookies(&self) -> &[SessionCookie] {
        &self.cookie_jar
    }

    pub fn interaction_count(&self) -> usize {
        self.clicks.len() + self.holds.len()
    }

    fn current_html(&mut self) -> String {
        let Some(url) = self.current.clone() else {
            return String::new();
        };
        match self.pages.get_mut(&url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => String::new(),
        }
    }

    fn peek_html(&self) -> String {
        self.current
            .as_ref()
            .and_then(|url| self.pages.get(url))
            .and_then(|queue| queue.front().cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        if self.nav_failures.contains(url) {
            return Err(anyhow::anyhow!("navigation failed: {}", url));
        }
        self.visited.push(url.to_string());
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn content(&mut self) -> Result<String> {
        Ok(self.current_html())
    }

    async fn exists(&mut self, selector: &str) -> Result<bool> {
        let html = self.peek_html();
        let parsed = Html::parse_document(&html);
        let Ok(sel) = Selector::parse(selector) else {
            return Ok(false);
        };
        Ok(parsed.select(&sel).next().is_some())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.clicks.push(selector.to_string());
        Ok(())
    }

    async fn hold(&mut self, selector: &str, duration: Duration) -> Result<()> {
        self.holds.push((selector.to_string(), duration));
        Ok(())
    }

    async fn scroll_by(&mut self, pixels: i64) -> Result<()> {
        self.scrolls.push(pixels);
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>> {
        Ok(self.cookie_jar.clone())
    }

    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<()> {
        self.cookie_jar = cookies.to_vec();
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
