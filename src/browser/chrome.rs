//! Chromium-backed browser sessions over CDP.

#[cfg(feature = "browser")]
use std::path::PathBuf;
#[cfg(feature = "browser")]
use std::time::Duration;

use anyhow::Result;
#[cfg(feature = "browser")]
use anyhow::Context;
use serde::{Deserialize, Serialize};
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, GetCookiesParams, SetUserAgentOverrideParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser as CdpBrowser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;

use super::SessionCookie;

/// Chromium session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromeConfig {
    /// Run in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g. "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Page load timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g. "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            timeout: default_timeout(),
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

fn default_headless() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A persistent Chromium session. One page is kept open for the whole run
/// so cookies and site state survive across crawl stages.
#[cfg(feature = "browser")]
pub struct ChromeBrowser {
    config: ChromeConfig,
    browser: Option<CdpBrowser>,
    page: Option<Page>,
}

#[cfg(feature = "browser")]
impl ChromeBrowser {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        // Common install locations
        "/opt/google/chrome/google-chrome",
    ];

    pub fn new(config: ChromeConfig) -> Self {
        Self {
            config,
            browser: None,
            page: None,
        }
    }

    fn find_chrome() -> Result<PathBuf> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Please install it:\n\
             - Arch/Manjaro: sudo pacman -S chromium\n\
             - Ubuntu/Debian: sudo apt install chromium-browser\n\
             - Fedora: sudo dnf install chromium\n\
             - Or download from: https://www.google.com/chrome/"
        ))
    }

    /// Launch or connect to the browser if not already running.
    async fn ensure_browser(&mut self) -> Result<()> {
        if self.browser.is_some() {
            return Ok(());
        }

        if let Some(remote_url) = self.config.remote_url.clone() {
            return self.connect_remote(&remote_url).await;
        }

        info!("Launching browser (headless={})", self.config.headless);

        let chrome_path = Self::find_chrome()?;
        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);

        // with_head means NOT headless, confusingly
        if !self.config.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = CdpBrowser::launch(config)
            .await
            .context("Failed to launch browser")?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(browser);
        Ok(())
    }

    /// Connect to a remote Chrome instance.
    async fn connect_remote(&mut self, url: &str) -> Result<()> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let client = reqwest::Client::new();
        let resp: serde_json::Value = client
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

        let (browser, mut handler) = CdpBrowser::connect(ws_url)
            .await
            .context("Failed to connect to remote browser")?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(browser);
        Ok(())
    }

    /// The run's single page, created on first use.
    async fn ensure_page(&mut self) -> Result<&Page> {
        self.ensure_browser().await?;
        if self.page.is_none() {
            let browser = self.browser.as_ref().expect("browser just ensured");
            let page = browser.new_page("about:blank").await?;
            page.execute(SetUserAgentOverrideParams::new(USER_AGENT.to_string()))
                .await?;
            self.page = Some(page);
        }
        Ok(self.page.as_ref().expect("page just ensured"))
    }
}

#[cfg(feature = "browser")]
#[async_trait::async_trait]
impl super::Browser for ChromeBrowser {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let timeout = Duration::from_secs(self.config.timeout);
        let page = self.ensure_page().await?;

        debug!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid URL: {}", e))?;
        page.execute(nav_params).await?;

        // Poll document.readyState instead of sleeping a fixed interval.
        let wait_for_ready_script = r#"
            new Promise((resolve) => {
                if (document.readyState === 'complete' || document.readyState === 'interactive') {
                    resolve(document.readyState);
                } else {
                    document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
                    setTimeout(() => resolve('timeout'), 10000);
                }
            })
        "#;
        match tokio::time::timeout(timeout, page.evaluate(wait_for_ready_script.to_string())).await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }

        // Late-loading scripts still need a beat.
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    async fn content(&mut self) -> Result<String> {
        let page = self.ensure_page().await?;
        Ok(page.content().await?)
    }

    async fn exists(&mut self, selector: &str) -> Result<bool> {
        let page = self.ensure_page().await?;
        Ok(page.find_element(selector).await.is_ok())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let page = self.ensure_page().await?;
        let element = page.find_element(selector).await?;
        element.click().await?;
        Ok(())
    }

    async fn hold(&mut self, selector: &str, duration: Duration) -> Result<()> {
        let page = self.ensure_page().await?;
        let element = page.find_element(selector).await?;
        let point = element.clickable_point().await?;

        let down = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(point.x)
            .y(point.y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build mouse event: {}", e))?;
        page.execute(down).await?;

        tokio::time::sleep(duration).await;

        let up = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(point.x)
            .y(point.y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build mouse event: {}", e))?;
        page.execute(up).await?;
        Ok(())
    }

    async fn scroll_by(&mut self, pixels: i64) -> Result<()> {
        let page = self.ensure_page().await?;
        page.evaluate(format!("window.scrollBy(0, {})", pixels))
            .await?;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>> {
        let page = self.ensure_page().await?;
        let result = page.execute(GetCookiesParams::builder().build()).await?;
        Ok(result
            .result
            .cookies
            .iter()
            .map(|c| SessionCookie {
                name: c.name.clone(),
                value: c.value.clone(),
                domain: c.domain.clone(),
                path: c.path.clone(),
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<()> {
        let page = self.ensure_page().await?;
        for cookie in cookies {
            if cookie.name.is_empty() || cookie.domain.is_empty() {
                continue;
            }
            let param = CookieParam::builder()
                .name(&cookie.name)
                .value(&cookie.value)
                .domain(&cookie.domain)
                .path(&cookie.path)
                .secure(cookie.secure)
                .http_only(cookie.http_only)
                .build();
            match param {
                Ok(param) => {
                    if let Err(e) = page.set_cookie(param).await {
                        warn!("Failed to set cookie {}: {}", cookie.name, e);
                    }
                }
                Err(e) => warn!("Failed to build cookie {}: {}", cookie.name, e),
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.page = None;
        self.browser = None;
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct ChromeBrowser {
    #[allow(dead_code)]
    config: ChromeConfig,
}

#[cfg(not(feature = "browser"))]
impl ChromeBrowser {
    pub fn new(config: ChromeConfig) -> Self {
        Self { config }
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait::async_trait]
impl super::Browser for ChromeBrowser {
    async fn navigate(&mut self, _url: &str) -> Result<()> {
        Err(not_compiled())
    }

    async fn content(&mut self) -> Result<String> {
        Err(not_compiled())
    }

    async fn exists(&mut self, _selector: &str) -> Result<bool> {
        Err(not_compiled())
    }

    async fn click(&mut self, _selector: &str) -> Result<()> {
        Err(not_compiled())
    }

    async fn hold(&mut self, _selector: &str, _duration: std::time::Duration) -> Result<()> {
        Err(not_compiled())
    }

    async fn scroll_by(&mut self, _pixels: i64) -> Result<()> {
        Err(not_compiled())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>> {
        Err(not_compiled())
    }

    async fn set_cookies(&mut self, _cookies: &[SessionCookie]) -> Result<()> {
        Err(not_compiled())
    }

    async fn close(&mut self) {}
}

#[cfg(not(feature = "browser"))]
fn not_compiled() -> anyhow::Error {
    anyhow::anyhow!("Browser support not compiled. Rebuild with: cargo build --features browser")
}
