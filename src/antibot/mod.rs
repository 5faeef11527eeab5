//! Bot-challenge detection and resolution.
//!
//! Retailers interleave crawls with interstitial challenge pages. Each page
//! load runs through a small state machine: no signature means proceed;
//! otherwise try a scripted interaction against a known challenge control
//! (click, or press-and-hold for the PerimeterX style), and failing that,
//! pause inside a fixed window so an operator can clear it by hand. The
//! handler holds no state across calls; the caller decides what an
//! unresolved challenge means for the record at hand.

use std::ops::RangeInclusive;
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::browser::Browser;
use crate::utils::{jitter_ms, jitter_sleep};

/// How a challenge control wants to be operated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Move, short randomized pause, click.
    Click,
    /// Move, mouse-down, hold 7-9s randomized, mouse-up.
    Hold,
}

/// A known clickable/holdable challenge control.
#[derive(Debug, Clone, Copy)]
pub struct ChallengeControl {
    pub selector: &'static str,
    pub kind: ControlKind,
}

/// Terminal outcome of one challenge resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Signature gone (or never present); resume the crawl.
    Resolved,
    /// Signature persists; the caller degrades, never crashes.
    Unresolved,
}

/// Challenge state machine for one retailer's signatures and controls.
pub struct AntiBotHandler {
    keywords: Vec<String>,
    signatures: Vec<String>,
    controls: Vec<ChallengeControl>,
    pause_ms: RangeInclusive<u64>,
    hold_ms: RangeInclusive<u64>,
    manual_wait: Duration,
}

impl AntiBotHandler {
    pub fn new(
        keywords: &[&str],
        signatures: &[&str],
        controls: &[ChallengeControl],
    ) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
            controls: controls.to_vec(),
            pause_ms: 800..=2200,
            hold_ms: 7000..=9000,
            manual_wait: Duration::from_secs(45),
        }
    }

    /// Window granted to a human operator when no control can be scripted.
    pub fn with_manual_wait(mut self, wait: Duration) -> Self {
        self.manual_wait = wait;
        self
    }

    #[cfg(test)]
    fn with_timings(mut self, pause_ms: RangeInclusive<u64>, hold_ms: RangeInclusive<u64>) -> Self {
        self.pause_ms = pause_ms;
        self.hold_ms = hold_ms;
        self
    }

    /// Whether the rendered page carries a challenge signature.
    pub fn detect(&self, page: &str) -> bool {
        let lowered = page.to_lowercase();
        if self.keywords.iter().any(|k| lowered.contains(k)) {
            return true;
        }
        if self.signatures.is_empty() {
            return false;
        }
        let parsed = Html::parse_document(page);
        self.signatures.iter().any(|sig| {
            Selector::parse(sig)
                .map(|sel| parsed.select(&sel).next().is_some())
                .unwrap_or(false)
        })
    }

    /// Run the state machine against an already-rendered page.
    ///
    /// Clean pages resolve immediately without touching the browser.
    pub async fn resolve(&self, page: &str, browser: &mut dyn Browser) -> ChallengeOutcome {
        if !self.detect(page) {
            return ChallengeOutcome::Resolved;
        }
        warn!("bot challenge detected");

        if let Some(control) = self.locate_control(page) {
            if let Err(e) = self.operate(control, browser).await {
                warn!("challenge interaction failed: {}", e);
            }
            match browser.content().await {
                Ok(after) if !self.detect(&after) => {
                    info!("challenge cleared by scripted interaction");
                    return ChallengeOutcome::Resolved;
                }
                Ok(_) => debug!("challenge persists after interaction"),
                Err(e) => warn!("could not re-check challenge: {}", e),
            }
        } else {
            debug!("no scriptable challenge control on page");
        }

        // Manual window: give an operator time to clear it, then re-check.
        info!(
            "waiting {:?} for manual challenge resolution",
            self.manual_wait
        );
        tokio::time::sleep(self.manual_wait).await;

        match browser.content().await {
            Ok(after) if !self.detect(&after) => {
                info!("challenge cleared during manual window");
                ChallengeOutcome::Resolved
            }
            Ok(_) => {
                warn!("challenge unresolved after manual window");
                ChallengeOutcome::Unresolved
            }
            Err(e) => {
                warn!("could not re-check challenge: {}", e);
                ChallengeOutcome::Unresolved
            }
        }
    }

    fn locate_control(&self, page: &str) -> Option<ChallengeControl> {
        let parsed = Html::parse_document(page);
        self.controls.iter().copied().find(|control| {
            Selector::parse(control.selector)
                .map(|sel| parsed.select(&sel).next().is_some())
                .unwrap_or(false)
        })
    }

    async fn operate(
        &self,
        control: ChallengeControl,
        browser: &mut dyn Browser,
    ) -> anyhow::Result<()> {
        jitter_sleep(self.pause_ms.clone()).await;
        match control.kind {
            ControlKind::Click => browser.click(control.selector).await?,
            ControlKind::Hold => {
                let duration = jitter_ms(self.hold_ms.clone());
                browser.hold(control.selector, duration).await?;
            }
        }
        // Challenge scripts verify asynchronously after the gesture.
        jitter_sleep(self.pause_ms.clone()).await;
        Ok(())
    }
}
