//! Per-retailer capability descriptors.
//!
//! The crawl and enrichment stages are generic; everything retailer-specific
//! lives here: stage order, home domain, item-id URL shape, rank-merge
//! policy, and bot-challenge signatures. Adding a retailer means adding a
//! profile and selector rows, not new stage code.

use regex::Regex;

use crate::antibot::{ChallengeControl, ControlKind};
use crate::models::{RankMergePolicy, Retailer};
use crate::pipeline::Stage;

/// Static description of how one retailer is crawled.
pub struct RetailerProfile {
    pub retailer: Retailer,
    /// Home domain used to anchor cookie replay.
    pub home_url: &'static str,
    /// Pipeline stages for this retailer, in execution order.
    pub stages: &'static [Stage],
    /// Regex with one capture group extracting the item id from a
    /// canonical product URL.
    pub item_id_pattern: &'static str,
    /// What happens to a rank column when a product is re-sighted within
    /// one batch by another listing pass.
    pub rank_merge: RankMergePolicy,
    /// Element that proves a signed-in session, for retailers that gate
    /// review data behind an account. Verification is advisory.
    pub account_indicator: Option<&'static str>,
    /// Case-insensitive challenge page keywords.
    pub challenge_keywords: &'static [&'static str],
    /// Challenge element signatures (CSS selectors).
    pub challenge_signatures: &'static [&'static str],
    /// Scriptable challenge controls, tried in order.
    pub challenge_controls: &'static [ChallengeControl],
}

impl RetailerProfile {
    /// Compile the item-id pattern. The patterns are static and tested;
    /// a failure here is a programming error surfaced at stage start.
    pub fn item_id_regex(&self) -> Result<Regex, regex::Error> {
        Regex::new(self.item_id_pattern)
    }
}

/// Extract an item id from a canonical product URL.
pub fn parse_item_id(re: &Regex, url: &str) -> Option<String> {
    re.captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

static AMAZON: RetailerProfile = RetailerProfile {
    retailer: Retailer::Amazon,
    home_url: "https://www.amazon.com",
    stages: &[
        Stage::Main,
        Stage::Bsr,
        Stage::Promotion,
        Stage::Detail,
        Stage::Reconcile,
    ],
    item_id_pattern: r"/dp/([A-Z0-9]{10})",
    rank_merge: RankMergePolicy::Overwrite,
    account_indicator: None,
    challenge_keywords: &[
        "enter the characters you see below",
        "to discuss automated access",
        "api-services-support@amazon.com",
    ],
    challenge_signatures: &["form[action*='validateCaptcha']"],
    // Amazon's text captcha has no scriptable control; the manual window
    // is the only path.
    challenge_controls: &[],
};

static BESTBUY: RetailerProfile = RetailerProfile {
    retailer: Retailer::BestBuy,
    home_url: "https://www.bestbuy.com",
    stages: &[
        Stage::Main,
        Stage::Bsr,
        Stage::Promotion,
        Stage::Detail,
        Stage::Reconcile,
    ],
    item_id_pattern: r"/(\d{7})\.p",
    rank_merge: RankMergePolicy::FillIfAbsent,
    account_indicator: Some(".account-button__text"),
    challenge_keywords: &["access denied", "verify you are a human"],
    challenge_signatures: &["#challenge-form"],
    challenge_controls: &[ChallengeControl {
        selector: "#challenge-form button",
        kind: ControlKind::Click,
    }],
};

static WALMART: RetailerProfile = RetailerProfile {
    retailer: Retailer::Walmart,
    home_url: "https://www.walmart.com",
    stages: &[
        Stage::Main,
        Stage::Trend,
        Stage::Detail,
        Stage::Reconcile,
    ],
    item_id_pattern: r"/ip/(?:[^/]+/)?(\d+)",
    rank_merge: RankMergePolicy::FillIfAbsent,
    account_indicator: None,
    challenge_keywords: &["robot or human", "press & hold", "press and hold"],
    challenge_signatures: &["#px-captcha"],
    challenge_controls: &[ChallengeControl {
        selector: "#px-captcha",
        kind: ControlKind::Hold,
    }],
};

/// The capability descriptor for a retailer.
pub fn profile(retailer: Retailer) -> &'static RetailerProfile {
    match retailer {
        Retailer::Amazon => &AMAZON,
        Retailer::BestBuy => &BESTBUY,
        Retailer::Walmart => &WALMART,
    }
}
