//! Field extraction gateway.
//!
//! One call extracts one field from one rendered fragment. Failures are
//! the normal case here — retailers reshuffle markup constantly — so every
//! path degrades to the locator's configured fallback (usually null) and
//! the record being assembled keeps its other fields.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::repository::FieldLocator;

/// Extract a field from an item container on a listing page.
pub fn from_fragment(fragment: &ElementRef, locator: &FieldLocator) -> Option<String> {
    let selector = match Selector::parse(&locator.selector) {
        Ok(selector) => selector,
        Err(e) => {
            warn!("invalid selector '{}': {:?}", locator.selector, e);
            return locator.fallback.clone();
        }
    };
    match fragment.select(&selector).next() {
        Some(element) => read_element(&element, locator),
        None => {
            debug!("no match for '{}'", locator.selector);
            locator.fallback.clone()
        }
    }
}

/// Extract a field from a whole rendered document (detail pages).
pub fn from_document(document: &Html, locator: &FieldLocator) -> Option<String> {
    let selector = match Selector::parse(&locator.selector) {
        Ok(selector) => selector,
        Err(e) => {
            warn!("invalid selector '{}': {:?}", locator.selector, e);
            return locator.fallback.clone();
        }
    };
    match document.select(&selector).next() {
        Some(element) => read_element(&element, locator),
        None => {
            debug!("no match for '{}'", locator.selector);
            locator.fallback.clone()
        }
    }
}

/// Extract every match for a locator from a document (similar-product lists).
pub fn all_from_document(document: &Html, locator: &FieldLocator) -> Vec<String> {
    let selector = match Selector::parse(&locator.selector) {
        Ok(selector) => selector,
        Err(e) => {
            warn!("invalid selector '{}': {:?}", locator.selector, e);
            return Vec::new();
        }
    };
    document
        .select(&selector)
        .filter_map(|element| read_element(&element, locator))
        .collect()
}

fn read_element(element: &ElementRef, locator: &FieldLocator) -> Option<String> {
    let raw = match &locator.attr {
        Some(attr) => element.value().attr(attr).map(|v| v.to_string()),
        None => {
            let text = element.text().collect::<Vec<_>>().join(" ");
            Some(text)
        }
    };
    let value = raw
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty());
    value.or_else(|| locator.fallback.clone())
}

/// Parse a leading unsigned integer out of loosely formatted text
/// ("1,423 ratings" → 1423).
pub fn parse_count(text: &str) -> Option<u32> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Parse a rating average out of loosely formatted text
/// ("4.6 out of 5 stars" → 4.6).
pub fn parse_rating(text: &str) -> Option<f64> {
    text.split_whitespace()
        .find_map(|token| token.trim_matches(|c: char| !c.is_ascii_digit() && c != '.').parse::<f64>().ok())
        .filter(|r| (0.0..=5.0).contains(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD: &str = r#"
        <div class="card">
            <h2><a href="/dp/B0TEST01?ref=sr"><span>  Pixel 9   Pro </span></a></h2>
            <span class="a-price"><span class="a-offscreen">$899.00</span></span>
        </div>
    "#;

    fn card() -> Html {
        Html::parse_fragment(CARD)
    }

    #[test]
    fn text_extraction_collapses_whitespace() {
        let doc = card();
        let root = doc.root_element();
        let value = from_fragment(&root, &FieldLocator::text("h2 span"));
        assert_eq!(value.as_deref(), Some("Pixel 9 Pro"));
    }

    #[test]
    fn attr_extraction_reads_attribute() {
        let doc = card();
        let root = doc.root_element();
        let value = from_fragment(&root, &FieldLocator::attr("h2 a", "href"));
        assert_eq!(value.as_deref(), Some("/dp/B0TEST01?ref=sr"));
    }

    #[test]
    fn missing_element_yields_fallback() {
        let doc = card();
        let root = doc.root_element();
        let mut locator = FieldLocator::text(".shipping-note");
        assert_eq!(from_fragment(&root, &locator), None);

        locator.fallback = Some("standard".to_string());
        assert_eq!(from_fragment(&root, &locator).as_deref(), Some("standard"));
    }

    #[test]
    fn invalid_selector_yields_fallback_not_panic() {
        let doc = card();
        let root = doc.root_element();
        let locator = FieldLocator {
            selector: ":::not a selector".to_string(),
            attr: None,
            fallback: Some("n/a".to_string()),
        };
        assert_eq!(from_fragment(&root, &locator).as_deref(), Some("n/a"));
    }

    #[test]
    fn counts_and_ratings_parse_from_loose_text() {
        assert_eq!(parse_count("1,423 ratings"), Some(1423));
        assert_eq!(parse_count("(87)"), Some(87));
        assert_eq!(parse_count("no reviews"), None);
        assert_eq!(parse_rating("4.6 out of 5 stars"), Some(4.6));
        assert_eq!(parse_rating("Rated 3 stars"), Some(3.0));
        assert_eq!(parse_rating("unrated"), None);
    }
}
