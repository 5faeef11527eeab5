//! Shared timing primitives.
//!
//! Crawl stages never busy-wait on fixed sleeps for "page fully loaded";
//! they poll a predicate with bounded attempts via [`wait_until`], and pace
//! interactive actions with jittered delays so request timing resembles a
//! human operator.

use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Poll `probe` until it returns true or `attempts` are exhausted.
///
/// The first probe runs immediately; each retry waits `delay` scaled by the
/// attempt number. Returns whether the predicate was ever satisfied.
pub async fn wait_until<F, Fut>(attempts: u32, delay: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 0..attempts.max(1) {
        if probe().await {
            return true;
        }
        if attempt + 1 < attempts.max(1) {
            let backoff = delay * (attempt + 1);
            debug!("condition not met, retrying in {:?}", backoff);
            tokio::time::sleep(backoff).await;
        }
    }
    false
}

/// Pick a duration uniformly from an inclusive millisecond range.
pub fn jitter_ms(range: RangeInclusive<u64>) -> Duration {
    let ms = if range.start() >= range.end() {
        *range.start()
    } else {
        rand::rng().random_range(range)
    };
    Duration::from_millis(ms)
}

/// Sleep for a jittered duration from an inclusive millisecond range.
pub async fn jitter_sleep(range: RangeInclusive<u64>) {
    tokio::time::sleep(jitter_ms(range)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn wait_until_stops_on_success() {
        let calls = AtomicU32::new(0);
        let ok = wait_until(5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { n >= 2 }
        })
        .await;
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wait_until_gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let ok = wait_until(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { false }
        })
        .await;
        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..50 {
            let d = jitter_ms(40..=90);
            assert!(d >= Duration::from_millis(40));
            assert!(d <= Duration::from_millis(90));
        }
    }
}
