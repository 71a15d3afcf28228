use anyhow::Result;
use tokio::time::Instant;

use crate::config::{DetectorConfig, ReadinessConfig};
use crate::traits::PageDriver;
use crate::types::{PageState, TerminationSignal};

/// Classify the current page against the previous page's fingerprint for
/// the same target.
///
/// Priority order matters: a checkpoint interstitial can also look sparse,
/// and a final page re-served past the end of a listing can still carry a
/// zero-results banner in a sidebar. Sites that loop back to page 1 or
/// re-render the last page instead of erroring are caught by the
/// fingerprint comparison; without it those targets would never terminate.
pub fn classify(
    page: &PageState,
    prior_fingerprint: Option<&str>,
    config: &DetectorConfig,
) -> TerminationSignal {
    let text = page.text.to_lowercase();

    if matches_any(&text, &config.security_checkpoint_markers) {
        tracing::warn!(url = %page.url, "security checkpoint pattern matched");
        return TerminationSignal::SecurityCheckpoint;
    }

    let sparse = page.text.trim().len() < config.min_content_len;
    if sparse && matches_any(&text, &config.not_found_markers) {
        tracing::debug!(url = %page.url, "not-found pattern on sparse page");
        return TerminationSignal::NotFound;
    }

    if let (Some(current), Some(prior)) = (page.first_item_fingerprint.as_deref(), prior_fingerprint)
    {
        if current == prior {
            tracing::debug!(url = %page.url, "first-item fingerprint repeated");
            return TerminationSignal::DuplicatePage;
        }
    }

    if matches_any(&text, &config.zero_results_markers) {
        tracing::debug!(url = %page.url, "zero-results pattern matched");
        return TerminationSignal::EndOfResults;
    }

    TerminationSignal::Continue
}

fn matches_any(text: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|marker| text.contains(&marker.to_lowercase()))
}

/// Poll the driver until the page renders or the bound expires. Returns
/// `None` on expiry so a not-yet-loaded page is reported as a timeout, not
/// misclassified as not-found.
pub async fn await_page_ready<D: PageDriver + ?Sized>(
    driver: &D,
    config: &ReadinessConfig,
) -> Result<Option<PageState>> {
    let started = Instant::now();
    loop {
        if let Some(page) = driver.current_page().await? {
            return Ok(Some(page));
        }
        if started.elapsed() >= config.max_wait {
            tracing::warn!(waited_ms = config.max_wait.as_millis() as u64, "page readiness wait expired");
            return Ok(None);
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str, fingerprint: Option<&str>) -> PageState {
        PageState {
            url: "https://shop.example/search?q=acme&page=2".to_string(),
            text: text.to_string(),
            first_item_fingerprint: fingerprint.map(str::to_string),
        }
    }

    fn long_listing(extra: &str) -> String {
        format!("{} {}", "product row ".repeat(40), extra)
    }

    #[test]
    fn checkpoint_outranks_everything() {
        let config = DetectorConfig::default();
        let p = page("Please complete this CAPTCHA. No results.", Some("fp1"));
        assert_eq!(
            classify(&p, Some("fp1"), &config),
            TerminationSignal::SecurityCheckpoint
        );
    }

    #[test]
    fn not_found_requires_sparse_content() {
        let config = DetectorConfig::default();
        let sparse = page("404 page not found", None);
        assert_eq!(classify(&sparse, None, &config), TerminationSignal::NotFound);

        // A full listing mentioning "404" somewhere is not a dead page.
        let dense = page(&long_listing("item model B-404"), Some("fp1"));
        assert_eq!(classify(&dense, None, &config), TerminationSignal::Continue);
    }

    #[test]
    fn repeated_fingerprint_is_a_duplicate_page() {
        let config = DetectorConfig::default();
        let p = page(&long_listing(""), Some("fp1"));
        assert_eq!(
            classify(&p, Some("fp1"), &config),
            TerminationSignal::DuplicatePage
        );
        assert_eq!(
            classify(&p, Some("fp0"), &config),
            TerminationSignal::Continue
        );
        assert_eq!(classify(&p, None, &config), TerminationSignal::Continue);
    }

    #[test]
    fn zero_results_marker_ends_the_target() {
        let config = DetectorConfig::default();
        let p = page(&long_listing("No matching products for this brand"), None);
        assert_eq!(
            classify(&p, None, &config),
            TerminationSignal::EndOfResults
        );
    }

    #[test]
    fn marker_matching_is_case_insensitive() {
        let config = DetectorConfig::default().with_zero_results_marker("Keine Treffer");
        let p = page(&long_listing("KEINE TREFFER"), None);
        assert_eq!(classify(&p, None, &config), TerminationSignal::EndOfResults);
    }
}
