use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Text patterns used to classify a loaded page, matched
/// case-insensitively against the page's visible text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub security_checkpoint_markers: Vec<String>,
    pub not_found_markers: Vec<String>,
    pub zero_results_markers: Vec<String>,
    /// A page shorter than this (after trimming) is considered sparse;
    /// not-found markers only count on sparse pages.
    pub min_content_len: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            security_checkpoint_markers: vec![
                "verify you are human".to_string(),
                "unusual traffic".to_string(),
                "security check".to_string(),
                "captcha".to_string(),
            ],
            not_found_markers: vec![
                "page not found".to_string(),
                "does not exist".to_string(),
                "404".to_string(),
            ],
            zero_results_markers: vec![
                "no results".to_string(),
                "0 results".to_string(),
                "no matching products".to_string(),
                "nothing found".to_string(),
            ],
            min_content_len: 200,
        }
    }
}

impl DetectorConfig {
    pub fn with_security_marker(mut self, marker: impl Into<String>) -> Self {
        self.security_checkpoint_markers.push(marker.into());
        self
    }

    pub fn with_not_found_marker(mut self, marker: impl Into<String>) -> Self {
        self.not_found_markers.push(marker.into());
        self
    }

    pub fn with_zero_results_marker(mut self, marker: impl Into<String>) -> Self {
        self.zero_results_markers.push(marker.into());
        self
    }

    pub fn with_min_content_len(mut self, len: usize) -> Self {
        self.min_content_len = len;
        self
    }
}

/// Bounded page-readiness wait. Classification never runs on a page that
/// has not signalled readiness within `max_wait`.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_millis(2500),
            poll_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub detector: DetectorConfig,
    pub readiness: ReadinessConfig,
    /// Concurrency limit for the parallel visit pool.
    pub visit_concurrency: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            readiness: ReadinessConfig::default(),
            visit_concurrency: 4,
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessConfig) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_visit_concurrency(mut self, limit: usize) -> Self {
        self.visit_concurrency = limit.max(1);
        self
    }
}
