use thiserror::Error;

/// Failure taxonomy for the crawl core.
///
/// Everything except `SecurityCheckpoint` is recorded against the affected
/// target and the batch keeps moving; a checkpoint pauses the batch until
/// a human resolves it.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("target {position} failed: {reason}")]
    Target { position: u32, reason: String },

    #[error("page never became ready within {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("security checkpoint at {url}")]
    SecurityCheckpoint { url: String },

    #[error("job state inconsistent: {0}")]
    StateInconsistency(String),
}

impl CrawlError {
    /// Short reason string stored on the error record for this failure.
    pub fn record_reason(&self) -> String {
        match self {
            CrawlError::Target { reason, .. } => reason.clone(),
            CrawlError::Timeout { .. } => "timeout".to_string(),
            CrawlError::SecurityCheckpoint { url } => {
                format!("security checkpoint: {url}")
            }
            CrawlError::StateInconsistency(detail) => {
                format!("state inconsistency: {detail}")
            }
        }
    }
}
