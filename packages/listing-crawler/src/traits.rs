use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::types::{PageState, Target};

// ============================================================================
// PAGE DRIVER: the browser seam (tab navigation + current page snapshots)
// ============================================================================

/// Drives a real browser tab. Site-specific: implementations know how a
/// target's paginated listing URLs are built and when a page counts as
/// rendered.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// The listing URL for `page_number` (1-based) of `target`.
    fn page_url(&self, target: &Target, page_number: u32) -> String;

    /// URL the driven tab is currently on, rendered or not.
    async fn current_url(&self) -> Result<String>;

    /// Snapshot of the current page once it has rendered, `None` while it
    /// is still loading. The orchestrator polls this under a bounded wait.
    async fn current_page(&self) -> Result<Option<PageState>>;

    /// Navigate the driven tab. The next script invocation observes the
    /// outcome through `current_page`.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Open `target` in its own tab and wait for the rendered page. Used
    /// by the parallel visit pool, which never paginates.
    async fn open_in_tab(&self, target: &Target) -> Result<PageState>;
}

#[async_trait]
impl<T: PageDriver + ?Sized> PageDriver for std::sync::Arc<T> {
    fn page_url(&self, target: &Target, page_number: u32) -> String {
        (**self).page_url(target, page_number)
    }

    async fn current_url(&self) -> Result<String> {
        (**self).current_url().await
    }

    async fn current_page(&self) -> Result<Option<PageState>> {
        (**self).current_page().await
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        (**self).navigate(url).await
    }

    async fn open_in_tab(&self, target: &Target) -> Result<PageState> {
        (**self).open_in_tab(target).await
    }
}

// ============================================================================
// PAGE EXTRACTOR: site-specific scraping, opaque to the core
// ============================================================================

/// Extracts a structured payload from a rendered page. `None` means the
/// page yielded no data. The core never interprets the payload's fields.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, page: &PageState) -> Result<Option<Value>>;
}

#[async_trait]
impl<T: PageExtractor + ?Sized> PageExtractor for std::sync::Arc<T> {
    async fn extract(&self, page: &PageState) -> Result<Option<Value>> {
        (**self).extract(page).await
    }
}
