use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::store::{JobStore, WriteOutcome};
use crate::traits::{PageDriver, PageExtractor};
use crate::types::{payload_is_empty, ResultRecord, Target};

/// Outcome counters for one pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisitStats {
    pub recorded: usize,
    pub no_data: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy)]
enum VisitOutcome {
    Recorded,
    NoData,
    Failed,
    Skipped,
}

/// Bounded pool of independent single-page visits, one tab per target.
///
/// Unlike the paginated orchestrator this never walks a cursor: targets
/// are independent, so tabs run concurrently up to the configured limit.
/// The job store is the only synchronization primitive shared with the
/// rest of the system, which is why the stop flag is re-checked
/// immediately before every write: stopping is advisory, and that check
/// is the authoritative stop point for each visit.
pub struct VisitPool<S, D, X> {
    store: Arc<S>,
    driver: Arc<D>,
    extractor: Arc<X>,
    concurrency: usize,
}

impl<S, D, X> VisitPool<S, D, X>
where
    S: JobStore + 'static,
    D: PageDriver + 'static,
    X: PageExtractor + 'static,
{
    pub fn new(store: Arc<S>, driver: Arc<D>, extractor: Arc<X>, concurrency: usize) -> Self {
        Self {
            store,
            driver,
            extractor,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn visit_all(&self, targets: &[Target]) -> Result<VisitStats> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let driver = Arc::clone(&self.driver);
            let extractor = Arc::clone(&self.extractor);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("visit pool semaphore closed")?;
                visit_one(&*store, &*driver, &*extractor, &target).await
            }));
        }

        let mut stats = VisitStats::default();
        for handle in futures::future::join_all(handles).await {
            match handle {
                Ok(Ok(VisitOutcome::Recorded)) => stats.recorded += 1,
                Ok(Ok(VisitOutcome::NoData)) => stats.no_data += 1,
                Ok(Ok(VisitOutcome::Failed)) => stats.failed += 1,
                Ok(Ok(VisitOutcome::Skipped)) => stats.skipped += 1,
                Ok(Err(error)) => {
                    tracing::warn!(%error, "visit task failed");
                    stats.failed += 1;
                }
                Err(error) => {
                    tracing::warn!(%error, "visit task panicked");
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            recorded = stats.recorded,
            no_data = stats.no_data,
            failed = stats.failed,
            skipped = stats.skipped,
            "visit pool finished"
        );
        Ok(stats)
    }
}

async fn visit_one<S, D, X>(
    store: &S,
    driver: &D,
    extractor: &X,
    target: &Target,
) -> Result<VisitOutcome>
where
    S: JobStore + ?Sized,
    D: PageDriver + ?Sized,
    X: PageExtractor + ?Sized,
{
    if !batch_running(store).await? {
        return Ok(VisitOutcome::Skipped);
    }

    if target.is_placeholder() {
        if store
            .results_for_position(target.position)
            .await?
            .is_empty()
        {
            store
                .append_result(ResultRecord::completed_empty(target.position))
                .await?;
        }
        return Ok(VisitOutcome::Recorded);
    }

    let (record, outcome) = match driver.open_in_tab(target).await {
        Ok(page) => match extractor.extract(&page).await {
            Ok(payload) => {
                let payload = payload.unwrap_or(Value::Null);
                if payload_is_empty(&payload) {
                    (ResultRecord::no_data(target.position), VisitOutcome::NoData)
                } else {
                    (
                        ResultRecord::completed(target.position, 1, payload),
                        VisitOutcome::Recorded,
                    )
                }
            }
            Err(error) => (
                ResultRecord::error(
                    target.position,
                    1,
                    format!("extraction failed: {error}"),
                ),
                VisitOutcome::Failed,
            ),
        },
        Err(error) => (
            ResultRecord::error(target.position, 1, format!("visit failed: {error}")),
            VisitOutcome::Failed,
        ),
    };

    // Authoritative stop point: the latest job state, not the one seen
    // when this visit was scheduled. Nothing lands after a stop, error
    // records included.
    if !batch_running(store).await? {
        return Ok(VisitOutcome::Skipped);
    }

    match store.append_result(record).await? {
        WriteOutcome::Rejected => Ok(VisitOutcome::Skipped),
        _ => Ok(outcome),
    }
}

/// A missing job does not block the pool: visits may run standalone. An
/// explicitly stopped or paused job does.
async fn batch_running<S: JobStore + ?Sized>(store: &S) -> Result<bool> {
    Ok(match store.load_job().await? {
        Some(job) => job.active && !job.paused,
        None => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::parse_target_list;
    use crate::store::MemoryJobStore;
    use crate::types::{CrawlJob, PageState};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TabDriver {
        open_now: AtomicUsize,
        open_peak: AtomicUsize,
        fail_key: Option<String>,
    }

    impl TabDriver {
        fn new(fail_key: Option<&str>) -> Self {
            Self {
                open_now: AtomicUsize::new(0),
                open_peak: AtomicUsize::new(0),
                fail_key: fail_key.map(str::to_string),
            }
        }
    }

    #[async_trait]
    impl PageDriver for TabDriver {
        fn page_url(&self, target: &Target, page_number: u32) -> String {
            format!("{}&page={page_number}", target.raw_descriptor)
        }

        async fn current_url(&self) -> Result<String> {
            unimplemented!("pool never drives the shared tab")
        }

        async fn current_page(&self) -> Result<Option<PageState>> {
            unimplemented!("pool never drives the shared tab")
        }

        async fn navigate(&self, _url: &str) -> Result<()> {
            unimplemented!("pool never drives the shared tab")
        }

        async fn open_in_tab(&self, target: &Target) -> Result<PageState> {
            let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.open_peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.open_now.fetch_sub(1, Ordering::SeqCst);

            if self.fail_key.as_deref() == Some(target.canonical_key.as_str()) {
                return Err(anyhow!("tab crashed"));
            }
            Ok(PageState {
                url: self.page_url(target, 1),
                text: format!("listing for {}", target.canonical_key),
                first_item_fingerprint: None,
            })
        }
    }

    struct KeyExtractor;

    #[async_trait]
    impl PageExtractor for KeyExtractor {
        async fn extract(&self, page: &PageState) -> Result<Option<Value>> {
            if page.text.contains("empty") {
                return Ok(None);
            }
            Ok(Some(json!({ "listing": page.text, "count": 1 })))
        }
    }

    /// Stops the batch mid-visit, then crashes the tab. Whatever happens
    /// inside the visit after a stop must stay out of the store.
    struct StoppingDriver {
        store: Arc<MemoryJobStore>,
    }

    #[async_trait]
    impl PageDriver for StoppingDriver {
        fn page_url(&self, target: &Target, page_number: u32) -> String {
            format!("{}&page={page_number}", target.raw_descriptor)
        }

        async fn current_url(&self) -> Result<String> {
            unimplemented!("pool never drives the shared tab")
        }

        async fn current_page(&self) -> Result<Option<PageState>> {
            unimplemented!("pool never drives the shared tab")
        }

        async fn navigate(&self, _url: &str) -> Result<()> {
            unimplemented!("pool never drives the shared tab")
        }

        async fn open_in_tab(&self, _target: &Target) -> Result<PageState> {
            let mut job = self.store.load_job().await?.unwrap();
            job.active = false;
            self.store.save_job(&job).await?;
            Err(anyhow!("tab crashed"))
        }
    }

    fn pool_targets(n: usize) -> Vec<Target> {
        let lines: Vec<String> = (0..n)
            .map(|i| format!("https://shop.example/search?q=item{i}"))
            .collect();
        parse_target_list(&lines.join("\n"))
    }

    #[tokio::test]
    async fn concurrency_stays_within_the_limit() {
        let store = Arc::new(MemoryJobStore::new());
        let driver = Arc::new(TabDriver::new(None));
        let extractor = Arc::new(KeyExtractor);
        let pool = VisitPool::new(
            Arc::clone(&store),
            Arc::clone(&driver),
            Arc::clone(&extractor),
            2,
        );

        let stats = pool.visit_all(&pool_targets(8)).await.unwrap();
        assert_eq!(stats.recorded, 8);
        assert!(driver.open_peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(store.list_results().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn failed_tabs_record_errors_without_blocking_others() {
        let store = Arc::new(MemoryJobStore::new());
        let driver = Arc::new(TabDriver::new(Some("item1")));
        let pool = VisitPool::new(
            Arc::clone(&store),
            driver,
            Arc::new(KeyExtractor),
            4,
        );

        let stats = pool.visit_all(&pool_targets(3)).await.unwrap();
        assert_eq!(stats.recorded, 2);
        assert_eq!(stats.failed, 1);

        let errored = store.results_for_position(1).await.unwrap();
        assert!(errored[0].is_error);
        assert!(errored[0]
            .error_reason
            .as_deref()
            .unwrap()
            .contains("tab crashed"));
    }

    #[tokio::test]
    async fn stopped_job_skips_all_visits() {
        let store = Arc::new(MemoryJobStore::new());
        let targets = pool_targets(3);
        let mut job = CrawlJob::new(targets.clone(), true);
        job.active = false;
        store.save_job(&job).await.unwrap();

        let pool = VisitPool::new(
            Arc::clone(&store),
            Arc::new(TabDriver::new(None)),
            Arc::new(KeyExtractor),
            4,
        );
        let stats = pool.visit_all(&targets).await.unwrap();
        assert_eq!(stats.skipped, 3);
        assert!(store.list_results().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_during_a_visit_suppresses_error_records() {
        let store = Arc::new(MemoryJobStore::new());
        let targets = pool_targets(1);
        store
            .save_job(&CrawlJob::new(targets.clone(), true))
            .await
            .unwrap();

        let pool = VisitPool::new(
            Arc::clone(&store),
            Arc::new(StoppingDriver {
                store: Arc::clone(&store),
            }),
            Arc::new(KeyExtractor),
            1,
        );
        let stats = pool.visit_all(&targets).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 0);
        assert!(store.list_results().await.unwrap().is_empty());
    }
}
