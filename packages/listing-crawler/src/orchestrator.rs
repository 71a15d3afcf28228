use anyhow::Result;
use serde_json::Value;

use crate::config::CrawlerConfig;
use crate::detector;
use crate::error::CrawlError;
use crate::events::CrawlEvent;
use crate::repair;
use crate::store::{JobStore, WriteOutcome};
use crate::traits::{PageDriver, PageExtractor};
use crate::types::{payload_is_empty, CrawlJob, PageState, ResultRecord, Target, TerminationSignal};

/// The crawl controller: a state machine re-entered from scratch on every
/// page load, with the job store as its only memory.
///
/// Every record and job mutation is persisted before any navigation is
/// triggered. Losing that ordering would silently drop or duplicate
/// targets, so it is treated as the core correctness invariant here.
pub struct Orchestrator<S, D, X> {
    store: S,
    driver: D,
    extractor: X,
    config: CrawlerConfig,
}

impl<S, D, X> Orchestrator<S, D, X>
where
    S: JobStore,
    D: PageDriver,
    X: PageExtractor,
{
    pub fn new(store: S, driver: D, extractor: X, config: CrawlerConfig) -> Self {
        Self {
            store,
            driver,
            extractor,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Entry point, invoked once per page load. Reads the persisted job,
    /// classifies the current page, records the outcome, and issues at
    /// most one navigation for the next invocation to pick up.
    pub async fn on_page_load(&self) -> Result<Vec<CrawlEvent>> {
        let mut events = Vec::new();

        let Some(mut job) = self.store.load_job().await? else {
            tracing::debug!("no crawl job in store");
            return Ok(events);
        };
        if !job.active {
            tracing::debug!(batch_id = %job.batch_id, "job inactive");
            return Ok(events);
        }
        if job.paused {
            tracing::debug!(batch_id = %job.batch_id, "job paused");
            return Ok(events);
        }

        self.reconcile(&mut job, &mut events).await?;

        // Placeholder slots and an exhausted cursor need no page at all.
        let Some(target) = job.current_target().cloned() else {
            self.advance(&mut job, &mut events).await?;
            return Ok(events);
        };
        if target.is_placeholder() {
            self.advance(&mut job, &mut events).await?;
            return Ok(events);
        }

        let position = self.output_position(&job, &target).await?;

        // A stale URL means the persisted step's navigation never landed:
        // a fresh start, or an unload between persist and navigate.
        // Re-issue the navigation instead of classifying whatever page
        // happens to be showing.
        let expected_url = self.driver.page_url(&target, job.page_number);
        if self.driver.current_url().await? != expected_url {
            tracing::debug!(position, url = %expected_url, "re-issuing pending navigation");
            // The very first target of a batch starts here rather than in
            // the advance step, so its started event is emitted here too.
            if job.page_number == 1
                && self.store.results_for_position(position).await?.is_empty()
            {
                events.push(CrawlEvent::TargetStarted {
                    position,
                    canonical_key: target.canonical_key.clone(),
                });
            }
            job.touch();
            self.store.save_job(&job).await?;
            if let Err(error) = self.driver.navigate(&expected_url).await {
                let error = CrawlError::Target {
                    position,
                    reason: format!("navigation failed: {error}"),
                };
                self.fail_target(&mut job, position, error, &mut events).await?;
            }
            return Ok(events);
        }

        let Some(page) =
            detector::await_page_ready(&self.driver, &self.config.readiness).await?
        else {
            let error = CrawlError::Timeout {
                waited_ms: self.config.readiness.max_wait.as_millis() as u64,
            };
            self.fail_target(&mut job, position, error, &mut events).await?;
            return Ok(events);
        };

        let prior = self.prior_fingerprint(position, job.page_number).await?;
        let signal = detector::classify(&page, prior.as_deref(), &self.config.detector);
        tracing::debug!(position, page = job.page_number, ?signal, "page classified");

        match signal {
            TerminationSignal::SecurityCheckpoint => {
                let error = CrawlError::SecurityCheckpoint {
                    url: page.url.clone(),
                };
                tracing::warn!(position, %error, "pausing batch for manual resolution");
                job.paused = true;
                job.touch();
                self.store.save_job(&job).await?;
                events.push(CrawlEvent::CheckpointHit {
                    position,
                    url: page.url,
                });
            }
            TerminationSignal::NotFound => {
                let error = CrawlError::Target {
                    position,
                    reason: "not found".to_string(),
                };
                self.fail_target(&mut job, position, error, &mut events).await?;
            }
            TerminationSignal::DuplicatePage => {
                // The site re-served the previous page; its data is
                // discarded, not double-counted.
                let previous_page = job.page_number.saturating_sub(1).max(1);
                self.store
                    .append_result(ResultRecord::duplicate(position, previous_page))
                    .await?;
                events.push(CrawlEvent::DuplicatePageDetected {
                    position,
                    page_number: job.page_number,
                });
                self.complete_target(&mut job, position, &mut events).await?;
            }
            TerminationSignal::EndOfResults => {
                self.store
                    .append_result(ResultRecord::completed(
                        position,
                        job.page_number,
                        Value::Null,
                    ))
                    .await?;
                self.complete_target(&mut job, position, &mut events).await?;
            }
            TerminationSignal::Continue => {
                self.extract_page(&mut job, &target, position, &page, &mut events)
                    .await?;
            }
        }

        Ok(events)
    }

    async fn extract_page(
        &self,
        job: &mut CrawlJob,
        target: &Target,
        position: u32,
        page: &PageState,
        events: &mut Vec<CrawlEvent>,
    ) -> Result<()> {
        let payload = match self.extractor.extract(page).await {
            Ok(payload) => payload.unwrap_or(Value::Null),
            Err(error) => {
                let error = CrawlError::Target {
                    position,
                    reason: format!("extraction failed: {error}"),
                };
                return self.fail_target(job, position, error, events).await;
            }
        };

        if payload_is_empty(&payload) {
            // A continuable page with nothing on it ends the target.
            self.store
                .append_result(ResultRecord::completed(position, job.page_number, Value::Null))
                .await?;
            return self.complete_target(job, position, events).await;
        }

        let record = ResultRecord::page(
            position,
            job.page_number,
            payload,
            page.first_item_fingerprint.clone(),
        );
        let outcome = self.store.append_result(record).await?;
        if outcome == WriteOutcome::Rejected {
            // The position already holds protected completed data;
            // paginating further would be discarded anyway.
            tracing::debug!(position, "write rejected by completed record");
            return self.complete_target(job, position, events).await;
        }

        events.push(CrawlEvent::PageRecorded {
            position,
            page_number: job.page_number,
        });

        job.page_number += 1;
        job.touch();
        self.store.save_job(job).await?;

        let next_url = self.driver.page_url(target, job.page_number);
        if let Err(error) = self.driver.navigate(&next_url).await {
            let error = CrawlError::Target {
                position,
                reason: format!("navigation failed: {error}"),
            };
            return self.fail_target(job, position, error, events).await;
        }
        Ok(())
    }

    /// Record a per-target failure and force the target closed. Only a
    /// security checkpoint ever halts the batch; everything else lands
    /// here and the cursor keeps moving.
    async fn fail_target(
        &self,
        job: &mut CrawlJob,
        position: u32,
        error: CrawlError,
        events: &mut Vec<CrawlEvent>,
    ) -> Result<()> {
        let reason = error.record_reason();
        tracing::warn!(position, %error, "target failed");
        self.store
            .append_result(ResultRecord::error(position, job.page_number, reason.clone()))
            .await?;
        events.push(CrawlEvent::TargetFailed { position, reason });
        self.complete_target(job, position, events).await
    }

    /// Close out the current target and move on. Guarantees at least one
    /// record exists for the position so it can never be silently skipped
    /// in the output ordering.
    async fn complete_target(
        &self,
        job: &mut CrawlJob,
        position: u32,
        events: &mut Vec<CrawlEvent>,
    ) -> Result<()> {
        if self.store.results_for_position(position).await?.is_empty() {
            self.store
                .append_result(ResultRecord::completed_empty(position))
                .await?;
        }
        events.push(CrawlEvent::TargetCompleted { position });
        job.cursor += 1;
        self.advance(job, events).await
    }

    /// Walk the cursor to the next crawlable target, completing
    /// placeholder slots inline, and issue the navigation the next
    /// invocation picks up. Falls through to batch completion (and the
    /// gap-repair hand-off) when the list is exhausted.
    async fn advance(&self, job: &mut CrawlJob, events: &mut Vec<CrawlEvent>) -> Result<()> {
        loop {
            while let Some(target) = job.current_target().cloned() {
                if !target.is_placeholder() {
                    break;
                }
                let position = self.output_position(job, &target).await?;
                if self.store.results_for_position(position).await?.is_empty() {
                    self.store
                        .append_result(ResultRecord::completed_empty(position))
                        .await?;
                }
                events.push(CrawlEvent::TargetCompleted { position });
                job.cursor += 1;
            }

            if let Some(target) = job.current_target().cloned() {
                let position = self.output_position(job, &target).await?;
                job.page_number = 1;
                job.touch();
                self.store.save_job(job).await?;
                events.push(CrawlEvent::TargetStarted {
                    position,
                    canonical_key: target.canonical_key.clone(),
                });
                let url = self.driver.page_url(&target, 1);
                match self.driver.navigate(&url).await {
                    Ok(()) => return Ok(()),
                    Err(error) => {
                        let error = CrawlError::Target {
                            position,
                            reason: format!("navigation failed: {error}"),
                        };
                        let reason = error.record_reason();
                        tracing::warn!(position, %error, "target failed");
                        self.store
                            .append_result(ResultRecord::error(position, 1, reason.clone()))
                            .await?;
                        events.push(CrawlEvent::TargetFailed { position, reason });
                        events.push(CrawlEvent::TargetCompleted { position });
                        job.cursor += 1;
                        continue;
                    }
                }
            }

            // List exhausted.
            if job.is_primary_pass && !job.repair_attempted {
                job.repair_attempted = true;
                let original = self.original_targets(job).await?;
                if let Some(repair_job) = repair::queue_repair(&self.store, &original).await? {
                    events.push(CrawlEvent::RepairQueued {
                        batch_id: repair_job.batch_id,
                        target_count: repair_job.targets.len(),
                    });
                    *job = repair_job;
                    continue;
                }
            }

            if !job.is_primary_pass {
                let original = self.original_targets(job).await?;
                for position in repair::finalize(&self.store, &original).await? {
                    events.push(CrawlEvent::GapFilled { position });
                }
            }

            job.active = false;
            job.touch();
            self.store.save_job(job).await?;
            events.push(CrawlEvent::BatchCompleted {
                batch_id: job.batch_id,
            });
            tracing::info!(batch_id = %job.batch_id, "batch complete");
            return Ok(());
        }
    }

    /// Resolve store/job disagreement (e.g. a result wipe underneath a
    /// live job): any position without a record is not-yet-started, so
    /// resume from the lowest such entry instead of trusting the cursor.
    async fn reconcile(&self, job: &mut CrawlJob, events: &mut Vec<CrawlEvent>) -> Result<()> {
        let results = self.store.list_results().await?;
        let mut lowest = None;
        for (index, target) in job.targets.iter().enumerate() {
            let position = self.output_position(job, target).await?;
            if !results.iter().any(|r| r.target_position == position) {
                lowest = Some(index as u32);
                break;
            }
        }
        if let Some(lowest) = lowest {
            if lowest < job.cursor {
                let error = CrawlError::StateInconsistency(format!(
                    "cursor at {} but entry {} has no results",
                    job.cursor, lowest
                ));
                tracing::warn!(%error, "reconciling cursor");
                events.push(CrawlEvent::CursorReconciled {
                    from: job.cursor,
                    to: lowest,
                });
                job.cursor = lowest;
                job.page_number = 1;
                job.touch();
                self.store.save_job(job).await?;
            }
        }
        Ok(())
    }

    /// Position records for this target land under. Repair-pass targets
    /// map back to their original position through the persisted side
    /// table; the output ordering never shifts.
    async fn output_position(&self, job: &CrawlJob, target: &Target) -> Result<u32> {
        if job.is_primary_pass {
            return Ok(target.position);
        }
        let origins = self.store.load_repair_origins().await?;
        match origins.get(&target.position) {
            Some(original) => Ok(*original),
            None => {
                tracing::warn!(
                    position = target.position,
                    "repair target missing origin mapping"
                );
                Ok(target.position)
            }
        }
    }

    async fn original_targets(&self, job: &CrawlJob) -> Result<Vec<Target>> {
        Ok(self
            .store
            .load_original_targets()
            .await?
            .unwrap_or_else(|| job.targets.clone()))
    }

    /// Fingerprint of the latest page recorded *before* the current one.
    /// The current page may already hold its own record (the job can be
    /// re-entered after the record persisted but before the page number
    /// advanced), and a page must never be compared against itself.
    async fn prior_fingerprint(&self, position: u32, current_page: u32) -> Result<Option<String>> {
        let records = self.store.results_for_position(position).await?;
        Ok(records
            .iter()
            .filter(|r| r.fingerprint.is_some() && r.page_number < current_page)
            .max_by_key(|r| r.page_number)
            .and_then(|r| r.fingerprint.clone()))
    }
}
