use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{payload_supersedes, CrawlJob, ResultRecord, Target};

pub mod memory;
pub mod sled_store;

pub use memory::MemoryJobStore;
pub use sled_store::SledJobStore;

/// What happened to a submitted result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Appended to the result log.
    Appended,
    /// Replaced an existing terminal record for the same position.
    Superseded,
    /// Rejected: the position already holds a protected completed record.
    Rejected,
}

/// Durable key-value persistence surviving page navigation — the sole
/// cross-reload state channel. The job is read-modify-written as a whole;
/// no field-level atomic update is assumed, so callers re-read the latest
/// job immediately before every write.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_job(&self) -> Result<Option<CrawlJob>>;
    async fn save_job(&self, job: &CrawlJob) -> Result<()>;

    /// Append one result, subject to the completed-record protection rule.
    async fn append_result(&self, record: ResultRecord) -> Result<WriteOutcome>;
    async fn list_results(&self) -> Result<Vec<ResultRecord>>;
    async fn results_for_position(&self, position: u32) -> Result<Vec<ResultRecord>>;

    /// The submitted list, retained verbatim for gap repair and final
    /// display ordering even after targets are re-queued.
    async fn save_original_targets(&self, targets: &[Target]) -> Result<()>;
    async fn load_original_targets(&self) -> Result<Option<Vec<Target>>>;

    /// Side table mapping repair-pass positions back to original positions.
    async fn save_repair_origins(&self, origins: &HashMap<u32, u32>) -> Result<()>;
    async fn load_repair_origins(&self) -> Result<HashMap<u32, u32>>;

    /// Drop all state for the current batch (job, results, side tables).
    async fn clear_batch(&self) -> Result<()>;
}

// Hosts typically share one store between the orchestrator, the visit
// pool, and their own status surface.
#[async_trait]
impl<T: JobStore + ?Sized> JobStore for std::sync::Arc<T> {
    async fn load_job(&self) -> Result<Option<CrawlJob>> {
        (**self).load_job().await
    }

    async fn save_job(&self, job: &CrawlJob) -> Result<()> {
        (**self).save_job(job).await
    }

    async fn append_result(&self, record: ResultRecord) -> Result<WriteOutcome> {
        (**self).append_result(record).await
    }

    async fn list_results(&self) -> Result<Vec<ResultRecord>> {
        (**self).list_results().await
    }

    async fn results_for_position(&self, position: u32) -> Result<Vec<ResultRecord>> {
        (**self).results_for_position(position).await
    }

    async fn save_original_targets(&self, targets: &[Target]) -> Result<()> {
        (**self).save_original_targets(targets).await
    }

    async fn load_original_targets(&self) -> Result<Option<Vec<Target>>> {
        (**self).load_original_targets().await
    }

    async fn save_repair_origins(&self, origins: &HashMap<u32, u32>) -> Result<()> {
        (**self).save_repair_origins(origins).await
    }

    async fn load_repair_origins(&self) -> Result<HashMap<u32, u32>> {
        (**self).load_repair_origins().await
    }

    async fn clear_batch(&self) -> Result<()> {
        (**self).clear_batch().await
    }
}

/// Write decision shared by every store implementation so the protection
/// rule cannot diverge between backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteDecision {
    Append,
    /// Replace the record at this index in the full log.
    Replace(usize),
    Reject,
}

/// Decide how `record` lands in the append-only log.
///
/// Once a position holds a completed record with a non-empty payload,
/// every later write for that position is rejected unless its payload is
/// strictly more complete. Terminal markers without data (errors, no-data
/// fills, empty completions) may be replaced by a later terminal record,
/// which keeps the log at exactly one terminal record per position.
pub(crate) fn decide_write(existing: &[ResultRecord], record: &ResultRecord) -> WriteDecision {
    let terminal = existing
        .iter()
        .enumerate()
        .find(|(_, r)| r.target_position == record.target_position && r.is_terminal());

    if let Some((index, stored)) = terminal {
        if stored.is_completed && !crate::types::payload_is_empty(&stored.payload) {
            if payload_supersedes(&record.payload, &stored.payload) {
                return WriteDecision::Replace(index);
            }
            return WriteDecision::Reject;
        }
        if record.is_terminal() {
            return WriteDecision::Replace(index);
        }
    }

    // A re-run of an already-recorded page replaces its own record, so a
    // duplicated invocation never double-counts a page.
    if !record.is_terminal() {
        let same_page = existing.iter().enumerate().find(|(_, r)| {
            r.target_position == record.target_position
                && r.page_number == record.page_number
                && !r.is_terminal()
        });
        if let Some((index, _)) = same_page {
            return WriteDecision::Replace(index);
        }
    }

    WriteDecision::Append
}

pub(crate) fn outcome_of(decision: WriteDecision) -> WriteOutcome {
    match decision {
        WriteDecision::Append => WriteOutcome::Appended,
        WriteDecision::Replace(_) => WriteOutcome::Superseded,
        WriteDecision::Reject => WriteOutcome::Rejected,
    }
}
