use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::store::{decide_write, outcome_of, JobStore, WriteDecision, WriteOutcome};
use crate::types::{CrawlJob, ResultRecord, Target};

/// In-process job store. Not durable; used by tests and dry runs where a
/// batch lives and dies within one invocation.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    job: Option<CrawlJob>,
    results: Vec<ResultRecord>,
    original_targets: Option<Vec<Target>>,
    repair_origins: HashMap<u32, u32>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load_job(&self) -> Result<Option<CrawlJob>> {
        Ok(self.inner.lock().unwrap().job.clone())
    }

    async fn save_job(&self, job: &CrawlJob) -> Result<()> {
        self.inner.lock().unwrap().job = Some(job.clone());
        Ok(())
    }

    async fn append_result(&self, record: ResultRecord) -> Result<WriteOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let decision = decide_write(&inner.results, &record);
        match decision {
            WriteDecision::Append => inner.results.push(record),
            WriteDecision::Replace(index) => inner.results[index] = record,
            WriteDecision::Reject => {}
        }
        Ok(outcome_of(decision))
    }

    async fn list_results(&self) -> Result<Vec<ResultRecord>> {
        Ok(self.inner.lock().unwrap().results.clone())
    }

    async fn results_for_position(&self, position: u32) -> Result<Vec<ResultRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .results
            .iter()
            .filter(|r| r.target_position == position)
            .cloned()
            .collect())
    }

    async fn save_original_targets(&self, targets: &[Target]) -> Result<()> {
        self.inner.lock().unwrap().original_targets = Some(targets.to_vec());
        Ok(())
    }

    async fn load_original_targets(&self) -> Result<Option<Vec<Target>>> {
        Ok(self.inner.lock().unwrap().original_targets.clone())
    }

    async fn save_repair_origins(&self, origins: &HashMap<u32, u32>) -> Result<()> {
        self.inner.lock().unwrap().repair_origins = origins.clone();
        Ok(())
    }

    async fn load_repair_origins(&self) -> Result<HashMap<u32, u32>> {
        Ok(self.inner.lock().unwrap().repair_origins.clone())
    }

    async fn clear_batch(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
        Ok(())
    }
}
