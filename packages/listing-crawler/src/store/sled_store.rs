use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::store::{decide_write, outcome_of, JobStore, WriteDecision, WriteOutcome};
use crate::types::{CrawlJob, ResultRecord, Target};

const JOB_KEY: &[u8] = b"job";
const ORIGINAL_TARGETS_KEY: &[u8] = b"original_targets";
const REPAIR_ORIGINS_KEY: &[u8] = b"repair_origins";
const RESULTS_TREE: &str = "results";

/// Durable job store on an embedded sled database. Values are JSON-encoded
/// and every mutation is flushed before returning, so state persisted
/// before a navigation survives the page unload that follows it.
pub struct SledJobStore {
    db: sled::Db,
    results: sled::Tree,
    /// Serializes read-modify-write of the result log across concurrent
    /// visit-pool tabs.
    write_lock: Mutex<()>,
}

impl SledJobStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("failed to open job store at {}", path.display()))?;
        let results = db
            .open_tree(RESULTS_TREE)
            .context("failed to open results tree")?;
        Ok(Self {
            db,
            results,
            write_lock: Mutex::new(()),
        })
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().context("failed to flush job store")?;
        Ok(())
    }

    fn put_json<T: serde::Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).context("failed to encode store value")?;
        self.db.insert(key, bytes).context("store write failed")?;
        self.flush()
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key).context("store read failed")? {
            Some(bytes) => {
                let value =
                    serde_json::from_slice(&bytes).context("failed to decode store value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Result log in insertion order, with the key each record lives under.
    fn read_log(&self) -> Result<Vec<(sled::IVec, ResultRecord)>> {
        let mut log = Vec::new();
        for entry in self.results.iter() {
            let (key, bytes) = entry.context("results read failed")?;
            let record =
                serde_json::from_slice(&bytes).context("failed to decode result record")?;
            log.push((key, record));
        }
        Ok(log)
    }
}

#[async_trait]
impl JobStore for SledJobStore {
    async fn load_job(&self) -> Result<Option<CrawlJob>> {
        self.get_json(JOB_KEY)
    }

    async fn save_job(&self, job: &CrawlJob) -> Result<()> {
        self.put_json(JOB_KEY, job)
    }

    async fn append_result(&self, record: ResultRecord) -> Result<WriteOutcome> {
        let _guard = self.write_lock.lock().unwrap();
        let log = self.read_log()?;
        let records: Vec<ResultRecord> = log.iter().map(|(_, r)| r.clone()).collect();
        let decision = decide_write(&records, &record);
        match decision {
            WriteDecision::Append => {
                let id = self.db.generate_id().context("store id failed")?;
                self.results
                    .insert(id.to_be_bytes(), serde_json::to_vec(&record)?)
                    .context("results write failed")?;
            }
            WriteDecision::Replace(index) => {
                let (key, _) = &log[index];
                self.results
                    .insert(key, serde_json::to_vec(&record)?)
                    .context("results write failed")?;
            }
            WriteDecision::Reject => {}
        }
        self.flush()?;
        Ok(outcome_of(decision))
    }

    async fn list_results(&self) -> Result<Vec<ResultRecord>> {
        Ok(self.read_log()?.into_iter().map(|(_, r)| r).collect())
    }

    async fn results_for_position(&self, position: u32) -> Result<Vec<ResultRecord>> {
        Ok(self
            .read_log()?
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.target_position == position)
            .collect())
    }

    async fn save_original_targets(&self, targets: &[Target]) -> Result<()> {
        self.put_json(ORIGINAL_TARGETS_KEY, &targets.to_vec())
    }

    async fn load_original_targets(&self) -> Result<Option<Vec<Target>>> {
        self.get_json(ORIGINAL_TARGETS_KEY)
    }

    async fn save_repair_origins(&self, origins: &HashMap<u32, u32>) -> Result<()> {
        self.put_json(REPAIR_ORIGINS_KEY, origins)
    }

    async fn load_repair_origins(&self) -> Result<HashMap<u32, u32>> {
        Ok(self.get_json(REPAIR_ORIGINS_KEY)?.unwrap_or_default())
    }

    async fn clear_batch(&self) -> Result<()> {
        self.db.remove(JOB_KEY).context("store write failed")?;
        self.db
            .remove(ORIGINAL_TARGETS_KEY)
            .context("store write failed")?;
        self.db
            .remove(REPAIR_ORIGINS_KEY)
            .context("store write failed")?;
        self.results.clear().context("results clear failed")?;
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::parse_target_list;
    use serde_json::json;

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let targets = parse_target_list("https://shop.example/search?q=a\n0");

        {
            let store = SledJobStore::open(dir.path()).unwrap();
            let job = CrawlJob::new(targets.clone(), true);
            store.save_job(&job).await.unwrap();
            store.save_original_targets(&targets).await.unwrap();
            store
                .append_result(ResultRecord::page(0, 1, json!({"count": 2}), None))
                .await
                .unwrap();
        }

        // Reopen as a fresh execution context would.
        let store = SledJobStore::open(dir.path()).unwrap();
        let job = store.load_job().await.unwrap().unwrap();
        assert_eq!(job.targets, targets);
        let results = store.results_for_position(0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload, json!({"count": 2}));
        assert_eq!(
            store.load_original_targets().await.unwrap().unwrap(),
            targets
        );
    }

    #[tokio::test]
    async fn protection_rule_applies_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledJobStore::open(dir.path()).unwrap();

        let outcome = store
            .append_result(ResultRecord::completed(1, 2, json!({"total": 7})))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Appended);

        let outcome = store
            .append_result(ResultRecord::completed(1, 1, json!({})))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Rejected);

        let records = store.results_for_position(1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, json!({"total": 7}));
    }

    #[tokio::test]
    async fn log_preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledJobStore::open(dir.path()).unwrap();
        for page in 1..=3 {
            store
                .append_result(ResultRecord::page(0, page, json!({"page": page}), None))
                .await
                .unwrap();
        }
        let pages: Vec<u32> = store
            .list_results()
            .await
            .unwrap()
            .iter()
            .map(|r| r.page_number)
            .collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }
}
