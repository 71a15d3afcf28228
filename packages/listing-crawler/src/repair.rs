use std::collections::HashMap;

use anyhow::Result;

use crate::store::JobStore;
use crate::types::{payload_is_empty, CrawlJob, ResultRecord, Target};

/// Original targets (placeholders excluded) that the pass so far has
/// produced nothing usable for: no record with data, no error, no no-data
/// marker. A target whose only records are empty completions counts as a
/// gap — a site that silently serves empty pages looks exactly like one
/// that was never reached.
pub async fn find_gaps<S: JobStore + ?Sized>(
    store: &S,
    original: &[Target],
) -> Result<Vec<Target>> {
    let results = store.list_results().await?;
    let mut gaps = Vec::new();
    for target in original {
        if target.is_placeholder() {
            continue;
        }
        let records: Vec<&ResultRecord> = results
            .iter()
            .filter(|r| r.target_position == target.position)
            .collect();
        let settled = records.iter().any(|r| {
            r.is_error || r.is_no_data || !payload_is_empty(&r.payload)
        });
        if !settled {
            gaps.push(target.clone());
        }
    }
    Ok(gaps)
}

/// Build the secondary crawl for whatever the primary pass missed.
///
/// Repair targets get fresh dense positions so the cursor walks them
/// `0..m-1`; the persisted origin map carries each one back to its
/// original position, which is where its records land. Returns `None`
/// when there is nothing to repair. Attempted at most once per primary
/// pass — the returned job is already marked so it never re-queues itself.
pub async fn queue_repair<S: JobStore + ?Sized>(
    store: &S,
    original: &[Target],
) -> Result<Option<CrawlJob>> {
    let gaps = find_gaps(store, original).await?;
    if gaps.is_empty() {
        tracing::debug!("no gaps after primary pass");
        return Ok(None);
    }

    let mut origins = HashMap::new();
    let targets: Vec<Target> = gaps
        .into_iter()
        .enumerate()
        .map(|(index, target)| {
            let position = index as u32;
            origins.insert(position, target.position);
            Target { position, ..target }
        })
        .collect();

    store.save_repair_origins(&origins).await?;
    let job = CrawlJob::new(targets, false);
    tracing::info!(
        batch_id = %job.batch_id,
        target_count = job.targets.len(),
        "queued gap-repair pass"
    );
    Ok(Some(job))
}

/// Close out whatever the repair pass still could not reach: every
/// remaining gap gets a no-data record at its original position, so every
/// original position ends with exactly one terminal record.
pub async fn finalize<S: JobStore + ?Sized>(
    store: &S,
    original: &[Target],
) -> Result<Vec<u32>> {
    let gaps = find_gaps(store, original).await?;
    let mut filled = Vec::new();
    for target in gaps {
        store
            .append_result(ResultRecord::no_data(target.position))
            .await?;
        filled.push(target.position);
    }
    if !filled.is_empty() {
        tracing::info!(positions = ?filled, "filled unreachable targets with no-data records");
    }
    Ok(filled)
}
