use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::resolver::parse_target_list;
use crate::store::JobStore;
use crate::types::{BatchId, CrawlJob};

/// Fire-and-forget user control signals. Each one reads and writes the job
/// store and is safe to send redundantly: applying a signal twice leaves
/// the same state as applying it once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlSignal {
    StartBatch { submission: String },
    PauseBatch,
    ResumeBatch,
    StopBatch,
}

/// Best-effort acknowledgment for a control signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlAck {
    Started {
        batch_id: BatchId,
        target_count: usize,
    },
    AlreadyRunning {
        batch_id: BatchId,
    },
    Paused,
    Resumed,
    Stopped,
    NoActiveJob,
}

pub async fn apply_signal<S: JobStore + ?Sized>(
    store: &S,
    signal: ControlSignal,
) -> Result<ControlAck> {
    match signal {
        ControlSignal::StartBatch { submission } => start_batch(store, &submission).await,
        ControlSignal::PauseBatch => pause_batch(store).await,
        ControlSignal::ResumeBatch => resume_batch(store).await,
        ControlSignal::StopBatch => stop_batch(store).await,
    }
}

/// Parse a newline-delimited submission and persist a fresh primary-pass
/// job. Refused while another batch is still active; prior batch state is
/// cleared otherwise.
async fn start_batch<S: JobStore + ?Sized>(store: &S, submission: &str) -> Result<ControlAck> {
    if let Some(job) = store.load_job().await? {
        if job.active {
            tracing::info!(batch_id = %job.batch_id, "start ignored, batch already running");
            return Ok(ControlAck::AlreadyRunning {
                batch_id: job.batch_id,
            });
        }
    }

    let targets = parse_target_list(submission);
    store.clear_batch().await?;
    store.save_original_targets(&targets).await?;
    let job = CrawlJob::new(targets, true);
    store.save_job(&job).await?;
    tracing::info!(
        batch_id = %job.batch_id,
        target_count = job.targets.len(),
        "batch started"
    );
    Ok(ControlAck::Started {
        batch_id: job.batch_id,
        target_count: job.targets.len(),
    })
}

async fn pause_batch<S: JobStore + ?Sized>(store: &S) -> Result<ControlAck> {
    let Some(mut job) = store.load_job().await? else {
        return Ok(ControlAck::NoActiveJob);
    };
    if !job.active {
        return Ok(ControlAck::NoActiveJob);
    }
    if !job.paused {
        job.paused = true;
        job.touch();
        store.save_job(&job).await?;
        tracing::info!(batch_id = %job.batch_id, "batch paused");
    }
    Ok(ControlAck::Paused)
}

async fn resume_batch<S: JobStore + ?Sized>(store: &S) -> Result<ControlAck> {
    let Some(mut job) = store.load_job().await? else {
        return Ok(ControlAck::NoActiveJob);
    };
    if !job.active {
        return Ok(ControlAck::NoActiveJob);
    }
    if job.paused {
        job.paused = false;
        job.touch();
        store.save_job(&job).await?;
        tracing::info!(batch_id = %job.batch_id, "batch resumed");
    }
    Ok(ControlAck::Resumed)
}

/// Stopping is advisory and eventual: the flag flips here, and the next
/// scheduled check in the orchestrator or visit pool is the authoritative
/// stop point.
async fn stop_batch<S: JobStore + ?Sized>(store: &S) -> Result<ControlAck> {
    let Some(mut job) = store.load_job().await? else {
        return Ok(ControlAck::NoActiveJob);
    };
    if job.active {
        job.active = false;
        job.paused = false;
        job.touch();
        store.save_job(&job).await?;
        tracing::info!(batch_id = %job.batch_id, "batch stopped");
    }
    Ok(ControlAck::Stopped)
}
