use serde::{Deserialize, Serialize};

use crate::types::BatchId;

/// Facts emitted by one orchestrator invocation, in the order they
/// happened. Hosts surface these to the user; tests assert on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlEvent {
    TargetStarted {
        position: u32,
        canonical_key: String,
    },

    PageRecorded {
        position: u32,
        page_number: u32,
    },

    DuplicatePageDetected {
        position: u32,
        page_number: u32,
    },

    TargetCompleted {
        position: u32,
    },

    TargetFailed {
        position: u32,
        reason: String,
    },

    /// The batch is paused pending manual resolution; nothing advances
    /// until the user resumes it.
    CheckpointHit {
        position: u32,
        url: String,
    },

    /// The cursor was moved back after the store and job disagreed.
    CursorReconciled {
        from: u32,
        to: u32,
    },

    RepairQueued {
        batch_id: BatchId,
        target_count: usize,
    },

    /// A position still missing after repair was closed out with a
    /// no-data record.
    GapFilled {
        position: u32,
    },

    BatchCompleted {
        batch_id: BatchId,
    },
}
