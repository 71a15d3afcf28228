use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Descriptor token for an intentionally empty slot in a submitted list.
pub const PLACEHOLDER_TOKEN: &str = "0";

/// Canonical key reserved for placeholder targets.
pub const EMPTY_SLOT_KEY: &str = "__empty_slot__";

/// Canonical key assigned when a descriptor cannot be resolved.
pub const UNKNOWN_KEY: &str = "Unknown";

/// Unique identifier for one batch crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One crawl unit: a submitted descriptor plus its immutable list position.
///
/// `position` is assigned once at list-creation time and is the only
/// identity results are keyed and displayed by. Re-ordering or partial
/// completion never shifts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub raw_descriptor: String,
    pub position: u32,
    pub canonical_key: String,
}

impl Target {
    pub fn is_placeholder(&self) -> bool {
        self.canonical_key == EMPTY_SLOT_KEY
    }
}

/// Transient classification of the currently loaded page. Never persisted;
/// produced fresh on every page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Continue,
    EndOfResults,
    NotFound,
    SecurityCheckpoint,
    DuplicatePage,
}

/// Snapshot of a loaded page as seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageState {
    pub url: String,
    pub text: String,
    /// Cheap structural identity of the first listed item, used to detect
    /// a site re-serving the same page instead of advancing.
    pub first_item_fingerprint: Option<String>,
}

impl PageState {
    /// Fingerprint helper for drivers: stable hash of the first item's
    /// identifying text.
    pub fn fingerprint_of(first_item: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(first_item.trim().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// The persisted unit of work. Mutated on every page-load re-invocation;
/// the orchestrator is its sole writer.
///
/// Every flag that must survive a navigation lives here rather than in
/// process memory, because each page load is a fresh execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub batch_id: BatchId,
    pub targets: Vec<Target>,
    /// Index into `targets` of the entry currently being processed.
    pub cursor: u32,
    /// 1-based page within the current target's pagination.
    pub page_number: u32,
    pub is_primary_pass: bool,
    pub active: bool,
    pub paused: bool,
    /// Repair is attempted at most once per primary pass.
    pub repair_attempted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CrawlJob {
    pub fn new(targets: Vec<Target>, is_primary_pass: bool) -> Self {
        let now = Utc::now();
        Self {
            batch_id: BatchId::new(),
            targets,
            cursor: 0,
            page_number: 1,
            is_primary_pass,
            active: true,
            paused: false,
            repair_attempted: !is_primary_pass,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn current_target(&self) -> Option<&Target> {
        self.targets.get(self.cursor as usize)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor as usize >= self.targets.len()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One outcome for one (target, page-number) pair. Append-only during a
/// crawl; aggregation happens only at export time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub target_position: u32,
    pub page_number: u32,
    /// Site-specific extracted fields, opaque to the core.
    pub payload: Value,
    /// First-item fingerprint of the page this record came from, read back
    /// as the prior fingerprint on the next load of the same target.
    pub fingerprint: Option<String>,
    pub is_completed: bool,
    pub is_no_data: bool,
    pub is_duplicate_page: bool,
    pub is_error: bool,
    pub error_reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ResultRecord {
    fn base(target_position: u32, page_number: u32) -> Self {
        Self {
            target_position,
            page_number,
            payload: Value::Null,
            fingerprint: None,
            is_completed: false,
            is_no_data: false,
            is_duplicate_page: false,
            is_error: false,
            error_reason: None,
            recorded_at: Utc::now(),
        }
    }

    /// Non-terminal record for one extracted page.
    pub fn page(
        target_position: u32,
        page_number: u32,
        payload: Value,
        fingerprint: Option<String>,
    ) -> Self {
        Self {
            payload,
            fingerprint,
            ..Self::base(target_position, page_number)
        }
    }

    /// Terminal record carrying a payload.
    pub fn completed(target_position: u32, page_number: u32, payload: Value) -> Self {
        Self {
            payload,
            is_completed: true,
            ..Self::base(target_position, page_number)
        }
    }

    /// Terminal zero-payload record, used for placeholder slots and for
    /// targets whose traversal produced no page records.
    pub fn completed_empty(target_position: u32) -> Self {
        Self {
            is_completed: true,
            ..Self::base(target_position, 1)
        }
    }

    /// Terminal marker written when the site re-served the previous page.
    /// The duplicate page's data is discarded, not double-counted.
    pub fn duplicate(target_position: u32, page_number: u32) -> Self {
        Self {
            is_completed: true,
            is_duplicate_page: true,
            ..Self::base(target_position, page_number)
        }
    }

    /// Terminal marker for a target the whole batch failed to reach.
    pub fn no_data(target_position: u32) -> Self {
        Self {
            is_no_data: true,
            ..Self::base(target_position, 1)
        }
    }

    /// Terminal error record; never halts the batch.
    pub fn error(target_position: u32, page_number: u32, reason: impl Into<String>) -> Self {
        Self {
            is_error: true,
            error_reason: Some(reason.into()),
            ..Self::base(target_position, page_number)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_completed || self.is_no_data || self.is_error
    }
}

/// User-facing status of one original position, derived from its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Completed,
    Processing,
    NoData,
    Failed,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetStatus::Completed => "Completed",
            TargetStatus::Processing => "Processing",
            TargetStatus::NoData => "No Data",
            TargetStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Whether a payload carries any usable data. Null, empty containers,
/// blank strings, and zero counts all count as empty.
pub fn payload_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.iter().all(payload_is_empty),
        Value::Object(fields) => fields.values().all(payload_is_empty),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Bool(_) => false,
    }
}

/// Whether `new` is strictly more complete than `old`: non-empty wherever
/// the stored payload was non-empty, and filling at least one field the
/// stored payload left empty. This is the only condition under which a
/// protected completed record may be replaced.
pub fn payload_supersedes(new: &Value, old: &Value) -> bool {
    if payload_is_empty(old) {
        return !payload_is_empty(new);
    }
    match (new, old) {
        (Value::Object(new_fields), Value::Object(old_fields)) => {
            for (key, old_value) in old_fields {
                if payload_is_empty(old_value) {
                    continue;
                }
                match new_fields.get(key) {
                    Some(new_value) if !payload_is_empty(new_value) => {}
                    _ => return false,
                }
            }
            new_fields.iter().any(|(key, new_value)| {
                !payload_is_empty(new_value)
                    && old_fields.get(key).map_or(true, payload_is_empty)
            })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_payload_shapes() {
        assert!(payload_is_empty(&Value::Null));
        assert!(payload_is_empty(&json!("")));
        assert!(payload_is_empty(&json!("   ")));
        assert!(payload_is_empty(&json!(0)));
        assert!(payload_is_empty(&json!({})));
        assert!(payload_is_empty(&json!({ "price": null, "stock": 0 })));
        assert!(!payload_is_empty(&json!({ "price": 129.0 })));
        assert!(!payload_is_empty(&json!(false)));
    }

    #[test]
    fn supersedes_requires_strictly_more_complete() {
        let stored = json!({ "name": "Widget", "price": null });
        assert!(payload_supersedes(
            &json!({ "name": "Widget", "price": 9.5 }),
            &stored,
        ));
        // Dropping a filled field is never an upgrade.
        assert!(!payload_supersedes(&json!({ "price": 9.5 }), &stored));
        // Identical completeness is not an upgrade.
        assert!(!payload_supersedes(&stored.clone(), &stored));
        // Anything beats an empty stored payload.
        assert!(payload_supersedes(&json!({ "name": "x" }), &Value::Null));
        assert!(!payload_supersedes(&Value::Null, &Value::Null));
    }

    #[test]
    fn fingerprint_is_stable_and_trimmed() {
        let a = PageState::fingerprint_of("item-8841");
        let b = PageState::fingerprint_of("  item-8841  ");
        assert_eq!(a, b);
        assert_ne!(a, PageState::fingerprint_of("item-8842"));
    }

    #[test]
    fn record_constructors_set_terminal_flags() {
        assert!(ResultRecord::completed_empty(3).is_terminal());
        assert!(ResultRecord::no_data(3).is_terminal());
        assert!(ResultRecord::error(3, 1, "timeout").is_terminal());
        assert!(ResultRecord::duplicate(3, 2).is_completed);
        assert!(!ResultRecord::page(3, 1, json!({"n": 1}), None).is_terminal());
    }
}
