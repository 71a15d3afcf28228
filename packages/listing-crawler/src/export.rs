use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::store::JobStore;
use crate::types::{payload_is_empty, ResultRecord, TargetStatus};

/// Output delimiter for rendered exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Tab,
}

impl Delimiter {
    fn as_char(self) -> char {
        match self {
            Delimiter::Comma => ',',
            Delimiter::Tab => '\t',
        }
    }
}

/// One export row: a single original position with its aggregated payload
/// and derived status.
#[derive(Debug, Clone)]
pub struct ExportRow {
    pub position: u32,
    pub descriptor: String,
    pub canonical_key: String,
    pub status: TargetStatus,
    pub pages: u32,
    pub payload: Value,
    pub last_recorded_at: Option<DateTime<Utc>>,
}

/// Reconstruct one row per original position from the result log.
///
/// Ordering comes from the retained original target list, never from
/// wall-clock write order — records from repair passes land back on their
/// original positions and sort accordingly. If the original list is gone
/// from the store, rows fall back to first-write timestamp order.
pub async fn build_rows<S: JobStore + ?Sized>(store: &S) -> Result<Vec<ExportRow>> {
    let results = store.list_results().await?;

    if let Some(targets) = store.load_original_targets().await? {
        let mut rows = Vec::with_capacity(targets.len());
        for target in &targets {
            let records: Vec<&ResultRecord> = results
                .iter()
                .filter(|r| r.target_position == target.position)
                .collect();
            rows.push(ExportRow {
                position: target.position,
                descriptor: target.raw_descriptor.clone(),
                canonical_key: target.canonical_key.clone(),
                status: status_of(&records),
                pages: data_pages(&records),
                payload: aggregate(&records),
                last_recorded_at: records.iter().map(|r| r.recorded_at).max(),
            });
        }
        return Ok(rows);
    }

    // No original list: group by position and order by first write.
    let mut positions: Vec<(DateTime<Utc>, u32)> = Vec::new();
    for record in &results {
        if !positions.iter().any(|(_, p)| *p == record.target_position) {
            positions.push((record.recorded_at, record.target_position));
        }
    }
    positions.sort_by_key(|(first_write, _)| *first_write);

    let mut rows = Vec::with_capacity(positions.len());
    for (_, position) in positions {
        let records: Vec<&ResultRecord> = results
            .iter()
            .filter(|r| r.target_position == position)
            .collect();
        rows.push(ExportRow {
            position,
            descriptor: String::new(),
            canonical_key: String::new(),
            status: status_of(&records),
            pages: data_pages(&records),
            payload: aggregate(&records),
            last_recorded_at: records.iter().map(|r| r.recorded_at).max(),
        });
    }
    Ok(rows)
}

/// Derived status column: terminal flags win over everything, a completed
/// record beats earlier page errors, and anything unfinished shows as
/// still processing.
fn status_of(records: &[&ResultRecord]) -> TargetStatus {
    if records.iter().any(|r| r.is_no_data) {
        return TargetStatus::NoData;
    }
    if records.iter().any(|r| r.is_completed) {
        return TargetStatus::Completed;
    }
    if records.iter().any(|r| r.is_error) {
        return TargetStatus::Failed;
    }
    TargetStatus::Processing
}

fn data_pages(records: &[&ResultRecord]) -> u32 {
    records
        .iter()
        .filter(|r| !payload_is_empty(&r.payload))
        .map(|r| r.page_number)
        .max()
        .unwrap_or(0)
}

/// Collapse a position's page records into one payload: numeric fields
/// are summed across pages, everything else is last-wins. Empty payloads
/// (duplicate markers, empty completions) contribute nothing.
fn aggregate(records: &[&ResultRecord]) -> Value {
    let mut pages: Vec<&ResultRecord> = records
        .iter()
        .copied()
        .filter(|r| !payload_is_empty(&r.payload))
        .collect();
    pages.sort_by_key(|r| r.page_number);

    let mut merged = Map::new();
    let mut scalar_fallback = Value::Null;

    for record in pages {
        match &record.payload {
            Value::Object(fields) => {
                for (key, value) in fields {
                    merge_field(&mut merged, key, value);
                }
            }
            other => scalar_fallback = other.clone(),
        }
    }

    if merged.is_empty() {
        scalar_fallback
    } else {
        Value::Object(merged)
    }
}

fn merge_field(merged: &mut Map<String, Value>, key: &str, value: &Value) {
    match (merged.get(key), value) {
        (Some(Value::Number(current)), Value::Number(incoming)) => {
            let sum = current.as_f64().unwrap_or(0.0) + incoming.as_f64().unwrap_or(0.0);
            let sum = if sum.fract() == 0.0 && sum.abs() < (i64::MAX as f64) {
                Value::from(sum as i64)
            } else {
                Value::from(sum)
            };
            merged.insert(key.to_string(), sum);
        }
        (_, incoming) => {
            if !payload_is_empty(incoming) || !merged.contains_key(key) {
                merged.insert(key.to_string(), incoming.clone());
            }
        }
    }
}

/// Render rows as delimiter-separated text: fixed columns first, then one
/// column per payload field seen anywhere in the batch.
pub fn render(rows: &[ExportRow], delimiter: Delimiter) -> String {
    let mut payload_keys: BTreeSet<String> = BTreeSet::new();
    let mut has_scalar = false;
    for row in rows {
        match &row.payload {
            Value::Object(fields) => payload_keys.extend(fields.keys().cloned()),
            Value::Null => {}
            _ => has_scalar = true,
        }
    }

    let sep = delimiter.as_char();
    let mut out = String::new();

    let mut header = vec![
        "position".to_string(),
        "target".to_string(),
        "status".to_string(),
        "pages".to_string(),
    ];
    header.extend(payload_keys.iter().cloned());
    if has_scalar {
        header.push("payload".to_string());
    }
    push_line(&mut out, &header, sep);

    for row in rows {
        let mut fields = vec![
            row.position.to_string(),
            row.descriptor.clone(),
            row.status.to_string(),
            row.pages.to_string(),
        ];
        for key in &payload_keys {
            let value = match &row.payload {
                Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            };
            fields.push(value_cell(&value));
        }
        if has_scalar {
            let cell = match &row.payload {
                Value::Object(_) | Value::Null => String::new(),
                other => value_cell(other),
            };
            fields.push(cell);
        }
        push_line(&mut out, &fields, sep);
    }
    out
}

fn push_line(out: &mut String, fields: &[String], sep: char) {
    let escaped: Vec<String> = fields.iter().map(|f| escape_field(f, sep)).collect();
    out.push_str(&escaped.join(&sep.to_string()));
    out.push('\n');
}

fn value_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_field(field: &str, sep: char) -> String {
    if field.contains(sep) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
