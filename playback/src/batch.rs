//! Replay operation batches: the ordered edit-operation stream fed to the player.

use crate::decode::decode_payload;
use crate::error::ReplayError;
use crate::types::RawEventRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// When an operation happens, in milliseconds on the session clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpTime {
    At(f64),
    Span([f64; 2]),
}

impl OpTime {
    /// Spans apply at their start.
    pub fn start_ms(&self) -> f64 {
        match *self {
            Self::At(t) => t,
            Self::Span([start, _]) => start,
        }
    }

    pub fn end_ms(&self) -> f64 {
        match *self {
            Self::At(t) => t,
            Self::Span([start, end]) => start.max(end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeIndex {
    At(usize),
    Range([usize; 2]),
}

impl ChangeIndex {
    pub fn offset(&self) -> usize {
        match *self {
            Self::At(i) => i,
            Self::Range([from, _]) => from,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeText {
    Text(String),
    Lines(Vec<String>),
}

impl ChangeText {
    pub fn joined(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Lines(lines) => lines.join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Removed {
    Count(usize),
    Lines(Vec<String>),
}

impl Removed {
    pub fn char_count(&self) -> usize {
        match self {
            Self::Count(n) => *n,
            Self::Lines(lines) => lines.join("\n").chars().count(),
        }
    }
}

/// One text change: remove `r` characters at `i`, then insert `a` there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChange {
    #[serde(rename = "i")]
    pub index: ChangeIndex,
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub added: Option<ChangeText>,
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<Removed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditOperation {
    #[serde(rename = "t")]
    pub time: OpTime,
    #[serde(rename = "o", default)]
    pub changes: Vec<TextChange>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct RawOperation {
    #[serde(rename = "t")]
    time: Option<OpTime>,
    #[serde(rename = "o")]
    changes: Vec<TextChange>,
}

/// Ordered operations for one player instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayOperationBatch {
    pub operations: Vec<EditOperation>,
    /// Row index (within the essay) each operation came from.
    pub source_rows: Vec<usize>,
}

impl ReplayOperationBatch {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Serialized operation stream, as accepted by `EditPlayer::add_operations`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.operations)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchStats {
    pub operations: usize,
    pub malformed: usize,
    pub empty_payloads: usize,
}

/// Decode one editor row's payload. A payload may hold one operation or an array of them.
pub fn decode_operations(
    row: &RawEventRow,
    row_index: usize,
) -> Result<Vec<EditOperation>, ReplayError> {
    let Some(raw) = row.operation_payload.as_deref() else {
        return Ok(Vec::new());
    };
    let value = decode_payload(raw)
        .map_err(|e| ReplayError::malformed(row.essay_id, row_index, e.to_string()))?;

    let raw_ops: Vec<RawOperation> = match value {
        Value::Array(_) => serde_json::from_value(value),
        other => serde_json::from_value(other).map(|op| vec![op]),
    }
    .map_err(|e| {
        ReplayError::malformed(row.essay_id, row_index, format!("not an edit operation: {e}"))
    })?;

    let row_ms = row.timestamp * 1000.0;
    Ok(raw_ops
        .into_iter()
        .map(|op| EditOperation {
            time: op.time.unwrap_or(OpTime::At(row_ms)),
            changes: op.changes,
        })
        .collect())
}

/// Build a batch from editor rows with index `>= from`, skipping malformed payloads.
pub fn build_batch(rows: &[RawEventRow], from: usize) -> (ReplayOperationBatch, BatchStats) {
    let mut batch = ReplayOperationBatch::default();
    let mut stats = BatchStats::default();

    for (index, row) in rows.iter().enumerate().skip(from) {
        if !row.is_editor() {
            continue;
        }
        if row.operation_payload.is_none() {
            stats.empty_payloads += 1;
            continue;
        }
        match decode_operations(row, index) {
            Ok(ops) => {
                for op in ops {
                    batch.operations.push(op);
                    batch.source_rows.push(index);
                }
            }
            Err(e) => {
                warn!(
                    essay_id = row.essay_id,
                    row = index,
                    err = %e,
                    "dropping malformed operation"
                );
                stats.malformed += 1;
            }
        }
    }

    // Stable: operations sharing a time keep row order.
    let mut order: Vec<usize> = (0..batch.operations.len()).collect();
    order.sort_by(|&a, &b| {
        batch.operations[a]
            .time
            .start_ms()
            .total_cmp(&batch.operations[b].time.start_ms())
    });
    batch = ReplayOperationBatch {
        operations: order.iter().map(|&i| batch.operations[i].clone()).collect(),
        source_rows: order.iter().map(|&i| batch.source_rows[i]).collect(),
    };

    stats.operations = batch.len();
    (batch, stats)
}

/// Per-participant payload health, as reported by `replay validate`.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PayloadReport {
    pub editor_rows: usize,
    pub empty_payloads: usize,
    pub decode_errors: usize,
    pub missing_fields: usize,
    pub samples: Vec<PayloadProblem>,
}

impl PayloadReport {
    pub fn problems(&self) -> usize {
        self.empty_payloads + self.decode_errors + self.missing_fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadProblem {
    pub idx: Option<i64>,
    pub kind: &'static str,
    pub time: f64,
    pub detail: String,
}

const MAX_SAMPLES: usize = 2;
const PREVIEW_CHARS: usize = 80;

pub fn validate_payloads<'a>(
    rows: impl IntoIterator<Item = &'a RawEventRow>,
) -> BTreeMap<i64, PayloadReport> {
    let mut reports: BTreeMap<i64, PayloadReport> = BTreeMap::new();

    for row in rows {
        if !row.is_editor() {
            continue;
        }
        let report = reports.entry(row.essay_id).or_default();
        report.editor_rows += 1;

        let problem = match row.operation_payload.as_deref() {
            None => {
                report.empty_payloads += 1;
                Some(("empty_recording", String::new()))
            }
            Some(raw) => match decode_payload(raw) {
                Err(e) => {
                    report.decode_errors += 1;
                    Some(("json_parse_error", e.to_string()))
                }
                Ok(value) if !has_operation_fields(&value) => {
                    report.missing_fields += 1;
                    Some(("missing_fields", raw.chars().take(PREVIEW_CHARS).collect()))
                }
                Ok(_) => None,
            },
        };

        if let Some((kind, detail)) = problem {
            if report.samples.len() < MAX_SAMPLES {
                report.samples.push(PayloadProblem {
                    idx: row.idx,
                    kind,
                    time: row.timestamp,
                    detail,
                });
            }
        }
    }

    reports
}

fn has_operation_fields(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.contains_key("t") && map.contains_key("o"),
        Value::Array(items) => !items.is_empty() && items.iter().all(has_operation_fields),
        _ => false,
    }
}
