//! CSV ingestion boundary.
//!
//! Cells arrive as untyped strings. They are validated and converted into
//! `RawEventRow` exactly once here; nothing downstream re-checks row shape.

use crate::decode::decode_payload;
use crate::error::{ReplayError, Result};
use crate::types::{Locus, RawEventRow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Column order written by `fix_csv`.
pub const REPLAY_COLUMNS: [&str; 12] = [
    "idx",
    "essay_num",
    "op_index",
    "time",
    "op_loc",
    "op_type",
    "current_editor",
    "add",
    "delete",
    "selected_text",
    "cursor_location",
    "recording_obj",
];

/// Columns holding encoded structured data.
const ENCODED_COLUMNS: [usize; 3] = [6, 10, 11];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsvRow {
    idx: Option<String>,
    essay_num: Option<String>,
    op_index: Option<String>,
    time: Option<String>,
    op_loc: Option<String>,
    op_type: Option<String>,
    current_editor: Option<String>,
    add: Option<String>,
    delete: Option<String>,
    selected_text: Option<String>,
    cursor_location: Option<String>,
    recording_obj: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub rows: usize,
    pub skipped: usize,
}

/// Every row of the event log, partitioned by essay and time-ordered within each.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    essays: BTreeMap<i64, Vec<RawEventRow>>,
    pub stats: IngestStats,
}

impl EventLog {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let log = Self::from_reader(file)?;
        info!(
            path = %path.display(),
            rows = log.stats.rows,
            skipped = log.stats.skipped,
            essays = log.essays.len(),
            "loaded replay log"
        );
        Ok(log)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let mut log = Self::default();
        for (line, record) in reader.deserialize::<CsvRow>().enumerate() {
            let raw = match record {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(line, err = %e, "skipping unreadable csv record");
                    log.stats.skipped += 1;
                    continue;
                }
            };
            match convert_row(raw, line) {
                Some(row) => {
                    log.stats.rows += 1;
                    log.essays.entry(row.essay_id).or_default().push(row);
                }
                None => log.stats.skipped += 1,
            }
        }

        log.sort_essays();
        Ok(log)
    }

    pub fn from_rows(rows: Vec<RawEventRow>) -> Self {
        let mut log = Self::default();
        log.stats.rows = rows.len();
        for row in rows {
            log.essays.entry(row.essay_id).or_default().push(row);
        }
        log.sort_essays();
        log
    }

    /// Stable: rows tied on time and op index keep file order.
    fn sort_essays(&mut self) {
        for rows in self.essays.values_mut() {
            rows.sort_by(|a, b| {
                a.timestamp
                    .total_cmp(&b.timestamp)
                    .then(a.sequence_index.cmp(&b.sequence_index))
            });
        }
    }

    /// Rows for one essay. Empty selections are a session-level failure.
    pub fn session_rows(&self, essay_id: i64) -> Result<&[RawEventRow]> {
        match self.essays.get(&essay_id) {
            Some(rows) if !rows.is_empty() => Ok(rows),
            _ => {
                warn!(essay_id, "no data for participant");
                Err(ReplayError::NoDataForParticipant { essay_id })
            }
        }
    }

    pub fn essay_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.essays.keys().copied()
    }
}

fn convert_row(raw: CsvRow, line: usize) -> Option<RawEventRow> {
    let Some(essay_id) = raw.essay_num.as_deref().and_then(parse_int) else {
        debug!(line, "row without essay_num");
        return None;
    };
    let Some(timestamp) = raw.time.as_deref().and_then(parse_float) else {
        debug!(line, essay_id, "row without usable time");
        return None;
    };

    Some(RawEventRow {
        idx: raw.idx.as_deref().and_then(parse_int),
        essay_id,
        sequence_index: raw
            .op_index
            .as_deref()
            .and_then(parse_int)
            .unwrap_or(line as i64),
        timestamp,
        locus: raw
            .op_loc
            .as_deref()
            .map(Locus::parse)
            .unwrap_or(Locus::Other),
        op_type: raw.op_type.map(|s| s.trim().to_string()).unwrap_or_default(),
        editor_snapshot: non_empty(raw.current_editor),
        added_text: non_empty(raw.add),
        deleted_text: non_empty(raw.delete),
        selected_text: non_empty(raw.selected_text),
        cursor_location: non_empty(raw.cursor_location),
        operation_payload: non_empty(raw.recording_obj),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Integers may have been written as floats (`3.0`) by the exporting tool.
fn parse_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

fn parse_float(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FixStats {
    pub rows_read: usize,
    pub rows_written: usize,
    pub conversion_errors: usize,
}

/// Rewrite the encoded columns of a replay log as strict JSON.
///
/// Short rows are padded to the full column set. Cells that cannot be decoded
/// are written through unchanged and counted.
pub fn fix_csv(input: &Path, output: &Path) -> Result<FixStats> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(input)?;
    let mut writer = csv::Writer::from_path(output)?;
    let mut stats = FixStats::default();

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        stats.rows_read += 1;

        if line == 0 {
            writer.write_record(REPLAY_COLUMNS)?;
            stats.rows_written += 1;
            continue;
        }

        let mut cells: Vec<String> = record.iter().map(str::to_string).collect();
        cells.resize(REPLAY_COLUMNS.len(), String::new());
        cells.truncate(REPLAY_COLUMNS.len());

        for column in ENCODED_COLUMNS {
            let cell = &mut cells[column];
            if cell.trim().is_empty() {
                continue;
            }
            match decode_payload(cell) {
                Ok(value) => *cell = value.to_string(),
                Err(e) => {
                    debug!(
                        line,
                        column = REPLAY_COLUMNS[column],
                        err = %e,
                        "cell left unconverted"
                    );
                    stats.conversion_errors += 1;
                }
            }
        }

        writer.write_record(&cells)?;
        stats.rows_written += 1;
    }

    writer.flush()?;
    Ok(stats)
}
