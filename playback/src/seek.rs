//! Seek planning and the seek mutual-exclusion guard.

use crate::batch::{build_batch, BatchStats, ReplayOperationBatch};
use crate::config::BLANK_DOCUMENT;
use crate::decode::decode_snapshot;
use crate::error::{ReplayError, Result};
use crate::types::RawEventRow;
use tracing::warn;

/// Everything needed to rebuild playback state at a target time.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekPlan {
    pub target_secs: f64,
    /// Latest row strictly before the target.
    pub seek_index: Option<usize>,
    /// Checkpoint row the base document was decoded from.
    pub checkpoint: Option<usize>,
    pub base_document: String,
    pub batch: ReplayOperationBatch,
    pub stats: BatchStats,
    pub start_offset_ms: f64,
}

/// Plan a seek to `percentage` of `total_secs` over one essay's time-ordered rows.
/// Out-of-range percentages are clamped; non-finite ones plan the start.
///
/// The base is the nearest decodable checkpoint at or before the seek index, or
/// the blank document. The batch holds every operation after that checkpoint; the
/// ones at or before the target are due as soon as the engine's timer is primed.
pub fn plan_seek(rows: &[RawEventRow], percentage: f64, total_secs: f64) -> SeekPlan {
    let percentage = if percentage.is_finite() {
        percentage.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let target_secs = percentage / 100.0 * total_secs;

    let before = rows.partition_point(|r| r.timestamp < target_secs);
    let seek_index = before.checked_sub(1);

    let mut checkpoint = None;
    let mut base_document = BLANK_DOCUMENT.to_string();
    if let Some(seek_index) = seek_index {
        for index in (0..=seek_index).rev() {
            let Some(snapshot) = rows[index].editor_snapshot.as_deref() else {
                continue;
            };
            if !rows[index].is_editor() {
                continue;
            }
            match decode_snapshot(snapshot) {
                Ok(text) => {
                    checkpoint = Some(index);
                    base_document = text;
                    break;
                }
                Err(e) => {
                    let err = ReplayError::malformed(rows[index].essay_id, index, e.to_string());
                    warn!(err = %err, "unusable checkpoint; looking further back");
                }
            }
        }
    }

    let (batch, stats) = build_batch(rows, checkpoint.map_or(0, |k| k + 1));

    let mut start_offset_ms = target_secs * 1000.0;
    if percentage >= 100.0 {
        // Trailing operations may carry times past the last row.
        let last = batch
            .operations
            .iter()
            .map(|op| op.time.start_ms())
            .fold(0.0, f64::max);
        start_offset_ms = start_offset_ms.max(last);
    }

    SeekPlan {
        target_secs,
        seek_index,
        checkpoint,
        base_document,
        batch,
        stats,
        start_offset_ms,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekToken(u64);

/// At most one seek in flight. Releasing requires the token of the seek that took it.
#[derive(Debug, Default)]
pub struct SeekGuard {
    active: Option<SeekToken>,
    issued: u64,
}

impl SeekGuard {
    pub fn try_begin(&mut self) -> Result<SeekToken> {
        if self.active.is_some() {
            return Err(ReplayError::SeekInProgress);
        }
        self.issued += 1;
        let token = SeekToken(self.issued);
        self.active = Some(token);
        Ok(token)
    }

    /// Returns whether `token` was the active seek.
    pub fn release(&mut self, token: SeekToken) -> bool {
        if self.active == Some(token) {
            self.active = None;
            true
        } else {
            false
        }
    }

    pub fn is_seeking(&self) -> bool {
        self.active.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Locus;

    fn row(time: f64, snapshot: Option<&str>, payload: Option<String>) -> RawEventRow {
        RawEventRow {
            idx: None,
            essay_id: 9,
            sequence_index: 0,
            timestamp: time,
            locus: Locus::Editor,
            op_type: "+input".to_string(),
            editor_snapshot: snapshot.map(str::to_string),
            added_text: None,
            deleted_text: None,
            selected_text: None,
            cursor_location: None,
            operation_payload: payload,
        }
    }

    fn op(time: f64) -> Option<String> {
        Some(format!("{{'t': {}, 'o': [{{'i': 0, 'a': 'x'}}]}}", time * 1000.0))
    }

    fn rows() -> Vec<RawEventRow> {
        vec![
            row(0.0, None, op(0.0)),
            row(10.0, None, op(10.0)),
            row(20.0, Some("['Intro', 'Body']"), None),
            row(30.0, None, op(30.0)),
            row(40.0, None, op(40.0)),
        ]
    }

    #[test]
    fn zero_percent_starts_blank_with_every_operation() {
        let plan = plan_seek(&rows(), 0.0, 40.0);
        assert_eq!(plan.seek_index, None);
        assert_eq!(plan.checkpoint, None);
        assert_eq!(plan.base_document, BLANK_DOCUMENT);
        assert_eq!(plan.batch.len(), 4);
        assert_eq!(plan.start_offset_ms, 0.0);
    }

    #[test]
    fn mid_seek_uses_nearest_prior_checkpoint() {
        let plan = plan_seek(&rows(), 75.0, 40.0);
        assert_eq!(plan.target_secs, 30.0);
        // The row exactly at the target is not "before" it.
        assert_eq!(plan.seek_index, Some(2));
        assert_eq!(plan.checkpoint, Some(2));
        assert_eq!(plan.base_document, "Intro\nBody");
        assert_eq!(plan.batch.source_rows, vec![3, 4]);
        assert_eq!(plan.start_offset_ms, 30_000.0);
    }

    #[test]
    fn seek_before_any_checkpoint_replays_from_blank() {
        let plan = plan_seek(&rows(), 40.0, 40.0);
        assert_eq!(plan.seek_index, Some(1));
        assert_eq!(plan.checkpoint, None);
        assert_eq!(plan.base_document, BLANK_DOCUMENT);
        assert_eq!(plan.batch.source_rows, vec![0, 1, 3, 4]);
    }

    #[test]
    fn full_seek_covers_trailing_operations() {
        let mut rows = rows();
        rows[4].operation_payload = Some("{'t': 41500, 'o': [{'i': 0, 'a': 'z'}]}".to_string());
        let plan = plan_seek(&rows, 100.0, 40.0);
        assert_eq!(plan.batch.source_rows, vec![3, 4]);
        assert_eq!(plan.start_offset_ms, 41_500.0);
    }

    #[test]
    fn undecodable_checkpoint_falls_back_further() {
        let mut rows = rows();
        rows.insert(1, row(5.0, Some("['Draft']"), None));
        rows[3].editor_snapshot = Some("['broken".to_string());
        let plan = plan_seek(&rows, 100.0, 40.0);
        assert_eq!(plan.checkpoint, Some(1));
        assert_eq!(plan.base_document, "Draft");
    }

    #[test]
    fn non_finite_percentage_plans_the_start() {
        let rows = rows();
        let start = plan_seek(&rows, 0.0, 40.0);
        assert_eq!(plan_seek(&rows, f64::NAN, 40.0), start);
        assert_eq!(plan_seek(&rows, f64::NEG_INFINITY, 40.0), start);
    }

    #[test]
    fn planning_is_deterministic() {
        let rows = rows();
        assert_eq!(plan_seek(&rows, 62.5, 40.0), plan_seek(&rows, 62.5, 40.0));
    }

    #[test]
    fn guard_admits_one_seek_at_a_time() {
        let mut guard = SeekGuard::default();
        let first = guard.try_begin().unwrap();
        assert!(matches!(guard.try_begin(), Err(ReplayError::SeekInProgress)));
        assert!(guard.is_seeking());

        assert!(guard.release(first));
        assert!(!guard.release(first));
        let second = guard.try_begin().unwrap();
        assert_ne!(first, second);
    }
}
