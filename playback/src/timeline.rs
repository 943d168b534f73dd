//! Timeline model: ordered annotation events, typing sessions, idle periods and
//! activity density, all derived from one essay's rows in a single pass each.

use crate::config::TimelineParams;
use crate::types::{
    DensityBucket, EventKind, IdlePeriod, Locus, PasteRecord, RawEventRow, SessionTimeline,
    TimelineEvent, TypingSession,
};
use serde::Serialize;

/// Build the timeline for rows already filtered to one essay.
pub fn build_timeline(rows: &[RawEventRow], params: &TimelineParams) -> SessionTimeline {
    let (ordered_events, paste_records) = extract_events(rows);

    let mut editor_times: Vec<f64> = rows
        .iter()
        .filter(|r| r.locus == Locus::Editor)
        .map(|r| r.timestamp)
        .collect();
    editor_times.sort_by(f64::total_cmp);

    let mut all_times: Vec<f64> = rows.iter().map(|r| r.timestamp).collect();
    all_times.sort_by(f64::total_cmp);

    let total_duration = rows.last().map(|r| r.timestamp).unwrap_or(0.0);

    SessionTimeline {
        essay_id: rows.first().map(|r| r.essay_id).unwrap_or_default(),
        ordered_events,
        paste_records,
        typing_sessions: typing_sessions(&editor_times, params.typing_gap_secs),
        idle_periods: idle_periods(&all_times, params.idle_threshold_secs),
        activity_density: activity_density(&editor_times, total_duration, params.density_buckets),
        total_duration,
    }
}

fn extract_events(rows: &[RawEventRow]) -> (Vec<TimelineEvent>, Vec<PasteRecord>) {
    let mut events = Vec::new();
    let mut pastes = Vec::new();

    for row in rows {
        let Some(kind) = EventKind::classify(&row.op_type) else {
            continue;
        };
        events.push(TimelineEvent {
            time: row.timestamp,
            kind,
        });
        if kind == EventKind::Paste {
            pastes.push(PasteRecord {
                text: row.added_text.clone().unwrap_or_default(),
                destination: row.locus,
            });
        }
    }

    // Stable sort: ties keep row order.
    events.sort_by(|a, b| a.time.total_cmp(&b.time));
    (events, pastes)
}

/// Merge sorted editor timestamps into runs whose internal gaps are all `<= gap`.
pub fn typing_sessions(sorted_times: &[f64], gap: f64) -> Vec<TypingSession> {
    let mut sessions = Vec::new();
    let Some((&first, rest)) = sorted_times.split_first() else {
        return sessions;
    };

    let mut current = TypingSession {
        start: first,
        end: first,
    };
    for &t in rest {
        if t - current.end <= gap {
            current.end = t;
        } else {
            sessions.push(current);
            current = TypingSession { start: t, end: t };
        }
    }
    sessions.push(current);
    sessions
}

/// Gaps longer than `threshold` between consecutive timestamps, plus a leading
/// gap from zero when the first event is already past the threshold.
pub fn idle_periods(sorted_times: &[f64], threshold: f64) -> Vec<IdlePeriod> {
    let mut periods = Vec::new();
    let Some(&first) = sorted_times.first() else {
        return periods;
    };

    if first > threshold {
        periods.push(IdlePeriod {
            start: 0.0,
            end: first,
            duration: first,
        });
    }
    for pair in sorted_times.windows(2) {
        let gap = pair[1] - pair[0];
        if gap > threshold {
            periods.push(IdlePeriod {
                start: pair[0],
                end: pair[1],
                duration: gap,
            });
        }
    }
    periods
}

/// Editor events per equal-width bucket over `[0, total_duration]`, normalized by the
/// busiest bucket.
pub fn activity_density(
    editor_times: &[f64],
    total_duration: f64,
    buckets: usize,
) -> Vec<DensityBucket> {
    if total_duration <= 0.0 || buckets == 0 {
        return Vec::new();
    }

    let segment = total_duration / buckets as f64;
    let mut counts = vec![0usize; buckets];
    for &t in editor_times {
        let idx = ((t / segment).floor().max(0.0) as usize).min(buckets - 1);
        counts[idx] += 1;
    }

    let max = counts.iter().copied().max().unwrap_or(0);
    counts
        .into_iter()
        .enumerate()
        .map(|(bucket_index, count)| DensityBucket {
            bucket_index,
            count,
            normalized: if max == 0 {
                0.0
            } else {
                count as f64 / max as f64
            },
        })
        .collect()
}

/// Seek-bar marker for one annotated event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineMarker {
    pub kind: EventKind,
    pub time: f64,
    pub percentage: f64,
    pub label: &'static str,
    pub time_label: String,
}

pub fn markers(timeline: &SessionTimeline) -> Vec<TimelineMarker> {
    timeline
        .ordered_events
        .iter()
        .map(|e| TimelineMarker {
            kind: e.kind,
            time: e.time,
            percentage: progress_percent(e.time, timeline.total_duration),
            label: e.kind.label(),
            time_label: format_clock(e.time),
        })
        .collect()
}

/// `time / total * 100`, clamped to `[0, 100]`; zero when there is no duration.
pub fn progress_percent(time: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    (time / total * 100.0).clamp(0.0, 100.0)
}

/// `m:ss`
pub fn format_clock(secs: f64) -> String {
    let secs = secs.max(0.0);
    let minutes = (secs / 60.0).floor() as u64;
    let seconds = (secs % 60.0).floor() as u64;
    format!("{minutes}:{seconds:02}")
}
