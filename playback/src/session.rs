//! One participant's playback session: clock, controller, message and copy
//! tracking, and seek sequencing, owned together and replaced as a unit.

use crate::batch::BatchStats;
use crate::clock::PlaybackClock;
use crate::config::TimelineParams;
use crate::controller::{ControllerState, ReplayController};
use crate::error::{ReplayError, Result};
use crate::messages::{collect_messages, CopyToastTracker, MessageSynchronizer};
use crate::player::{EditPlayer, OperationPlayer};
use crate::seek::{plan_seek, SeekGuard, SeekToken};
use crate::surface::DocumentSurface;
use crate::timeline::build_timeline;
use crate::types::{Message, RawEventRow, SessionTimeline};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub epoch: u64,
    pub essay_id: i64,
    pub total_duration: f64,
    pub operations: usize,
    pub malformed: usize,
    pub messages: usize,
    pub events: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeekOutcome {
    pub token: SeekToken,
    pub target_secs: f64,
    pub was_playing: bool,
    pub checkpoint: Option<usize>,
    pub operations: usize,
    pub malformed: usize,
}

/// What one frame observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tick {
    pub time: f64,
    pub progress: f64,
    pub applied: usize,
    pub messages: Option<Vec<Message>>,
    /// Timestamps of the copy events crossed this frame.
    pub copies_crossed: Vec<f64>,
    pub finished: bool,
}

pub struct SessionContext<S, P = OperationPlayer> {
    epoch: u64,
    essay_id: i64,
    rows: Vec<RawEventRow>,
    timeline: SessionTimeline,
    clock: PlaybackClock,
    controller: ReplayController<S, P>,
    messages: MessageSynchronizer,
    copies: CopyToastTracker,
    guard: SeekGuard,
    last_seek: Option<SeekToken>,
    frames_active: bool,
    load_stats: BatchStats,
}

impl<S: DocumentSurface, P: EditPlayer> SessionContext<S, P> {
    /// Build the session and load it at time zero, paused.
    pub fn open(
        epoch: u64,
        essay_id: i64,
        rows: Vec<RawEventRow>,
        params: &TimelineParams,
        surface: S,
        speed: f64,
        now: Instant,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Err(ReplayError::NoDataForParticipant { essay_id });
        }

        let timeline = build_timeline(&rows, params);
        let messages = collect_messages(&rows, &timeline.paste_records);
        let copies = CopyToastTracker::new(timeline.copy_times());

        let mut session = Self {
            epoch,
            essay_id,
            clock: PlaybackClock::new(timeline.total_duration, speed),
            controller: ReplayController::new(surface, speed),
            messages: MessageSynchronizer::new(messages),
            copies,
            guard: SeekGuard::default(),
            last_seek: None,
            frames_active: false,
            load_stats: BatchStats::default(),
            rows,
            timeline,
        };
        session.rebuild_at(0.0, now)?;
        session.frames_active = true;

        info!(
            epoch,
            essay_id,
            total_duration = session.timeline.total_duration,
            operations = session.load_stats.operations,
            malformed = session.load_stats.malformed,
            "session loaded"
        );
        Ok(session)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            epoch: self.epoch,
            essay_id: self.essay_id,
            total_duration: self.timeline.total_duration,
            operations: self.load_stats.operations,
            malformed: self.load_stats.malformed,
            messages: self.messages.total(),
            events: self.timeline.ordered_events.len(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn essay_id(&self) -> i64 {
        self.essay_id
    }

    pub fn timeline(&self) -> &SessionTimeline {
        &self.timeline
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn controller_state(&self) -> ControllerState {
        self.controller.state()
    }

    pub fn visible_messages(&self) -> &[Message] {
        self.messages.visible()
    }

    pub fn document(&self) -> String {
        self.controller.document()
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    pub fn is_seeking(&self) -> bool {
        self.guard.is_seeking()
    }

    pub fn frames_active(&self) -> bool {
        self.frames_active
    }

    pub fn play(&mut self, now: Instant) {
        if self.clock.is_playing() {
            return;
        }
        // Replaying from the end starts over.
        if self.clock.is_finished(now) && self.timeline.total_duration > 0.0 {
            if let Err(e) = self.rebuild_at(0.0, now) {
                warn!(essay_id = self.essay_id, err = %e, "restart from the beginning failed");
                return;
            }
        }
        self.clock.play(now);
        self.controller.play(self.clock.current(now) * 1000.0);
    }

    pub fn pause(&mut self, now: Instant) {
        self.clock.pause(now);
        self.controller.pause();
        // A pause during the settle delay cancels the pending resume.
        self.last_seek = None;
    }

    /// Ignored unless `speed` is a positive, finite multiplier.
    pub fn set_speed(&mut self, speed: f64, now: Instant) {
        if !(speed.is_finite() && speed > 0.0) {
            warn!(speed, "ignoring invalid playback speed");
            return;
        }
        self.clock.set_speed(speed, now);
        self.controller.set_speed(speed);
    }

    /// Move to `percentage` of the session. `Ok(None)` when there is nothing to seek in.
    ///
    /// Leaves playback paused; the caller resumes after the settle delay when
    /// `was_playing` is set, and releases the guard with the returned token.
    pub fn seek(&mut self, percentage: f64, now: Instant) -> Result<Option<SeekOutcome>> {
        if !percentage.is_finite() {
            warn!(essay_id = self.essay_id, percentage, "ignoring seek to a non-finite position");
            return Ok(None);
        }
        if self.guard.is_seeking() {
            debug!(essay_id = self.essay_id, percentage, "seek dropped; another is in flight");
            return Err(ReplayError::SeekInProgress);
        }
        if self.timeline.total_duration <= 0.0 {
            return Ok(None);
        }
        let token = self.guard.try_begin()?;

        let was_playing = self.clock.is_playing();
        self.clock.pause(now);
        self.controller.discard();
        self.frames_active = false;

        let target_secs = percentage.clamp(0.0, 100.0) / 100.0 * self.timeline.total_duration;
        let checkpoint = match self.rebuild_at(percentage, now) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                self.guard.release(token);
                return Err(e);
            }
        };
        self.frames_active = true;
        self.last_seek = Some(token);

        debug!(
            essay_id = self.essay_id,
            target_secs, was_playing, ?checkpoint, "seek applied"
        );
        Ok(Some(SeekOutcome {
            token,
            target_secs,
            was_playing,
            checkpoint,
            operations: self.load_stats.operations,
            malformed: self.load_stats.malformed,
        }))
    }

    /// Resume after a seek's settle delay. Ignored if a later seek superseded it
    /// or playback was paused in the meantime.
    pub fn resume_after_seek(&mut self, token: SeekToken, now: Instant) -> bool {
        if self.last_seek != Some(token) {
            return false;
        }
        self.play(now);
        true
    }

    pub fn release_seek(&mut self, token: SeekToken) -> bool {
        self.guard.release(token)
    }

    /// Sample the clock once and bring the document, messages and copy pointer up to it.
    pub fn tick(&mut self, now: Instant) -> Tick {
        let time = self.clock.current(now);
        let finished = self.clock.is_playing() && self.clock.is_finished(now);
        let applied = if finished {
            self.controller.finish()
        } else {
            self.controller.advance(time * 1000.0)
        };
        let messages = self.messages.sync(time).map(<[Message]>::to_vec);
        let copies_crossed = self.copies.advance(time).to_vec();

        if finished {
            self.pause(now);
        }

        Tick {
            time,
            progress: self.clock.progress(now),
            applied,
            messages,
            copies_crossed,
            finished,
        }
    }

    /// Tear down the engine and hand the surface back.
    pub fn into_surface(self) -> S {
        self.controller.into_surface()
    }

    /// Reset the document to the state at `percentage` and rebuild the engine on it, paused.
    fn rebuild_at(&mut self, percentage: f64, now: Instant) -> Result<Option<usize>> {
        let plan = plan_seek(&self.rows, percentage, self.timeline.total_duration);

        self.clock.pause(now);
        self.controller.discard();
        self.controller.set_base(&plan.base_document);
        self.controller.load(&plan.batch, plan.start_offset_ms)?;
        self.controller.advance(plan.start_offset_ms);

        self.clock.seek(plan.target_secs, now);
        self.messages.sync(plan.target_secs);
        self.copies.reset_to(plan.target_secs);
        self.load_stats = plan.stats;
        Ok(plan.checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLANK_DOCUMENT;
    use crate::surface::TextSurface;
    use crate::types::{Locus, OP_COPY, OP_GPT_INQUIRY, OP_GPT_RESPONSE};
    use std::time::Duration;

    fn base_row(time: f64, locus: Locus, op_type: &str) -> RawEventRow {
        RawEventRow {
            idx: None,
            essay_id: 5,
            sequence_index: 0,
            timestamp: time,
            locus,
            op_type: op_type.to_string(),
            editor_snapshot: None,
            added_text: None,
            deleted_text: None,
            selected_text: None,
            cursor_location: None,
            operation_payload: None,
        }
    }

    fn typed(time: f64, at: usize, text: &str) -> RawEventRow {
        let mut row = base_row(time, Locus::Editor, "+input");
        row.operation_payload = Some(format!(
            "{{'t': {}, 'o': [{{'i': {at}, 'a': '{text}'}}]}}",
            time * 1000.0
        ));
        row
    }

    fn said(time: f64, op_type: &str, text: &str) -> RawEventRow {
        let mut row = base_row(time, Locus::Gpt, op_type);
        row.selected_text = Some(text.to_string());
        row
    }

    /// Ten seconds of typing "abcd" on a blank document, one checkpoint, two messages and a copy.
    fn rows() -> Vec<RawEventRow> {
        let mut checkpoint = base_row(4.0, Locus::Editor, "checkpoint");
        checkpoint.editor_snapshot = Some("['ab', '', '', '', '']".to_string());
        vec![
            typed(0.0, 0, "a"),
            said(1.0, OP_GPT_INQUIRY, "hi"),
            typed(2.0, 1, "b"),
            checkpoint,
            said(5.0, OP_GPT_RESPONSE, "hello"),
            base_row(6.0, Locus::Editor, OP_COPY),
            typed(7.0, 2, "c"),
            typed(10.0, 3, "d"),
        ]
    }

    fn open(rows: Vec<RawEventRow>, now: Instant) -> SessionContext<TextSurface> {
        let params = TimelineParams::default();
        SessionContext::open(1, 5, rows, &params, TextSurface::new(), 1.0, now).unwrap()
    }

    #[test]
    fn empty_row_set_is_no_data() {
        let result: Result<SessionContext<TextSurface>> = SessionContext::open(
            1,
            42,
            Vec::new(),
            &TimelineParams::default(),
            TextSurface::new(),
            1.0,
            Instant::now(),
        );
        assert!(matches!(result, Err(ReplayError::NoDataForParticipant { essay_id: 42 })));
    }

    #[test]
    fn opens_paused_at_time_zero() {
        let now = Instant::now();
        let session = open(rows(), now);
        assert_eq!(session.document(), format!("a{BLANK_DOCUMENT}"));
        assert!(!session.is_playing());
        assert_eq!(session.controller_state(), ControllerState::Loaded);
        assert_eq!(session.summary().operations, 4);
        assert_eq!(session.summary().messages, 2);
    }

    #[test]
    fn seek_to_zero_is_the_blank_state() {
        let now = Instant::now();
        let mut session = open(rows(), now);
        let outcome = session.seek(0.0, now).unwrap().unwrap();
        assert_eq!(outcome.checkpoint, None);
        assert_eq!(outcome.target_secs, 0.0);
        // The operation stamped exactly at zero is due immediately.
        assert_eq!(session.document(), format!("a{BLANK_DOCUMENT}"));
        assert!(session.visible_messages().is_empty());
    }

    #[test]
    fn seek_to_end_includes_every_operation() {
        let now = Instant::now();
        let mut session = open(rows(), now);
        session.seek(100.0, now).unwrap();
        assert_eq!(session.document(), "abcd\n\n\n\n");
        assert_eq!(session.visible_messages().len(), 2);
    }

    #[test]
    fn seek_matches_forward_playback() {
        let start = Instant::now();
        let mut played = open(rows(), start);
        played.play(start);
        let mut last = None;
        for ms in (0..=8000).step_by(16) {
            last = Some(played.tick(start + Duration::from_millis(ms)));
        }
        let at = start + Duration::from_millis(8000);
        assert_eq!(last.map(|t| t.time), Some(8.0));

        let mut seeked = open(rows(), start);
        seeked.seek(80.0, at).unwrap();
        assert_eq!(seeked.document(), played.document());
        assert_eq!(seeked.visible_messages(), played.visible_messages());
    }

    #[test]
    fn repeated_seek_is_deterministic() {
        let now = Instant::now();
        let mut session = open(rows(), now);

        let first = session.seek(55.0, now).unwrap().unwrap();
        let first_doc = session.document();
        let first_messages = session.visible_messages().to_vec();
        session.release_seek(first.token);

        let second = session.seek(55.0, now).unwrap().unwrap();
        assert_eq!(first.checkpoint, Some(3));
        assert_eq!(second.checkpoint, first.checkpoint);
        assert_eq!(session.document(), first_doc);
        assert_eq!(session.visible_messages(), first_messages.as_slice());
    }

    #[test]
    fn second_seek_while_first_settles_has_no_effect() {
        let now = Instant::now();
        let mut session = open(rows(), now);
        let first = session.seek(30.0, now).unwrap().unwrap();
        let doc = session.document();
        let clock_time = session.clock().current(now);

        assert!(matches!(session.seek(90.0, now), Err(ReplayError::SeekInProgress)));
        assert_eq!(session.document(), doc);
        assert_eq!(session.clock().current(now), clock_time);

        assert!(session.release_seek(first.token));
        assert!(session.seek(90.0, now).unwrap().is_some());
    }

    #[test]
    fn seek_records_play_state_and_resume_is_token_checked() {
        let now = Instant::now();
        let mut session = open(rows(), now);
        session.play(now);

        let outcome = session.seek(50.0, now).unwrap().unwrap();
        assert!(outcome.was_playing);
        assert!(!session.is_playing());

        assert!(session.resume_after_seek(outcome.token, now));
        assert!(session.is_playing());
        assert_eq!(session.controller_state(), ControllerState::Playing);
    }

    #[test]
    fn zero_duration_seek_is_a_no_op() {
        let now = Instant::now();
        let mut session = open(vec![typed(0.0, 0, "x")], now);
        assert_eq!(session.seek(50.0, now).unwrap(), None);
        assert!(!session.is_seeking());
    }

    #[test]
    fn ticks_publish_messages_and_copy_crossings() {
        let start = Instant::now();
        let mut session = open(rows(), start);
        session.play(start);

        let tick = session.tick(start + Duration::from_millis(1500));
        assert_eq!(tick.messages.map(|m| m.len()), Some(1));
        assert!(tick.copies_crossed.is_empty());

        let tick = session.tick(start + Duration::from_millis(1600));
        assert!(tick.messages.is_none());

        let tick = session.tick(start + Duration::from_millis(6500));
        assert_eq!(tick.copies_crossed, vec![6.0]);
        let tick = session.tick(start + Duration::from_millis(6600));
        assert!(tick.copies_crossed.is_empty());
    }

    #[test]
    fn playback_stops_at_the_end_and_restarts_from_zero() {
        let start = Instant::now();
        let mut session = open(rows(), start);
        session.set_speed(100.0, start);
        session.play(start);

        let tick = session.tick(start + Duration::from_secs(1));
        assert!(tick.finished);
        assert_eq!(tick.progress, 100.0);
        assert!(!session.is_playing());
        assert_eq!(session.document(), "abcd\n\n\n\n");

        let later = start + Duration::from_secs(2);
        session.play(later);
        assert_eq!(session.clock().current(later), 0.0);
        assert_eq!(session.document(), format!("a{BLANK_DOCUMENT}"));
    }

    #[test]
    fn non_finite_seek_is_ignored() {
        let now = Instant::now();
        let mut session = open(rows(), now);
        let done = session.seek(100.0, now).unwrap().unwrap();
        session.release_seek(done.token);

        assert_eq!(session.seek(f64::NAN, now).unwrap(), None);
        assert_eq!(session.seek(f64::INFINITY, now).unwrap(), None);
        assert!(!session.is_seeking());
        assert_eq!(session.clock().current(now), 10.0);
        assert_eq!(session.document(), "abcd\n\n\n\n");

        let tick = session.tick(now + Duration::from_millis(16));
        assert_eq!(tick.time, 10.0);
        assert!(tick.copies_crossed.is_empty());
    }

    #[test]
    fn pause_during_settle_cancels_the_resume() {
        let now = Instant::now();
        let mut session = open(rows(), now);
        session.play(now);

        let outcome = session.seek(50.0, now).unwrap().unwrap();
        assert!(outcome.was_playing);
        session.pause(now);

        assert!(!session.resume_after_seek(outcome.token, now));
        assert!(!session.is_playing());
        assert!(session.release_seek(outcome.token));
    }

    #[test]
    fn invalid_speed_is_ignored() {
        let now = Instant::now();
        let mut session = open(rows(), now);
        session.set_speed(0.0, now);
        session.set_speed(f64::NAN, now);
        assert_eq!(session.clock().speed(), 1.0);
    }
}
