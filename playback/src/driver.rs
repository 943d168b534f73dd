//! Async session driver.
//!
//! A single task owns the active `SessionContext` and the editor surface. Callers
//! talk to it through a cloneable `ReplayHandle`; it runs the per-frame loop,
//! schedules seek settle and cooldown continuations, and publishes a
//! `PlaybackView` on a watch channel plus one-shot `Notice`s on an mpsc channel.
//! Every continuation carries the epoch it was scheduled under and is dropped if
//! a newer participant selection (or a close) has happened since.

use crate::config::{ReplayConfig, TimelineParams, TimingParams, DEFAULT_SPEED};
use crate::error::{ReplayError, Result};
use crate::ingest::EventLog;
use crate::seek::SeekToken;
use crate::session::{SeekOutcome, SessionContext, SessionSummary};
use crate::surface::{DocumentSurface, SurfaceSlot};
use crate::types::{Message, RawEventRow};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 64;
const NOTICE_CAPACITY: usize = 64;

/// Informational, never an error state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    TextCopied { time: f64 },
    Resuming { target_secs: f64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackView {
    pub epoch: u64,
    pub essay_id: Option<i64>,
    pub loading: bool,
    pub loaded: bool,
    pub playing: bool,
    pub seeking: bool,
    pub speed: f64,
    pub current_time: f64,
    pub total_duration: f64,
    pub progress: f64,
    pub messages: Vec<Message>,
    pub document: String,
}

enum Command {
    Open {
        essay_id: i64,
        reply: oneshot::Sender<Result<SessionSummary>>,
    },
    Play,
    Pause,
    SetSpeed(f64),
    Seek {
        percentage: f64,
        reply: oneshot::Sender<Result<Option<SeekOutcome>>>,
    },
    Close,
    Snapshot(oneshot::Sender<PlaybackView>),
}

enum Internal<S> {
    SurfaceReady {
        epoch: u64,
        essay_id: i64,
        rows: Vec<RawEventRow>,
        result: Result<S>,
    },
    Resume {
        epoch: u64,
        token: SeekToken,
    },
    ReleaseSeek {
        epoch: u64,
        token: SeekToken,
    },
}

#[derive(Clone)]
pub struct ReplayHandle {
    commands: mpsc::Sender<Command>,
}

impl ReplayHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ReplayError::DriverClosed)
    }

    /// Select a participant. Resolves once the session is loaded (or failed to load).
    pub async fn open(&self, essay_id: i64) -> Result<SessionSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Open { essay_id, reply }).await?;
        rx.await.map_err(|_| ReplayError::DriverClosed)?
    }

    pub async fn play(&self) -> Result<()> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn set_speed(&self, speed: f64) -> Result<()> {
        self.send(Command::SetSpeed(speed)).await
    }

    /// `Err(SeekInProgress)` while a previous seek is still cooling down.
    pub async fn seek(&self, percentage: f64) -> Result<Option<SeekOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Seek { percentage, reply }).await?;
        rx.await.map_err(|_| ReplayError::DriverClosed)?
    }

    pub async fn close(&self) -> Result<()> {
        self.send(Command::Close).await
    }

    pub async fn snapshot(&self) -> Result<PlaybackView> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await.map_err(|_| ReplayError::DriverClosed)
    }
}

pub struct ReplayDriver {
    pub handle: ReplayHandle,
    pub view: watch::Receiver<PlaybackView>,
    pub notices: mpsc::Receiver<Notice>,
    pub task: JoinHandle<()>,
}

pub fn spawn_driver<S>(
    log: Arc<EventLog>,
    config: &ReplayConfig,
    slot: SurfaceSlot<S>,
) -> ReplayDriver
where
    S: DocumentSurface + Send + 'static,
{
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(PlaybackView::default());
    let (notice_tx, notice_rx) = mpsc::channel(NOTICE_CAPACITY);

    let driver = Driver {
        log,
        timeline: config.timeline.clone(),
        timing: config.timing.clone(),
        slot,
        spare: None,
        session: None,
        pending: None,
        epoch: 0,
        speed: DEFAULT_SPEED,
        internal: internal_tx,
        view: view_tx,
        notices: notice_tx,
    };
    let task = tokio::spawn(driver.run(commands_rx, internal_rx));

    ReplayDriver {
        handle: ReplayHandle {
            commands: commands_tx,
        },
        view: view_rx,
        notices: notice_rx,
        task,
    }
}

struct PendingOpen {
    epoch: u64,
    essay_id: i64,
    reply: oneshot::Sender<Result<SessionSummary>>,
    task: JoinHandle<()>,
}

struct Driver<S> {
    log: Arc<EventLog>,
    timeline: TimelineParams,
    timing: TimingParams,
    slot: SurfaceSlot<S>,
    /// Surface handed back by the last torn-down session.
    spare: Option<S>,
    session: Option<SessionContext<S>>,
    pending: Option<PendingOpen>,
    epoch: u64,
    speed: f64,
    internal: mpsc::UnboundedSender<Internal<S>>,
    view: watch::Sender<PlaybackView>,
    notices: mpsc::Sender<Notice>,
}

impl<S> Driver<S>
where
    S: DocumentSurface + Send + 'static,
{
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal<S>>,
    ) {
        let mut frames = tokio::time::interval(self.timing.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let frames_on = self.session.as_ref().is_some_and(|s| s.frames_active());
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(message) = internal.recv() => self.handle_internal(message),
                _ = frames.tick(), if frames_on => self.frame(),
            }
        }

        self.cancel_pending();
        debug!("replay driver stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Open { essay_id, reply } => self.open(essay_id, reply),
            Command::Play => {
                if let Some(session) = self.session.as_mut() {
                    session.play(Instant::now());
                }
                self.publish();
            }
            Command::Pause => {
                if let Some(session) = self.session.as_mut() {
                    session.pause(Instant::now());
                }
                self.publish();
            }
            Command::SetSpeed(speed) => {
                if speed.is_finite() && speed > 0.0 {
                    self.speed = speed;
                }
                if let Some(session) = self.session.as_mut() {
                    session.set_speed(speed, Instant::now());
                }
                self.publish();
            }
            Command::Seek { percentage, reply } => {
                let result = self.seek(percentage);
                let _ = reply.send(result);
            }
            Command::Close => {
                self.epoch += 1;
                self.cancel_pending();
                self.close_session();
                self.publish();
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.build_view());
            }
        }
    }

    fn open(&mut self, essay_id: i64, reply: oneshot::Sender<Result<SessionSummary>>) {
        self.epoch += 1;
        let epoch = self.epoch;
        self.cancel_pending();
        self.close_session();
        info!(epoch, essay_id, "opening participant session");

        let rows = match self.log.session_rows(essay_id) {
            Ok(rows) => rows.to_vec(),
            Err(e) => {
                self.publish();
                let _ = reply.send(Err(e));
                return;
            }
        };

        if let Some(surface) = self.spare.take() {
            let result = self.install(epoch, essay_id, rows, surface);
            let _ = reply.send(result);
            return;
        }

        let mut slot = self.slot.clone();
        let timing = self.timing.clone();
        let internal = self.internal.clone();
        let task = tokio::spawn(async move {
            let result = slot.wait_ready(&timing).await;
            let _ = internal.send(Internal::SurfaceReady {
                epoch,
                essay_id,
                rows,
                result,
            });
        });
        self.pending = Some(PendingOpen {
            epoch,
            essay_id,
            reply,
            task,
        });
        self.publish();
    }

    fn install(
        &mut self,
        epoch: u64,
        essay_id: i64,
        rows: Vec<RawEventRow>,
        surface: S,
    ) -> Result<SessionSummary> {
        let result = SessionContext::open(
            epoch,
            essay_id,
            rows,
            &self.timeline,
            surface,
            self.speed,
            Instant::now(),
        )
        .map(|session| {
            let summary = session.summary();
            self.session = Some(session);
            summary
        });
        if let Err(e) = &result {
            warn!(epoch, essay_id, err = %e, "session load failed");
        }
        self.publish();
        result
    }

    fn seek(&mut self, percentage: f64) -> Result<Option<SeekOutcome>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        let outcome = session.seek(percentage, Instant::now())?;

        if let Some(outcome) = &outcome {
            let epoch = self.epoch;
            if outcome.was_playing {
                self.schedule(
                    self.timing.seek_settle,
                    Internal::Resume {
                        epoch,
                        token: outcome.token,
                    },
                );
            }
            self.schedule(
                self.timing.seek_cooldown,
                Internal::ReleaseSeek {
                    epoch,
                    token: outcome.token,
                },
            );
        }
        self.publish();
        Ok(outcome)
    }

    fn handle_internal(&mut self, message: Internal<S>) {
        match message {
            Internal::SurfaceReady {
                epoch,
                essay_id,
                rows,
                result,
            } => {
                let Some(pending) = self.pending.take_if(|p| p.epoch == epoch) else {
                    // Superseded while waiting; keep the surface for the next session.
                    if let Ok(surface) = result {
                        self.spare = Some(surface);
                    }
                    return;
                };
                let outcome = match result {
                    Ok(surface) => self.install(epoch, essay_id, rows, surface),
                    Err(e) => {
                        self.publish();
                        Err(e)
                    }
                };
                let _ = pending.reply.send(outcome);
            }
            Internal::Resume { epoch, token } => {
                if epoch != self.epoch {
                    return;
                }
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                let target_secs = session.clock().current(Instant::now());
                if session.resume_after_seek(token, Instant::now()) {
                    self.notify(Notice::Resuming { target_secs });
                    self.publish();
                }
            }
            Internal::ReleaseSeek { epoch, token } => {
                if epoch != self.epoch {
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.release_seek(token);
                }
                self.publish();
            }
        }
    }

    fn frame(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let tick = session.tick(Instant::now());
        if tick.finished {
            info!(essay_id = session.essay_id(), "playback reached the end");
        }
        for &time in &tick.copies_crossed {
            self.notify(Notice::TextCopied { time });
        }
        self.publish();
    }

    fn schedule(&self, delay: Duration, message: Internal<S>) {
        let internal = self.internal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(message);
        });
    }

    fn notify(&self, notice: Notice) {
        if let Err(e) = self.notices.try_send(notice) {
            debug!(err = %e, "notice dropped");
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(
                epoch = pending.epoch,
                essay_id = pending.essay_id,
                "abandoning surface wait"
            );
            pending.task.abort();
            let _ = pending.reply.send(Err(ReplayError::Superseded));
        }
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(epoch = session.epoch(), essay_id = session.essay_id(), "session discarded");
            self.spare = Some(session.into_surface());
        }
    }

    fn build_view(&self) -> PlaybackView {
        let Some(session) = self.session.as_ref() else {
            return PlaybackView {
                epoch: self.epoch,
                essay_id: self.pending.as_ref().map(|p| p.essay_id),
                loading: self.pending.is_some(),
                speed: self.speed,
                ..Default::default()
            };
        };
        let now = Instant::now();
        PlaybackView {
            epoch: self.epoch,
            essay_id: Some(session.essay_id()),
            loading: false,
            loaded: true,
            playing: session.is_playing(),
            seeking: session.is_seeking(),
            speed: session.clock().speed(),
            current_time: session.clock().current(now),
            total_duration: session.timeline().total_duration,
            progress: session.clock().progress(now),
            messages: session.visible_messages().to_vec(),
            document: session.document(),
        }
    }

    fn publish(&self) {
        let next = self.build_view();
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
