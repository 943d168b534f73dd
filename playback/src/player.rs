//! Minimal structured-edit player.
//!
//! An `EditPlayer` holds a registered operation stream and an internal timer,
//! and writes every operation whose start time has been reached into a
//! `DocumentSurface`. It never rewinds: once applied, an operation stays
//! applied, so moving backward means building a fresh player on a new base.

use crate::batch::{EditOperation, TextChange};
use crate::surface::DocumentSurface;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerOptions {
    pub autoplay: bool,
    pub speed: f64,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            autoplay: false,
            speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Play,
    Pause,
}

pub trait EditPlayer {
    fn create(options: PlayerOptions) -> Self
    where
        Self: Sized;

    /// Register a JSON array of operations. Returns how many were added.
    fn add_operations(&mut self, json: &str) -> serde_json::Result<usize>;

    fn play(&mut self);
    fn pause(&mut self);

    /// Move the internal timer, clamped to `[0, duration]`.
    fn seek(&mut self, ms: f64);

    fn current_time_ms(&self) -> f64;
    fn duration_ms(&self) -> f64;
    fn status(&self) -> PlayerStatus;
    fn set_speed(&mut self, speed: f64);

    /// Overwrite the elapsed-time bookkeeping without applying anything,
    /// so the timer reads `ms` plus whatever elapses afterwards.
    fn prime_elapsed(&mut self, ms: f64);

    /// Write every due, not-yet-applied operation into `surface`.
    fn apply_due(&mut self, surface: &mut dyn DocumentSurface) -> usize;
}

#[derive(Debug)]
pub struct OperationPlayer {
    operations: Vec<EditOperation>,
    next: usize,
    speed: f64,
    status: PlayerStatus,
    elapsed_ms: f64,
    resumed_at: Option<Instant>,
}

impl OperationPlayer {
    fn running_ms(&self) -> f64 {
        match self.resumed_at {
            Some(at) => at.elapsed().as_secs_f64() * 1000.0 * self.speed,
            None => 0.0,
        }
    }

    /// Fold running time into `elapsed_ms` and restart the timer from now.
    fn checkpoint(&mut self) {
        self.elapsed_ms += self.running_ms();
        if self.resumed_at.is_some() {
            self.resumed_at = Some(Instant::now());
        }
    }

    pub fn pending(&self) -> usize {
        self.operations.len() - self.next
    }
}

impl EditPlayer for OperationPlayer {
    fn create(options: PlayerOptions) -> Self {
        let mut player = Self {
            operations: Vec::new(),
            next: 0,
            speed: sanitize_speed(options.speed),
            status: PlayerStatus::Pause,
            elapsed_ms: 0.0,
            resumed_at: None,
        };
        if options.autoplay {
            player.play();
        }
        player
    }

    fn add_operations(&mut self, json: &str) -> serde_json::Result<usize> {
        let mut added: Vec<EditOperation> = serde_json::from_str(json)?;
        let count = added.len();
        self.operations.append(&mut added);
        // Stable, and only the unapplied tail may move.
        self.operations[self.next..]
            .sort_by(|a, b| a.time.start_ms().total_cmp(&b.time.start_ms()));
        Ok(count)
    }

    fn play(&mut self) {
        if self.status == PlayerStatus::Play {
            return;
        }
        self.status = PlayerStatus::Play;
        self.resumed_at = Some(Instant::now());
    }

    fn pause(&mut self) {
        if self.status == PlayerStatus::Pause {
            return;
        }
        self.elapsed_ms += self.running_ms();
        self.resumed_at = None;
        self.status = PlayerStatus::Pause;
    }

    fn seek(&mut self, ms: f64) {
        self.prime_elapsed(ms.clamp(0.0, self.duration_ms()));
    }

    fn current_time_ms(&self) -> f64 {
        self.elapsed_ms + self.running_ms()
    }

    fn duration_ms(&self) -> f64 {
        self.operations
            .iter()
            .map(|op| op.time.end_ms())
            .fold(0.0, f64::max)
    }

    fn status(&self) -> PlayerStatus {
        self.status
    }

    fn set_speed(&mut self, speed: f64) {
        self.checkpoint();
        self.speed = sanitize_speed(speed);
    }

    fn prime_elapsed(&mut self, ms: f64) {
        self.elapsed_ms = ms.max(0.0);
        if self.resumed_at.is_some() {
            self.resumed_at = Some(Instant::now());
        }
    }

    fn apply_due(&mut self, surface: &mut dyn DocumentSurface) -> usize {
        let now_ms = self.current_time_ms();
        let due = self.operations[self.next..]
            .iter()
            .take_while(|op| op.time.start_ms() <= now_ms)
            .count();
        if due == 0 {
            return 0;
        }

        let mut text = surface.get_value();
        for op in &self.operations[self.next..self.next + due] {
            for change in &op.changes {
                apply_change(&mut text, change);
            }
        }
        surface.set_value(&text);
        self.next += due;
        due
    }
}

fn sanitize_speed(speed: f64) -> f64 {
    if speed.is_finite() && speed > 0.0 {
        speed
    } else {
        1.0
    }
}

/// Remove then insert at a character offset. Offsets past the end clamp to it.
pub fn apply_change(text: &mut String, change: &TextChange) {
    let start = byte_offset(text, change.index.offset());
    if let Some(removed) = &change.removed {
        let tail = &text[start..];
        let end = start + byte_offset(tail, removed.char_count());
        text.replace_range(start..end, "");
    }
    if let Some(added) = &change.added {
        text.insert_str(start, &added.joined());
    }
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}
