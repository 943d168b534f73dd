//! Document replay controller: owns the editor surface and at most one live
//! edit-player instance bound to it.

use crate::batch::ReplayOperationBatch;
use crate::error::Result;
use crate::player::{EditPlayer, OperationPlayer, PlayerOptions, PlayerStatus};
use crate::surface::DocumentSurface;
use tracing::debug;

/// Engine/clock disagreement tolerated before the engine timer is re-primed.
const DRIFT_TOLERANCE_MS: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Loaded,
    Playing,
    Paused,
    Discarded,
}

pub struct ReplayController<S, P = OperationPlayer> {
    surface: S,
    engine: Option<P>,
    state: ControllerState,
    speed: f64,
}

impl<S: DocumentSurface, P: EditPlayer> ReplayController<S, P> {
    pub fn new(surface: S, speed: f64) -> Self {
        Self {
            surface,
            engine: None,
            state: ControllerState::Uninitialized,
            speed,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Build a fresh engine for `batch`, paused, with its timer reading `start_offset_ms`.
    pub fn load(&mut self, batch: &ReplayOperationBatch, start_offset_ms: f64) -> Result<usize> {
        self.discard();

        let mut engine = P::create(PlayerOptions {
            autoplay: false,
            speed: self.speed,
        });
        let registered = engine.add_operations(&batch.to_json()?)?;
        engine.prime_elapsed(start_offset_ms);

        debug!(registered, start_offset_ms, "replay engine loaded");
        self.engine = Some(engine);
        self.state = ControllerState::Loaded;
        Ok(registered)
    }

    /// Start the engine with its timer aligned to the clock.
    pub fn play(&mut self, clock_ms: f64) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if engine.status() == PlayerStatus::Play {
            return;
        }
        engine.prime_elapsed(clock_ms);
        engine.play();
        self.state = ControllerState::Playing;
    }

    pub fn pause(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if engine.status() == PlayerStatus::Pause {
            return;
        }
        engine.pause();
        self.state = ControllerState::Paused;
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
        if let Some(engine) = self.engine.as_mut() {
            engine.set_speed(speed);
        }
    }

    /// Tear the engine down. Nothing it registered can touch the surface afterwards.
    pub fn discard(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.pause();
            self.state = ControllerState::Discarded;
        }
    }

    pub fn current_time_ms(&self) -> Option<f64> {
        self.engine.as_ref().map(|e| e.current_time_ms())
    }

    /// Apply whatever the engine has reached since the last call, pulling its
    /// timer back in line with the clock first if the two have drifted apart.
    pub fn advance(&mut self, clock_ms: f64) -> usize {
        let Some(engine) = self.engine.as_mut() else {
            return 0;
        };
        let drift = engine.current_time_ms() - clock_ms;
        if drift.abs() > DRIFT_TOLERANCE_MS {
            debug!(drift, clock_ms, "re-priming replay engine timer");
            engine.prime_elapsed(clock_ms);
        }
        engine.apply_due(&mut self.surface)
    }

    /// Run the engine to the end of its stream.
    pub fn finish(&mut self) -> usize {
        let Some(engine) = self.engine.as_mut() else {
            return 0;
        };
        let end = engine.duration_ms();
        engine.prime_elapsed(end.max(engine.current_time_ms()));
        engine.apply_due(&mut self.surface)
    }

    pub fn set_base(&mut self, text: &str) {
        self.surface.set_value(text);
    }

    pub fn document(&self) -> String {
        self.surface.get_value()
    }

    pub fn into_surface(mut self) -> S {
        self.discard();
        self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::build_batch;
    use crate::surface::TextSurface;
    use crate::types::{Locus, RawEventRow};
    use std::time::Duration;

    fn batch() -> ReplayOperationBatch {
        let rows: Vec<RawEventRow> = [
            (0.0, "{'t': 0, 'o': [{'i': 0, 'a': 'a'}]}"),
            (2.0, "{'t': 2000, 'o': [{'i': 1, 'a': 'b'}]}"),
        ]
        .into_iter()
        .map(|(time, payload)| RawEventRow {
            idx: None,
            essay_id: 1,
            sequence_index: 0,
            timestamp: time,
            locus: Locus::Editor,
            op_type: "+input".to_string(),
            editor_snapshot: None,
            added_text: None,
            deleted_text: None,
            selected_text: None,
            cursor_location: None,
            operation_payload: Some(payload.to_string()),
        })
        .collect();
        build_batch(&rows, 0).0
    }

    fn new_controller() -> ReplayController<TextSurface> {
        ReplayController::new(TextSurface::new(), 1.0)
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_walks_the_states() {
        let mut controller = new_controller();
        assert_eq!(controller.state(), ControllerState::Uninitialized);

        // No engine yet: controls are inert.
        controller.play(0.0);
        assert_eq!(controller.state(), ControllerState::Uninitialized);

        assert_eq!(controller.load(&batch(), 0.0).unwrap(), 2);
        assert_eq!(controller.state(), ControllerState::Loaded);

        controller.play(0.0);
        controller.play(0.0);
        assert_eq!(controller.state(), ControllerState::Playing);
        tokio::time::advance(Duration::from_millis(2500)).await;
        assert_eq!(controller.advance(2500.0), 2);
        assert_eq!(controller.document(), "ab");

        controller.pause();
        assert_eq!(controller.state(), ControllerState::Paused);

        controller.discard();
        assert_eq!(controller.state(), ControllerState::Discarded);
        assert_eq!(controller.current_time_ms(), None);
        assert_eq!(controller.advance(0.0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn load_primes_the_engine_timer() {
        let mut controller = new_controller();
        controller.load(&batch(), 1500.0).unwrap();
        assert_eq!(controller.current_time_ms(), Some(1500.0));
        assert_eq!(controller.advance(1500.0), 1);
        assert_eq!(controller.document(), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn drifted_engine_follows_the_clock() {
        let mut controller = new_controller();
        controller.load(&batch(), 0.0).unwrap();
        assert_eq!(controller.advance(2000.0), 2);
        assert_eq!(controller.current_time_ms(), Some(2000.0));

        controller.load(&batch(), 0.0).unwrap();
        controller.set_base("");
        assert_eq!(controller.finish(), 2);
        assert_eq!(controller.document(), "ab");
    }

    #[tokio::test(start_paused = true)]
    async fn play_reconciles_engine_with_clock_and_speed_is_live() {
        let mut controller = new_controller();
        controller.load(&batch(), 0.0).unwrap();
        controller.play(1000.0);
        controller.set_speed(2.0);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(controller.current_time_ms(), Some(2000.0));
    }
}
