use crate::timeline::progress_percent;
use tokio::time::Instant;

/// Logical session time in seconds. The single source of truth for "now" in a
/// replay; callers pass the instant they sampled so every read in one frame agrees.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    position_secs: f64,
    anchor: Option<Instant>,
    speed: f64,
    total_secs: f64,
}

impl PlaybackClock {
    pub fn new(total_secs: f64, speed: f64) -> Self {
        Self {
            position_secs: 0.0,
            anchor: None,
            speed,
            total_secs: total_secs.max(0.0),
        }
    }

    pub fn current(&self, now: Instant) -> f64 {
        let running = match self.anchor {
            Some(anchor) => now.saturating_duration_since(anchor).as_secs_f64() * self.speed,
            None => 0.0,
        };
        (self.position_secs + running).min(self.total_secs)
    }

    pub fn progress(&self, now: Instant) -> f64 {
        progress_percent(self.current(now), self.total_secs)
    }

    pub fn is_playing(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        self.current(now) >= self.total_secs
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn total_secs(&self) -> f64 {
        self.total_secs
    }

    pub fn play(&mut self, now: Instant) {
        if self.anchor.is_none() {
            self.anchor = Some(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.anchor.is_some() {
            self.position_secs = self.current(now);
            self.anchor = None;
        }
    }

    pub fn set_speed(&mut self, speed: f64, now: Instant) {
        self.rebase(now);
        self.speed = speed;
    }

    /// Jump to `secs`, keeping the play/pause state.
    pub fn seek(&mut self, secs: f64, now: Instant) {
        self.position_secs = secs.clamp(0.0, self.total_secs);
        if self.anchor.is_some() {
            self.anchor = Some(now);
        }
    }

    fn rebase(&mut self, now: Instant) {
        if self.anchor.is_some() {
            self.position_secs = self.current(now);
            self.anchor = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn frozen_until_played() {
        let start = Instant::now();
        let clock = PlaybackClock::new(100.0, 1.0);
        assert_eq!(clock.current(start + Duration::from_secs(30)), 0.0);
    }

    #[test]
    fn advances_scaled_by_speed_and_clamps() {
        let start = Instant::now();
        let mut clock = PlaybackClock::new(100.0, 1.0);
        clock.play(start);
        assert_eq!(clock.current(start + Duration::from_secs(10)), 10.0);

        clock.set_speed(3.0, start + Duration::from_secs(10));
        assert_eq!(clock.current(start + Duration::from_secs(20)), 40.0);
        assert_eq!(clock.progress(start + Duration::from_secs(20)), 40.0);
        assert_eq!(clock.current(start + Duration::from_secs(200)), 100.0);
        assert!(clock.is_finished(start + Duration::from_secs(200)));
    }

    #[test]
    fn reads_are_idempotent() {
        let start = Instant::now();
        let mut clock = PlaybackClock::new(100.0, 1.5);
        clock.play(start);
        let t = start + Duration::from_millis(1234);
        assert_eq!(clock.current(t), clock.current(t));
    }

    #[test]
    fn seek_keeps_play_state() {
        let start = Instant::now();
        let mut clock = PlaybackClock::new(100.0, 1.0);
        clock.seek(50.0, start);
        assert!(!clock.is_playing());
        assert_eq!(clock.current(start + Duration::from_secs(5)), 50.0);

        clock.play(start);
        clock.seek(20.0, start + Duration::from_secs(5));
        assert_eq!(clock.current(start + Duration::from_secs(6)), 21.0);

        clock.pause(start + Duration::from_secs(6));
        assert_eq!(clock.current(start + Duration::from_secs(60)), 21.0);
    }

    #[test]
    fn zero_duration_session_has_zero_progress() {
        let start = Instant::now();
        let mut clock = PlaybackClock::new(0.0, 1.0);
        clock.play(start);
        assert_eq!(clock.progress(start + Duration::from_secs(3)), 0.0);
    }
}
