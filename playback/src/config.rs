use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Default asset paths ─────────────────────────────────────────────────

/// Event log, relative to the working directory.
const DEFAULT_REPLAY_CSV: &str = "public/data/replay_data_fixed.csv";

/// Per-participant demographics and aggregate statistics.
const DEFAULT_PART_INFO_CSV: &str = "public/data/part_info.csv";

const DEFAULT_PARTICIPANT_COUNT: usize = 77;

// ── Timeline thresholds ─────────────────────────────────────────────────

const DEFAULT_TYPING_GAP_SECS: f64 = 20.0;
const DEFAULT_IDLE_THRESHOLD_SECS: f64 = 60.0;
const DEFAULT_DENSITY_BUCKETS: usize = 100;

// ── Playback timing (milliseconds) ──────────────────────────────────────

const DEFAULT_SURFACE_POLL_MS: u64 = 200;
const DEFAULT_SURFACE_POLL_ATTEMPTS: u32 = 20;
const DEFAULT_FRAME_MS: u64 = 16;
const DEFAULT_SEEK_SETTLE_MS: u64 = 200;
const DEFAULT_SEEK_COOLDOWN_MS: u64 = 300;

const DEFAULT_DASHBOARD_BIND: &str = "127.0.0.1:3000";

/// Speed multipliers offered by the speed selector.
pub const SPEED_CHOICES: [f64; 8] = [0.1, 0.5, 1.0, 1.5, 2.0, 3.0, 10.0, 100.0];
pub const DEFAULT_SPEED: f64 = 1.0;

/// Document shown before any operation has been applied.
pub const BLANK_DOCUMENT: &str = "\n\n\n\n";

// ── Config structs ──────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct TimelineParams {
    pub typing_gap_secs: f64,
    pub idle_threshold_secs: f64,
    pub density_buckets: usize,
}

impl Default for TimelineParams {
    fn default() -> Self {
        Self {
            typing_gap_secs: DEFAULT_TYPING_GAP_SECS,
            idle_threshold_secs: DEFAULT_IDLE_THRESHOLD_SECS,
            density_buckets: DEFAULT_DENSITY_BUCKETS,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimingParams {
    pub surface_poll_interval: Duration,
    pub surface_poll_attempts: u32,
    pub frame_interval: Duration,
    pub seek_settle: Duration,
    pub seek_cooldown: Duration,
}

impl TimingParams {
    /// Upper bound on how long a session load waits for the editor surface.
    pub fn surface_deadline(&self) -> Duration {
        self.surface_poll_interval * self.surface_poll_attempts
    }
}

impl Default for TimingParams {
    fn default() -> Self {
        Self {
            surface_poll_interval: Duration::from_millis(DEFAULT_SURFACE_POLL_MS),
            surface_poll_attempts: DEFAULT_SURFACE_POLL_ATTEMPTS,
            frame_interval: Duration::from_millis(DEFAULT_FRAME_MS),
            seek_settle: Duration::from_millis(DEFAULT_SEEK_SETTLE_MS),
            seek_cooldown: Duration::from_millis(DEFAULT_SEEK_COOLDOWN_MS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReplayConfig {
    pub replay_csv: PathBuf,
    pub participant_csv: PathBuf,
    pub participant_count: usize,
    pub timeline: TimelineParams,
    pub timing: TimingParams,
    pub dashboard_bind: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            replay_csv: PathBuf::from(DEFAULT_REPLAY_CSV),
            participant_csv: PathBuf::from(DEFAULT_PART_INFO_CSV),
            participant_count: DEFAULT_PARTICIPANT_COUNT,
            timeline: TimelineParams::default(),
            timing: TimingParams::default(),
            dashboard_bind: DEFAULT_DASHBOARD_BIND.to_string(),
        }
    }
}

impl ReplayConfig {
    pub fn from_env() -> Self {
        let home = dirs::home_dir();
        let home = home.as_deref();
        let defaults = Self::default();

        Self {
            replay_csv: env_path("REPLAY_DATA_CSV", defaults.replay_csv, home),
            participant_csv: env_path("REPLAY_PART_INFO_CSV", defaults.participant_csv, home),
            participant_count: env_usize("REPLAY_PARTICIPANT_COUNT", defaults.participant_count),
            timeline: TimelineParams {
                typing_gap_secs: env_f64("REPLAY_TYPING_GAP_SECS", DEFAULT_TYPING_GAP_SECS),
                idle_threshold_secs: env_f64(
                    "REPLAY_IDLE_THRESHOLD_SECS",
                    DEFAULT_IDLE_THRESHOLD_SECS,
                ),
                density_buckets: env_usize("REPLAY_DENSITY_BUCKETS", DEFAULT_DENSITY_BUCKETS)
                    .max(1),
            },
            timing: TimingParams {
                surface_poll_interval: env_millis(
                    "REPLAY_SURFACE_POLL_MS",
                    DEFAULT_SURFACE_POLL_MS,
                ),
                surface_poll_attempts: env_u64(
                    "REPLAY_SURFACE_POLL_ATTEMPTS",
                    u64::from(DEFAULT_SURFACE_POLL_ATTEMPTS),
                )
                .try_into()
                .unwrap_or(DEFAULT_SURFACE_POLL_ATTEMPTS),
                frame_interval: env_millis("REPLAY_FRAME_MS", DEFAULT_FRAME_MS),
                seek_settle: env_millis("REPLAY_SEEK_SETTLE_MS", DEFAULT_SEEK_SETTLE_MS),
                seek_cooldown: env_millis("REPLAY_SEEK_COOLDOWN_MS", DEFAULT_SEEK_COOLDOWN_MS),
            },
            dashboard_bind: env::var("REPLAY_DASHBOARD_BIND")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.dashboard_bind),
        }
    }
}

fn env_path(key: &str, default: PathBuf, home: Option<&Path>) -> PathBuf {
    match env::var(key) {
        Ok(val) if !val.trim().is_empty() => expand_tilde(&val, home),
        _ => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(default),
        Err(_) => default,
    }
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_u64(key, default))
}

fn expand_tilde(input: &str, home: Option<&Path>) -> PathBuf {
    match (input.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = ReplayConfig::default();
        assert_eq!(config.timeline.typing_gap_secs, 20.0);
        assert_eq!(config.timeline.idle_threshold_secs, 60.0);
        assert_eq!(config.timeline.density_buckets, 100);
        assert_eq!(config.timing.surface_deadline(), Duration::from_secs(4));
    }

    #[test]
    fn tilde_expands_against_home() {
        let home = Path::new("/home/reader");
        assert_eq!(
            expand_tilde("~/data/replay.csv", Some(home)),
            PathBuf::from("/home/reader/data/replay.csv")
        );
        assert_eq!(
            expand_tilde("data/replay.csv", Some(home)),
            PathBuf::from("data/replay.csv")
        );
    }
}
