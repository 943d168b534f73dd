//! Editor surfaces and their asynchronous readiness.

use crate::config::TimingParams;
use crate::error::{ReplayError, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::warn;

/// The rendering surface the replay engine writes into.
pub trait DocumentSurface {
    fn set_value(&mut self, text: &str);
    fn get_value(&self) -> String;
}

/// In-memory surface used by headless playback and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextSurface {
    text: String,
}

impl TextSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl DocumentSurface for TextSurface {
    fn set_value(&mut self, text: &str) {
        self.text.clear();
        self.text.push_str(text);
    }

    fn get_value(&self) -> String {
        self.text.clone()
    }
}

struct Shared<S> {
    surface: Mutex<Option<S>>,
    ready: watch::Sender<bool>,
}

impl<S> Shared<S> {
    fn take(&self) -> Option<S> {
        let taken = self
            .surface
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if taken.is_some() {
            self.ready.send_replace(false);
        }
        taken
    }
}

/// Producer side: whoever owns the widget mounts it here once it exists.
pub struct SurfaceMount<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for SurfaceMount<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S> SurfaceMount<S> {
    pub fn mount(&self, surface: S) {
        *self
            .shared
            .surface
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(surface);
        self.shared.ready.send_replace(true);
    }
}

/// Consumer side: waits for a mounted surface and takes exclusive ownership of it.
pub struct SurfaceSlot<S> {
    shared: Arc<Shared<S>>,
    ready: watch::Receiver<bool>,
}

impl<S> Clone for SurfaceSlot<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            ready: self.ready.clone(),
        }
    }
}

pub fn surface_slot<S>() -> (SurfaceMount<S>, SurfaceSlot<S>) {
    let (ready, rx) = watch::channel(false);
    let shared = Arc::new(Shared {
        surface: Mutex::new(None),
        ready,
    });
    (
        SurfaceMount {
            shared: shared.clone(),
        },
        SurfaceSlot { shared, ready: rx },
    )
}

impl<S> SurfaceSlot<S> {
    /// Wait until a surface is mounted, for at most `attempts × interval`.
    ///
    /// Dropping the future cancels the wait and leaves any mounted surface in place.
    pub async fn wait_ready(&mut self, timing: &TimingParams) -> Result<S> {
        let shared = self.shared.clone();
        let ready = &mut self.ready;
        let wait = async move {
            loop {
                if ready.wait_for(|mounted| *mounted).await.is_err() {
                    return None;
                }
                if let Some(surface) = shared.take() {
                    return Some(surface);
                }
                if ready.changed().await.is_err() {
                    return None;
                }
            }
        };

        match tokio::time::timeout(timing.surface_deadline(), wait).await {
            Ok(Some(surface)) => Ok(surface),
            _ => {
                let interval_ms = timing.surface_poll_interval.as_millis() as u64;
                warn!(
                    attempts = timing.surface_poll_attempts,
                    interval_ms, "editor surface never became ready"
                );
                Err(ReplayError::EditorInitTimeout {
                    attempts: timing.surface_poll_attempts,
                    interval_ms,
                })
            }
        }
    }
}
