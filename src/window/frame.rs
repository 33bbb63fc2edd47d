//! Frame callback pacing

use std::time::Duration;

/// Tracks the single outstanding `wl_surface.frame` callback of a window
#[derive(Debug, Default, Clone)]
pub struct FramePacer {
    pending: bool,
    last_time: Option<u32>,
}

impl FramePacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Returns true when the caller must issue a frame request
    pub fn request(&mut self) -> bool {
        if self.pending {
            return false;
        }
        self.pending = true;
        true
    }

    /// Handles a callback's `done`; returns the time since the previous one
    pub fn done(&mut self, time_ms: u32) -> Duration {
        self.pending = false;
        let delta = self
            .last_time
            .map(|last| time_ms.wrapping_sub(last))
            .unwrap_or(0);
        self.last_time = Some(time_ms);
        Duration::from_millis(delta as u64)
    }

    /// Forgets an outstanding callback, e.g. when the surface is torn down
    pub fn reset(&mut self) {
        self.pending = false;
    }
}
