//! Forward-only playback for cores that cannot serialize

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::clock::{PlaybackClock, TickHandler, TickOutcome};
use crate::emulator::GameCore;

use super::Playback;

struct FrameRunner {
    core: Mutex<Box<dyn GameCore>>,
}

impl TickHandler for FrameRunner {
    fn on_forward_tick(&self) -> TickOutcome {
        self.core
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .run_frame();
        TickOutcome::Continue
    }

    fn on_rewind_tick(&self) -> TickOutcome {
        TickOutcome::Pause
    }
}

/// Playback without history
///
/// Frames only run forward. There is no timeline, so time queries report 0,
/// seeks do nothing, negative speeds pause and savestates are unavailable.
pub struct RealtimePlayback {
    clock: PlaybackClock,
}

impl RealtimePlayback {
    pub fn new(core: Box<dyn GameCore>) -> Self {
        let fps = core.frame_rate();
        let runner = Arc::new(FrameRunner {
            core: Mutex::new(core),
        });
        Self {
            clock: PlaybackClock::new(runner, fps),
        }
    }

    /// Effective clock ticks per second
    pub fn tick_rate(&self) -> f64 {
        self.clock.tick_rate()
    }
}

impl Playback for RealtimePlayback {
    fn initialize(&mut self) {
        self.clock.start();
    }

    fn deinitialize(&mut self) {
        self.clock.stop();
    }

    fn seek_time_ms(&self, time_ms: u64) {
        debug!(time_ms, "seek ignored, no history");
    }

    fn time_ms(&self) -> u64 {
        0
    }

    fn total_time_ms(&self) -> u64 {
        0
    }

    fn cache_time_ms(&self) -> u64 {
        0
    }

    fn speed(&self) -> f64 {
        self.clock.speed()
    }

    fn set_speed(&self, speed: f64) {
        if speed < 0.0 {
            debug!(speed, "cannot rewind without history, pausing");
            self.clock.set_speed(0.0);
        } else {
            self.clock.set_speed(speed);
        }
    }

    fn pause_async(&self) {
        self.clock.pause_async();
    }

    fn create_savestate(&self) -> Option<PathBuf> {
        warn!("core does not support savestates");
        None
    }

    fn load_savestate(&self, path: &Path) -> bool {
        warn!(path = %path.display(), "core does not support savestates");
        false
    }

    fn can_seek(&self) -> bool {
        false
    }
}
