//! Host-facing playback engines
//!
//! [`create_playback`] picks the engine for a core: [`ReversiblePlayback`]
//! when the core can serialize its state, [`RealtimePlayback`] otherwise.

mod realtime;
mod reversible;
mod stats;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::emulator::GameCore;
use crate::savestate::SavestateGateway;
use crate::settings::GameSettings;

pub use realtime::RealtimePlayback;
pub use reversible::{RewindErrorAction, RewindErrorPolicy, ReversiblePlayback};
pub use stats::{PlaybackStats, frames_to_ms, ms_to_frames};

/// Rewind runs at a quarter of gameplay speed
pub const REWIND_FACTOR: f64 = 0.25;

/// Playback engine driven by the host player
///
/// Times are in milliseconds within the rewind window. Every method is
/// infallible from the host's point of view: failures are logged and reported
/// as `None`/`false`, out-of-range seeks are clamped.
pub trait Playback: Send {
    /// Start the playback clock
    fn initialize(&mut self);

    /// Stop the playback clock
    fn deinitialize(&mut self);

    /// Seek to `time_ms`, clamped to the buffered window
    fn seek_time_ms(&self, time_ms: u64);

    /// Current position
    fn time_ms(&self) -> u64;

    /// Length of the rewind window
    fn total_time_ms(&self) -> u64;

    /// Buffered time ahead of the current position
    fn cache_time_ms(&self) -> u64;

    /// Signed speed as set by the host (negative rewinds)
    fn speed(&self) -> f64;

    fn set_speed(&self, speed: f64);

    /// Request a pause without waiting for the current frame
    fn pause_async(&self);

    /// Persist the current state, returning the savestate path
    fn create_savestate(&self) -> Option<PathBuf>;

    /// Restore the state saved at `path`
    fn load_savestate(&self, path: &Path) -> bool;

    /// Whether seeking and rewinding are possible
    fn can_seek(&self) -> bool;
}

/// Create the playback engine for `core`
pub fn create_playback(
    core: Box<dyn GameCore>,
    settings: Arc<GameSettings>,
    gateway: Arc<dyn SavestateGateway>,
) -> Box<dyn Playback> {
    if core.supports_serialization() {
        Box::new(ReversiblePlayback::new(core, settings, gateway))
    } else {
        info!("core cannot serialize, using realtime playback");
        Box::new(RealtimePlayback::new(core))
    }
}
