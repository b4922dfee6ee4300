//! Integration tests for the playback engine
//!
//! Tests rewind buffer behavior, seeking, settings changes during a session,
//! clock-driven playback and savestate persistence through the file gateway.

#[cfg(test)]
mod playback_tests;

#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crate::playback::ReversiblePlayback;
    use crate::savestate::SavestateGateway;
    use crate::settings::{GameSettings, PlaybackConfig};
    use crate::test_utils::{CoreProbe, MockCore, MockGateway};

    /// Reversible playback over a 16-byte mock core at `fps`
    pub fn new_test_playback(
        fps: f64,
    ) -> (
        ReversiblePlayback,
        Arc<CoreProbe>,
        Arc<GameSettings>,
        Arc<MockGateway>,
    ) {
        let gateway = MockGateway::new();
        let (playback, probe, settings) = new_playback_with_gateway(fps, gateway.clone());
        (playback, probe, settings, gateway)
    }

    pub fn new_playback_with_gateway(
        fps: f64,
        gateway: Arc<dyn SavestateGateway>,
    ) -> (ReversiblePlayback, Arc<CoreProbe>, Arc<GameSettings>) {
        let core = MockCore::new(16, fps);
        let probe = core.probe();
        let settings = Arc::new(GameSettings::new(PlaybackConfig::default()));
        let playback = ReversiblePlayback::new(Box::new(core), settings.clone(), gateway);
        (playback, probe, settings)
    }

    /// Run `frames` forward ticks without the clock thread
    pub fn play_frames(playback: &ReversiblePlayback, frames: u64) {
        let handler = playback.tick_handler();
        for _ in 0..frames {
            handler.on_forward_tick();
        }
    }

    /// Run `frames` rewind ticks without the clock thread
    pub fn rewind_ticks(playback: &ReversiblePlayback, frames: u64) {
        let handler = playback.tick_handler();
        for _ in 0..frames {
            handler.on_rewind_tick();
        }
    }

    /// Poll `condition` until it holds or five seconds pass
    pub fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }
}
