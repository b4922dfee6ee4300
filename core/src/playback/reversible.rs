//! Reversible playback
//!
//! Runs the core from the playback clock and records every frame into the
//! rewind buffer, so the host can rewind, seek within the buffered window and
//! replay frames it has rewound past.
//!
//! # Locking
//!
//! Two locks guard the controller: one for the core, one for the history and
//! statistics. The history lock is never held while calling into the core.
//! Work that needs both checks the history out of its [`HistorySlot`], drops
//! the history lock, talks to the core, and checks the history back in
//! through a [`HistoryLease`]. Lock order is always core, then history.
//!
//! Savestate I/O holds neither lock. Ticks that land meanwhile run the core
//! but find the history checked out and do not record.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, info, trace, warn};

use crate::clock::{ClockState, PlaybackClock, TickHandler, TickOutcome};
use crate::emulator::GameCore;
use crate::error::PlaybackError;
use crate::history::{BasicFrameHistory, FrameHistory, HistorySlot, rewind_capacity};
use crate::savestate::{SavestateGateway, SavestateTransaction};
use crate::settings::{GameSettings, ObserverId, SettingsEvent};

use super::{Playback, PlaybackStats, REWIND_FACTOR, ms_to_frames};

/// How to proceed when a rewound frame cannot be restored into the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewindErrorAction {
    /// Run the frame anyway
    #[default]
    Continue,
    /// Skip running a frame this tick
    SkipFrame,
    /// Pause playback
    Pause,
}

/// Host hook deciding what a failed rewind step does
pub trait RewindErrorPolicy: Send + Sync {
    fn on_rewind_error(&self, error: &PlaybackError) -> RewindErrorAction;
}

impl<F> RewindErrorPolicy for F
where
    F: Fn(&PlaybackError) -> RewindErrorAction + Send + Sync,
{
    fn on_rewind_error(&self, error: &PlaybackError) -> RewindErrorAction {
        self(error)
    }
}

struct PlaybackState {
    history: HistorySlot,
    stats: PlaybackStats,
    /// Frames played this session, moved back by rewinds
    total_frame_count: u64,
}

impl PlaybackState {
    fn refresh_stats(&mut self, fps: f64) {
        self.stats = match self.history.get() {
            Some(store) => PlaybackStats::from_history(store, fps),
            None => PlaybackStats::default(),
        };
    }
}

/// State shared between the host, the clock thread and settings observers
struct Controller {
    core: Mutex<Box<dyn GameCore>>,
    state: Mutex<PlaybackState>,
    settings: Arc<GameSettings>,
    rewind_policy: RwLock<Option<Arc<dyn RewindErrorPolicy>>>,
    fps: f64,
    frame_size: usize,
    /// Set once teardown starts; settings changes are ignored afterwards
    closed: AtomicBool,
}

/// History checked out of the slot for work outside the history lock
///
/// Checked back in on drop if [`finish`](Self::finish) is not called.
struct HistoryLease<'a> {
    controller: &'a Controller,
    store: Option<Box<dyn FrameHistory>>,
}

impl HistoryLease<'_> {
    /// The checked-out store, or `None` if history is off or in use elsewhere
    fn store(&mut self) -> Option<&mut (dyn FrameHistory + 'static)> {
        self.store.as_deref_mut()
    }

    /// Check the store back in and apply `update` under the same lock
    fn finish(mut self, update: impl FnOnce(&mut PlaybackState)) {
        self.release(update);
    }

    fn release(&mut self, update: impl FnOnce(&mut PlaybackState)) {
        let mut state = self.controller.lock_state();
        if let Some(store) = self.store.take() {
            if let Err(e) = state.history.check_in(store) {
                warn!(error = %e, "rewind unavailable, frame history could not be resized");
            }
            state.refresh_stats(self.controller.fps);
        }
        update(&mut state);
    }
}

impl Drop for HistoryLease<'_> {
    fn drop(&mut self) {
        if self.store.is_some() {
            self.release(|_| {});
        }
    }
}

impl Controller {
    fn lock_core(&self) -> MutexGuard<'_, Box<dyn GameCore>> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_out(&self) -> HistoryLease<'_> {
        self.check_out_counted().0
    }

    /// Check the history out along with the frame count it was taken at
    fn check_out_counted(&self) -> (HistoryLease<'_>, u64) {
        let mut state = self.lock_state();
        let lease = HistoryLease {
            controller: self,
            store: state.history.check_out(),
        };
        (lease, state.total_frame_count)
    }

    /// Reallocate, resize or drop the history to match the settings
    fn on_rewind_setting_changed(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let enabled = self.frame_size > 0 && self.settings.rewind_enabled();
        let target =
            enabled.then(|| rewind_capacity(self.settings.max_rewind_time_sec(), self.fps));

        let mut state = self.lock_state();
        // Teardown may have released the history since the check above
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = state.history.configure(target) {
            warn!(error = %e, "rewind unavailable");
        }
        // A checked-out store refreshes the stats when it comes back
        if !(state.history.is_checked_out() && state.history.is_enabled()) {
            state.refresh_stats(self.fps);
        }

        match state.history.get() {
            Some(store) => info!(
                frames = store.max_frame_count(),
                bytes = store.memory_usage(),
                "rewind buffer configured"
            ),
            None if target.is_none() => debug!("rewind buffer off"),
            None => {}
        }
    }

    fn rewind_frames(&self, core: &mut dyn GameCore, frames: u64) -> Result<(), PlaybackError> {
        let mut lease = self.check_out();
        let result = match lease.store() {
            Some(store) => {
                store.rewind_frames(frames);
                restore_current(core, store)
            }
            None => Ok(()),
        };
        lease.finish(|state| {
            state.total_frame_count -= state.total_frame_count.min(frames);
        });
        result
    }

    fn advance_frames(&self, core: &mut dyn GameCore, frames: u64) -> Result<(), PlaybackError> {
        let mut lease = self.check_out();
        let result = match lease.store() {
            Some(store) => {
                store.advance_frames(frames);
                restore_current(core, store)
            }
            None => Ok(()),
        };
        lease.finish(|state| state.total_frame_count += frames);
        result
    }

    fn rewind_error_action(&self, error: &PlaybackError) -> RewindErrorAction {
        let policy = self
            .rewind_policy
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        policy.map_or(RewindErrorAction::Continue, |policy| {
            policy.on_rewind_error(error)
        })
    }

    fn create_savestate(&self, gateway: &dyn SavestateGateway) -> Result<PathBuf, PlaybackError> {
        if self.frame_size == 0 {
            return Err(PlaybackError::SerializationUnsupported);
        }

        let game = self.lock_core().game_info();

        // Ticks landing while the store is out keep playing without recording
        let (mut lease, mut frames) = self.check_out_counted();
        let mut staging;
        let store: &mut (dyn FrameHistory + 'static) = match lease.store() {
            Some(store) => store,
            None => {
                staging = BasicFrameHistory::new(self.frame_size)?;
                &mut staging
            }
        };

        if store.current_frame().is_none() {
            let mut core = self.lock_core();
            frames = self.lock_state().total_frame_count;
            core.serialize(store.begin_frame())
                .map_err(PlaybackError::Serialize)?;
            store.submit_frame();
        }

        let mut transaction =
            SavestateTransaction::begin(gateway.create_writer(), &game, self.fps, frames)?;
        let frame = store.current_frame().ok_or(PlaybackError::NoFrame)?;
        transaction.write_save(frame)?;
        transaction.write_thumbnail();
        Ok(transaction.commit()?)
    }

    fn load_savestate(
        &self,
        gateway: &dyn SavestateGateway,
        path: &Path,
    ) -> Result<(), PlaybackError> {
        if self.frame_size == 0 {
            return Err(PlaybackError::SerializationUnsupported);
        }

        let game = self.lock_core().game_info();
        let mut reader = gateway.create_reader();
        reader.initialize(path, &game)?;

        let mut lease = self.check_out();
        let mut staging;
        let store: &mut (dyn FrameHistory + 'static) = match lease.store() {
            Some(store) => store,
            None => {
                staging = BasicFrameHistory::new(self.frame_size)?;
                &mut staging
            }
        };

        // Recorded only once the core has accepted it
        let frame = store.begin_frame();
        reader.read_save(frame)?;
        self.lock_core()
            .deserialize(frame)
            .map_err(PlaybackError::Deserialize)?;
        store.submit_frame();

        let frames = reader.frame_count();
        lease.finish(|state| state.total_frame_count = frames);
        Ok(())
    }
}

fn restore_current(core: &mut dyn GameCore, store: &dyn FrameHistory) -> Result<(), PlaybackError> {
    match store.current_frame() {
        Some(frame) => core.deserialize(frame).map_err(PlaybackError::Deserialize),
        None => Ok(()),
    }
}

impl TickHandler for Controller {
    fn on_forward_tick(&self) -> TickOutcome {
        let mut core = self.lock_core();
        core.run_frame();

        let mut lease = self.check_out();
        if let Some(store) = lease.store() {
            match core.serialize(store.begin_frame()) {
                Ok(()) => store.submit_frame(),
                Err(e) => debug!(error = %e, "serialize failed, frame not recorded"),
            }
        }
        // The frame was played even if it could not be recorded
        lease.finish(|state| state.total_frame_count += 1);

        trace!("forward tick");
        TickOutcome::Continue
    }

    fn on_rewind_tick(&self) -> TickOutcome {
        let mut core = self.lock_core();

        if let Err(e) = self.rewind_frames(&mut **core, 1) {
            match self.rewind_error_action(&e) {
                RewindErrorAction::Continue => {
                    warn!(error = %e, "rewind frame could not be restored");
                }
                RewindErrorAction::SkipFrame => {
                    debug!(error = %e, "skipping frame after failed rewind");
                    return TickOutcome::Continue;
                }
                RewindErrorAction::Pause => {
                    warn!(error = %e, "pausing after failed rewind");
                    return TickOutcome::Pause;
                }
            }
        }
        core.run_frame();

        trace!("rewind tick");
        TickOutcome::Continue
    }
}

/// Playback with a rewind buffer
///
/// Dropping the playback closes the controller to settings changes,
/// unregisters the observer, stops the clock, and then releases the rewind
/// buffer.
pub struct ReversiblePlayback {
    controller: Arc<Controller>,
    clock: PlaybackClock,
    gateway: Arc<dyn SavestateGateway>,
    observer: Option<ObserverId>,
}

impl ReversiblePlayback {
    pub fn new(
        core: Box<dyn GameCore>,
        settings: Arc<GameSettings>,
        gateway: Arc<dyn SavestateGateway>,
    ) -> Self {
        let fps = core.frame_rate();
        let fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            warn!(fps, "core reported an invalid frame rate, assuming 60");
            60.0
        };
        let frame_size = core.serialize_size();

        let controller = Arc::new(Controller {
            core: Mutex::new(core),
            state: Mutex::new(PlaybackState {
                history: HistorySlot::new(frame_size),
                stats: PlaybackStats::default(),
                total_frame_count: 0,
            }),
            settings: settings.clone(),
            rewind_policy: RwLock::new(None),
            fps,
            frame_size,
            closed: AtomicBool::new(false),
        });
        controller.on_rewind_setting_changed();

        let weak = Arc::downgrade(&controller);
        let observer = settings.register_observer(move |event| {
            if let Some(controller) = weak.upgrade() {
                match event {
                    SettingsEvent::Changed => controller.on_rewind_setting_changed(),
                }
            }
        });

        let clock = PlaybackClock::new(controller.clone(), fps);
        info!(fps, frame_size, "reversible playback created");

        Self {
            controller,
            clock,
            gateway,
            observer: Some(observer),
        }
    }

    /// Install the hook consulted when a rewound frame cannot be restored
    pub fn set_rewind_error_policy(&self, policy: impl RewindErrorPolicy + 'static) {
        *self
            .controller
            .rewind_policy
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(policy));
    }

    /// Snapshot of the playback statistics
    pub fn stats(&self) -> PlaybackStats {
        self.controller.lock_state().stats
    }

    /// Frames played this session, net of rewinds
    pub fn total_frame_count(&self) -> u64 {
        self.controller.lock_state().total_frame_count
    }

    /// Bytes held by the rewind buffer
    pub fn history_memory_usage(&self) -> usize {
        self.controller
            .lock_state()
            .history
            .get()
            .map_or(0, |store| store.memory_usage())
    }

    /// Whether a rewind buffer is configured
    pub fn rewind_enabled(&self) -> bool {
        self.controller.lock_state().history.is_enabled()
    }

    /// Effective clock ticks per second
    pub fn tick_rate(&self) -> f64 {
        self.clock.tick_rate()
    }

    pub fn clock_state(&self) -> ClockState {
        self.clock.state()
    }

    pub fn fps(&self) -> f64 {
        self.controller.fps
    }

    /// Tick the controller directly, bypassing the clock thread
    #[cfg(test)]
    pub(crate) fn tick_handler(&self) -> Arc<dyn TickHandler> {
        self.controller.clone()
    }

    fn seek_frames(&self, offset: i64) {
        let (past, future) = {
            let state = self.controller.lock_state();
            (state.stats.past_frames, state.stats.future_frames)
        };

        let frames = if offset > 0 {
            (offset as u64).min(future)
        } else {
            offset.unsigned_abs().min(past)
        };
        if frames == 0 {
            return;
        }

        self.clock.set_speed(0.0);
        {
            let mut core = self.controller.lock_core();
            let result = if offset > 0 {
                self.controller.advance_frames(&mut **core, frames)
            } else {
                self.controller.rewind_frames(&mut **core, frames)
            };
            if let Err(e) = result {
                warn!(error = %e, offset, "seek could not restore frame");
            }
        }
        self.clock.set_speed(1.0);
        debug!(offset, frames, "seek complete");
    }
}

impl Playback for ReversiblePlayback {
    fn initialize(&mut self) {
        self.clock.start();
    }

    fn deinitialize(&mut self) {
        self.clock.stop();
    }

    fn seek_time_ms(&self, time_ms: u64) {
        let current = self.time_ms();
        let target = i64::try_from(time_ms).unwrap_or(i64::MAX);
        let offset_ms = target.saturating_sub(current as i64);
        self.seek_frames(ms_to_frames(offset_ms, self.controller.fps));
    }

    fn time_ms(&self) -> u64 {
        self.controller.lock_state().stats.played_ms
    }

    fn total_time_ms(&self) -> u64 {
        self.controller.lock_state().stats.total_ms
    }

    fn cache_time_ms(&self) -> u64 {
        self.controller.lock_state().stats.cached_ms
    }

    fn speed(&self) -> f64 {
        let speed = self.clock.speed();
        if speed < 0.0 {
            speed / REWIND_FACTOR
        } else {
            speed
        }
    }

    fn set_speed(&self, speed: f64) {
        if speed >= 0.0 {
            self.clock.set_speed(speed);
        } else {
            self.clock.set_speed(speed * REWIND_FACTOR);
        }
    }

    fn pause_async(&self) {
        self.clock.pause_async();
    }

    fn create_savestate(&self) -> Option<PathBuf> {
        match self.controller.create_savestate(self.gateway.as_ref()) {
            Ok(path) => {
                info!(path = %path.display(), "savestate created");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "failed to create savestate");
                None
            }
        }
    }

    fn load_savestate(&self, path: &Path) -> bool {
        match self.controller.load_savestate(self.gateway.as_ref(), path) {
            Ok(()) => {
                info!(path = %path.display(), "savestate loaded");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load savestate");
                false
            }
        }
    }

    fn can_seek(&self) -> bool {
        self.controller.frame_size > 0
    }
}

impl Drop for ReversiblePlayback {
    fn drop(&mut self) {
        self.controller.closed.store(true, Ordering::SeqCst);
        if let Some(id) = self.observer.take() {
            self.controller.settings.unregister_observer(id);
        }
        self.clock.stop();
        self.controller.lock_state().history.release();
        debug!("reversible playback dropped");
    }
}

impl std::fmt::Debug for ReversiblePlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReversiblePlayback")
            .field("clock", &self.clock)
            .field("stats", &self.stats())
            .finish()
    }
}
