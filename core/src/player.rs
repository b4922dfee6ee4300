//! Host-level player
//!
//! Wraps a [`Playback`] engine with the controls a media player exposes:
//! pause toggling, percentage and relative seeks, cache reporting, and
//! speed-change events for the UI.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, channel};

use tracing::debug;

use crate::playback::Playback;

/// Notification sent to player subscribers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    /// Playback paused (speed became 0)
    Paused,
    /// Playback resumed at normal speed
    Resumed,
    /// Speed changed to the given factor
    SpeedChanged(f64),
}

/// Media-player style front end for a playback engine
pub struct GamePlayer {
    playback: Box<dyn Playback>,
    subscribers: Vec<Sender<PlayerEvent>>,
    started: bool,
}

impl GamePlayer {
    pub fn new(playback: Box<dyn Playback>) -> Self {
        Self {
            playback,
            subscribers: Vec::new(),
            started: false,
        }
    }

    /// Receive every future [`PlayerEvent`]
    pub fn subscribe(&mut self) -> Receiver<PlayerEvent> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    /// Start playback at normal speed
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.playback.initialize();
        self.started = true;
        self.set_speed(1.0);
    }

    /// Stop playback
    pub fn stop(&mut self) {
        if self.started {
            self.playback.deinitialize();
            self.started = false;
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Pause if playing, resume at normal speed if paused
    pub fn toggle_pause(&mut self) {
        if self.playback.speed() == 0.0 {
            self.set_speed(1.0);
        } else {
            self.set_speed(0.0);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.playback.speed() == 0.0
    }

    /// Change the signed speed (negative rewinds)
    pub fn set_speed(&mut self, speed: f64) {
        let previous = self.playback.speed();
        self.playback.set_speed(speed);
        self.on_speed_change(previous);
    }

    pub fn speed(&self) -> f64 {
        self.playback.speed()
    }

    pub fn can_seek(&self) -> bool {
        self.playback.can_seek()
    }

    /// Seek to `percent` of the buffered window (clamped to 0..=100)
    pub fn seek_percentage(&mut self, percent: f64) {
        if !self.can_seek() {
            return;
        }
        let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
        let total = self.playback.total_time_ms();
        if total == 0 {
            return;
        }
        self.seek_time_ms((total as f64 * percent / 100.0) as u64);
    }

    /// Seek to an absolute position
    pub fn seek_time_ms(&mut self, time_ms: u64) {
        if !self.can_seek() {
            return;
        }
        let previous = self.playback.speed();
        self.playback.seek_time_ms(time_ms);
        self.on_speed_change(previous);
    }

    /// Seek by `offset_ms` from the current position
    ///
    /// Returns `false` if seeking is not possible.
    pub fn seek_time_relative(&mut self, offset_ms: i64) -> bool {
        if !self.can_seek() {
            return false;
        }
        let target = self.time_ms().saturating_add_signed(offset_ms);
        self.seek_time_ms(target);
        true
    }

    pub fn time_ms(&self) -> u64 {
        self.playback.time_ms()
    }

    pub fn total_time_ms(&self) -> u64 {
        self.playback.total_time_ms()
    }

    /// Buffered time ahead of the position as a percentage of the window
    pub fn cache_percentage(&self) -> f64 {
        let total = self.playback.total_time_ms();
        if total == 0 {
            return 0.0;
        }
        self.playback.cache_time_ms() as f64 / total as f64 * 100.0
    }

    pub fn create_savestate(&self) -> Option<PathBuf> {
        self.playback.create_savestate()
    }

    pub fn load_savestate(&self, path: &Path) -> bool {
        self.playback.load_savestate(path)
    }

    pub fn playback(&self) -> &dyn Playback {
        self.playback.as_ref()
    }

    fn on_speed_change(&mut self, previous: f64) {
        let speed = self.playback.speed();
        if speed == previous {
            return;
        }
        debug!(from = previous, to = speed, "player speed changed");
        if speed == 0.0 {
            self.emit(PlayerEvent::Paused);
        } else if speed == 1.0 {
            self.emit(PlayerEvent::Resumed);
        }
        self.emit(PlayerEvent::SpeedChanged(speed));
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }
}

impl Drop for GamePlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
