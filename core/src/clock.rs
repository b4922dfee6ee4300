//! Playback clock
//!
//! Drives the playback controller from a dedicated thread at `fps * |speed|`
//! ticks per second. The sign of the speed picks the callback: forward ticks
//! for `speed > 0`, rewind ticks for `speed < 0`. A speed of zero pauses the
//! clock without stopping the thread.
//!
//! ```text
//! Stopped --start--> Running <--set_speed--> Paused
//!    ^                  |                       |
//!    +------stop--------+-----------stop--------+
//! ```

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// Longest the clock may fall behind before it drops missed ticks
///
/// Prevents a burst of catch-up ticks after a slow frame.
pub const MAX_TICK_LAG: Duration = Duration::from_millis(100);

/// What the clock should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep ticking at the current speed
    Continue,
    /// Pause the clock (speed becomes 0)
    Pause,
}

/// Receiver of clock ticks
///
/// Exactly one of the two callbacks is invoked per tick.
pub trait TickHandler: Send + Sync + 'static {
    /// Called for each tick while the speed is positive
    fn on_forward_tick(&self) -> TickOutcome;

    /// Called for each tick while the speed is negative
    fn on_rewind_tick(&self) -> TickOutcome;
}

/// Clock lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    /// No tick thread
    Stopped,
    /// Ticking
    Running,
    /// Tick thread alive but suspended (speed is 0)
    Paused,
}

#[derive(Debug)]
struct ClockControl {
    state: ClockState,
    speed: f64,
    /// A callback is executing on the clock thread
    in_tick: bool,
    shutdown: bool,
    next_tick: Instant,
    thread_id: Option<ThreadId>,
}

#[derive(Debug)]
struct ClockShared {
    fps: f64,
    control: Mutex<ClockControl>,
    changed: Condvar,
}

impl ClockShared {
    fn lock(&self) -> MutexGuard<'_, ClockControl> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Frame-rate synchronized tick source
pub struct PlaybackClock {
    shared: Arc<ClockShared>,
    handler: Arc<dyn TickHandler>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackClock {
    /// Create a stopped clock ticking `handler` at `fps` (speed 1.0)
    pub fn new(handler: Arc<dyn TickHandler>, fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 60.0 };
        Self {
            shared: Arc::new(ClockShared {
                fps,
                control: Mutex::new(ClockControl {
                    state: ClockState::Stopped,
                    speed: 1.0,
                    in_tick: false,
                    shutdown: false,
                    next_tick: Instant::now(),
                    thread_id: None,
                }),
                changed: Condvar::new(),
            }),
            handler,
            thread: None,
        }
    }

    /// Start the tick thread
    ///
    /// Starts paused if the current speed is 0. Does nothing if already started.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }

        {
            let mut control = self.shared.lock();
            control.shutdown = false;
            control.state = state_for_speed(control.speed);
            control.next_tick = Instant::now();
        }

        let shared = self.shared.clone();
        let handler = self.handler.clone();
        let handle = thread::Builder::new()
            .name("playback-clock".into())
            .spawn(move || run(&shared, handler.as_ref()))
            .expect("failed to spawn playback clock thread");

        self.thread = Some(handle);
        debug!(fps = self.shared.fps, "playback clock started");
    }

    /// Stop the tick thread, waiting for an in-flight tick to finish
    pub fn stop(&mut self) {
        {
            let mut control = self.shared.lock();
            control.shutdown = true;
            control.state = ClockState::Stopped;
            self.shared.changed.notify_all();
        }

        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                // Stopping from inside a tick: the loop exits once the tick returns
                return;
            }
            if handle.join().is_err() {
                tracing::error!("playback clock thread panicked");
            }
            self.shared.lock().thread_id = None;
            debug!("playback clock stopped");
        }
    }

    /// Change the signed speed factor
    ///
    /// Setting 0 pauses the clock and waits for a tick in progress to finish,
    /// so the caller has exclusive use of the controller afterwards. Called
    /// from the clock thread itself, it does not wait.
    pub fn set_speed(&self, speed: f64) {
        let mut control = self.update_speed(speed);
        if speed == 0.0 && control.thread_id != Some(thread::current().id()) {
            while control.in_tick {
                control = self
                    .shared
                    .changed
                    .wait(control)
                    .unwrap_or_else(|e| e.into_inner());
            }
        }
    }

    /// Request a pause without waiting for a tick in progress
    pub fn pause_async(&self) {
        drop(self.update_speed(0.0));
    }

    /// Current signed speed factor
    pub fn speed(&self) -> f64 {
        self.shared.lock().speed
    }

    /// Nominal frame rate
    pub fn fps(&self) -> f64 {
        self.shared.fps
    }

    /// Current lifecycle state
    pub fn state(&self) -> ClockState {
        self.shared.lock().state
    }

    /// Effective ticks per second (`fps * |speed|`)
    pub fn tick_rate(&self) -> f64 {
        self.shared.fps * self.speed().abs()
    }

    fn update_speed(&self, speed: f64) -> MutexGuard<'_, ClockControl> {
        let speed = if speed.is_finite() { speed } else { 0.0 };
        let mut control = self.shared.lock();
        control.speed = speed;
        if control.state != ClockState::Stopped {
            control.state = state_for_speed(speed);
        }
        control.next_tick = Instant::now();
        self.shared.changed.notify_all();
        trace!(speed, "clock speed changed");
        control
    }
}

impl Drop for PlaybackClock {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PlaybackClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackClock")
            .field("fps", &self.shared.fps)
            .field("speed", &self.speed())
            .field("state", &self.state())
            .finish()
    }
}

fn state_for_speed(speed: f64) -> ClockState {
    if speed == 0.0 {
        ClockState::Paused
    } else {
        ClockState::Running
    }
}

/// Tick loop executed on the clock thread
fn run(shared: &ClockShared, handler: &dyn TickHandler) {
    shared.lock().thread_id = Some(thread::current().id());

    loop {
        let speed = {
            let mut control = shared.lock();
            loop {
                if control.shutdown {
                    return;
                }
                if control.state == ClockState::Running && control.speed != 0.0 {
                    let now = Instant::now();
                    if now >= control.next_tick {
                        break;
                    }
                    let timeout = control.next_tick - now;
                    control = shared
                        .changed
                        .wait_timeout(control, timeout)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                } else {
                    control = shared
                        .changed
                        .wait(control)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
            control.in_tick = true;
            control.speed
        };

        let outcome = if speed > 0.0 {
            handler.on_forward_tick()
        } else {
            handler.on_rewind_tick()
        };

        let mut control = shared.lock();
        control.in_tick = false;

        let interval = Duration::from_secs_f64(1.0 / (shared.fps * speed.abs()));
        let now = Instant::now();
        control.next_tick += interval;
        if now.saturating_duration_since(control.next_tick) > MAX_TICK_LAG {
            trace!("playback clock fell behind, dropping missed ticks");
            control.next_tick = now;
        }

        if outcome == TickOutcome::Pause && !control.shutdown {
            debug!("tick handler requested pause");
            control.speed = 0.0;
            control.state = ClockState::Paused;
        }
        shared.changed.notify_all();
    }
}
