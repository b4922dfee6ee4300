//! Shared test utilities for integration and unit tests

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hashbrown::HashMap;

use crate::emulator::{GameCore, GameInfo};
use crate::error::SavestateError;
use crate::savestate::{SavestateGateway, SavestateReader, SavestateWriter};

// ============================================================================
// Mock Core
// ============================================================================

/// Observable state of a [`MockCore`], shared with the test
///
/// The machine state is a single frame counter that `run_frame` increments.
#[derive(Debug, Default)]
pub struct CoreProbe {
    counter: AtomicU64,
    frames_run: AtomicU64,
    serialize_calls: AtomicU64,
    deserialize_calls: AtomicU64,
    fail_serialize: AtomicBool,
    fail_deserialize: AtomicBool,
}

impl CoreProbe {
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn set_counter(&self, value: u64) {
        self.counter.store(value, Ordering::SeqCst);
    }

    pub fn frames_run(&self) -> u64 {
        self.frames_run.load(Ordering::SeqCst)
    }

    pub fn serialize_calls(&self) -> u64 {
        self.serialize_calls.load(Ordering::SeqCst)
    }

    pub fn deserialize_calls(&self) -> u64 {
        self.deserialize_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_serialize(&self, fail: bool) {
        self.fail_serialize.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deserialize(&self, fail: bool) {
        self.fail_deserialize.store(fail, Ordering::SeqCst);
    }
}

/// Deterministic emulation core for tests
///
/// Serializes the frame counter as little-endian into the first 8 bytes and
/// fills the rest with a pattern derived from it.
pub struct MockCore {
    frame_size: usize,
    fps: f64,
    probe: Arc<CoreProbe>,
}

impl MockCore {
    /// Core with `frame_size`-byte states (0 = no serialization)
    pub fn new(frame_size: usize, fps: f64) -> Self {
        assert!(frame_size == 0 || frame_size >= 8, "mock frames hold a u64");
        Self {
            frame_size,
            fps,
            probe: Arc::new(CoreProbe::default()),
        }
    }

    pub fn probe(&self) -> Arc<CoreProbe> {
        self.probe.clone()
    }
}

impl GameCore for MockCore {
    fn serialize_size(&self) -> usize {
        self.frame_size
    }

    fn serialize(&mut self, buffer: &mut [u8]) -> anyhow::Result<()> {
        self.probe.serialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_serialize.load(Ordering::SeqCst) {
            anyhow::bail!("mock serialize failure");
        }
        let counter = self.probe.counter();
        buffer[..8].copy_from_slice(&counter.to_le_bytes());
        for (i, byte) in buffer[8..].iter_mut().enumerate() {
            *byte = (counter as usize + i) as u8;
        }
        Ok(())
    }

    fn deserialize(&mut self, buffer: &[u8]) -> anyhow::Result<()> {
        self.probe.deserialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_deserialize.load(Ordering::SeqCst) {
            anyhow::bail!("mock deserialize failure");
        }
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&buffer[..8]);
        self.probe.set_counter(u64::from_le_bytes(counter));
        Ok(())
    }

    fn run_frame(&mut self) {
        self.probe.counter.fetch_add(1, Ordering::SeqCst);
        self.probe.frames_run.fetch_add(1, Ordering::SeqCst);
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn game_info(&self) -> GameInfo {
        GameInfo {
            game_path: "/roms/Mock Game (USA).nes".to_string(),
            core_id: "game.mock".to_string(),
            core_version: "1.0.0".to_string(),
        }
    }
}

// ============================================================================
// Mock Savestate Gateway
// ============================================================================

#[derive(Debug, Default)]
struct GatewayState {
    calls: Mutex<Vec<String>>,
    saves: Mutex<HashMap<PathBuf, (Vec<u8>, u64)>>,
    next_id: AtomicU64,
    fail_write: AtomicBool,
    fail_commit: AtomicBool,
    io_delay_ms: AtomicU64,
}

impl GatewayState {
    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn simulate_io(&self) {
        let delay = self.io_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
    }
}

/// In-memory gateway recording every contract call
#[derive(Debug, Default)]
pub struct MockGateway {
    state: Arc<GatewayState>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Contract calls in order (`create_writer`, `initialize`, ...)
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn saved_paths(&self) -> Vec<PathBuf> {
        self.state.saves.lock().unwrap().keys().cloned().collect()
    }

    pub fn saved_frame(&self, path: &Path) -> Option<Vec<u8>> {
        self.state
            .saves
            .lock()
            .unwrap()
            .get(path)
            .map(|(frame, _)| frame.clone())
    }

    pub fn set_fail_write(&self, fail: bool) {
        self.state.fail_write.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.state.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Make `write_save` and reader `initialize` block for `delay`
    pub fn set_io_delay(&self, delay: Duration) {
        self.state
            .io_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

impl SavestateGateway for MockGateway {
    fn create_writer(&self) -> Box<dyn SavestateWriter> {
        self.state.record("create_writer");
        Box::new(MockWriter {
            state: self.state.clone(),
            path: None,
            frame: None,
            frame_count: 0,
        })
    }

    fn create_reader(&self) -> Box<dyn SavestateReader> {
        self.state.record("create_reader");
        Box::new(MockReader {
            state: self.state.clone(),
            loaded: None,
        })
    }
}

struct MockWriter {
    state: Arc<GatewayState>,
    path: Option<PathBuf>,
    frame: Option<Vec<u8>>,
    frame_count: u64,
}

impl SavestateWriter for MockWriter {
    fn initialize(
        &mut self,
        _: &GameInfo,
        _: f64,
        frame_history_count: u64,
    ) -> Result<(), SavestateError> {
        self.state.record("initialize");
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.path = Some(PathBuf::from(format!("/mock/save-{id}.rpsav")));
        self.frame_count = frame_history_count;
        Ok(())
    }

    fn write_save(&mut self, frame: &[u8]) -> Result<(), SavestateError> {
        self.state.record("write_save");
        self.state.simulate_io();
        if self.state.fail_write.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("mock write failure").into());
        }
        self.frame = Some(frame.to_vec());
        Ok(())
    }

    fn write_thumbnail(&mut self) {
        self.state.record("write_thumbnail");
    }

    fn commit_to_database(&mut self) -> Result<(), SavestateError> {
        self.state.record("commit");
        if self.state.fail_commit.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("mock commit failure").into());
        }
        let (Some(path), Some(frame)) = (&self.path, &self.frame) else {
            return Err(SavestateError::NotInitialized);
        };
        self.state
            .saves
            .lock()
            .unwrap()
            .insert(path.clone(), (frame.clone(), self.frame_count));
        Ok(())
    }

    fn clean_up_transaction(&mut self) {
        self.state.record("clean_up");
        if let Some(path) = &self.path {
            self.state.saves.lock().unwrap().remove(path);
        }
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

struct MockReader {
    state: Arc<GatewayState>,
    loaded: Option<(Vec<u8>, u64)>,
}

impl SavestateReader for MockReader {
    fn initialize(&mut self, path: &Path, _: &GameInfo) -> Result<(), SavestateError> {
        self.state.record("reader_initialize");
        self.state.simulate_io();
        let saves = self.state.saves.lock().unwrap();
        let save = saves
            .get(path)
            .ok_or_else(|| SavestateError::NotFound(path.to_path_buf()))?;
        self.loaded = Some(save.clone());
        Ok(())
    }

    fn read_save(&mut self, frame: &mut [u8]) -> Result<(), SavestateError> {
        self.state.record("read_save");
        let (saved, _) = self.loaded.as_ref().ok_or(SavestateError::NotInitialized)?;
        if saved.len() != frame.len() {
            return Err(SavestateError::SizeMismatch {
                expected: frame.len(),
                actual: saved.len(),
            });
        }
        frame.copy_from_slice(saved);
        Ok(())
    }

    fn frame_count(&self) -> u64 {
        self.loaded.as_ref().map_or(0, |(_, count)| *count)
    }
}
