//! Playback settings (~/.config/RetroPlay/playback.toml)
//!
//! Holds the rewind and savestate settings, persists them as TOML in the
//! platform config directory, and notifies registered observers when they
//! change at runtime.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Playback configuration.
///
/// Serialized to/from TOML format for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlaybackConfig {
    /// Rewind buffer settings
    #[serde(default)]
    pub rewind: RewindConfig,
    /// Savestate storage settings
    #[serde(default)]
    pub savestates: SavestateConfig,
}

/// Rewind buffer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewindConfig {
    /// Whether the rewind buffer is kept (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Length of the rewind buffer in seconds (default: 60, minimum 10)
    #[serde(default = "default_max_time_sec")]
    pub max_time_sec: u32,
}

/// Savestate storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavestateConfig {
    /// Directory for savestate files (default: platform data dir)
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Whether savestate payloads are LZ4 compressed (default: true)
    #[serde(default = "default_true")]
    pub compress: bool,
}

fn default_true() -> bool {
    true
}
fn default_max_time_sec() -> u32 {
    60
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_time_sec: default_max_time_sec(),
        }
    }
}

impl Default for SavestateConfig {
    fn default() -> Self {
        Self {
            directory: None,
            compress: default_true(),
        }
    }
}

impl SavestateConfig {
    /// Directory savestates are written to
    ///
    /// Falls back to `savestates/` under the platform data directory, or the
    /// working directory if that cannot be determined.
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .or_else(|| data_dir().map(|dir| dir.join("savestates")))
            .unwrap_or_else(|| PathBuf::from("savestates"))
    }
}

/// Returns the platform-specific configuration directory.
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.retroplay", "", "RetroPlay")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the platform-specific data directory.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.retroplay", "", "RetroPlay")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> PlaybackConfig {
    config_dir()
        .and_then(|dir| std::fs::read_to_string(dir.join("playback.toml")).ok())
        .and_then(|content| toml::from_str(&content).ok())
        .unwrap_or_default()
}

/// Saves the configuration to disk.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file
/// cannot be written.
pub fn save(config: &PlaybackConfig) -> std::io::Result<()> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(&dir)?;
        let content = toml::to_string_pretty(config)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(dir.join("playback.toml"), content)?;
    }
    Ok(())
}

/// Event delivered to settings observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsEvent {
    /// One or more settings changed
    Changed,
}

/// Handle identifying a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(SettingsEvent) + Send + Sync>;

#[derive(Default)]
struct ObserverRegistry {
    next_id: u64,
    observers: Vec<(ObserverId, Observer)>,
}

/// Live game settings shared between the host and playback sessions
///
/// Mutators notify every registered observer after the settings lock has been
/// released, so observers may read the settings back.
#[derive(Default)]
pub struct GameSettings {
    config: RwLock<PlaybackConfig>,
    registry: Mutex<ObserverRegistry>,
}

impl GameSettings {
    /// Create settings from an existing configuration
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config: RwLock::new(config),
            registry: Mutex::new(ObserverRegistry::default()),
        }
    }

    /// Create settings from the configuration file on disk
    pub fn load() -> Self {
        Self::new(load())
    }

    /// Whether the rewind buffer should be kept
    pub fn rewind_enabled(&self) -> bool {
        self.read().rewind.enabled
    }

    /// Configured rewind buffer length in seconds
    pub fn max_rewind_time_sec(&self) -> u32 {
        self.read().rewind.max_time_sec
    }

    /// Copy of the full configuration
    pub fn config(&self) -> PlaybackConfig {
        self.read().clone()
    }

    pub fn set_rewind_enabled(&self, enabled: bool) {
        self.update(|config| config.rewind.enabled = enabled);
    }

    pub fn set_max_rewind_time_sec(&self, seconds: u32) {
        self.update(|config| config.rewind.max_time_sec = seconds);
    }

    /// Replace the whole configuration
    pub fn apply(&self, config: PlaybackConfig) {
        self.update(|current| *current = config);
    }

    /// Register a callback invoked on every settings change
    pub fn register_observer(
        &self,
        observer: impl Fn(SettingsEvent) + Send + Sync + 'static,
    ) -> ObserverId {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let id = ObserverId(registry.next_id);
        registry.next_id += 1;
        registry.observers.push((id, Arc::new(observer)));
        debug!(?id, "registered settings observer");
        id
    }

    /// Remove a previously registered callback
    ///
    /// Once this returns, the callback will not be invoked by any later change.
    pub fn unregister_observer(&self, id: ObserverId) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let before = registry.observers.len();
        registry.observers.retain(|(observer_id, _)| *observer_id != id);
        if registry.observers.len() == before {
            warn!(?id, "unregistering unknown settings observer");
        }
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .observers
            .len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PlaybackConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, change: impl FnOnce(&mut PlaybackConfig)) {
        let changed = {
            let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
            let before = config.clone();
            change(&mut config);
            *config != before
        };
        if changed {
            self.notify(SettingsEvent::Changed);
        }
    }

    fn notify(&self, event: SettingsEvent) {
        let observers: Vec<Observer> = self
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .observers
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }
}

impl std::fmt::Debug for GameSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSettings")
            .field("config", &*self.read())
            .field("observers", &self.observer_count())
            .finish()
    }
}
