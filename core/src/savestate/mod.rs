//! Savestate persistence
//!
//! A savestate is one frame written to durable storage together with metadata
//! describing the game and when it was taken. Persistence goes through a
//! transactional gateway:
//!
//! 1. [`SavestateWriter::initialize`] stages a new savestate
//! 2. [`SavestateWriter::write_save`] writes the frame
//! 3. [`SavestateWriter::write_thumbnail`] writes an optional preview image
//! 4. [`SavestateWriter::commit_to_database`] records it in the index
//!
//! [`SavestateTransaction`] wraps a writer so that anything short of a
//! successful commit is rolled back with
//! [`SavestateWriter::clean_up_transaction`].
//!
//! # Module Structure
//!
//! - `format`: binary savestate file layout
//! - `database`: JSON index of committed savestates
//! - `file`: file-backed gateway
//! - `transaction`: scoped transaction with rollback on drop

mod database;
mod file;
mod format;
mod transaction;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::emulator::GameInfo;
use crate::error::SavestateError;

pub use database::{DATABASE_FILE_NAME, SavestateDatabase};
pub use file::{
    FileSavestateGateway, FileSavestateReader, FileSavestateWriter, SAVESTATE_EXTENSION,
    Thumbnail, ThumbnailSource,
};
pub use format::{SAVESTATE_MAGIC, SAVESTATE_VERSION, SavestateFile, SavestateFlags};
pub use transaction::SavestateTransaction;

/// How a savestate was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SaveType {
    /// Created automatically by the player (e.g. on exit)
    Auto,
    /// Created on user request
    #[default]
    Manual,
}

/// Descriptive data stored alongside the frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavestateMetadata {
    pub save_type: SaveType,
    /// Slot number for slot-based saves (0 = unslotted)
    pub slot: u8,
    /// User-visible label
    pub label: String,
    pub created: DateTime<Utc>,
    pub game_file_name: String,
    pub game_path: String,
    /// Playback position in frames when the save was taken
    pub timestamp_frames: u64,
    /// Playback position in seconds when the save was taken
    pub timestamp_wall_clock: f64,
    pub core_id: String,
    pub core_version: String,
}

impl SavestateMetadata {
    /// Metadata for a manual save of `game` taken at `frames` played frames
    pub fn new(game: &GameInfo, fps: f64, frames: u64) -> Self {
        let timestamp_wall_clock = if fps > 0.0 { frames as f64 / fps } else { 0.0 };
        Self {
            save_type: SaveType::Manual,
            slot: 0,
            label: String::new(),
            created: Utc::now(),
            game_file_name: game.game_file_name().to_string(),
            game_path: game.game_path.clone(),
            timestamp_frames: frames,
            timestamp_wall_clock,
            core_id: game.core_id.clone(),
            core_version: game.core_version.clone(),
        }
    }
}

/// Writer half of the persistence gateway
///
/// Calls are made in order: `initialize`, `write_save`, `write_thumbnail`,
/// `commit_to_database`. `clean_up_transaction` may be called at any point to
/// discard everything written so far.
pub trait SavestateWriter: Send {
    /// Stage a new savestate for `game` at `frame_history_count` played frames
    fn initialize(
        &mut self,
        game: &GameInfo,
        fps: f64,
        frame_history_count: u64,
    ) -> Result<(), SavestateError>;

    /// Write the serialized frame
    fn write_save(&mut self, frame: &[u8]) -> Result<(), SavestateError>;

    /// Write a preview image, if one is available
    ///
    /// Failure is not fatal to the savestate.
    fn write_thumbnail(&mut self);

    /// Record the written savestate in the database
    fn commit_to_database(&mut self) -> Result<(), SavestateError>;

    /// Remove everything written by this transaction
    fn clean_up_transaction(&mut self);

    /// Location of the staged savestate
    fn path(&self) -> Option<&Path>;
}

/// Reader half of the persistence gateway
pub trait SavestateReader: Send {
    /// Locate and validate the savestate at `path`
    fn initialize(&mut self, path: &Path, game: &GameInfo) -> Result<(), SavestateError>;

    /// Copy the saved frame into `frame`
    ///
    /// Fails if the saved frame does not have exactly `frame.len()` bytes.
    fn read_save(&mut self, frame: &mut [u8]) -> Result<(), SavestateError>;

    /// Played frame count recorded in the savestate
    fn frame_count(&self) -> u64;
}

/// Factory for gateway readers and writers
pub trait SavestateGateway: Send + Sync {
    fn create_writer(&self) -> Box<dyn SavestateWriter>;

    fn create_reader(&self) -> Box<dyn SavestateReader>;
}

/// Build a savestate file name from the game name and a timestamp
///
/// Non-alphanumeric characters become underscores and runs of underscores are
/// collapsed.
pub fn savestate_file_name(game_file_name: &str, created: &DateTime<Utc>) -> PathBuf {
    let stem = game_file_name
        .rsplit_once('.')
        .map_or(game_file_name, |(stem, _)| stem);
    let sanitized = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let sanitized = if sanitized.is_empty() {
        "game".to_string()
    } else {
        sanitized
    };
    PathBuf::from(format!(
        "{}_{}.{}",
        sanitized,
        created.format("%Y-%m-%d_%H-%M-%S_%3f"),
        SAVESTATE_EXTENSION
    ))
}
