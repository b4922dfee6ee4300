//! Emulation core collaborator
//!
//! The playback engine never looks inside the emulated machine. It only needs
//! to run frames and move opaque state snapshots in and out of the core.

use anyhow::Result;

/// Descriptive information about the loaded game and the core running it
///
/// Recorded in savestate metadata so saves can be matched back to their game.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameInfo {
    /// Path of the loaded game file
    pub game_path: String,
    /// Identifier of the core (e.g. `game.libretro.nestopia`)
    pub core_id: String,
    /// Version string of the core
    pub core_version: String,
}

impl GameInfo {
    /// File name component of the game path
    pub fn game_file_name(&self) -> &str {
        self.game_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.game_path)
    }
}

/// Trait implemented by an emulation core
///
/// Calls may block for an unbounded time (a multi-megabyte serialize, for
/// example). The engine guarantees it never holds its history lock while
/// calling into the core.
pub trait GameCore: Send + 'static {
    /// Size in bytes of a serialized state, or 0 if serialization is unsupported
    fn serialize_size(&self) -> usize;

    /// Serialize the full machine state into `buffer`
    ///
    /// `buffer` is exactly `serialize_size()` bytes long.
    fn serialize(&mut self, buffer: &mut [u8]) -> Result<()>;

    /// Restore the machine state from `buffer`
    fn deserialize(&mut self, buffer: &[u8]) -> Result<()>;

    /// Emulate one frame
    fn run_frame(&mut self);

    /// Nominal frame rate in Hz
    fn frame_rate(&self) -> f64;

    /// Information about the running game
    fn game_info(&self) -> GameInfo {
        GameInfo::default()
    }

    /// Whether rewind and savestates are possible with this core
    fn supports_serialization(&self) -> bool {
        self.serialize_size() > 0
    }
}
