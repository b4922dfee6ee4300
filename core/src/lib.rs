//! RetroPlay Core - Reversible playback for emulation cores
//!
//! This crate lets a host rewind and seek through recent gameplay of an
//! emulation core that only runs forward, and persist the core's state as
//! savestates.
//!
//! # Architecture
//!
//! - [`GameCore`] - Trait implemented by the emulation core
//! - [`FrameHistory`] - Bounded rewind buffer of serialized states
//! - [`PlaybackClock`] - Frame-rate synchronized tick thread
//! - [`ReversiblePlayback`] - Playback controller tying the core, rewind buffer
//!   and clock together
//! - [`SavestateGateway`] - Transactional savestate persistence
//! - [`GamePlayer`] - Media-player style front end

pub mod clock;
pub mod emulator;
pub mod error;
pub mod history;
#[cfg(test)]
mod integration;
pub mod playback;
pub mod player;
pub mod savestate;
pub mod settings;
#[cfg(test)]
pub mod test_utils;

// Re-export core traits and types
pub use clock::{ClockState, PlaybackClock, TickHandler, TickOutcome};
pub use emulator::{GameCore, GameInfo};
pub use error::{PlaybackError, SavestateError};
pub use player::{GamePlayer, PlayerEvent};
pub use settings::{GameSettings, PlaybackConfig, SettingsEvent};

// Re-export rewind buffer types
pub use history::{
    BasicFrameHistory, DeltaFrameHistory, FrameHistory, HistorySlot, MIN_REWIND_SECONDS,
    rewind_capacity,
};

// Re-export playback engines
pub use playback::{
    Playback, PlaybackStats, REWIND_FACTOR, RealtimePlayback, ReversiblePlayback,
    RewindErrorAction, RewindErrorPolicy, create_playback,
};

// Re-export savestate types
pub use savestate::{
    FileSavestateGateway, SaveType, SavestateDatabase, SavestateGateway, SavestateMetadata,
    SavestateReader, SavestateTransaction, SavestateWriter,
};
