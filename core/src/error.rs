//! Error types for reversible playback and savestates

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error raised by the playback engine
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The emulation core reports a serialize size of zero
    #[error("game core does not support serialization")]
    SerializationUnsupported,

    /// Frame history storage could not be reserved
    #[error("failed to allocate {bytes} bytes of frame history")]
    Allocation { bytes: usize },

    /// The emulation core failed to serialize its state
    #[error("core serialize failed: {0}")]
    Serialize(#[source] anyhow::Error),

    /// The emulation core rejected a state
    #[error("core deserialize failed: {0}")]
    Deserialize(#[source] anyhow::Error),

    /// There is no frame to operate on
    #[error("no frame available")]
    NoFrame,

    /// Savestate persistence failed
    #[error(transparent)]
    Savestate(#[from] SavestateError),
}

/// Error raised by the savestate persistence gateway
#[derive(Debug, Error)]
pub enum SavestateError {
    #[error("savestate I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid savestate magic {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported savestate version {0}")]
    UnsupportedVersion(u32),

    #[error("savestate checksum mismatch (expected {expected:#018x}, got {actual:#018x})")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("savestate size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("savestate not found: {0}")]
    NotFound(PathBuf),

    #[error("savestate metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("savestate payload could not be decompressed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),

    #[error("thumbnail encoding failed: {0}")]
    Thumbnail(#[from] png::EncodingError),

    /// A gateway call was made out of order (e.g. write before initialize)
    #[error("savestate transaction not initialized")]
    NotInitialized,
}
