//! Frame history store
//!
//! A bounded, ordered sequence of serialized state snapshots ("frames") with a
//! movable cursor. Two implementations share the [`FrameHistory`] contract:
//!
//! - [`BasicFrameHistory`]: capacity 1, no history. Used when rewind is off and
//!   as a transient staging area for savestates.
//! - [`DeltaFrameHistory`]: capacity N, stores one full reference frame and an
//!   XOR delta per retained neighbour. This is the rewind buffer.
//!
//! Frames are written in place: the caller obtains a staging buffer with
//! [`FrameHistory::begin_frame`], lets the core serialize directly into it, and
//! then commits it with [`FrameHistory::submit_frame`].

mod basic;
mod delta;
mod pool;
mod slot;

pub use basic::BasicFrameHistory;
pub use delta::{DeltaFrameHistory, DeltaPair};
pub use pool::DeltaPool;
pub use slot::HistorySlot;

use crate::error::PlaybackError;

/// Shortest rewind buffer, in seconds, regardless of configuration
pub const MIN_REWIND_SECONDS: u32 = 10;

/// Capability contract shared by every frame history implementation
pub trait FrameHistory: Send {
    /// Size in bytes of one frame
    fn frame_size(&self) -> usize;

    /// Return the staging buffer for the next frame
    ///
    /// Nothing is added to history until [`submit_frame`](Self::submit_frame)
    /// is called.
    fn begin_frame(&mut self) -> &mut [u8];

    /// Commit the staging buffer as the new current frame
    ///
    /// Discards any future (redo) frames and evicts the oldest frame when the
    /// store is full.
    fn submit_frame(&mut self);

    /// Fully reconstructed bytes of the current frame, if one was submitted
    fn current_frame(&self) -> Option<&[u8]>;

    /// Move the cursor back by up to `frames`, returning how far it moved
    fn rewind_frames(&mut self, frames: u64) -> u64;

    /// Move the cursor forward by up to `frames`, returning how far it moved
    fn advance_frames(&mut self, frames: u64) -> u64;

    /// Change the capacity, keeping the newest frames and the current frame
    fn set_max_frame_count(&mut self, max_frames: u64) -> Result<(), PlaybackError>;

    /// Frames available behind the cursor
    fn past_frames_available(&self) -> u64;

    /// Frames available ahead of the cursor
    fn future_frames_available(&self) -> u64;

    /// Maximum number of retained frames, including the current one
    fn max_frame_count(&self) -> u64;

    /// Approximate number of bytes held by the store
    fn memory_usage(&self) -> usize;
}

/// Number of frames needed to hold `seconds` of gameplay at `fps`
///
/// Buffers shorter than [`MIN_REWIND_SECONDS`] are raised to the minimum.
pub fn rewind_capacity(seconds: u32, fps: f64) -> u64 {
    let seconds = seconds.max(MIN_REWIND_SECONDS);
    (seconds as f64 * fps).round().max(1.0) as u64
}

/// Allocate a zeroed frame buffer without aborting on allocation failure
pub(crate) fn alloc_frame(frame_size: usize) -> Result<Vec<u8>, PlaybackError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(frame_size)
        .map_err(|_| PlaybackError::Allocation { bytes: frame_size })?;
    buffer.resize(frame_size, 0);
    Ok(buffer)
}
