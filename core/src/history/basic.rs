//! Single-frame history

use tracing::debug;

use crate::error::PlaybackError;

use super::{FrameHistory, alloc_frame};

/// Frame history with room for exactly one frame
///
/// There is never a past or future frame, so rewind and advance are no-ops.
/// `begin_frame` hands out the frame buffer itself, which invalidates the
/// current frame until the next `submit_frame`.
#[derive(Debug)]
pub struct BasicFrameHistory {
    frame: Vec<u8>,
    has_frame: bool,
}

impl BasicFrameHistory {
    /// Allocate a history for frames of `frame_size` bytes
    pub fn new(frame_size: usize) -> Result<Self, PlaybackError> {
        Ok(Self {
            frame: alloc_frame(frame_size)?,
            has_frame: false,
        })
    }
}

impl FrameHistory for BasicFrameHistory {
    fn frame_size(&self) -> usize {
        self.frame.len()
    }

    fn begin_frame(&mut self) -> &mut [u8] {
        self.has_frame = false;
        &mut self.frame
    }

    fn submit_frame(&mut self) {
        self.has_frame = true;
    }

    fn current_frame(&self) -> Option<&[u8]> {
        self.has_frame.then_some(self.frame.as_slice())
    }

    fn rewind_frames(&mut self, _frames: u64) -> u64 {
        0
    }

    fn advance_frames(&mut self, _frames: u64) -> u64 {
        0
    }

    fn set_max_frame_count(&mut self, max_frames: u64) -> Result<(), PlaybackError> {
        if max_frames != 1 {
            debug!(max_frames, "single-frame history ignores capacity change");
        }
        Ok(())
    }

    fn past_frames_available(&self) -> u64 {
        0
    }

    fn future_frames_available(&self) -> u64 {
        0
    }

    fn max_frame_count(&self) -> u64 {
        1
    }

    fn memory_usage(&self) -> usize {
        self.frame.capacity()
    }
}
