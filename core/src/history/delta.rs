//! Delta-pair compressed rewind buffer
//!
//! Only the current frame is kept in full. Every other retained frame is stored
//! as the XOR difference between it and its neighbour, recorded sparsely as
//! `(word index, xor value)` pairs. Because XOR is its own inverse, the same
//! delta moves the cursor in either direction:
//!
//! ```text
//! past:    [d0 d1 d2]        d2 = frame(n-1) ^ frame(n)
//! current: frame(n)
//! future:  [d4 d3]           d3 = frame(n) ^ frame(n+1), last entry is next
//! ```
//!
//! Rewinding pops from the back of `past`, applies it to the current frame and
//! pushes it onto `future`. Advancing does the reverse.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::error::PlaybackError;

use super::pool::DeltaPool;
use super::{FrameHistory, alloc_frame};

/// Width of one compared word in bytes
const WORD_SIZE: usize = 4;

/// One changed word between two neighbouring frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaPair {
    /// Index of the word within the frame
    pub word: u32,
    /// XOR of the old and new word
    pub xor: u32,
}

/// Rewind buffer holding up to `max_frames` frames as a reference frame plus deltas
#[derive(Debug)]
pub struct DeltaFrameHistory {
    frame_size: usize,
    max_frames: u64,
    /// Reconstructed frame at the cursor
    current: Vec<u8>,
    has_current: bool,
    /// Staging buffer handed out by `begin_frame`
    staging: Vec<u8>,
    /// Deltas behind the cursor, oldest first
    past: VecDeque<Vec<DeltaPair>>,
    /// Deltas ahead of the cursor, nearest last
    future: Vec<Vec<DeltaPair>>,
    pool: DeltaPool,
}

impl DeltaFrameHistory {
    /// Allocate a rewind buffer for `max_frames` frames of `frame_size` bytes
    ///
    /// Reserves the reference and staging frames plus `max_frames - 1` delta
    /// slots up front.
    pub fn new(frame_size: usize, max_frames: u64) -> Result<Self, PlaybackError> {
        let max_frames = max_frames.max(1);
        let current = alloc_frame(frame_size)?;
        let staging = alloc_frame(frame_size)?;

        let slots = delta_slots(max_frames);
        let mut past = VecDeque::new();
        past.try_reserve_exact(slots)
            .map_err(|_| PlaybackError::Allocation {
                bytes: slots.saturating_mul(std::mem::size_of::<Vec<DeltaPair>>()),
            })?;

        debug!(frame_size, max_frames, "allocated delta frame history");

        Ok(Self {
            frame_size,
            max_frames,
            current,
            has_current: false,
            staging,
            past,
            future: Vec::new(),
            pool: DeltaPool::default(),
        })
    }

    fn retained(&self) -> u64 {
        self.past.len() as u64 + self.future.len() as u64 + u64::from(self.has_current)
    }

    /// Drop frames until the retained count fits the capacity
    ///
    /// The oldest past frames go first, then the furthest future frames. The
    /// current frame is never dropped.
    fn trim_to_capacity(&mut self) {
        while self.retained() > self.max_frames {
            if let Some(delta) = self.past.pop_front() {
                self.pool.release(delta);
            } else if !self.future.is_empty() {
                let delta = self.future.remove(0);
                self.pool.release(delta);
            } else {
                break;
            }
        }
    }

    fn clear_future(&mut self) {
        for delta in self.future.drain(..) {
            self.pool.release(delta);
        }
    }
}

impl FrameHistory for DeltaFrameHistory {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn begin_frame(&mut self) -> &mut [u8] {
        &mut self.staging
    }

    fn submit_frame(&mut self) {
        self.clear_future();

        if self.has_current {
            let mut delta = self.pool.acquire();
            diff_frames(&self.current, &self.staging, &mut delta);
            self.past.push_back(delta);
        }

        std::mem::swap(&mut self.current, &mut self.staging);
        self.has_current = true;

        self.trim_to_capacity();
        trace!(past = self.past.len(), "submitted frame");
    }

    fn current_frame(&self) -> Option<&[u8]> {
        self.has_current.then_some(self.current.as_slice())
    }

    fn rewind_frames(&mut self, frames: u64) -> u64 {
        let count = frames.min(self.past.len() as u64);
        for _ in 0..count {
            if let Some(delta) = self.past.pop_back() {
                apply_delta(&mut self.current, &delta);
                self.future.push(delta);
            }
        }
        count
    }

    fn advance_frames(&mut self, frames: u64) -> u64 {
        let count = frames.min(self.future.len() as u64);
        for _ in 0..count {
            if let Some(delta) = self.future.pop() {
                apply_delta(&mut self.current, &delta);
                self.past.push_back(delta);
            }
        }
        count
    }

    fn set_max_frame_count(&mut self, max_frames: u64) -> Result<(), PlaybackError> {
        let max_frames = max_frames.max(1);
        if max_frames == self.max_frames {
            return Ok(());
        }

        let slots = delta_slots(max_frames);
        if slots > self.past.capacity() {
            self.past
                .try_reserve_exact(slots - self.past.len())
                .map_err(|_| PlaybackError::Allocation {
                    bytes: slots.saturating_mul(std::mem::size_of::<Vec<DeltaPair>>()),
                })?;
        }

        debug!(from = self.max_frames, to = max_frames, "resizing delta frame history");
        self.max_frames = max_frames;
        self.trim_to_capacity();
        if slots < self.past.capacity() / 2 {
            self.past.shrink_to(slots);
        }
        Ok(())
    }

    fn past_frames_available(&self) -> u64 {
        self.past.len() as u64
    }

    fn future_frames_available(&self) -> u64 {
        self.future.len() as u64
    }

    fn max_frame_count(&self) -> u64 {
        self.max_frames
    }

    fn memory_usage(&self) -> usize {
        let delta_bytes = |d: &Vec<DeltaPair>| d.capacity() * std::mem::size_of::<DeltaPair>();
        self.current.capacity()
            + self.staging.capacity()
            + self.past.iter().map(delta_bytes).sum::<usize>()
            + self.future.iter().map(delta_bytes).sum::<usize>()
            + self.pool.memory_usage()
    }
}

fn delta_slots(max_frames: u64) -> usize {
    usize::try_from(max_frames.saturating_sub(1)).unwrap_or(usize::MAX)
}

fn load_word(chunk: &[u8]) -> u32 {
    let mut bytes = [0u8; WORD_SIZE];
    bytes[..chunk.len()].copy_from_slice(chunk);
    u32::from_le_bytes(bytes)
}

/// Record every word that differs between `from` and `to`
fn diff_frames(from: &[u8], to: &[u8], out: &mut Vec<DeltaPair>) {
    out.clear();
    for (index, (a, b)) in from.chunks(WORD_SIZE).zip(to.chunks(WORD_SIZE)).enumerate() {
        let xor = load_word(a) ^ load_word(b);
        if xor != 0 {
            out.push(DeltaPair {
                word: index as u32,
                xor,
            });
        }
    }
}

/// XOR a delta into `frame`, turning it into its neighbour
fn apply_delta(frame: &mut [u8], delta: &[DeltaPair]) {
    for pair in delta {
        let start = pair.word as usize * WORD_SIZE;
        let end = (start + WORD_SIZE).min(frame.len());
        let Some(target) = frame.get_mut(start..end) else {
            continue;
        };
        for (dst, src) in target.iter_mut().zip(pair.xor.to_le_bytes()) {
            *dst ^= src;
        }
    }
}
