use crate::history::FrameHistory;

/// Playback position and buffer statistics derived from the frame history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Frames behind the cursor
    pub past_frames: u64,
    /// Frames ahead of the cursor (rewound past, available to redo)
    pub future_frames: u64,
    /// Position within the rewind window
    pub played_ms: u64,
    /// Length of the rewind window
    pub total_ms: u64,
    /// Time available ahead of the cursor
    pub cached_ms: u64,
}

impl PlaybackStats {
    /// Recompute statistics from `history` at `fps`
    pub fn from_history(history: &dyn FrameHistory, fps: f64) -> Self {
        let past_frames = history.past_frames_available();
        let future_frames = history.future_frames_available();
        let played = past_frames + u64::from(history.current_frame().is_some());

        Self {
            past_frames,
            future_frames,
            played_ms: frames_to_ms(played, fps),
            total_ms: frames_to_ms(history.max_frame_count(), fps),
            cached_ms: frames_to_ms(future_frames, fps),
        }
    }
}

/// `round(1000 * frames / fps)`
pub fn frames_to_ms(frames: u64, fps: f64) -> u64 {
    if fps <= 0.0 {
        return 0;
    }
    (1000.0 * frames as f64 / fps).round() as u64
}

/// Signed frame offset covering `offset_ms` at `fps`
pub fn ms_to_frames(offset_ms: i64, fps: f64) -> i64 {
    (offset_ms as f64 / 1000.0 * fps).round() as i64
}
