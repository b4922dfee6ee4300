//! Check-out / check-in slot for the shared frame history
//!
//! The playback controller keeps its history in a slot guarded by the
//! controller lock. Operations that must call into the core (serialize,
//! deserialize) check the store out, release the lock, do the slow work, and
//! check the store back in. While the store is out, other lock holders see no
//! history and carry on.
//!
//! Settings changes that arrive while the store is checked out are recorded as
//! the target capacity and applied when the store comes back.

use tracing::{debug, info};

use crate::error::PlaybackError;

use super::{DeltaFrameHistory, FrameHistory};

/// Owner of the shared frame history
pub struct HistorySlot {
    store: Option<Box<dyn FrameHistory>>,
    checked_out: bool,
    /// Desired capacity, or `None` when rewind is disabled
    target: Option<u64>,
    frame_size: usize,
}

impl HistorySlot {
    /// Create an empty slot for frames of `frame_size` bytes
    pub fn new(frame_size: usize) -> Self {
        Self {
            store: None,
            checked_out: false,
            target: None,
            frame_size,
        }
    }

    /// Set the desired capacity (`None` disables history)
    ///
    /// Applied immediately unless the store is checked out, in which case it
    /// is applied at check-in. On allocation failure the history is dropped
    /// and rewind stays disabled until the next successful reconfiguration.
    pub fn configure(&mut self, target: Option<u64>) -> Result<(), PlaybackError> {
        self.target = target;
        if self.checked_out {
            debug!(?target, "history checked out, deferring reconfiguration");
            return Ok(());
        }
        self.apply_target()
    }

    /// Take the store out of the slot
    ///
    /// Returns `None` if there is no history or it is already checked out.
    pub fn check_out(&mut self) -> Option<Box<dyn FrameHistory>> {
        let store = self.store.take()?;
        self.checked_out = true;
        Some(store)
    }

    /// Return a store previously taken with [`check_out`](Self::check_out)
    ///
    /// Any reconfiguration requested meanwhile is applied now.
    pub fn check_in(&mut self, store: Box<dyn FrameHistory>) -> Result<(), PlaybackError> {
        self.checked_out = false;
        self.store = Some(store);
        self.apply_target()
    }

    /// Drop the history and disable it
    pub fn release(&mut self) {
        self.target = None;
        self.store = None;
    }

    /// The store, if present and not checked out
    pub fn get(&self) -> Option<&dyn FrameHistory> {
        self.store.as_deref()
    }

    /// Mutable access to the store, if present and not checked out
    pub fn get_mut(&mut self) -> Option<&mut (dyn FrameHistory + 'static)> {
        self.store.as_deref_mut()
    }

    /// Whether the store is currently checked out
    pub fn is_checked_out(&self) -> bool {
        self.checked_out
    }

    /// Whether history is configured on
    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    fn apply_target(&mut self) -> Result<(), PlaybackError> {
        let Some(capacity) = self.target else {
            if self.store.take().is_some() {
                info!("rewind disabled, frame history released");
            }
            return Ok(());
        };

        let result = match self.store.as_mut() {
            Some(store) if store.max_frame_count() != capacity => {
                store.set_max_frame_count(capacity)
            }
            Some(_) => Ok(()),
            None => match DeltaFrameHistory::new(self.frame_size, capacity) {
                Ok(store) => {
                    info!(
                        frames = capacity,
                        frame_size = self.frame_size,
                        "rewind enabled, frame history allocated"
                    );
                    self.store = Some(Box::new(store));
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        if result.is_err() {
            self.store = None;
            self.target = None;
        }
        result
    }
}

impl std::fmt::Debug for HistorySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistorySlot")
            .field("present", &self.store.is_some())
            .field("checked_out", &self.checked_out)
            .field("target", &self.target)
            .field("frame_size", &self.frame_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(store: &mut dyn FrameHistory, value: u32) {
        store.begin_frame().copy_from_slice(&value.to_le_bytes());
        store.submit_frame();
    }

    #[test]
    fn test_disabled_slot_has_no_store() {
        let mut slot = HistorySlot::new(4);
        slot.configure(None).unwrap();
        assert!(slot.get().is_none());
        assert!(slot.check_out().is_none());
        assert!(!slot.is_enabled());
    }

    #[test]
    fn test_enabling_allocates_store() {
        let mut slot = HistorySlot::new(4);
        slot.configure(Some(600)).unwrap();
        assert_eq!(slot.get().map(|s| s.max_frame_count()), Some(600));
    }

    #[test]
    fn test_resize_keeps_history() {
        let mut slot = HistorySlot::new(4);
        slot.configure(Some(600)).unwrap();
        for i in 0..10 {
            submit(slot.get_mut().unwrap(), i);
        }
        slot.configure(Some(1200)).unwrap();
        let store = slot.get().unwrap();
        assert_eq!(store.max_frame_count(), 1200);
        assert_eq!(store.past_frames_available(), 9);
    }

    #[test]
    fn test_checked_out_store_is_invisible() {
        let mut slot = HistorySlot::new(4);
        slot.configure(Some(600)).unwrap();

        let store = slot.check_out().unwrap();
        assert!(slot.is_checked_out());
        assert!(slot.get().is_none());
        assert!(slot.check_out().is_none());

        slot.check_in(store).unwrap();
        assert!(!slot.is_checked_out());
        assert!(slot.get().is_some());
    }

    #[test]
    fn test_disable_while_checked_out_drops_on_check_in() {
        let mut slot = HistorySlot::new(4);
        slot.configure(Some(600)).unwrap();
        let store = slot.check_out().unwrap();

        slot.configure(None).unwrap();
        // No replacement is allocated while the original is out
        assert!(slot.get().is_none());

        slot.check_in(store).unwrap();
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_resize_while_checked_out_applies_on_check_in() {
        let mut slot = HistorySlot::new(4);
        slot.configure(Some(600)).unwrap();
        let mut store = slot.check_out().unwrap();
        submit(store.as_mut(), 1);
        submit(store.as_mut(), 2);

        slot.configure(Some(900)).unwrap();
        slot.check_in(store).unwrap();

        let store = slot.get().unwrap();
        assert_eq!(store.max_frame_count(), 900);
        assert_eq!(store.past_frames_available(), 1);
    }

    #[test]
    fn test_allocation_failure_disables_history() {
        let mut slot = HistorySlot::new(usize::MAX);
        let err = slot.configure(Some(600)).unwrap_err();
        assert!(matches!(err, PlaybackError::Allocation { .. }));
        assert!(slot.get().is_none());
        assert!(!slot.is_enabled());
    }
}
