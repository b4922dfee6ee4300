//! Savestate write transactions

use std::path::PathBuf;

use tracing::debug;

use crate::emulator::GameInfo;
use crate::error::SavestateError;

use super::SavestateWriter;

/// A savestate write that is rolled back unless committed
///
/// Dropping the transaction before [`commit`](Self::commit) succeeds calls
/// [`SavestateWriter::clean_up_transaction`].
pub struct SavestateTransaction {
    writer: Box<dyn SavestateWriter>,
    committed: bool,
}

impl SavestateTransaction {
    /// Start a transaction by initializing `writer`
    pub fn begin(
        writer: Box<dyn SavestateWriter>,
        game: &GameInfo,
        fps: f64,
        frame_history_count: u64,
    ) -> Result<Self, SavestateError> {
        let mut transaction = Self {
            writer,
            committed: false,
        };
        // A failed initialize drops the transaction, which cleans up
        transaction
            .writer
            .initialize(game, fps, frame_history_count)?;
        Ok(transaction)
    }

    pub fn write_save(&mut self, frame: &[u8]) -> Result<(), SavestateError> {
        self.writer.write_save(frame)
    }

    pub fn write_thumbnail(&mut self) {
        self.writer.write_thumbnail();
    }

    /// Commit to the database and return the savestate path
    pub fn commit(mut self) -> Result<PathBuf, SavestateError> {
        let path = self
            .writer
            .path()
            .map(PathBuf::from)
            .ok_or(SavestateError::NotInitialized)?;
        self.writer.commit_to_database()?;
        self.committed = true;
        Ok(path)
    }
}

impl Drop for SavestateTransaction {
    fn drop(&mut self) {
        if !self.committed {
            debug!("rolling back savestate transaction");
            self.writer.clean_up_transaction();
        }
    }
}
