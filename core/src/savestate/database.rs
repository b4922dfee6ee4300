//! JSON index of committed savestates
//!
//! Lives next to the savestate files as `savestates.json`, keyed by file name
//! relative to the savestate directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SavestateError;

use super::SavestateMetadata;

pub const DATABASE_FILE_NAME: &str = "savestates.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseFile {
    #[serde(default)]
    savestates: HashMap<String, SavestateMetadata>,
}

/// Index of savestates in one directory
#[derive(Debug)]
pub struct SavestateDatabase {
    directory: PathBuf,
    entries: HashMap<String, SavestateMetadata>,
}

impl SavestateDatabase {
    /// Open the database in `directory`, creating the directory if needed
    ///
    /// A missing index starts empty. A corrupt index is logged and replaced
    /// on the next write.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, SavestateError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let index = directory.join(DATABASE_FILE_NAME);
        let entries = match fs::read(&index) {
            Ok(bytes) => match serde_json::from_slice::<DatabaseFile>(&bytes) {
                Ok(file) => file.savestates,
                Err(e) => {
                    warn!(
                        path = %index.display(),
                        error = %e,
                        "corrupt savestate index, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(entries = entries.len(), dir = %directory.display(), "opened savestate database");
        Ok(Self { directory, entries })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a savestate file
    pub fn add(&mut self, path: &Path, metadata: SavestateMetadata) -> Result<(), SavestateError> {
        self.entries.insert(self.key(path), metadata);
        self.persist()
    }

    pub fn get(&self, path: &Path) -> Option<&SavestateMetadata> {
        self.entries.get(&self.key(path))
    }

    /// Savestates for a game, newest first
    ///
    /// With `core_id` set, only savestates made by that core are returned.
    pub fn list_for_game(
        &self,
        game_path: &str,
        core_id: Option<&str>,
    ) -> Vec<(PathBuf, SavestateMetadata)> {
        let mut found: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, meta)| meta.game_path == game_path)
            .filter(|(_, meta)| core_id.is_none_or(|id| meta.core_id == id))
            .map(|(key, meta)| (self.directory.join(key), meta.clone()))
            .collect();
        found.sort_by(|a, b| b.1.created.cmp(&a.1.created).then_with(|| a.0.cmp(&b.0)));
        found
    }

    /// Change the label of a savestate
    pub fn rename(&mut self, path: &Path, label: &str) -> Result<(), SavestateError> {
        let key = self.key(path);
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| SavestateError::NotFound(path.to_path_buf()))?;
        entry.label = label.to_string();
        self.persist()
    }

    /// Remove a savestate and its files
    pub fn delete(&mut self, path: &Path) -> Result<(), SavestateError> {
        let key = self.key(path);
        if self.entries.remove(&key).is_none() {
            return Err(SavestateError::NotFound(path.to_path_buf()));
        }
        let file = self.directory.join(&key);
        remove_if_exists(&file)?;
        remove_if_exists(&file.with_extension("png"))?;
        self.persist()
    }

    /// Remove every savestate for a game
    ///
    /// Returns the number of savestates removed.
    pub fn clear_for_game(&mut self, game_path: &str) -> Result<usize, SavestateError> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, meta)| meta.game_path == game_path)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.entries.remove(key);
            let file = self.directory.join(key);
            remove_if_exists(&file)?;
            remove_if_exists(&file.with_extension("png"))?;
        }
        if !keys.is_empty() {
            self.persist()?;
        }
        Ok(keys.len())
    }

    fn key(&self, path: &Path) -> String {
        path.strip_prefix(&self.directory)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    fn persist(&self) -> Result<(), SavestateError> {
        let file = DatabaseFile {
            savestates: self.entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        let index = self.directory.join(DATABASE_FILE_NAME);
        let temp = index.with_extension("json.tmp");
        {
            let mut out = fs::File::create(&temp)?;
            out.write_all(&bytes)?;
            out.sync_all()?;
        }
        fs::rename(&temp, &index)?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), SavestateError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
