//! File-backed savestate gateway
//!
//! Each savestate is a `.rpsav` file (see [`SavestateFile`]) with an optional
//! `.png` thumbnail beside it, indexed by the [`SavestateDatabase`] in the same
//! directory.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::emulator::GameInfo;
use crate::error::SavestateError;
use crate::settings::SavestateConfig;

use super::{
    SavestateDatabase, SavestateFile, SavestateGateway, SavestateMetadata, SavestateReader,
    SavestateWriter, savestate_file_name,
};

pub const SAVESTATE_EXTENSION: &str = "rpsav";

/// RGBA8 preview image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 pixels, `width * height * 4` bytes
    pub rgba: Vec<u8>,
}

/// Source of savestate thumbnails (usually the video output)
pub trait ThumbnailSource: Send + Sync {
    fn capture_thumbnail(&self) -> Option<Thumbnail>;
}

/// Gateway writing savestates to a directory
#[derive(Clone)]
pub struct FileSavestateGateway {
    directory: PathBuf,
    compress: bool,
    database: Arc<Mutex<SavestateDatabase>>,
    thumbnails: Option<Arc<dyn ThumbnailSource>>,
}

impl FileSavestateGateway {
    /// Open a gateway on `directory`, creating it if needed
    pub fn open(directory: impl Into<PathBuf>, compress: bool) -> Result<Self, SavestateError> {
        let directory = directory.into();
        let database = SavestateDatabase::open(&directory)?;
        info!(dir = %directory.display(), compress, "savestate gateway ready");
        Ok(Self {
            directory,
            compress,
            database: Arc::new(Mutex::new(database)),
            thumbnails: None,
        })
    }

    pub fn from_config(config: &SavestateConfig) -> Result<Self, SavestateError> {
        Self::open(config.resolved_directory(), config.compress)
    }

    /// Attach a thumbnail source used by every writer
    pub fn with_thumbnail_source(mut self, source: Arc<dyn ThumbnailSource>) -> Self {
        self.thumbnails = Some(source);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Shared handle to the savestate index
    pub fn database(&self) -> Arc<Mutex<SavestateDatabase>> {
        self.database.clone()
    }
}

impl SavestateGateway for FileSavestateGateway {
    fn create_writer(&self) -> Box<dyn SavestateWriter> {
        Box::new(FileSavestateWriter {
            directory: self.directory.clone(),
            compress: self.compress,
            database: self.database.clone(),
            thumbnails: self.thumbnails.clone(),
            metadata: None,
            path: None,
            written: Vec::new(),
            committed: false,
        })
    }

    fn create_reader(&self) -> Box<dyn SavestateReader> {
        Box::new(FileSavestateReader {
            directory: self.directory.clone(),
            file: None,
        })
    }
}

impl std::fmt::Debug for FileSavestateGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSavestateGateway")
            .field("directory", &self.directory)
            .field("compress", &self.compress)
            .field("thumbnails", &self.thumbnails.is_some())
            .finish()
    }
}

/// Writer for a single savestate file
pub struct FileSavestateWriter {
    directory: PathBuf,
    compress: bool,
    database: Arc<Mutex<SavestateDatabase>>,
    thumbnails: Option<Arc<dyn ThumbnailSource>>,
    metadata: Option<SavestateMetadata>,
    path: Option<PathBuf>,
    /// Files created by this transaction
    written: Vec<PathBuf>,
    committed: bool,
}

impl FileSavestateWriter {
    fn staged(&self) -> Result<(&Path, &SavestateMetadata), SavestateError> {
        match (&self.path, &self.metadata) {
            (Some(path), Some(metadata)) => Ok((path, metadata)),
            _ => Err(SavestateError::NotInitialized),
        }
    }

    fn write_thumbnail_file(
        &self,
        path: &Path,
        thumbnail: &Thumbnail,
    ) -> Result<(), SavestateError> {
        let file = File::create(path)?;
        let mut encoder =
            png::Encoder::new(BufWriter::new(file), thumbnail.width, thumbnail.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&thumbnail.rgba)?;
        writer.finish()?;
        Ok(())
    }
}

impl SavestateWriter for FileSavestateWriter {
    fn initialize(
        &mut self,
        game: &GameInfo,
        fps: f64,
        frame_history_count: u64,
    ) -> Result<(), SavestateError> {
        fs::create_dir_all(&self.directory)?;

        let metadata = SavestateMetadata::new(game, fps, frame_history_count);
        let base = savestate_file_name(&metadata.game_file_name, &metadata.created);
        let mut path = self.directory.join(&base);
        let mut suffix = 1;
        while path.exists() {
            let stem = base.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
            path = self
                .directory
                .join(format!("{stem}_{suffix}.{SAVESTATE_EXTENSION}"));
            suffix += 1;
        }

        debug!(path = %path.display(), frames = frame_history_count, "savestate staged");
        self.metadata = Some(metadata);
        self.path = Some(path);
        Ok(())
    }

    fn write_save(&mut self, frame: &[u8]) -> Result<(), SavestateError> {
        let (path, metadata) = self.staged()?;
        let path = path.to_path_buf();
        let file = SavestateFile::new(metadata.clone(), frame.to_vec());

        // Write to a temp file, then rename into place
        let temp = path.with_extension(format!("{SAVESTATE_EXTENSION}.tmp"));
        let result = File::create(&temp)
            .map_err(SavestateError::from)
            .and_then(|out| file.write_to(BufWriter::new(out), self.compress))
            .and_then(|()| fs::rename(&temp, &path).map_err(SavestateError::from));
        if let Err(e) = result {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }

        self.written.push(path);
        Ok(())
    }

    fn write_thumbnail(&mut self) {
        let Some(source) = self.thumbnails.clone() else {
            return;
        };
        let Some(path) = self.path.as_ref().map(|p| p.with_extension("png")) else {
            return;
        };
        let Some(thumbnail) = source.capture_thumbnail() else {
            debug!("no thumbnail available");
            return;
        };

        let expected = thumbnail.width as usize * thumbnail.height as usize * 4;
        if thumbnail.rgba.len() != expected {
            warn!(
                expected,
                actual = thumbnail.rgba.len(),
                "thumbnail has wrong pixel buffer size, skipping"
            );
            return;
        }

        match self.write_thumbnail_file(&path, &thumbnail) {
            Ok(()) => self.written.push(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to write savestate thumbnail");
                let _ = fs::remove_file(&path);
            }
        }
    }

    fn commit_to_database(&mut self) -> Result<(), SavestateError> {
        let (path, metadata) = self.staged()?;
        if !path.exists() {
            return Err(SavestateError::NotFound(path.to_path_buf()));
        }
        self.database
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add(path, metadata.clone())?;
        info!(path = %path.display(), "savestate committed");
        self.committed = true;
        Ok(())
    }

    fn clean_up_transaction(&mut self) {
        if self.committed {
            if let Some(path) = &self.path {
                let mut database = self.database.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = database.delete(path) {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove savestate from database"
                    );
                }
            }
            self.committed = false;
        }
        for path in self.written.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed uncommitted savestate file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove savestate file")
                }
            }
        }
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Reader for a single savestate file
pub struct FileSavestateReader {
    directory: PathBuf,
    file: Option<SavestateFile>,
}

impl FileSavestateReader {
    /// Metadata of the loaded savestate
    pub fn metadata(&self) -> Option<&SavestateMetadata> {
        self.file.as_ref().map(|file| &file.metadata)
    }
}

impl SavestateReader for FileSavestateReader {
    fn initialize(&mut self, path: &Path, game: &GameInfo) -> Result<(), SavestateError> {
        self.file = None;
        let path = if path.is_relative() {
            self.directory.join(path)
        } else {
            path.to_path_buf()
        };

        let handle = match File::open(&path) {
            Ok(handle) => handle,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SavestateError::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        let file = SavestateFile::read_from(BufReader::new(handle))?;

        if !game.game_path.is_empty() && file.metadata.game_path != game.game_path {
            warn!(
                saved = %file.metadata.game_path,
                running = %game.game_path,
                "savestate was made for a different game"
            );
        }
        debug!(path = %path.display(), frames = file.metadata.timestamp_frames, "savestate opened");
        self.file = Some(file);
        Ok(())
    }

    fn read_save(&mut self, frame: &mut [u8]) -> Result<(), SavestateError> {
        let file = self.file.as_ref().ok_or(SavestateError::NotInitialized)?;
        if file.frame.len() != frame.len() {
            return Err(SavestateError::SizeMismatch {
                expected: frame.len(),
                actual: file.frame.len(),
            });
        }
        frame.copy_from_slice(&file.frame);
        Ok(())
    }

    fn frame_count(&self) -> u64 {
        self.file
            .as_ref()
            .map_or(0, |file| file.metadata.timestamp_frames)
    }
}
