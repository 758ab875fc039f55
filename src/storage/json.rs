//! JSON-file class store.
//!
//! Layout: one `<class-slug>.json` file per entity class under a directory,
//! each holding a JSON array of entities. Files are replaced with
//! write-to-temp, fsync, rename so a crash never leaves a torn class file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::entity::{Entity, EntityType};

use super::{ClassStore, StorageError};

const TEMP_MARKER: &str = ".tmp.";

/// Atomic file replacement.
///
/// Bytes go to a uniquely named sibling temp file; [`CheckpointWriter::commit`]
/// flushes, fsyncs and renames it over the target. Dropping the writer
/// without committing removes the temp file.
pub struct CheckpointWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl CheckpointWriter {
    /// Opens a temp file next to `final_path`.
    pub fn new(final_path: PathBuf) -> IoResult<Self> {
        let extension = final_path
            .extension()
            .map_or_else(String::new, |ext| ext.to_string_lossy().into_owned());
        let temp_path = final_path.with_extension(format!("{extension}{TEMP_MARKER}{}", Uuid::new_v4()));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        Ok(Self {
            temp_path: Some(temp_path),
            final_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Appends bytes to the temp file.
    pub fn write_all(&mut self, bytes: &[u8]) -> IoResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "writer already consumed"))?;
        writer.write_all(bytes)
    }

    /// Flush, fsync, rename. After this returns the new content is durable.
    pub fn commit(mut self) -> IoResult<PathBuf> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "writer already consumed"))?;
        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "temp_path already consumed"))?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        if let Err(e) = fs::rename(&temp_path, &self.final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(self.final_path.clone())
    }
}

impl Drop for CheckpointWriter {
    fn drop(&mut self) {
        self.writer.take();
        if let Some(ref temp_path) = self.temp_path {
            if temp_path.exists() {
                let _ = fs::remove_file(temp_path);
            }
        }
    }
}

/// Replaces `path` with `bytes` atomically.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut writer = CheckpointWriter::new(path.to_path_buf())?;
    writer.write_all(bytes)?;
    writer.commit()?;
    Ok(())
}

/// Removes temp files left behind by a crash mid-write.
fn cleanup_stale_temp_files(dir: &Path) -> IoResult<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(TEMP_MARKER));
        if is_temp && path.is_file() {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// [`ClassStore`] writing one JSON array file per class.
#[derive(Debug, Clone)]
pub struct JsonClassStore {
    dir: PathBuf,
}

impl JsonClassStore {
    /// Opens (creating if needed) a checkpoint directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let removed = cleanup_stale_temp_files(&dir)?;
        if removed > 0 {
            warn!(dir = %dir.display(), removed, "removed stale checkpoint temp files");
        }
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the checkpoint file for a class.
    #[must_use]
    pub fn class_path(&self, class: &EntityType) -> PathBuf {
        self.dir.join(format!("{}.json", class.slug()))
    }

    fn read_file(path: &Path) -> Result<Vec<Entity>, StorageError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let entities: Vec<Entity> = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::SerializationError(format!("{}: {e}", path.display())))?;
        for entity in &entities {
            entity
                .validate()
                .map_err(|e| StorageError::SerializationError(format!("{}: {e}", path.display())))?;
        }
        Ok(entities)
    }
}

impl ClassStore for JsonClassStore {
    fn load_class(&self, class: &EntityType) -> Result<Vec<Entity>, StorageError> {
        let path = self.class_path(class);
        let entities = Self::read_file(&path)?;
        debug!(class = %class, count = entities.len(), "loaded class checkpoint");
        Ok(entities)
    }

    fn save_class(&self, class: &EntityType, entities: &[Entity]) -> Result<(), StorageError> {
        let bytes =
            serde_json::to_vec_pretty(entities).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        write_atomic(&self.class_path(class), &bytes)?;
        debug!(class = %class, count = entities.len(), "saved class checkpoint");
        Ok(())
    }

    fn list_classes(&self) -> Result<Vec<EntityType>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut classes = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_checkpoint = path.extension().is_some_and(|ext| ext == "json")
                && !path.to_string_lossy().contains(TEMP_MARKER);
            if !is_checkpoint {
                continue;
            }
            // The class tag lives in the records; file names are lossy slugs.
            if let Some(first) = Self::read_file(&path)?.first() {
                if !classes.contains(&first.entity_type) {
                    classes.push(first.entity_type.clone());
                }
            }
        }
        classes.sort();
        Ok(classes)
    }
}
