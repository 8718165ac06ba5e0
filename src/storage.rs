use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use crate::error::StorageError;
use crate::model::LocationRecord;

/// The JSON array file holding every record. Reads and writes always cover
/// the whole collection.
#[derive(Debug)]
pub struct DataFile {
    pub file_path: PathBuf,
}

impl DataFile {
    pub fn new(path: &Path) -> Self {
        Self {
            file_path: path.to_path_buf(),
        }
    }

    /// Creates the parent directory and an empty collection if the file is
    /// missing. Existing content is never touched. Returns whether the file
    /// was created.
    pub fn initialize(&self) -> Result<bool, StorageError> {
        if let Some(parent) = self.file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.write_error(source))?;
        }

        // create_new so two processes starting together cannot clobber each other
        match OpenOptions::new().write(true).create_new(true).open(&self.file_path) {
            Ok(mut file) => {
                file.write_all(b"[]").map_err(|source| self.write_error(source))?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(source) => Err(self.write_error(source)),
        }
    }

    /// Every row as it sits in the file, whether or not it is a valid record.
    pub fn read_rows(&self) -> Result<Vec<Value>, StorageError> {
        let content = fs::read_to_string(&self.file_path).map_err(|source| StorageError::Read {
            path: self.file_path.clone(),
            source,
        })?;

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|source| StorageError::Corrupt {
            path: self.file_path.clone(),
            source,
        })
    }

    /// Rows that do not fit `LocationRecord` are skipped one by one; the
    /// rest of the collection is still returned.
    pub fn read(&self) -> Result<Vec<LocationRecord>, StorageError> {
        let rows = self.read_rows()?;

        Ok(rows
            .into_iter()
            .enumerate()
            .filter_map(|(index, row)| match serde_json::from_value(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping row {} of {}: {}", index, self.file_path.display(), e);
                    None
                }
            })
            .collect())
    }

    /// Replaces the whole file. The new content goes to a sibling `.tmp`
    /// file first and is renamed into place.
    pub fn write<T: Serialize>(&self, rows: &[T]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(rows)?;
        let tmp_path = self.tmp_path();

        fs::write(&tmp_path, &bytes).map_err(|source| self.write_error(source))?;
        fs::rename(&tmp_path, &self.file_path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            self.write_error(source)
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.file_path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.file_path.with_file_name(name)
    }

    fn write_error(&self, source: io::Error) -> StorageError {
        StorageError::Write {
            path: self.file_path.clone(),
            source,
        }
    }
}
