pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod server;
pub mod storage;
pub mod validate;

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};
use crate::error::StorageError;
use crate::model::LocationRecord;
use crate::storage::DataFile;

/// The record store. Owns the backing file and is its only reader and
/// writer inside the process.
///
/// Every operation works on the whole collection. The mutex serialises the
/// load/append/save cycle so concurrent ingests never lose an update.
pub struct TrailDb {
    data_file: Mutex<DataFile>,
}

impl fmt::Debug for TrailDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrailDb")
        .field("data_file", &self.data_file)
        .finish()
    }
}

impl TrailDb {
    /// Opens the store at `path`, creating an empty collection if needed.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = Self {
            data_file: Mutex::new(DataFile::new(path)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Idempotent: an existing file is left as it is, even if corrupt.
    pub fn initialize(&self) -> Result<(), StorageError> {
        let file = self.lock();
        if file.initialize()? {
            info!("Created empty store at {}", file.file_path.display());
        }
        Ok(())
    }

    /// Reads the whole collection. Unreadable or corrupt content yields an
    /// empty collection so queries degrade to "no data".
    pub fn load_all(&self) -> Vec<LocationRecord> {
        Self::load_from(&self.lock())
    }

    /// Overwrites the whole collection. Failures are logged, never raised.
    pub fn save_all(&self, rows: &[LocationRecord]) -> bool {
        Self::save_to(&self.lock(), rows)
    }

    /// Adds `record` at the end. Rows already on disk are written back
    /// verbatim, including ones `load_all` skips.
    pub fn append(&self, record: LocationRecord) -> bool {
        let file = self.lock();
        let mut rows = file.read_rows().unwrap_or_else(|e| {
            warn!("Treating store as empty: {}", e);
            Vec::new()
        });

        match serde_json::to_value(&record) {
            Ok(row) => rows.push(row),
            Err(e) => {
                error!("Could not encode record: {}", e);
                return false;
            }
        }
        Self::save_to(&file, &rows)
    }

    /// Most recent record of `user_id`, by insertion order.
    pub fn latest(&self, user_id: &str) -> Option<LocationRecord> {
        self.load_all().into_iter().rev().find(|r| r.belongs_to(user_id))
    }

    /// Every record of `user_id` in insertion order.
    pub fn history(&self, user_id: &str) -> Vec<LocationRecord> {
        self.load_all().into_iter().filter(|r| r.belongs_to(user_id)).collect()
    }

    fn load_from(file: &DataFile) -> Vec<LocationRecord> {
        file.read().unwrap_or_else(|e| {
            warn!("Treating store as empty: {}", e);
            Vec::new()
        })
    }

    fn save_to<T: Serialize>(file: &DataFile, rows: &[T]) -> bool {
        match file.write(rows) {
            Ok(()) => true,
            Err(e) => {
                error!("Store write failed: {}", e);
                false
            }
        }
    }

    // The guarded value is only a path, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, DataFile> {
        self.data_file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
