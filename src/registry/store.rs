//! Registry Storage
//!
//! The registry keeps its records in memory and hands the full list to a
//! `RegistryStore` after every mutation. Two backends exist:
//! - `JsonFileStore`: one JSON document on disk, replaced atomically
//! - `MemoryStore`: process-local, used by tests and throwaway setups

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use super::record::ContainerRecord;
use crate::error_handling::types::StorageError;

const DOCUMENT_VERSION: u32 = 1;

/// Persistence backend for the registry.
pub trait RegistryStore: Send + Sync {
    /// Loads every stored record. A store that was never written yields an empty list.
    fn load(&self) -> Result<Vec<ContainerRecord>, StorageError>;

    /// Replaces the stored records with `records`.
    ///
    /// Either the whole new list becomes visible or the previous one stays.
    fn save(&self, records: &[ContainerRecord]) -> Result<(), StorageError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    version: u32,
    records: Vec<ContainerRecord>,
}

/// Stores the registry as a single pretty-printed JSON document.
///
/// Writes go to a temp file in the same directory, are fsynced, then renamed
/// over the document, so a reader never sees a partial write.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl RegistryStore for JsonFileStore {
    fn load(&self) -> Result<Vec<ContainerRecord>, StorageError> {
        if !self.path.exists() {
            info!(
                "No registry document at {}, starting empty",
                self.path.display()
            );
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| StorageError::ReadFailed(format!("{}: {}", self.path.display(), e)))?;
        let document: RegistryDocument = serde_json::from_str(&content)
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", self.path.display(), e)))?;
        if document.version != DOCUMENT_VERSION {
            return Err(StorageError::Corrupt(format!(
                "{}: unsupported document version {}",
                self.path.display(),
                document.version
            )));
        }

        debug!(
            "Loaded {} record(s) from {}",
            document.records.len(),
            self.path.display()
        );
        Ok(document.records)
    }

    fn save(&self, records: &[ContainerRecord]) -> Result<(), StorageError> {
        let dir = self.directory();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", dir.display(), e)))?;

        let document = RegistryDocument {
            version: DOCUMENT_VERSION,
            records: records.to_vec(),
        };

        let mut temp = NamedTempFile::new_in(&dir)
            .map_err(|e| StorageError::WriteFailed(format!("temp file: {}", e)))?;
        serde_json::to_writer_pretty(&mut temp, &document)
            .map_err(|e| StorageError::WriteFailed(format!("serialize: {}", e)))?;
        temp.write_all(b"\n")
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| StorageError::WriteFailed(format!("flush: {}", e)))?;
        temp.persist(&self.path)
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", self.path.display(), e.error)))?;

        debug!(
            "Persisted {} record(s) to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// In-memory store. Can be told to fail writes to exercise rollback paths.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<ContainerRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ContainerRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Records as last persisted.
    pub fn snapshot(&self) -> Vec<ContainerRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl RegistryStore for MemoryStore {
    fn load(&self) -> Result<Vec<ContainerRecord>, StorageError> {
        Ok(self.snapshot())
    }

    fn save(&self, records: &[ContainerRecord]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("memory store write disabled".into()));
        }
        *self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = records.to_vec();
        Ok(())
    }
}
