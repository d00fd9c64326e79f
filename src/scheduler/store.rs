//! On-disk batch documents.
//!
//! Each batch lives at `<root>/<batch_id>/batch.json` and is always rewritten
//! whole. Writers serialize on a lock shard chosen by hashing the batch id,
//! so the lock set has a fixed size no matter how many batches exist. Every
//! write goes to a temp file first and is renamed into place, which keeps
//! concurrent readers from ever seeing a half-written document.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::BatchError;

use super::job::Batch;

/// Default number of lock shards.
pub const DEFAULT_LOCK_SHARDS: usize = 64;

const DOCUMENT_NAME: &str = "batch.json";

/// Loads and saves batch documents under a root directory.
#[derive(Debug)]
pub struct BatchStore {
    root: PathBuf,
    locks: Vec<Mutex<()>>,
}

impl BatchStore {
    /// Creates a store with the default shard count.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_shards(root, DEFAULT_LOCK_SHARDS)
    }

    /// Creates a store with `shards` lock shards (at least one).
    pub fn with_shards(root: impl Into<PathBuf>, shards: usize) -> Self {
        Self {
            root: root.into(),
            locks: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a batch document.
    pub fn path_for(&self, batch_id: &str) -> PathBuf {
        self.root.join(batch_id).join(DOCUMENT_NAME)
    }

    fn shard_index(&self, batch_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        batch_id.hash(&mut hasher);
        (hasher.finish() % self.locks.len() as u64) as usize
    }

    fn lock(&self, batch_id: &str) -> MutexGuard<'_, ()> {
        self.locks[self.shard_index(batch_id)]
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    /// Reads a batch document without taking the lock.
    ///
    /// # Errors
    ///
    /// `BatchError::NotFound` if the document does not exist,
    /// `BatchError::Corrupt` if it does not parse.
    pub fn load(&self, batch_id: &str) -> Result<Batch, BatchError> {
        let path = self.path_for(batch_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BatchError::NotFound(batch_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|source| BatchError::Corrupt {
            batch_id: batch_id.to_string(),
            source,
        })
    }

    /// Writes a whole batch document under its lock.
    pub fn save(&self, batch: &Batch) -> Result<(), BatchError> {
        let _guard = self.lock(&batch.batch_id);
        self.write(batch)
    }

    /// Reloads, modifies and rewrites a batch under its lock.
    ///
    /// The lock is held across the entire read-modify-write, so concurrent
    /// updates of the same batch never lose each other's changes. When `f`
    /// returns an error nothing is written.
    pub fn update<R, F>(&self, batch_id: &str, f: F) -> Result<R, BatchError>
    where
        F: FnOnce(&mut Batch) -> Result<R, BatchError>,
    {
        let _guard = self.lock(batch_id);
        let mut batch = self.load(batch_id)?;
        let out = f(&mut batch)?;
        self.write(&batch)?;
        Ok(out)
    }

    fn write(&self, batch: &Batch) -> Result<(), BatchError> {
        let path = self.path_for(&batch.batch_id);
        let dir = self.root.join(&batch.batch_id);
        fs::create_dir_all(&dir)?;

        let tmp = dir.join(format!("{}.tmp", DOCUMENT_NAME));
        let json = serde_json::to_string_pretty(batch)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        debug!(batch_id = %batch.batch_id, path = %path.display(), "Saved batch");
        Ok(())
    }
}
