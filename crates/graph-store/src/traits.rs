use std::path::{Path, PathBuf};

use crate::document::{StoreDocument, StoreMetadata};
use crate::error::Result;

/// Access to stores addressed by path.
///
/// The migration engine treats a store as a whole: it loads the document,
/// transforms it, and commits the result in one piece. A commit must be
/// atomic, so a reader observes either the previous document or the new
/// one, never a mix.
///
/// Implementations must be shareable across threads; the executor runs on a
/// background worker while planners query metadata from the caller's thread.
pub trait StoreBackend: Send + Sync {
    /// Whether a store exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Load the full document at `path`.
    fn load(&self, path: &Path) -> Result<StoreDocument>;

    /// Atomically replace the document at `path`.
    fn commit(&self, path: &Path, document: &StoreDocument) -> Result<()>;

    /// Read only the metadata header. Returns `None` if the store does not exist.
    fn read_metadata(&self, path: &Path) -> Result<Option<StoreMetadata>> {
        if !self.exists(path) {
            return Ok(None);
        }
        Ok(Some(self.load(path)?.metadata))
    }
}

/// Snapshot collaborator used to roll back a failed migration.
///
/// The manager owns the lifetime of the snapshots it creates; the executor
/// never deletes one.
pub trait BackupManager: Send + Sync {
    /// Copy the store at `store` somewhere safe and return where.
    fn create_snapshot(&self, store: &Path) -> Result<PathBuf>;

    /// Replace the store at `store` with the snapshot at `backup`.
    fn restore(&self, backup: &Path, store: &Path) -> Result<()>;
}
