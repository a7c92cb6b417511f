use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::document::StoreDocument;
use crate::error::{Result, StoreError};
use crate::traits::{BackupManager, StoreBackend};

/// In-memory store backend and backup manager.
///
/// All documents and snapshots live in `BTreeMap`s keyed by path; nothing
/// touches disk. Ideal for tests: a wrapper can inject failures around it.
///
/// # Example
///
/// ```
/// use graph_store::{BackupManager, MemoryStore, StoreBackend, StoreDocument};
/// use std::path::Path;
///
/// let store = MemoryStore::new();
/// let path = Path::new("notes.store");
/// store.commit(path, &StoreDocument::default()).unwrap();
///
/// let backup = store.create_snapshot(path).unwrap();
/// assert_eq!(store.snapshot_count(), 1);
/// store.restore(&backup, path).unwrap();
/// ```
pub struct MemoryStore {
    /// Store path -> current document
    documents: Mutex<BTreeMap<PathBuf, StoreDocument>>,
    /// Snapshot path -> document at snapshot time
    snapshots: Mutex<BTreeMap<PathBuf, StoreDocument>>,
    /// Snapshot sequence counter
    next_snapshot: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            snapshots: Mutex::new(BTreeMap::new()),
            next_snapshot: AtomicU64::new(1),
        }
    }

    /// Seed a document without going through `commit`.
    pub fn insert(&self, path: impl Into<PathBuf>, document: StoreDocument) {
        lock(&self.documents).insert(path.into(), document);
    }

    /// Current document at `path`, if any.
    pub fn document(&self, path: &Path) -> Option<StoreDocument> {
        lock(&self.documents).get(path).cloned()
    }

    /// Document captured by a snapshot.
    pub fn snapshot(&self, backup: &Path) -> Option<StoreDocument> {
        lock(&self.snapshots).get(backup).cloned()
    }

    /// Number of snapshots held.
    pub fn snapshot_count(&self) -> usize {
        lock(&self.snapshots).len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        lock(&self.documents).contains_key(path)
    }

    fn load(&self, path: &Path) -> Result<StoreDocument> {
        self.document(path)
            .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))
    }

    fn commit(&self, path: &Path, document: &StoreDocument) -> Result<()> {
        lock(&self.documents).insert(path.to_path_buf(), document.clone());
        Ok(())
    }
}

impl BackupManager for MemoryStore {
    fn create_snapshot(&self, store: &Path) -> Result<PathBuf> {
        let document = self.load(store)?;
        let seq = self.next_snapshot.fetch_add(1, Ordering::Relaxed);
        let mut name = store.as_os_str().to_owned();
        name.push(format!(".snapshot-{seq}"));
        let backup = PathBuf::from(name);
        lock(&self.snapshots).insert(backup.clone(), document);
        Ok(backup)
    }

    fn restore(&self, backup: &Path, store: &Path) -> Result<()> {
        let document = self
            .snapshot(backup)
            .ok_or_else(|| StoreError::BackupNotFound(backup.to_path_buf()))?;
        self.commit(store, &document)
    }
}
