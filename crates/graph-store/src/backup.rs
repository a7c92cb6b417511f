use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StoreError};
use crate::traits::BackupManager;

/// Backup manager that copies store files into a snapshot directory.
///
/// Snapshot names are `<store file name>.<UTC timestamp>-<seq>.bak`, so a
/// directory listing sorts oldest first. Restores copy through a temporary
/// file and rename, like [`FileStore`](crate::FileStore) commits.
///
/// Retention is left to the caller: snapshots are never deleted here except
/// through [`FileBackupManager::remove`].
#[derive(Debug)]
pub struct FileBackupManager {
    dir: PathBuf,
    seq: AtomicU64,
}

impl FileBackupManager {
    /// Keep snapshots under `dir` (created on first snapshot).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Snapshot directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All snapshots in the directory, oldest first.
    pub fn snapshots(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "bak") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Delete one snapshot.
    pub fn remove(&self, backup: &Path) -> Result<()> {
        fs::remove_file(backup).map_err(|e| StoreError::io(backup, e))
    }

    fn snapshot_path(&self, store: &Path) -> PathBuf {
        let name = store
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!("{name}.{stamp}-{seq:04}.bak"))
    }
}

impl BackupManager for FileBackupManager {
    fn create_snapshot(&self, store: &Path) -> Result<PathBuf> {
        if !store.is_file() {
            return Err(StoreError::NotFound(store.to_path_buf()));
        }
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let backup = self.snapshot_path(store);
        fs::copy(store, &backup).map_err(|e| StoreError::io(&backup, e))?;
        log::info!("snapshot {} -> {}", store.display(), backup.display());
        Ok(backup)
    }

    fn restore(&self, backup: &Path, store: &Path) -> Result<()> {
        let mut source = match File::open(backup) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::BackupNotFound(backup.to_path_buf()))
            }
            Err(e) => return Err(StoreError::io(backup, e)),
        };
        let dir = match store.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        io::copy(&mut source, &mut tmp).map_err(|e| StoreError::io(backup, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(store).map_err(|e| StoreError::io(store, e.error))?;
        log::info!("restored {} from {}", store.display(), backup.display());
        Ok(())
    }
}
