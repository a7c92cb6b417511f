//! File-system store backend.
//!
//! Each store is one JSON file. Commits write a temporary file next to the
//! target and rename it into place, so a crash mid-commit leaves the previous
//! document intact.
//!
//! # Example
//!
//! ```no_run
//! use graph_store::{FileStore, StoreBackend, StoreDocument};
//! use std::path::Path;
//!
//! let store = FileStore::new();
//! let path = Path::new("notes.store");
//! store.commit(path, &StoreDocument::default()).unwrap();
//! assert!(store.read_metadata(path).unwrap().is_some());
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Deserialize;

use crate::document::{StoreDocument, StoreMetadata};
use crate::error::{Result, StoreError};
use crate::traits::StoreBackend;

/// File backend configuration.
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Pretty-print the JSON. Defaults to false.
    pub pretty: bool,
    /// `fsync` the temporary file before renaming it. Defaults to true.
    pub sync_on_commit: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            pretty: false,
            sync_on_commit: true,
        }
    }
}

/// Stores on the local file system.
#[derive(Debug, Clone, Default)]
pub struct FileStore {
    config: FileStoreConfig,
}

/// Only the header, so metadata reads skip record deserialization.
#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    metadata: StoreMetadata,
}

impl FileStore {
    /// File backend with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// File backend with custom configuration.
    pub fn with_config(config: FileStoreConfig) -> Self {
        Self { config }
    }

    fn encode(&self, path: &Path, document: &StoreDocument) -> Result<Vec<u8>> {
        let encoded = if self.config.pretty {
            serde_json::to_vec_pretty(document)
        } else {
            serde_json::to_vec(document)
        };
        encoded.map_err(|source| StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl StoreBackend for FileStore {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn load(&self, path: &Path) -> Result<StoreDocument> {
        let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    fn commit(&self, path: &Path, document: &StoreDocument) -> Result<()> {
        let bytes = self.encode(path, document)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(&bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
        if self.config.sync_on_commit {
            tmp.as_file()
                .sync_all()
                .map_err(|e| StoreError::io(tmp.path(), e))?;
        }
        tmp.persist(path)
            .map_err(|e| StoreError::io(path, e.error))?;

        log::debug!(
            "committed store {} ({} records, {} bytes)",
            path.display(),
            document.record_count(),
            bytes.len()
        );
        Ok(())
    }

    fn read_metadata(&self, path: &Path) -> Result<Option<StoreMetadata>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let header: Header =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Some(header.metadata))
    }
}
