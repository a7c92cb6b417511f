use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type shared by every store backend and backup manager.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store file does not exist.
    #[error("store not found: {}", .0.display())]
    NotFound(PathBuf),

    /// An I/O error while reading or writing `path`.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The store file exists but is not a valid store document.
    #[error("malformed store {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The store is temporarily locked by another writer.
    #[error("store {} is busy", .0.display())]
    Busy(PathBuf),

    /// A backup snapshot referenced by a restore does not exist.
    #[error("backup snapshot not found: {}", .0.display())]
    BackupNotFound(PathBuf),
}

impl StoreError {
    /// Wrap an I/O error with the path it happened on.
    ///
    /// `NotFound` I/O errors become [`StoreError::NotFound`].
    pub fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Busy(_) => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::NotFound(_) | Self::Malformed { .. } | Self::BackupNotFound(_) => false,
        }
    }
}
