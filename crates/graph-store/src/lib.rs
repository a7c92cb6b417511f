//! # graph-store
//!
//! On-disk object-graph stores for [`graph-migrate`](../graph_migrate/index.html).
//!
//! A store is a single JSON document holding a metadata header (the model
//! name and one version hash per entity) and the records of every entity.
//! The migration engine only needs four things from a store: does it exist,
//! what is its metadata, load it whole, and commit a replacement atomically.
//! Those live in the [`StoreBackend`] trait; snapshots used for rollback live
//! in [`BackupManager`].
//!
//! ## Quick Start
//!
//! ```
//! use graph_store::{MemoryStore, StoreBackend, StoreDocument, StoreRecord};
//! use std::path::Path;
//!
//! let store = MemoryStore::new();
//! let mut doc = StoreDocument::default();
//! doc.insert("Note", StoreRecord::new("n1").with("title", "hello"));
//!
//! store.commit(Path::new("notes.store"), &doc).unwrap();
//! let loaded = store.load(Path::new("notes.store")).unwrap();
//! assert_eq!(loaded.records("Note").len(), 1);
//! ```
//!
//! ## Backends
//!
//! | Backend | Use case |
//! |---------|----------|
//! | [`FileStore`] | Stores on the local file system, temp-file + rename commits |
//! | [`MemoryStore`] | Tests and fault injection |

mod backup;
mod document;
mod error;
mod file;
mod memory;
mod traits;

pub use backup::FileBackupManager;
pub use document::{StoreDocument, StoreMetadata, StoreRecord};
pub use error::{Result, StoreError};
pub use file::{FileStore, FileStoreConfig};
pub use memory::MemoryStore;
pub use traits::{BackupManager, StoreBackend};
