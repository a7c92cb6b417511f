use std::path::PathBuf;

use graph_store::StoreError;
use thiserror::Error;

use crate::version::ModelVersion;

/// Result alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Error during planning or executing a migration.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// No registered version matches the store metadata, or more than one does.
    ///
    /// `candidates` is empty when nothing matched and lists every match when
    /// the metadata is ambiguous.
    #[error("no unique model matches the store metadata (candidates: {})", format_versions(.candidates))]
    ModelNotFound { candidates: Vec<ModelVersion> },

    /// No registered path leads from `from` to `to`.
    #[error("no migration path from {from} to {to}")]
    InvalidVersionPath { from: ModelVersion, to: ModelVersion },

    /// Mapping resolution or the structural transform failed.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// The pre-migration snapshot could not be created.
    #[error("backup failed: {0}")]
    BackupFailed(#[source] StoreError),

    /// Rolling back a failed migration did not succeed. The backup at
    /// `backup` is kept for manual recovery.
    #[error("restore from {} failed ({source}) after: {cause}", .backup.display())]
    RestoreFailed {
        backup: PathBuf,
        #[source]
        source: StoreError,
        cause: Box<MigrateError>,
    },

    /// A step failed. Returned as is when the store was restored from its
    /// backup, otherwise as the cause of [`MigrateError::RestoreFailed`].
    #[error("step {index} ({from} -> {to}) failed: {source}")]
    StepFailed {
        index: usize,
        from: ModelVersion,
        to: ModelVersion,
        #[source]
        source: Box<MigrateError>,
    },

    /// The run was cancelled between steps.
    #[error("migration cancelled")]
    Cancelled,

    /// Another migration of the same store is running.
    #[error("a migration of {} is already running", .0.display())]
    AlreadyRunning(PathBuf),

    /// A version was registered twice.
    #[error("version {0} is already registered")]
    DuplicateVersion(ModelVersion),

    /// The registry has no versions.
    #[error("no versions registered")]
    EmptyRegistry,

    /// A schema artifact or mapping file could not be parsed or merged.
    #[error("invalid artifact {}: {reason}", .path.display())]
    InvalidArtifact { path: PathBuf, reason: String },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Store backend error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MigrateError {
    /// Whether the store may be left in an intermediate state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RestoreFailed { .. })
    }

    /// Whether the error happened after the store was snapshotted and the
    /// snapshot was put back successfully.
    pub fn was_restored(&self) -> bool {
        matches!(self, Self::StepFailed { .. } | Self::Cancelled)
    }
}

fn format_versions(versions: &[ModelVersion]) -> String {
    if versions.is_empty() {
        return "none".to_string();
    }
    versions
        .iter()
        .map(ModelVersion::identifier)
        .collect::<Vec<_>>()
        .join(", ")
}
