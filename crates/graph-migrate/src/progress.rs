use std::path::PathBuf;
use std::time::Duration;

use crate::version::ModelVersion;

/// Progress of a running migration.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationProgress {
    /// Completed steps.
    pub current_step: usize,
    pub total_steps: usize,
    /// 0 to 100.
    pub percent: f64,
    pub source: ModelVersion,
    pub destination: ModelVersion,
    pub description: String,
}

impl MigrationProgress {
    pub(crate) fn new(
        current_step: usize,
        total_steps: usize,
        source: &ModelVersion,
        destination: &ModelVersion,
        description: impl Into<String>,
    ) -> Self {
        let percent = if total_steps == 0 {
            100.0
        } else {
            current_step as f64 * 100.0 / total_steps as f64
        };
        Self {
            current_step,
            total_steps,
            percent,
            source: source.clone(),
            destination: destination.clone(),
            description: description.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_step == self.total_steps
    }
}

/// Lifecycle of an executor run.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MigrationState {
    #[default]
    Idle,
    /// Creating the backup.
    Preparing,
    Migrating(MigrationProgress),
    /// Checking the committed store against the destination model.
    Validating,
    Completed {
        version: ModelVersion,
    },
    Failed {
        reason: String,
        /// Whether the store was put back from its backup.
        restored: bool,
    },
}

impl MigrationState {
    /// `Completed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Preparing | Self::Migrating(_) | Self::Validating
        )
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub source: ModelVersion,
    pub destination: ModelVersion,
    pub steps: usize,
    /// Records in the migrated store.
    pub records: usize,
    /// Snapshot taken before the first step; `None` for an empty plan.
    pub backup: Option<PathBuf>,
    pub elapsed: Duration,
}
