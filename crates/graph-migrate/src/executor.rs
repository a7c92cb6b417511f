//! Step-by-step migration with backup, retry and rollback.
//!
//! A run goes `Idle -> Preparing -> Migrating -> Validating -> Completed`,
//! or ends in `Failed` from any running state. Observers follow it through
//! two channels:
//!
//! - [`subscribe_state`](MigrationExecutor::subscribe_state): a
//!   `tokio::sync::watch` receiver holding the latest [`MigrationState`].
//! - [`subscribe_progress`](MigrationExecutor::subscribe_progress): a
//!   `tokio::sync::broadcast` receiver of every [`MigrationProgress`] event,
//!   one at 0% and one per committed step.
//!
//! Before the first step the store is snapshotted through the
//! [`BackupManager`]. Each step loads its artifacts from the cache, applies
//! its mapping and commits the result. When anything fails the snapshot is
//! restored; if that fails too the error is [`MigrateError::RestoreFailed`]
//! and the snapshot is left where it is.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use graph_store::{BackupManager, StoreBackend, StoreDocument, StoreError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::cache::ResourceCache;
use crate::error::{MigrateError, Result};
use crate::mapping::MappingDescriptor;
use crate::plan::{MigrationPlan, MigrationStep};
use crate::progress::{MigrationProgress, MigrationReport, MigrationState};
use crate::registry::VersionRegistry;
use crate::schema::SchemaArtifact;
use crate::version::ModelVersion;

const PROGRESS_CAPACITY: usize = 64;

/// Retry policy for commits.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Retries after the first failed attempt of a transient commit error.
    pub max_retries: u32,
    /// Delay before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Cooperative cancellation flag, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs [`MigrationPlan`]s against one store backend.
///
/// One run at a time: a second `execute` while one is in progress fails with
/// [`MigrateError::AlreadyRunning`].
pub struct MigrationExecutor {
    registry: Arc<VersionRegistry>,
    cache: Arc<ResourceCache>,
    store: Arc<dyn StoreBackend>,
    backups: Arc<dyn BackupManager>,
    config: ExecutorConfig,
    running: AtomicBool,
    cancel: CancelHandle,
    state: watch::Sender<MigrationState>,
    progress: broadcast::Sender<MigrationProgress>,
}

impl MigrationExecutor {
    pub fn new(
        registry: Arc<VersionRegistry>,
        cache: Arc<ResourceCache>,
        store: Arc<dyn StoreBackend>,
        backups: Arc<dyn BackupManager>,
        config: ExecutorConfig,
    ) -> Self {
        let (state, _) = watch::channel(MigrationState::Idle);
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self {
            registry,
            cache,
            store,
            backups,
            config,
            running: AtomicBool::new(false),
            cancel: CancelHandle::default(),
            state,
            progress,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Latest state.
    pub fn state(&self) -> MigrationState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<MigrationState> {
        self.state.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<MigrationProgress> {
        self.progress.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request cancellation of the current run. Takes effect before the next
    /// step starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle that cancels this executor's current run.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn set_state(&self, state: MigrationState) {
        log::debug!("migration state: {state:?}");
        self.state.send_replace(state);
    }

    fn emit(&self, progress: MigrationProgress) {
        self.set_state(MigrationState::Migrating(progress.clone()));
        // No subscribers is fine.
        let _ = self.progress.send(progress);
    }

    /// Run `plan` against the store at `store_path`, blocking until done.
    pub fn execute(&self, store_path: &Path, plan: &MigrationPlan) -> Result<MigrationReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MigrateError::AlreadyRunning(store_path.to_path_buf()));
        }
        let _guard = RunGuard(&self.running);
        self.cancel.reset();

        let started = Instant::now();
        log::info!(
            "migrating {} from {} to {} in {} step(s)",
            store_path.display(),
            plan.source,
            plan.destination,
            plan.len()
        );
        self.set_state(MigrationState::Preparing);

        match self.run(store_path, plan, started) {
            Ok(report) => {
                log::info!(
                    "migrated {} to {} in {:?}",
                    store_path.display(),
                    plan.destination,
                    report.elapsed
                );
                self.set_state(MigrationState::Completed {
                    version: plan.destination.clone(),
                });
                Ok(report)
            }
            Err((error, restored)) => {
                log::error!("migration of {} failed: {error}", store_path.display());
                self.set_state(MigrationState::Failed {
                    reason: error.to_string(),
                    restored,
                });
                Err(error)
            }
        }
    }

    /// Run `plan` on tokio's blocking pool.
    pub fn spawn(
        self: &Arc<Self>,
        store_path: impl Into<PathBuf>,
        plan: MigrationPlan,
    ) -> JoinHandle<Result<MigrationReport>> {
        let executor = Arc::clone(self);
        let store_path = store_path.into();
        tokio::task::spawn_blocking(move || executor.execute(&store_path, &plan))
    }

    /// On error, also reports whether the store was restored.
    fn run(
        &self,
        store_path: &Path,
        plan: &MigrationPlan,
        started: Instant,
    ) -> std::result::Result<MigrationReport, (MigrateError, bool)> {
        if !plan.is_contiguous() {
            return Err((
                MigrateError::InvalidVersionPath {
                    from: plan.source.clone(),
                    to: plan.destination.clone(),
                },
                false,
            ));
        }

        if plan.is_empty() {
            self.emit(MigrationProgress::new(
                0,
                0,
                &plan.source,
                &plan.destination,
                format!("{} is up to date", plan.destination),
            ));
            self.registry.set_current_version(plan.destination.clone());
            return Ok(MigrationReport {
                source: plan.source.clone(),
                destination: plan.destination.clone(),
                steps: 0,
                records: 0,
                backup: None,
                elapsed: started.elapsed(),
            });
        }

        let backup = self
            .backups
            .create_snapshot(store_path)
            .map_err(|e| (MigrateError::BackupFailed(e), false))?;

        match self.run_steps(store_path, plan) {
            Ok(records) => Ok(MigrationReport {
                source: plan.source.clone(),
                destination: plan.destination.clone(),
                steps: plan.len(),
                records,
                backup: Some(backup),
                elapsed: started.elapsed(),
            }),
            Err(cause) => match self.backups.restore(&backup, store_path) {
                Ok(()) => {
                    log::warn!("restored {} from {}", store_path.display(), backup.display());
                    self.registry.set_current_version(plan.source.clone());
                    Err((cause, true))
                }
                Err(source) => {
                    log::error!(
                        "restore of {} failed, backup kept at {}: {source}",
                        store_path.display(),
                        backup.display()
                    );
                    Err((
                        MigrateError::RestoreFailed {
                            backup,
                            source,
                            cause: Box::new(cause),
                        },
                        false,
                    ))
                }
            },
        }
    }

    fn run_steps(&self, store_path: &Path, plan: &MigrationPlan) -> Result<usize> {
        let total = plan.len();
        self.emit(MigrationProgress::new(
            0,
            total,
            &plan.source,
            &plan.destination,
            format!("migrating {} -> {}", plan.source, plan.destination),
        ));

        let mut document = self.store.load(store_path)?;
        let mut destination = None;
        for step in &plan.steps {
            if self.cancel.is_cancelled() {
                log::warn!("migration cancelled before step {}", step.index + 1);
                return Err(MigrateError::Cancelled);
            }
            let (next, model) =
                self.run_step(store_path, step, &document)
                    .map_err(|e| MigrateError::StepFailed {
                        index: step.index,
                        from: step.source.clone(),
                        to: step.destination.clone(),
                        source: Box::new(e),
                    })?;
            document = next;
            destination = Some(model);
            self.registry.set_current_version(step.destination.clone());
            self.emit(MigrationProgress::new(
                step.index + 1,
                total,
                &plan.source,
                &plan.destination,
                format!("migrated {step}"),
            ));
        }

        self.set_state(MigrationState::Validating);
        let committed = self
            .store
            .read_metadata(store_path)?
            .ok_or_else(|| StoreError::NotFound(store_path.to_path_buf()))?;
        let valid = destination.is_some_and(|model| model.is_compatible(&committed));
        if !valid {
            return Err(MigrateError::MigrationFailed(format!(
                "committed store does not match {}",
                plan.destination
            )));
        }
        Ok(document.record_count())
    }

    fn run_step(
        &self,
        store_path: &Path,
        step: &MigrationStep,
        document: &StoreDocument,
    ) -> Result<(StoreDocument, Arc<SchemaArtifact>)> {
        let missing = |v: &ModelVersion| {
            MigrateError::MigrationFailed(format!("no schema artifact for {v}"))
        };
        let source = self
            .cache
            .model(&step.source)?
            .ok_or_else(|| missing(&step.source))?;
        let destination = self
            .cache
            .model(&step.destination)?
            .ok_or_else(|| missing(&step.destination))?;

        let descriptor: Arc<MappingDescriptor> = match step.custom() {
            Some(custom) => Arc::new(custom.descriptor(
                &step.source,
                &step.destination,
                &source,
                &destination,
            )?),
            None => self
                .cache
                .mapping_model(&step.source, &step.destination)?
                .ok_or_else(|| {
                    MigrateError::MigrationFailed(format!("no mapping for step {step}"))
                })?,
        };

        let next = descriptor.apply(document, &destination, step.custom())?;
        self.commit_with_retry(store_path, &next)?;
        log::info!(
            "step {} {step} committed ({}, {} records)",
            step.index + 1,
            descriptor.origin,
            next.record_count()
        );
        Ok((next, destination))
    }

    fn commit_with_retry(&self, store_path: &Path, document: &StoreDocument) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.store.commit(store_path, document) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_backoff * attempt;
                    log::warn!(
                        "commit of {} failed ({e}), retry {attempt}/{} in {delay:?}",
                        store_path.display(),
                        self.config.max_retries
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
