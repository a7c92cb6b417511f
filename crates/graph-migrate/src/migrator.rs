use std::path::Path;
use std::sync::Arc;

use graph_store::{BackupManager, FileBackupManager, FileStore, StoreBackend};

use crate::cache::{CacheJanitor, ResourceCache};
use crate::config::MigrationConfig;
use crate::error::Result;
use crate::executor::MigrationExecutor;
use crate::mapping::CustomMapping;
use crate::planner::MigrationPlanner;
use crate::progress::MigrationReport;
use crate::provider::ResourceProvider;
use crate::registry::VersionRegistry;
use crate::version::ModelVersion;

/// What [`Migrator::migrate_if_needed`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    /// The store already matches the destination model.
    UpToDate { version: ModelVersion },
    /// No store exists yet; it will be created at the destination version.
    NewStore,
    Migrated(MigrationReport),
}

/// Builds a [`Migrator`]: custom mappings are registered before versions
/// are discovered from the configured search paths.
pub struct MigratorBuilder {
    config: MigrationConfig,
    mappings: Vec<(ModelVersion, Arc<dyn CustomMapping>)>,
}

impl MigratorBuilder {
    /// Migrate into `version` with `mapping` instead of a named or inferred
    /// mapping.
    pub fn custom_mapping(mut self, version: ModelVersion, mapping: Arc<dyn CustomMapping>) -> Self {
        self.mappings.push((version, mapping));
        self
    }

    pub fn build(
        self,
        store: Arc<dyn StoreBackend>,
        backups: Arc<dyn BackupManager>,
    ) -> Result<Migrator> {
        self.config.validate()?;
        let provider = Arc::new(self.config.provider()?);
        let cache = Arc::new(ResourceCache::new(
            Arc::clone(&provider),
            self.config.cache_config(),
        ));

        let registry = Arc::new(VersionRegistry::new());
        for (version, mapping) in self.mappings {
            registry.register(version, Some(mapping))?;
        }
        registry.discover(&provider);

        let planner = MigrationPlanner::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&store),
        );
        let executor = Arc::new(MigrationExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&store),
            backups,
            self.config.executor_config(),
        ));
        log::info!(
            "migrator for {} ready with {} version(s)",
            provider.model_name(),
            registry.len()
        );
        Ok(Migrator {
            config: self.config,
            provider,
            cache,
            registry,
            store,
            planner,
            executor,
        })
    }

    /// Build over [`FileStore`] with snapshots in the configured backup dir.
    pub fn build_file_backed(self) -> Result<Migrator> {
        let backups = Arc::new(FileBackupManager::new(self.config.backup_dir.clone()));
        self.build(Arc::new(FileStore::new()), backups)
    }
}

/// Everything needed to bring a store up to date at startup.
///
/// ```no_run
/// use graph_migrate::{MigrationConfig, MigrationOutcome, Migrator};
/// use std::path::Path;
///
/// let config = MigrationConfig::load(Path::new("migrate.toml"))?;
/// let migrator = Migrator::builder(config).build_file_backed()?;
/// match migrator.migrate_if_needed(Path::new("notes.json"))? {
///     MigrationOutcome::Migrated(report) => println!("migrated {} step(s)", report.steps),
///     other => println!("{other:?}"),
/// }
/// # Ok::<(), graph_migrate::MigrateError>(())
/// ```
pub struct Migrator {
    config: MigrationConfig,
    provider: Arc<ResourceProvider>,
    cache: Arc<ResourceCache>,
    registry: Arc<VersionRegistry>,
    store: Arc<dyn StoreBackend>,
    planner: MigrationPlanner,
    executor: Arc<MigrationExecutor>,
}

impl Migrator {
    pub fn builder(config: MigrationConfig) -> MigratorBuilder {
        MigratorBuilder {
            config,
            mappings: Vec::new(),
        }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<ResourceProvider> {
        &self.provider
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    pub fn planner(&self) -> &MigrationPlanner {
        &self.planner
    }

    pub fn executor(&self) -> &Arc<MigrationExecutor> {
        &self.executor
    }

    /// Start the cache janitor if the configuration enables it. Must be
    /// called inside a tokio runtime.
    pub fn start_janitor(&self) -> Option<CacheJanitor> {
        self.config
            .cleanup_interval()
            .map(|every| CacheJanitor::start(Arc::clone(&self.cache), every))
    }

    /// Migrate the store at `store_path` to the destination version if it
    /// does not match it already.
    pub fn migrate_if_needed(&self, store_path: &Path) -> Result<MigrationOutcome> {
        if !self.store.exists(store_path) {
            if let Ok(destination) = self.planner.destination_version() {
                self.registry.set_current_version(destination);
            }
            log::info!("no store at {}, nothing to migrate", store_path.display());
            return Ok(MigrationOutcome::NewStore);
        }

        let plan = self.planner.create_plan(store_path)?;
        if plan.is_empty() {
            log::info!("{} is up to date at {}", store_path.display(), plan.destination);
            return Ok(MigrationOutcome::UpToDate {
                version: plan.destination,
            });
        }
        let report = self.executor.execute(store_path, &plan)?;
        Ok(MigrationOutcome::Migrated(report))
    }
}
