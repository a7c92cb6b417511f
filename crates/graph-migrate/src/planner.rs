use std::path::Path;
use std::sync::Arc;

use graph_store::{StoreBackend, StoreError, StoreMetadata};

use crate::cache::ResourceCache;
use crate::error::{MigrateError, Result};
use crate::plan::MigrationPlan;
use crate::registry::VersionRegistry;
use crate::schema::SchemaArtifact;
use crate::version::ModelVersion;

/// Decides whether a store needs migrating and plans the steps.
///
/// The destination is the latest registered version, or the provider's
/// pinned destination when one is set. Its artifact comes from the cache:
/// the versioned artifact if present, else the merged model.
pub struct MigrationPlanner {
    registry: Arc<VersionRegistry>,
    cache: Arc<ResourceCache>,
    store: Arc<dyn StoreBackend>,
}

impl MigrationPlanner {
    pub fn new(
        registry: Arc<VersionRegistry>,
        cache: Arc<ResourceCache>,
        store: Arc<dyn StoreBackend>,
    ) -> Self {
        Self {
            registry,
            cache,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Version the plan migrates to.
    pub fn destination_version(&self) -> Result<ModelVersion> {
        match self.cache.provider().destination() {
            Some(pinned) => Ok(pinned.clone()),
            None => self.registry.latest_version(),
        }
    }

    /// Artifact of the destination version.
    pub fn destination_model(&self) -> Result<Arc<SchemaArtifact>> {
        let not_found = || MigrateError::ModelNotFound {
            candidates: Vec::new(),
        };
        if self.cache.provider().destination().is_some() {
            return self.cache.merged_model()?.ok_or_else(not_found);
        }
        if let Ok(latest) = self.registry.latest_version() {
            if let Some(model) = self.cache.model(&latest)? {
                return Ok(model);
            }
        }
        self.cache.merged_model()?.ok_or_else(not_found)
    }

    /// Whether the store at `store_path` must be migrated before use.
    ///
    /// A store that does not exist yet needs no migration.
    pub fn requires_migration(&self, store_path: &Path) -> Result<bool> {
        match self.store.read_metadata(store_path)? {
            None => Ok(false),
            Some(metadata) => self.requires_migration_for(&metadata),
        }
    }

    /// Whether a store with `metadata` must be migrated.
    pub fn requires_migration_for(&self, metadata: &StoreMetadata) -> Result<bool> {
        let required = !self.destination_model()?.is_compatible(metadata);
        log::debug!(
            "store at {} {} migration",
            metadata.version_identifier.as_deref().unwrap_or("unknown version"),
            if required { "requires" } else { "does not require" }
        );
        Ok(required)
    }

    /// The single registered version whose artifact matches `metadata`.
    pub fn source_version(&self, metadata: &StoreMetadata) -> Result<ModelVersion> {
        let mut candidates = Vec::new();
        for version in self.registry.versions() {
            if let Some(model) = self.cache.model(&version)? {
                if model.is_compatible(metadata) {
                    candidates.push(version);
                }
            }
        }
        if candidates.len() == 1 {
            return Ok(candidates.remove(0));
        }
        if candidates.len() > 1 {
            log::warn!("store metadata matches {} versions", candidates.len());
        }
        Err(MigrateError::ModelNotFound { candidates })
    }

    /// Plan the migration of the store at `store_path`.
    pub fn create_plan(&self, store_path: &Path) -> Result<MigrationPlan> {
        let metadata = self
            .store
            .read_metadata(store_path)?
            .ok_or_else(|| StoreError::NotFound(store_path.to_path_buf()))?;
        self.plan_for(&metadata)
    }

    /// Plan the migration of a store with `metadata`.
    ///
    /// A store matching the destination model gets an empty plan without
    /// resolving its source; adjacent versions may share entity hashes.
    /// Sets the registry's current version to the destination or to the
    /// resolved source version.
    pub fn plan_for(&self, metadata: &StoreMetadata) -> Result<MigrationPlan> {
        let destination = self.destination_version()?;
        if !self.requires_migration_for(metadata)? {
            self.registry.set_current_version(destination.clone());
            return Ok(MigrationPlan::empty(destination));
        }

        let source = self.source_version(metadata)?;
        self.registry.set_current_version(source.clone());
        let steps = self.registry.migration_path(&source, &destination);
        if steps.is_empty() {
            return Err(MigrateError::InvalidVersionPath {
                from: source,
                to: destination,
            });
        }
        log::info!(
            "planned {} step(s) from {source} to {destination}",
            steps.len()
        );
        Ok(MigrationPlan {
            source,
            destination,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::provider::ResourceProvider;
    use graph_store::{MemoryStore, StoreDocument};
    use std::fs;

    fn v(id: &str) -> ModelVersion {
        ModelVersion::parse(id).unwrap()
    }

    fn model(attrs: &[&str]) -> String {
        let mut text = String::from("name = \"Notes\"\n[[entity]]\nname = \"Note\"\n");
        for attr in attrs {
            text.push_str(&format!(
                "[[entity.attribute]]\nname = \"{attr}\"\ntype = \"string\"\noptional = true\n"
            ));
        }
        text
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        planner: MigrationPlanner,
    }

    fn fixture(versions: &[(&str, &[&str])], pinned: Option<&str>) -> Fixture {
        let artifacts: Vec<(&str, String)> = versions
            .iter()
            .map(|(id, attrs)| (*id, model(attrs)))
            .collect();
        fixture_from(&artifacts, pinned)
    }

    fn fixture_from(artifacts: &[(&str, String)], pinned: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(VersionRegistry::new());
        for (id, text) in artifacts {
            fs::write(dir.path().join(format!("Notes_{id}.toml")), text).unwrap();
            registry.register(v(id), None).unwrap();
        }
        let mut provider = ResourceProvider::new("Notes", dir.path());
        if let Some(p) = pinned {
            provider = provider.with_destination(v(p));
        }
        let cache = Arc::new(ResourceCache::new(Arc::new(provider), CacheConfig::default()));
        let store = Arc::new(MemoryStore::new());
        let planner = MigrationPlanner::new(registry, cache, store.clone());
        Fixture {
            _dir: dir,
            store,
            planner,
        }
    }

    fn metadata(f: &Fixture, id: &str) -> StoreMetadata {
        f.planner.cache().model(&v(id)).unwrap().unwrap().metadata()
    }

    const THREE: &[(&str, &[&str])] = &[
        ("V1_0_0", &["title"]),
        ("V1_1_0", &["title", "body"]),
        ("V2_0_0", &["title", "body", "tags"]),
    ];

    #[test]
    fn plan_from_oldest() {
        let f = fixture(THREE, None);
        let plan = f.planner.plan_for(&metadata(&f, "V1_0_0")).unwrap();
        assert_eq!(plan.source, v("V1_0_0"));
        assert_eq!(plan.destination, v("V2_0_0"));
        assert_eq!(plan.len(), 2);
        assert!(plan.is_contiguous());
        assert_eq!(f.planner.registry().current_version(), Some(v("V1_0_0")));
    }

    #[test]
    fn up_to_date_store_gets_empty_plan() {
        let f = fixture(THREE, None);
        let latest = metadata(&f, "V2_0_0");
        assert!(!f.planner.requires_migration_for(&latest).unwrap());
        let plan = f.planner.plan_for(&latest).unwrap();
        assert!(plan.is_empty());
        assert_eq!(f.planner.registry().current_version(), Some(v("V2_0_0")));
    }

    #[test]
    fn current_store_sharing_hashes_with_older_version() {
        let pinned = |default: bool| {
            format!(
                "name = \"Notes\"\n[[entity]]\nname = \"Note\"\n\
                 [[entity.attribute]]\nname = \"pinned\"\ntype = \"boolean\"\ndefault = {default}\n"
            )
        };
        let f = fixture_from(&[("V1_0_0", pinned(false)), ("V1_1_0", pinned(true))], None);
        let current = metadata(&f, "V1_1_0");
        assert_eq!(current.entity_hashes, metadata(&f, "V1_0_0").entity_hashes);

        let plan = f.planner.plan_for(&current).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.destination, v("V1_1_0"));
        assert_eq!(f.planner.registry().current_version(), Some(v("V1_1_0")));

        let path = Path::new("/stores/notes.json");
        f.store.insert(path, StoreDocument::new(current));
        assert!(f.planner.create_plan(path).unwrap().is_empty());
    }

    #[test]
    fn requires_migration_by_path() {
        let f = fixture(THREE, None);
        let path = Path::new("/stores/notes.json");
        assert!(!f.planner.requires_migration(path).unwrap());

        f.store.insert(path, StoreDocument::new(metadata(&f, "V1_1_0")));
        assert!(f.planner.requires_migration(path).unwrap());
        assert_eq!(f.planner.create_plan(path).unwrap().len(), 1);

        f.store.insert(path, StoreDocument::new(metadata(&f, "V2_0_0")));
        assert!(!f.planner.requires_migration(path).unwrap());
    }

    #[test]
    fn create_plan_missing_store() {
        let f = fixture(THREE, None);
        let err = f.planner.create_plan(Path::new("/absent.json")).unwrap_err();
        assert!(matches!(err, MigrateError::Store(StoreError::NotFound(_))));
    }

    #[test]
    fn unknown_and_ambiguous_metadata() {
        let f = fixture(THREE, None);
        let mut unknown = metadata(&f, "V1_0_0");
        unknown.entity_hashes.insert("Ghost".into(), "0".into());
        match f.planner.plan_for(&unknown).unwrap_err() {
            MigrateError::ModelNotFound { candidates } => assert!(candidates.is_empty()),
            other => panic!("unexpected {other}"),
        }

        // Two versions with identical structure.
        let f = fixture(&[("V1_0_0", &["title"]), ("V1_0_1", &["title"]), ("V2_0_0", &["body"])], None);
        match f.planner.plan_for(&metadata(&f, "V1_0_0")).unwrap_err() {
            MigrateError::ModelNotFound { candidates } => {
                assert_eq!(candidates, vec![v("V1_0_0"), v("V1_0_1")]);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn pinned_older_destination_has_no_path() {
        let f = fixture(THREE, Some("V1_0_0"));
        assert_eq!(f.planner.destination_version().unwrap(), v("V1_0_0"));
        let err = f.planner.plan_for(&metadata(&f, "V2_0_0")).unwrap_err();
        assert!(matches!(
            err,
            MigrateError::InvalidVersionPath { ref from, ref to } if *from == v("V2_0_0") && *to == v("V1_0_0")
        ));
    }

    #[test]
    fn no_artifacts_at_all() {
        let f = fixture(&[], None);
        let err = f.planner.destination_model().unwrap_err();
        assert!(matches!(err, MigrateError::ModelNotFound { .. }));
    }
}
