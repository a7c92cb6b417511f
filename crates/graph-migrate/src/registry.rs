use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{MigrateError, Result};
use crate::mapping::CustomMapping;
use crate::plan::{MigrationStep, StepMapping};
use crate::provider::ResourceProvider;
use crate::version::ModelVersion;

/// A registered version and the custom procedure that migrates into it.
#[derive(Clone)]
pub struct VersionDefinition {
    pub version: ModelVersion,
    pub mapping: Option<Arc<dyn CustomMapping>>,
}

impl fmt::Debug for VersionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionDefinition")
            .field("version", &self.version)
            .field("mapping", &self.mapping.as_ref().map(|m| m.name()))
            .finish()
    }
}

#[derive(Default)]
struct Inner {
    definitions: BTreeMap<ModelVersion, VersionDefinition>,
    current: Option<ModelVersion>,
}

/// Ordered set of known schema versions.
///
/// Shared between planner and executor behind an `Arc`; every method takes
/// `&self`. The lock is never held while calling into a provider.
///
/// # Example
///
/// ```
/// use graph_migrate::{ModelVersion, VersionRegistry};
///
/// let registry = VersionRegistry::new();
/// for id in ["V1_0_0", "V1_1_0", "V2_0_0"] {
///     registry.register(ModelVersion::parse(id).unwrap(), None).unwrap();
/// }
///
/// let path = registry.migration_path(
///     &ModelVersion::new(1, 0, 0),
///     &ModelVersion::new(2, 0, 0),
/// );
/// assert_eq!(path.len(), 2);
/// assert_eq!(registry.latest_version().unwrap(), ModelVersion::new(2, 0, 0));
/// ```
#[derive(Default)]
pub struct VersionRegistry {
    inner: RwLock<Inner>,
}

impl fmt::Debug for VersionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("VersionRegistry")
            .field("versions", &inner.definitions.keys().collect::<Vec<_>>())
            .field("current", &inner.current)
            .finish()
    }
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `version`, optionally with the procedure that migrates into it.
    ///
    /// A version already present is rejected and left unchanged.
    pub fn register(
        &self,
        version: ModelVersion,
        mapping: Option<Arc<dyn CustomMapping>>,
    ) -> Result<()> {
        let mut inner = self.write();
        if inner.definitions.contains_key(&version) {
            return Err(MigrateError::DuplicateVersion(version));
        }
        log::debug!(
            "registered {version}{}",
            mapping
                .as_ref()
                .map(|m| format!(" (custom mapping {})", m.name()))
                .unwrap_or_default()
        );
        inner
            .definitions
            .insert(version.clone(), VersionDefinition { version, mapping });
        Ok(())
    }

    /// All definitions, oldest first.
    pub fn sorted_definitions(&self) -> Vec<VersionDefinition> {
        self.read().definitions.values().cloned().collect()
    }

    pub fn definition(&self, version: &ModelVersion) -> Option<VersionDefinition> {
        self.read().definitions.get(version).cloned()
    }

    /// Registered versions, oldest first.
    pub fn versions(&self) -> Vec<ModelVersion> {
        self.read().definitions.keys().cloned().collect()
    }

    pub fn contains(&self, version: &ModelVersion) -> bool {
        self.read().definitions.contains_key(version)
    }

    pub fn len(&self) -> usize {
        self.read().definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().definitions.is_empty()
    }

    /// Version the store was last resolved or migrated to.
    pub fn current_version(&self) -> Option<ModelVersion> {
        self.read().current.clone()
    }

    pub fn set_current_version(&self, version: ModelVersion) {
        self.write().current = Some(version);
    }

    /// Highest registered version.
    pub fn latest_version(&self) -> Result<ModelVersion> {
        self.read()
            .definitions
            .keys()
            .next_back()
            .cloned()
            .ok_or(MigrateError::EmptyRegistry)
    }

    /// Whether the current version is unset or behind the latest.
    pub fn requires_migration(&self) -> bool {
        let inner = self.read();
        match inner.definitions.keys().next_back() {
            None => false,
            Some(latest) => inner.current.as_ref() != Some(latest),
        }
    }

    /// Steps between adjacent registered versions from `from` to `to`.
    ///
    /// Empty when either version is not registered or `from` is not strictly
    /// before `to`.
    pub fn migration_path(&self, from: &ModelVersion, to: &ModelVersion) -> Vec<MigrationStep> {
        let inner = self.read();
        if from >= to
            || !inner.definitions.contains_key(from)
            || !inner.definitions.contains_key(to)
        {
            return Vec::new();
        }

        let chain: Vec<&VersionDefinition> = inner.definitions.range(from..=to).map(|(_, d)| d).collect();
        chain
            .windows(2)
            .enumerate()
            .map(|(index, pair)| MigrationStep {
                index,
                source: pair[0].version.clone(),
                destination: pair[1].version.clone(),
                mapping: match &pair[1].mapping {
                    Some(custom) => StepMapping::Custom(Arc::clone(custom)),
                    None => StepMapping::Inferred,
                },
            })
            .collect()
    }

    /// [`ModelVersion::sequence_with`], using the highest registered minor of
    /// each major as the cross-major placeholder.
    ///
    /// Matches [`migration_path`](Self::migration_path) step for step only
    /// when every version the sequence names is registered. With `V1_0_0` and
    /// `V1_2_0` alone, `sequence` still yields `V1_1_0` while the path has a
    /// single step.
    pub fn sequence(&self, from: &ModelVersion, to: &ModelVersion) -> Vec<ModelVersion> {
        let inner = self.read();
        ModelVersion::sequence_with(from, to, |major| {
            inner
                .definitions
                .keys()
                .filter(|v| v.major() == major)
                .map(ModelVersion::minor)
                .max()
        })
    }

    /// Register every versioned artifact `provider` can find.
    ///
    /// Versions already registered are skipped. Returns how many were added.
    pub fn discover(&self, provider: &ResourceProvider) -> usize {
        let found = provider.discovered_versions();
        let mut inner = self.write();
        let mut added = 0;
        for version in found {
            if inner.definitions.contains_key(&version) {
                continue;
            }
            log::debug!("discovered {version}");
            inner.definitions.insert(
                version.clone(),
                VersionDefinition {
                    version,
                    mapping: None,
                },
            );
            added += 1;
        }
        if added > 0 {
            log::info!("discovered {added} model version(s) for {}", provider.model_name());
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Named(&'static str);

    impl CustomMapping for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn v(id: &str) -> ModelVersion {
        ModelVersion::parse(id).unwrap()
    }

    fn registry(ids: &[&str]) -> VersionRegistry {
        let registry = VersionRegistry::new();
        for id in ids {
            registry.register(v(id), None).unwrap();
        }
        registry
    }

    #[test]
    fn sorted_regardless_of_registration_order() {
        let r = registry(&["V2_0_0", "V1_0_0", "V1_1_0"]);
        assert_eq!(r.versions(), vec![v("V1_0_0"), v("V1_1_0"), v("V2_0_0")]);
        assert_eq!(r.len(), 3);
        assert_eq!(r.latest_version().unwrap(), v("V2"));
    }

    #[test]
    fn duplicate_rejected() {
        let r = registry(&["V1_0_0"]);
        let err = r
            .register(v("V1"), Some(Arc::new(Named("late"))))
            .unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateVersion(ref d) if *d == v("V1_0_0")));
        // Original definition untouched.
        assert!(r.definition(&v("V1_0_0")).unwrap().mapping.is_none());
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn empty_registry() {
        let r = VersionRegistry::new();
        assert!(matches!(r.latest_version(), Err(MigrateError::EmptyRegistry)));
        assert!(!r.requires_migration());
        assert!(r.is_empty());
    }

    #[test]
    fn requires_migration_tracks_current() {
        let r = registry(&["V1", "V2"]);
        assert!(r.requires_migration());
        r.set_current_version(v("V1"));
        assert!(r.requires_migration());
        r.set_current_version(v("V2"));
        assert!(!r.requires_migration());
        assert_eq!(r.current_version(), Some(v("V2")));
    }

    #[test]
    fn migration_path_attaches_custom_mappings() {
        let r = VersionRegistry::new();
        r.register(v("V1_0_0"), None).unwrap();
        r.register(v("V1_1_0"), None).unwrap();
        r.register(v("V2_0_0"), Some(Arc::new(Named("split-notes"))))
            .unwrap();

        let path = r.migration_path(&v("V1_0_0"), &v("V2_0_0"));
        assert_eq!(path.len(), 2);
        assert_eq!((path[0].index, path[1].index), (0, 1));
        assert_eq!(path[0].source, v("V1_0_0"));
        assert_eq!(path[0].destination, v("V1_1_0"));
        assert!(!path[0].is_custom());
        assert_eq!(path[1].destination, v("V2_0_0"));
        assert_eq!(path[1].custom().map(|c| c.name()), Some("split-notes"));

        let tail = r.migration_path(&v("V1_1_0"), &v("V2_0_0"));
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].index, 0);
    }

    #[test]
    fn migration_path_empty_cases() {
        let r = registry(&["V1", "V2", "V3"]);
        assert!(r.migration_path(&v("V2"), &v("V2")).is_empty());
        assert!(r.migration_path(&v("V3"), &v("V1")).is_empty());
        assert!(r.migration_path(&v("V1_5"), &v("V3")).is_empty());
        assert!(r.migration_path(&v("V1"), &v("V4")).is_empty());
    }

    #[test]
    fn sequence_uses_registered_last_minor() {
        let r = registry(&["V1_0_0", "V1_3_0", "V2_0_0", "V3_1_0"]);
        assert_eq!(
            r.sequence(&v("V1_0_0"), &v("V3_1_0")),
            vec![v("V1_3_0"), v("V2_0_0"), v("V3_0_0"), v("V3_1_0")]
        );
        // Nothing past the starting minor.
        assert_eq!(
            r.sequence(&v("V1_3_0"), &v("V2_0_0")),
            vec![v("V2_0_0")]
        );
    }

    fn version() -> impl Strategy<Value = ModelVersion> {
        (0u32..4, 0u32..4, 0u32..3).prop_map(|(a, b, c)| ModelVersion::new(a, b, c))
    }

    proptest! {
        #[test]
        fn sequence_walks_dense_registry_path(from in version(), to in version()) {
            let registry = VersionRegistry::new();
            registry.register(from.clone(), None).unwrap();
            for step in ModelVersion::sequence(&from, &to) {
                registry.register(step, None).unwrap();
            }

            let seq = registry.sequence(&from, &to);
            let path = registry.migration_path(&from, &to);
            prop_assert_eq!(seq.len(), path.len());
            for (i, step) in path.iter().enumerate() {
                prop_assert_eq!(step.index, i);
                prop_assert_eq!(&step.destination, &seq[i]);
                let expected_source = if i == 0 { &from } else { &seq[i - 1] };
                prop_assert_eq!(&step.source, expected_source);
            }
        }
    }
}
