//! Memoized resource lookups with hit/miss statistics.
//!
//! Loading and validating schema artifacts and inferring mappings touches
//! the disk and hashes every entity, so the executor and planner go through
//! a [`ResourceCache`] instead of the [`ResourceProvider`] directly.
//!
//! ```no_run
//! use std::sync::Arc;
//! use graph_migrate::{CacheCategory, CacheConfig, ModelVersion, ResourceCache, ResourceProvider};
//!
//! let provider = Arc::new(ResourceProvider::new("Notes", "models"));
//! let cache = ResourceCache::new(provider, CacheConfig::default());
//! cache.preload()?;
//!
//! let v1 = ModelVersion::new(1, 0, 0);
//! cache.model(&v1)?; // miss, loads from disk
//! cache.model(&v1)?; // hit
//! assert_eq!(cache.category_statistics(CacheCategory::Model).hits, 1);
//!
//! cache.invalidate(CacheCategory::Model);
//! # Ok::<(), graph_migrate::MigrateError>(())
//! ```

mod bounded;
mod janitor;

pub use bounded::{BoundedCache, Lookup};
pub use janitor::CacheJanitor;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::mapping::MappingDescriptor;
use crate::provider::ResourceProvider;
use crate::schema::SchemaArtifact;
use crate::version::ModelVersion;

/// Cache key of a provider lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ModelUrl,
    VersionUrl(ModelVersion),
    Model(ModelVersion),
    MergedModel,
    Mapping(ModelVersion, ModelVersion),
}

impl CacheKey {
    pub fn category(&self) -> CacheCategory {
        match self {
            Self::ModelUrl | Self::VersionUrl(_) => CacheCategory::Url,
            Self::Model(_) | Self::MergedModel => CacheCategory::Model,
            Self::Mapping(..) => CacheCategory::Mapping,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelUrl => f.write_str("modelURL"),
            Self::VersionUrl(v) => write!(f, "versionURL:{v}"),
            Self::Model(v) => write!(f, "model:{v}"),
            Self::MergedModel => f.write_str("mergedModel"),
            Self::Mapping(from, to) => write!(f, "mapping:{from}_{to}"),
        }
    }
}

/// Kind of cached resource, for statistics and invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    /// Resolved file locations.
    Url,
    /// Loaded schema artifacts, including the merged model.
    Model,
    /// Mapping descriptors.
    Mapping,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 3] = [Self::Url, Self::Model, Self::Mapping];
}

/// A cached value.
#[derive(Debug, Clone)]
pub enum CachedResource {
    Url(PathBuf),
    Model(Arc<SchemaArtifact>),
    Mapping(Arc<MappingDescriptor>),
}

impl CachedResource {
    /// Relative cost: one per entity and attribute, plus one.
    pub fn cost(&self) -> usize {
        match self {
            Self::Url(_) => 1,
            Self::Model(model) => {
                1 + model
                    .entities
                    .iter()
                    .map(|e| 1 + e.attributes.len())
                    .sum::<usize>()
            }
            Self::Mapping(mapping) => {
                1 + mapping
                    .entities
                    .iter()
                    .map(|e| 1 + e.attributes.len())
                    .sum::<usize>()
            }
        }
    }
}

/// Cache sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of entries before least-recently-used eviction.
    pub capacity: usize,
    /// Entries older than this are reloaded. `None` keeps them until evicted.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            ttl: None,
        }
    }
}

/// Counters and sizes, globally or for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed by the capacity bound or by expiry.
    pub evictions: u64,
    pub entries: usize,
    pub total_cost: usize,
}

impl CacheStatistics {
    /// `hits / (hits + misses)`, 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

struct State {
    entries: BoundedCache<CacheKey, CachedResource>,
    counters: HashMap<CacheCategory, Counters>,
}

impl State {
    fn counters(&mut self, category: CacheCategory) -> &mut Counters {
        self.counters.entry(category).or_default()
    }

    fn evicted(&mut self, keys: &[CacheKey]) {
        for key in keys {
            log::debug!("evicted {key}");
            self.counters(key.category()).evictions += 1;
        }
    }
}

/// Get-or-load cache in front of a [`ResourceProvider`].
///
/// The lock covers map access only. Two threads missing the same key both
/// load it and the later insert wins.
pub struct ResourceCache {
    provider: Arc<ResourceProvider>,
    state: Mutex<State>,
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("model", &self.provider.model_name())
            .field("statistics", &self.statistics())
            .finish()
    }
}

impl ResourceCache {
    pub fn new(provider: Arc<ResourceProvider>, config: CacheConfig) -> Self {
        Self {
            provider,
            state: Mutex::new(State {
                entries: BoundedCache::new(config.capacity, config.ttl),
                counters: HashMap::new(),
            }),
        }
    }

    pub fn provider(&self) -> &ResourceProvider {
        &self.provider
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_or_load<F>(&self, key: CacheKey, load: F) -> Result<Option<CachedResource>>
    where
        F: FnOnce(&ResourceProvider) -> Result<Option<CachedResource>>,
    {
        let category = key.category();
        {
            let mut state = self.lock();
            match state.entries.get(&key, Instant::now()) {
                Lookup::Hit(value) => {
                    state.counters(category).hits += 1;
                    return Ok(Some(value));
                }
                Lookup::Expired => {
                    let counters = state.counters(category);
                    counters.evictions += 1;
                    counters.misses += 1;
                }
                Lookup::Miss => state.counters(category).misses += 1,
            }
        }

        log::debug!("cache miss {key}");
        let loaded = load(&self.provider)?;
        if let Some(value) = &loaded {
            let mut state = self.lock();
            let evicted = state
                .entries
                .insert(key, value.clone(), value.cost(), Instant::now());
            state.evicted(&evicted);
        }
        Ok(loaded)
    }

    /// [`ResourceProvider::model_url`], cached.
    pub fn model_url(&self) -> Result<Option<PathBuf>> {
        let value = self.get_or_load(CacheKey::ModelUrl, |p| Ok(p.model_url().map(CachedResource::Url)))?;
        Ok(match value {
            Some(CachedResource::Url(path)) => Some(path),
            _ => None,
        })
    }

    /// [`ResourceProvider::model_url_for`], cached.
    pub fn model_url_for(&self, version: &ModelVersion) -> Result<Option<PathBuf>> {
        let value = self.get_or_load(CacheKey::VersionUrl(version.clone()), |p| {
            Ok(p.model_url_for(version).map(CachedResource::Url))
        })?;
        Ok(match value {
            Some(CachedResource::Url(path)) => Some(path),
            _ => None,
        })
    }

    /// [`ResourceProvider::model`], cached.
    pub fn model(&self, version: &ModelVersion) -> Result<Option<Arc<SchemaArtifact>>> {
        let value = self.get_or_load(CacheKey::Model(version.clone()), |p| {
            Ok(p.model(version)?.map(|m| CachedResource::Model(Arc::new(m))))
        })?;
        Ok(as_model(value))
    }

    /// [`ResourceProvider::merged_model`], cached.
    pub fn merged_model(&self) -> Result<Option<Arc<SchemaArtifact>>> {
        let value = self.get_or_load(CacheKey::MergedModel, |p| {
            Ok(p.merged_model()?.map(|m| CachedResource::Model(Arc::new(m))))
        })?;
        Ok(as_model(value))
    }

    /// [`ResourceProvider::mapping_model`], cached.
    pub fn mapping_model(
        &self,
        from: &ModelVersion,
        to: &ModelVersion,
    ) -> Result<Option<Arc<MappingDescriptor>>> {
        let value = self.get_or_load(CacheKey::Mapping(from.clone(), to.clone()), |p| {
            Ok(p.mapping_model(from, to)?
                .map(|m| CachedResource::Mapping(Arc::new(m))))
        })?;
        Ok(match value {
            Some(CachedResource::Mapping(mapping)) => Some(mapping),
            _ => None,
        })
    }

    /// Warm the base model location and the merged model.
    pub fn preload(&self) -> Result<()> {
        self.model_url()?;
        self.merged_model()?;
        log::debug!("preloaded resources for {}", self.provider.model_name());
        Ok(())
    }

    /// Whether `key` holds a fresh value. Does not count as a lookup.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains(key, Instant::now())
    }

    /// Drop every entry of `category`. Returns how many were dropped.
    pub fn invalidate(&self, category: CacheCategory) -> usize {
        let removed = self.lock().entries.retain(|k| k.category() != category);
        log::debug!("invalidated {removed} {category:?} entries");
        removed
    }

    /// Drop one entry.
    pub fn invalidate_key(&self, key: &CacheKey) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Reset hit, miss and eviction counters.
    pub fn reset_statistics(&self) {
        self.lock().counters.clear();
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.lock();
        let expired = state.entries.purge_expired(Instant::now());
        state.evicted(&expired);
        expired.len()
    }

    /// Statistics over all categories.
    pub fn statistics(&self) -> CacheStatistics {
        let state = self.lock();
        let mut stats = CacheStatistics {
            entries: state.entries.len(),
            total_cost: state.entries.total_cost(),
            ..CacheStatistics::default()
        };
        for counters in state.counters.values() {
            stats.hits += counters.hits;
            stats.misses += counters.misses;
            stats.evictions += counters.evictions;
        }
        stats
    }

    /// Statistics of one category.
    pub fn category_statistics(&self, category: CacheCategory) -> CacheStatistics {
        let state = self.lock();
        let counters = state.counters.get(&category).copied().unwrap_or_default();
        let (entries, total_cost) = state
            .entries
            .costs()
            .filter(|(k, _)| k.category() == category)
            .fold((0, 0), |(n, cost), (_, c)| (n + 1, cost + c));
        CacheStatistics {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            entries,
            total_cost,
        }
    }
}

fn as_model(value: Option<CachedResource>) -> Option<Arc<SchemaArtifact>> {
    match value {
        Some(CachedResource::Model(model)) => Some(model),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MODEL: &str = "name = \"Notes\"\n[[entity]]\nname = \"Note\"\n[[entity.attribute]]\nname = \"title\"\ntype = \"string\"\n";

    fn fixture(files: &[&str]) -> (tempfile::TempDir, Arc<ResourceProvider>) {
        let dir = tempfile::tempdir().unwrap();
        for name in files {
            fs::write(dir.path().join(name), MODEL).unwrap();
        }
        let provider = Arc::new(ResourceProvider::new("Notes", dir.path()));
        (dir, provider)
    }

    fn v(id: &str) -> ModelVersion {
        ModelVersion::parse(id).unwrap()
    }

    #[test]
    fn key_strings() {
        assert_eq!(CacheKey::ModelUrl.to_string(), "modelURL");
        assert_eq!(CacheKey::VersionUrl(v("V1_0_0")).to_string(), "versionURL:V1_0_0");
        assert_eq!(CacheKey::Model(v("V2")).to_string(), "model:V2");
        assert_eq!(CacheKey::MergedModel.to_string(), "mergedModel");
        assert_eq!(
            CacheKey::Mapping(v("V1_0_0"), v("V1_1_0")).to_string(),
            "mapping:V1_0_0_V1_1_0"
        );
    }

    #[test]
    fn hit_after_miss() {
        let (_dir, provider) = fixture(&["Notes_V1_0_0.toml"]);
        let cache = ResourceCache::new(provider, CacheConfig::default());

        let first = cache.model(&v("V1_0_0")).unwrap().unwrap();
        let second = cache.model(&v("V1_0_0")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = cache.category_statistics(CacheCategory::Model);
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert_eq!(stats.total_cost, 3);
        assert!((cache.statistics().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn absent_is_not_cached() {
        let (_dir, provider) = fixture(&[]);
        let cache = ResourceCache::new(provider, CacheConfig::default());
        assert!(cache.model(&v("V1")).unwrap().is_none());
        assert!(cache.model(&v("V1")).unwrap().is_none());
        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses, stats.entries), (0, 2, 0));
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn invalidation_by_category_and_key() {
        let (dir, provider) = fixture(&["Notes.toml", "Notes_V1_0_0.toml"]);
        let cache = ResourceCache::new(provider, CacheConfig::default());
        cache.preload().unwrap();
        cache.model(&v("V1_0_0")).unwrap();
        assert!(cache.contains(&CacheKey::ModelUrl));
        assert!(cache.contains(&CacheKey::MergedModel));

        assert_eq!(cache.invalidate(CacheCategory::Model), 2);
        assert!(cache.contains(&CacheKey::ModelUrl));
        assert!(!cache.contains(&CacheKey::MergedModel));

        // Reload picks up changes on disk.
        fs::remove_file(dir.path().join("Notes.toml")).unwrap();
        assert!(cache.invalidate_key(&CacheKey::ModelUrl));
        assert!(!cache.invalidate_key(&CacheKey::ModelUrl));
        assert!(cache.model_url().unwrap().is_none());

        cache.clear();
        assert_eq!(cache.statistics().entries, 0);
        cache.reset_statistics();
        assert_eq!(cache.statistics(), CacheStatistics::default());
    }

    #[test]
    fn capacity_evictions_are_counted() {
        let (_dir, provider) = fixture(&["Notes_V1_0_0.toml", "Notes_V2_0_0.toml"]);
        let cache = ResourceCache::new(
            provider,
            CacheConfig {
                capacity: 1,
                ttl: None,
            },
        );
        cache.model(&v("V1_0_0")).unwrap();
        cache.model(&v("V2_0_0")).unwrap();
        assert!(!cache.contains(&CacheKey::Model(v("V1_0_0"))));
        assert_eq!(cache.category_statistics(CacheCategory::Model).evictions, 1);
    }

    #[test]
    fn expired_entries_count_as_misses() {
        let (_dir, provider) = fixture(&["Notes_V1_0_0.toml"]);
        let cache = ResourceCache::new(
            provider,
            CacheConfig {
                capacity: 8,
                ttl: Some(Duration::ZERO),
            },
        );
        cache.model_url_for(&v("V1_0_0")).unwrap();
        cache.model_url_for(&v("V1_0_0")).unwrap();
        let stats = cache.category_statistics(CacheCategory::Url);
        assert_eq!((stats.hits, stats.misses, stats.evictions), (0, 2, 1));
        assert_eq!(cache.purge_expired(), 1);
    }

    #[test]
    fn mapping_cached() {
        let (_dir, provider) = fixture(&["Notes_V1_0_0.toml", "Notes_V1_1_0.toml"]);
        let cache = ResourceCache::new(provider, CacheConfig::default());
        let mapping = cache.mapping_model(&v("V1_0_0"), &v("V1_1_0")).unwrap().unwrap();
        assert_eq!(mapping.entities.len(), 1);
        cache.mapping_model(&v("V1_0_0"), &v("V1_1_0")).unwrap();
        assert_eq!(cache.category_statistics(CacheCategory::Mapping).hits, 1);
    }
}
