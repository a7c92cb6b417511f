//! # graph-migrate
//!
//! Schema migrations for [`graph-store`](../graph_store/index.html) object
//! graphs.
//!
//! An application describes its object graph with one TOML schema artifact
//! per version. When it opens a store written by an older version,
//! `graph-migrate` works out which version the store is at, plans the chain
//! of steps up to the current one, and runs them with a snapshot to fall
//! back on.
//!
//! ## How It Works
//!
//! 1. The [`VersionRegistry`] holds every known [`ModelVersion`], usually
//!    discovered from artifact files by the [`ResourceProvider`].
//! 2. The [`MigrationPlanner`] matches the store's entity hashes against each
//!    version's artifact to find where the store is, and builds a
//!    [`MigrationPlan`] of adjacent steps up to the destination.
//! 3. The [`MigrationExecutor`] snapshots the store, applies each step's
//!    [`MappingDescriptor`] and commits after every step. On failure the
//!    snapshot is restored.
//!
//! ## Key Concepts
//!
//! - **Step mappings**: a named mapping file, a registered [`CustomMapping`],
//!   or inference from the structural difference of two artifacts.
//! - **Cached resources**: artifacts and mappings are loaded through a
//!   [`ResourceCache`] with LRU/TTL eviction and per-category statistics.
//! - **Observable runs**: state on a `watch` channel, progress on a
//!   `broadcast` channel.
//!
//! ## Quick Start
//!
//! ```no_run
//! use graph_migrate::{MigrationConfig, MigrationOutcome, Migrator};
//! use std::path::Path;
//!
//! let config = MigrationConfig::new("Notes", "models");
//! let migrator = Migrator::builder(config).build_file_backed()?;
//! if let MigrationOutcome::Migrated(report) = migrator.migrate_if_needed(Path::new("notes.json"))? {
//!     println!("{} -> {} in {:?}", report.source, report.destination, report.elapsed);
//! }
//! # Ok::<(), graph_migrate::MigrateError>(())
//! ```

mod cache;
mod config;
mod error;
mod executor;
mod mapping;
mod migrator;
mod plan;
mod planner;
mod progress;
mod provider;
mod registry;
mod schema;
mod version;

pub use cache::{
    BoundedCache, CacheCategory, CacheConfig, CacheJanitor, CacheKey, CacheStatistics,
    CachedResource, Lookup, ResourceCache,
};
pub use config::{CacheSettings, ExecutorSettings, MigrationConfig};
pub use error::{MigrateError, Result};
pub use executor::{CancelHandle, ExecutorConfig, MigrationExecutor};
pub use mapping::{
    AttributeMapping, CustomMapping, EntityMapping, MappingDescriptor, MappingOrigin, ValueSource,
};
pub use migrator::{MigrationOutcome, Migrator, MigratorBuilder};
pub use plan::{MigrationPlan, MigrationStep, StepMapping};
pub use planner::MigrationPlanner;
pub use progress::{MigrationProgress, MigrationReport, MigrationState};
pub use provider::ResourceProvider;
pub use registry::{VersionDefinition, VersionRegistry};
pub use schema::{
    AttributeDescription, AttributeKind, EntityDescription, MergeConflict, SchemaArtifact,
    ValidationError,
};
pub use version::{ModelVersion, ParseVersionError};
