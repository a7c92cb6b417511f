//! Locating schema artifacts and mapping files on disk.
//!
//! A provider searches an ordered list of locations; the first location that
//! holds a matching file wins. Inside each location these names are tried,
//! in order (`Notes` is the model name, `toml` the extension):
//!
//! | Resource | Names |
//! |---|---|
//! | versioned model | `Notes_1_2_0.toml` (also `Notes_1_2.toml` for patch 0), `Notes_V1_2_0.toml`, `Notes.models/V1_2_0.toml` |
//! | base model | `Notes.toml`, `Notes.models/Notes.toml` |
//! | mapping | `Mapping_V1_0_0_to_V1_1_0.toml`, `Notes_V1_0_0_to_V1_1_0.toml`, `Notes.mappings/V1_0_0_to_V1_1_0.toml` |
//!
//! Lookups return `None` when nothing matches; only a file that exists but
//! cannot be used is an error.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MigrateError, Result};
use crate::mapping::MappingDescriptor;
use crate::schema::SchemaArtifact;
use crate::version::ModelVersion;

/// Finds and loads the artifacts of one model.
#[derive(Debug, Clone)]
pub struct ResourceProvider {
    model_name: String,
    locations: Vec<PathBuf>,
    model_extension: String,
    mapping_extension: String,
    destination: Option<ModelVersion>,
}

impl ResourceProvider {
    /// Provider for `model_name` searching `primary` first.
    pub fn new(model_name: impl Into<String>, primary: impl Into<PathBuf>) -> Self {
        Self {
            model_name: model_name.into(),
            locations: vec![primary.into()],
            model_extension: "toml".to_string(),
            mapping_extension: "toml".to_string(),
            destination: None,
        }
    }

    /// Append a search location after the existing ones.
    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.locations.push(location.into());
        self
    }

    /// File extensions (without the dot) of model and mapping files.
    pub fn with_extensions(mut self, model: impl Into<String>, mapping: impl Into<String>) -> Self {
        self.model_extension = model.into();
        self.mapping_extension = mapping.into();
        self
    }

    /// Pin the destination artifact returned by [`merged_model`](Self::merged_model).
    pub fn with_destination(mut self, version: ModelVersion) -> Self {
        self.destination = Some(version);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    pub fn destination(&self) -> Option<&ModelVersion> {
        self.destination.as_ref()
    }

    fn first_existing(&self, names: &[String]) -> Option<PathBuf> {
        self.locations
            .iter()
            .flat_map(move |location| names.iter().map(move |name| location.join(name)))
            .find(|path| path.is_file())
    }

    fn base_names(&self) -> [String; 2] {
        let (model, ext) = (&self.model_name, &self.model_extension);
        [
            format!("{model}.{ext}"),
            format!("{model}.models/{model}.{ext}"),
        ]
    }

    /// Unversioned base model.
    pub fn model_url(&self) -> Option<PathBuf> {
        self.first_existing(&self.base_names())
    }

    /// Artifact of `version`.
    pub fn model_url_for(&self, version: &ModelVersion) -> Option<PathBuf> {
        let (model, ext) = (&self.model_name, &self.model_extension);
        let (major, minor, patch) = (version.major(), version.minor(), version.patch());
        let mut identifiers = vec![version.identifier().to_string()];
        let canonical = ModelVersion::new(major, minor, patch);
        if canonical.identifier() != version.identifier() {
            identifiers.push(canonical.identifier().to_string());
        }

        let mut names = vec![format!("{model}_{major}_{minor}_{patch}.{ext}")];
        if patch == 0 {
            names.push(format!("{model}_{major}_{minor}.{ext}"));
        }
        names.extend(identifiers.iter().map(|id| format!("{model}_{id}.{ext}")));
        names.extend(identifiers.iter().map(|id| format!("{model}.models/{id}.{ext}")));
        self.first_existing(&names)
    }

    /// Named mapping file for the step `from -> to`.
    pub fn mapping_descriptor_url(&self, from: &ModelVersion, to: &ModelVersion) -> Option<PathBuf> {
        let (model, ext) = (&self.model_name, &self.mapping_extension);
        let (src, dst) = (from.identifier(), to.identifier());
        self.first_existing(&[
            format!("Mapping_{src}_to_{dst}.{ext}"),
            format!("{model}_{src}_to_{dst}.{ext}"),
            format!("{model}.mappings/{src}_to_{dst}.{ext}"),
        ])
    }

    /// Load the artifact of `version`.
    ///
    /// The loaded artifact's version is set to `version` when the file does
    /// not declare one.
    pub fn model(&self, version: &ModelVersion) -> Result<Option<SchemaArtifact>> {
        let Some(path) = self.model_url_for(version) else {
            return Ok(None);
        };
        let mut artifact = SchemaArtifact::load(&path)?;
        match &artifact.version {
            None => artifact.version = Some(version.clone()),
            Some(declared) if declared != version => {
                return Err(MigrateError::InvalidArtifact {
                    path,
                    reason: format!("declares version {declared}, expected {version}"),
                })
            }
            Some(_) => {}
        }
        log::debug!("loaded {} {version} from {}", self.model_name, path.display());
        Ok(Some(artifact))
    }

    /// Versions of every versioned artifact in any location, ascending.
    ///
    /// Unreadable locations are skipped.
    pub fn discovered_versions(&self) -> Vec<ModelVersion> {
        let model = &self.model_name;
        let suffix = format!(".{}", self.model_extension);
        let prefix = format!("{model}_");
        let base = format!("{model}{suffix}");

        let mut found = Vec::new();
        for location in &self.locations {
            for name in file_names(location) {
                if name.starts_with(&prefix) && name.ends_with(&suffix) && !name.contains("_to_") {
                    found.extend(ModelVersion::from_path(Path::new(&name)));
                }
            }
            for name in file_names(&location.join(format!("{model}.models"))) {
                if name.ends_with(&suffix) && name != base {
                    found.extend(ModelVersion::from_path(Path::new(&name)));
                }
            }
        }
        found.sort();
        found.dedup();
        found
    }

    /// The destination artifact.
    ///
    /// - A pinned destination version wins.
    /// - Otherwise every base model across all locations is merged; the same
    ///   entity may appear in several only if it hashes identically.
    /// - With no base model, the highest discovered versioned artifact.
    pub fn merged_model(&self) -> Result<Option<SchemaArtifact>> {
        if let Some(version) = &self.destination {
            return self.model(version);
        }

        let bases: Vec<PathBuf> = self
            .locations
            .iter()
            .flat_map(|location| self.base_names().map(|name| location.join(name)))
            .filter(|path| path.is_file())
            .collect();

        if let Some(first) = bases.first() {
            let parts = bases
                .iter()
                .map(|path| SchemaArtifact::load(path))
                .collect::<Result<Vec<_>>>()?;
            let merged = SchemaArtifact::merge(&parts).map_err(|conflict| MigrateError::InvalidArtifact {
                path: first.clone(),
                reason: conflict.to_string(),
            })?;
            log::debug!("merged {} base model(s) for {}", parts.len(), self.model_name);
            return Ok(Some(merged));
        }

        match self.discovered_versions().last() {
            Some(latest) => self.model(latest),
            None => Ok(None),
        }
    }

    /// Mapping for the step `from -> to`.
    ///
    /// A named mapping file wins (what it leaves out is inferred); otherwise
    /// the structural diff of both artifacts. `None` when either artifact is
    /// missing.
    pub fn mapping_model(&self, from: &ModelVersion, to: &ModelVersion) -> Result<Option<MappingDescriptor>> {
        let (Some(source), Some(destination)) = (self.model(from)?, self.model(to)?) else {
            return Ok(None);
        };
        let descriptor = match self.mapping_descriptor_url(from, to) {
            Some(path) => MappingDescriptor::load(&path, from, to, &source, &destination)?,
            None => MappingDescriptor::infer(from, to, &source, &destination)?,
        };
        log::debug!("resolved {} for {from} -> {to}", descriptor.origin);
        Ok(Some(descriptor))
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("cannot scan {}: {e}", dir.display());
            }
            return Vec::new();
        }
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect()
}
