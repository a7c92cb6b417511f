//! Mapping descriptors: how records of one schema version become records of
//! the next.
//!
//! A descriptor lists, for every destination entity, which source entity its
//! records come from and where each destination attribute gets its value.
//! Descriptors come from, in order of precedence:
//!
//! 1. A [`CustomMapping`] procedure registered with the destination version.
//! 2. A named mapping file (TOML) found by the resource provider.
//! 3. Inference: a structural diff of the source and destination artifacts.
//!
//! Mapping files only need to list what inference cannot work out:
//!
//! ```toml
//! [[entity]]
//! name = "Note"
//! source = "Memo"
//!
//! [[entity.attribute]]
//! name = "title"
//! source = "heading"
//!
//! [[entity.attribute]]
//! name = "pinned"
//! value = false
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use graph_store::{StoreDocument, StoreRecord};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{MigrateError, Result};
use crate::schema::{AttributeDescription, EntityDescription, SchemaArtifact};
use crate::version::ModelVersion;

/// A user-supplied mapping procedure attached to a registered version.
///
/// The registry attaches it to the step that *arrives* at that version. The
/// procedure decides the step's descriptor (inferred unless overridden) and
/// may rewrite every migrated record.
///
/// # Example
///
/// ```
/// use graph_migrate::{CustomMapping, Result};
/// use graph_store::StoreRecord;
///
/// struct UppercaseTitles;
///
/// impl CustomMapping for UppercaseTitles {
///     fn name(&self) -> &str {
///         "uppercase-titles"
///     }
///
///     fn transform_record(&self, entity: &str, record: &mut StoreRecord) -> Result<()> {
///         if entity == "Note" {
///             if let Some(title) = record.get("title").and_then(|v| v.as_str()) {
///                 let upper = title.to_uppercase();
///                 record.attributes.insert("title".into(), upper.into());
///             }
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait CustomMapping: Send + Sync {
    /// Name used in logs and in [`MappingOrigin::Custom`].
    fn name(&self) -> &str;

    /// Descriptor for the step `from -> to`.
    fn descriptor(
        &self,
        from: &ModelVersion,
        to: &ModelVersion,
        source: &SchemaArtifact,
        destination: &SchemaArtifact,
    ) -> Result<MappingDescriptor> {
        let mut descriptor = MappingDescriptor::infer(from, to, source, destination)?;
        descriptor.origin = MappingOrigin::Custom(self.name().to_string());
        Ok(descriptor)
    }

    /// Rewrite one migrated record of destination entity `entity`.
    fn transform_record(&self, _entity: &str, _record: &mut StoreRecord) -> Result<()> {
        Ok(())
    }
}

/// Where a destination attribute gets its value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// Copy the named source attribute.
    Attribute(String),
    /// A fixed value.
    Constant(Value),
    /// Leave unset.
    Null,
}

/// Mapping of one destination attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMapping {
    pub name: String,
    pub source: ValueSource,
    /// Used when the copied source value is missing or null.
    pub default: Option<Value>,
}

/// Mapping of one destination entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMapping {
    pub name: String,
    /// Source entity whose records are migrated; `None` for a new entity.
    pub source_entity: Option<String>,
    pub attributes: Vec<AttributeMapping>,
}

/// How a descriptor was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingOrigin {
    /// Loaded from a mapping file.
    Named(PathBuf),
    /// Produced by a registered [`CustomMapping`].
    Custom(String),
    /// Structural diff of the two artifacts.
    Inferred,
}

impl fmt::Display for MappingOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(path) => write!(f, "named mapping {}", path.display()),
            Self::Custom(name) => write!(f, "custom mapping {name}"),
            Self::Inferred => f.write_str("inferred mapping"),
        }
    }
}

/// How records move between two adjacent versions.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingDescriptor {
    pub source: ModelVersion,
    pub destination: ModelVersion,
    pub origin: MappingOrigin,
    pub entities: Vec<EntityMapping>,
}

#[derive(Debug, Deserialize)]
struct MappingFile {
    #[serde(rename = "entity", default)]
    entities: Vec<EntityEntry>,
}

#[derive(Debug, Deserialize)]
struct EntityEntry {
    name: String,
    source: Option<String>,
    #[serde(rename = "attribute", default)]
    attributes: Vec<AttributeEntry>,
}

#[derive(Debug, Deserialize)]
struct AttributeEntry {
    name: String,
    source: Option<String>,
    value: Option<Value>,
}

fn failed(message: String) -> MigrateError {
    MigrateError::MigrationFailed(message)
}

/// Source entity for `destination`: same name first, then renaming id.
fn find_source_entity<'a>(
    source: &'a SchemaArtifact,
    destination: &EntityDescription,
) -> Option<&'a EntityDescription> {
    source.entity(&destination.name).or_else(|| {
        destination
            .renaming_id
            .as_deref()
            .and_then(|old| source.entity(old))
    })
}

fn infer_attribute(
    entity: &str,
    source: Option<&EntityDescription>,
    attr: &AttributeDescription,
) -> Result<AttributeMapping> {
    let from = source.and_then(|s| {
        s.attribute(&attr.name).or_else(|| {
            attr.renaming_id
                .as_deref()
                .and_then(|old| s.attribute(old))
        })
    });

    if let Some(from) = from {
        if !attr.kind.accepts_kind(from.kind) {
            return Err(failed(format!(
                "cannot infer {entity}.{}: {} attribute {} cannot become {}",
                attr.name, from.kind, from.name, attr.kind
            )));
        }
        return Ok(AttributeMapping {
            name: attr.name.clone(),
            source: ValueSource::Attribute(from.name.clone()),
            default: attr.default.clone(),
        });
    }

    let source = match (&attr.default, attr.optional) {
        (Some(value), _) => ValueSource::Constant(value.clone()),
        (None, true) => ValueSource::Null,
        (None, false) => {
            return Err(failed(format!(
                "cannot infer a value for new required attribute {entity}.{} without a default",
                attr.name
            )))
        }
    };
    Ok(AttributeMapping {
        name: attr.name.clone(),
        source,
        default: None,
    })
}

fn infer_entity(source: &SchemaArtifact, destination: &EntityDescription) -> Result<EntityMapping> {
    let from = find_source_entity(source, destination);
    let attributes = destination
        .attributes
        .iter()
        .map(|attr| infer_attribute(&destination.name, from, attr))
        .collect::<Result<Vec<_>>>()?;
    Ok(EntityMapping {
        name: destination.name.clone(),
        source_entity: from.map(|e| e.name.clone()),
        attributes,
    })
}

impl MappingDescriptor {
    /// Infer a descriptor from the structural difference of two artifacts.
    ///
    /// - Entities match by name, then by the destination's `renaming_id`.
    /// - Attributes match the same way and must keep a compatible kind
    ///   (integer may widen to double).
    /// - New attributes take their default, or null when optional; a new
    ///   required attribute without a default cannot be inferred.
    /// - Source entities and attributes with no destination are dropped.
    pub fn infer(
        from: &ModelVersion,
        to: &ModelVersion,
        source: &SchemaArtifact,
        destination: &SchemaArtifact,
    ) -> Result<Self> {
        let entities = destination
            .entities
            .iter()
            .map(|entity| infer_entity(source, entity))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            source: from.clone(),
            destination: to.clone(),
            origin: MappingOrigin::Inferred,
            entities,
        })
    }

    /// Parse a mapping file and complete it by inference.
    ///
    /// Destination entities the file does not list, and attributes a listed
    /// entity does not mention, are inferred against the entity's source.
    pub fn from_toml_str(
        text: &str,
        path: &Path,
        from: &ModelVersion,
        to: &ModelVersion,
        source: &SchemaArtifact,
        destination: &SchemaArtifact,
    ) -> Result<Self> {
        let invalid = |reason: String| MigrateError::InvalidArtifact {
            path: path.to_path_buf(),
            reason,
        };
        let file: MappingFile = toml::from_str(text).map_err(|e| invalid(e.to_string()))?;

        for entry in &file.entities {
            if destination.entity(&entry.name).is_none() {
                return Err(invalid(format!(
                    "entity {} is not part of the destination model",
                    entry.name
                )));
            }
        }

        let mut entities = Vec::with_capacity(destination.entities.len());
        for dest in &destination.entities {
            let Some(entry) = file.entities.iter().find(|e| e.name == dest.name) else {
                entities.push(infer_entity(source, dest)?);
                continue;
            };

            let from_entity = match &entry.source {
                Some(name) => Some(source.entity(name).ok_or_else(|| {
                    failed(format!(
                        "mapping for {} names unknown source entity {name}",
                        dest.name
                    ))
                })?),
                None => find_source_entity(source, dest),
            };

            let mut attributes = Vec::with_capacity(dest.attributes.len());
            for attr in &dest.attributes {
                let Some(explicit) = entry.attributes.iter().find(|a| a.name == attr.name) else {
                    attributes.push(infer_attribute(&dest.name, from_entity, attr)?);
                    continue;
                };
                let value_source = match (&explicit.source, &explicit.value) {
                    (Some(_), Some(_)) => {
                        return Err(invalid(format!(
                            "{}.{} sets both source and value",
                            dest.name, attr.name
                        )))
                    }
                    (Some(name), None) => {
                        if from_entity.and_then(|e| e.attribute(name)).is_none() {
                            return Err(failed(format!(
                                "mapping for {}.{} names unknown source attribute {name}",
                                dest.name, attr.name
                            )));
                        }
                        ValueSource::Attribute(name.clone())
                    }
                    (None, Some(value)) => ValueSource::Constant(value.clone()),
                    (None, None) => ValueSource::Null,
                };
                attributes.push(AttributeMapping {
                    name: attr.name.clone(),
                    source: value_source,
                    default: attr.default.clone(),
                });
            }

            for explicit in &entry.attributes {
                if dest.attribute(&explicit.name).is_none() {
                    return Err(invalid(format!(
                        "attribute {}.{} is not part of the destination model",
                        dest.name, explicit.name
                    )));
                }
            }

            entities.push(EntityMapping {
                name: dest.name.clone(),
                source_entity: from_entity.map(|e| e.name.clone()),
                attributes,
            });
        }

        Ok(Self {
            source: from.clone(),
            destination: to.clone(),
            origin: MappingOrigin::Named(path.to_path_buf()),
            entities,
        })
    }

    /// Read a mapping file; see [`MappingDescriptor::from_toml_str`].
    pub fn load(
        path: &Path,
        from: &ModelVersion,
        to: &ModelVersion,
        source: &SchemaArtifact,
        destination: &SchemaArtifact,
    ) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| MigrateError::InvalidArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text, path, from, to, source, destination)
    }

    /// Mapping for a destination entity.
    pub fn entity(&self, name: &str) -> Option<&EntityMapping> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Apply the descriptor to a whole store document.
    ///
    /// The result carries `destination`'s metadata. Every migrated record is
    /// passed through `custom` (if any) and then checked against the
    /// destination entity: required attributes must be set and every value
    /// must match its attribute kind.
    pub fn apply(
        &self,
        document: &StoreDocument,
        destination: &SchemaArtifact,
        custom: Option<&dyn CustomMapping>,
    ) -> Result<StoreDocument> {
        let mut out = StoreDocument::new(destination.metadata());

        for mapping in &self.entities {
            let entity = destination.entity(&mapping.name).ok_or_else(|| {
                failed(format!(
                    "descriptor maps {} which the destination model does not define",
                    mapping.name
                ))
            })?;
            let records = match &mapping.source_entity {
                Some(source) => document.records(source),
                None => &[],
            };

            let mut migrated = Vec::with_capacity(records.len());
            for record in records {
                let mut next = StoreRecord {
                    id: record.id.clone(),
                    attributes: map_attributes(record, &mapping.attributes),
                };
                if let Some(custom) = custom {
                    custom.transform_record(&mapping.name, &mut next)?;
                }
                check_record(entity, &next)?;
                migrated.push(next);
            }
            out.entities.insert(mapping.name.clone(), migrated);
        }
        Ok(out)
    }
}

fn map_attributes(record: &StoreRecord, mappings: &[AttributeMapping]) -> Map<String, Value> {
    let mut attributes = Map::new();
    for mapping in mappings {
        let value = match &mapping.source {
            ValueSource::Attribute(name) => record
                .get(name)
                .filter(|v| !v.is_null())
                .cloned()
                .or_else(|| mapping.default.clone()),
            ValueSource::Constant(value) => Some(value.clone()),
            ValueSource::Null => None,
        };
        if let Some(value) = value.filter(|v| !v.is_null()) {
            attributes.insert(mapping.name.clone(), value);
        }
    }
    attributes
}

fn check_record(entity: &EntityDescription, record: &StoreRecord) -> Result<()> {
    for attr in &entity.attributes {
        match record.get(&attr.name) {
            None | Some(Value::Null) if !attr.optional => {
                return Err(failed(format!(
                    "record {}/{} has no value for required attribute {}",
                    entity.name, record.id, attr.name
                )))
            }
            Some(value) if !value.is_null() && !attr.kind.accepts(value) => {
                return Err(failed(format!(
                    "record {}/{}: {value} is not a valid {} for {}",
                    entity.name, record.id, attr.kind, attr.name
                )))
            }
            _ => {}
        }
    }
    Ok(())
}
