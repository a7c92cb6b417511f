//! Schema artifacts: the entity structure of an object graph at one version.
//!
//! Artifacts are TOML files:
//!
//! ```toml
//! name = "Notes"
//! version = "V1_1_0"
//!
//! [[entity]]
//! name = "Note"
//!
//! [[entity.attribute]]
//! name = "title"
//! type = "string"
//!
//! [[entity.attribute]]
//! name = "pinned"
//! type = "boolean"
//! default = false
//! ```
//!
//! Each entity gets a version hash over its name and its attributes' names,
//! kinds, optionality and reference targets. Defaults and renaming ids are
//! not part of the hash: changing them does not require migrating a store.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use graph_store::StoreMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{MigrateError, Result};
use crate::version::ModelVersion;

/// Value kind of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    String,
    Integer,
    Double,
    Boolean,
    /// RFC 3339 string or epoch seconds.
    Date,
    /// Base64 string or byte array.
    Binary,
    /// Id (or list of ids) of records in the `target` entity.
    Reference,
}

impl AttributeKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Binary => "binary",
            Self::Reference => "reference",
        }
    }

    /// Whether `value` is a valid non-null value of this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Double => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Date => value.is_string() || value.is_number(),
            Self::Binary => value.is_string() || value.is_array(),
            Self::Reference => match value {
                Value::String(_) => true,
                Value::Array(items) => items.iter().all(Value::is_string),
                _ => false,
            },
        }
    }

    /// Whether values of `source` can be copied into this kind unchanged.
    pub fn accepts_kind(&self, source: AttributeKind) -> bool {
        *self == source || matches!((self, source), (Self::Double, Self::Integer))
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attribute of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeKind,
    #[serde(default)]
    pub optional: bool,
    /// Value used for records that predate the attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Name this attribute had in the previous version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renaming_id: Option<String>,
    /// Target entity of a reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// One entity of a schema artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    /// Name this entity had in the previous version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renaming_id: Option<String>,
    #[serde(rename = "attribute", default)]
    pub attributes: Vec<AttributeDescription>,
}

impl EntityDescription {
    /// Attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// SHA-256 version hash of the entity structure, hex encoded.
    pub fn version_hash(&self) -> String {
        let mut attributes: Vec<&AttributeDescription> = self.attributes.iter().collect();
        attributes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut hasher = Sha256::new();
        hasher.update(b"entity:");
        hasher.update(self.name.as_bytes());
        hasher.update(b"\n");
        for attr in attributes {
            hasher.update(
                format!(
                    "attr:{}:{}:{}:{}\n",
                    attr.name,
                    attr.kind,
                    attr.optional,
                    attr.target.as_deref().unwrap_or("")
                )
                .as_bytes(),
            );
        }
        format!("{:x}", hasher.finalize())
    }
}

/// The loaded structure of an object graph at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaArtifact {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ModelVersion>,
    #[serde(rename = "entity", default)]
    pub entities: Vec<EntityDescription>,
}

/// A single validation error with context about where it occurred.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub entity: Option<String>,
    pub attribute: Option<String>,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ctx = Vec::new();
        if let Some(e) = &self.entity {
            ctx.push(format!("entity={e}"));
        }
        if let Some(a) = &self.attribute {
            ctx.push(format!("attribute={a}"));
        }
        if ctx.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "[{}] {}", ctx.join(", "), self.message)
        }
    }
}

/// Two artifacts define the same entity differently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("entity {entity} is defined differently in {first} and {second}")]
pub struct MergeConflict {
    pub entity: String,
    pub first: String,
    pub second: String,
}

impl SchemaArtifact {
    /// Empty artifact.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            entities: Vec::new(),
        }
    }

    /// Parse TOML without validating.
    pub fn from_toml_str(source: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Read, parse and validate the artifact at `path`.
    ///
    /// When the file does not declare a version, the version is taken from
    /// the file name if it carries one.
    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path).map_err(|e| MigrateError::InvalidArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut artifact =
            Self::from_toml_str(&source).map_err(|e| MigrateError::InvalidArtifact {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if artifact.version.is_none() {
            artifact.version = ModelVersion::from_path(path);
        }
        artifact
            .validate()
            .map_err(|errors| MigrateError::InvalidArtifact {
                path: path.to_path_buf(),
                reason: errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            })?;
        Ok(artifact)
    }

    /// Entity by name.
    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Builder-style entity append.
    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    /// Store metadata a store written with this artifact carries.
    pub fn metadata(&self) -> StoreMetadata {
        StoreMetadata {
            model_name: Some(self.name.clone()),
            version_identifier: self.version.as_ref().map(|v| v.identifier().to_string()),
            entity_hashes: self
                .entities
                .iter()
                .map(|e| (e.name.clone(), e.version_hash()))
                .collect(),
        }
    }

    /// Whether a store with `metadata` can be opened with this artifact as is.
    pub fn is_compatible(&self, metadata: &StoreMetadata) -> bool {
        self.metadata().is_compatible_with(metadata)
    }

    /// Check structural rules. Returns every problem found.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let error = |entity: Option<&str>, attribute: Option<&str>, message: String| ValidationError {
            entity: entity.map(str::to_string),
            attribute: attribute.map(str::to_string),
            message,
        };

        if self.name.trim().is_empty() {
            errors.push(error(None, None, "model name must not be empty".into()));
        }

        let entity_names: HashSet<&str> = self.entities.iter().map(|e| e.name.as_str()).collect();
        let mut seen = HashSet::new();
        for entity in &self.entities {
            let ename = Some(entity.name.as_str());
            if entity.name.trim().is_empty() {
                errors.push(error(None, None, "entity name must not be empty".into()));
            }
            if !seen.insert(entity.name.as_str()) {
                errors.push(error(ename, None, "duplicate entity name".into()));
            }

            let mut attr_seen = HashSet::new();
            for attr in &entity.attributes {
                let aname = Some(attr.name.as_str());
                if attr.name.trim().is_empty() {
                    errors.push(error(ename, None, "attribute name must not be empty".into()));
                }
                if !attr_seen.insert(attr.name.as_str()) {
                    errors.push(error(ename, aname, "duplicate attribute name".into()));
                }
                match (attr.kind, attr.target.as_deref()) {
                    (AttributeKind::Reference, None) => errors.push(error(
                        ename,
                        aname,
                        "reference attribute needs a target".into(),
                    )),
                    (AttributeKind::Reference, Some(target)) if !entity_names.contains(target) => {
                        errors.push(error(
                            ename,
                            aname,
                            format!("reference target {target} is not an entity"),
                        ))
                    }
                    (kind, Some(_)) if kind != AttributeKind::Reference => errors.push(error(
                        ename,
                        aname,
                        format!("target is only valid on references, not {kind}"),
                    )),
                    _ => {}
                }
                if let Some(default) = &attr.default {
                    if !attr.kind.accepts(default) {
                        errors.push(error(
                            ename,
                            aname,
                            format!("default {default} is not a valid {}", attr.kind),
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Merge several artifacts into one.
    ///
    /// Entities are unioned in order. An entity defined by more than one part
    /// must hash identically in all of them. The result takes the first
    /// part's name and the highest declared version.
    pub fn merge(parts: &[SchemaArtifact]) -> std::result::Result<SchemaArtifact, MergeConflict> {
        let mut merged = match parts.first() {
            Some(first) => SchemaArtifact::new(first.name.clone()),
            None => return Ok(SchemaArtifact::new("")),
        };
        let mut owners: Vec<&str> = Vec::new();

        for part in parts {
            if part.version > merged.version {
                merged.version = part.version.clone();
            }
            for entity in &part.entities {
                match merged.entities.iter().position(|e| e.name == entity.name) {
                    Some(i) if merged.entities[i].version_hash() != entity.version_hash() => {
                        return Err(MergeConflict {
                            entity: entity.name.clone(),
                            first: owners[i].to_string(),
                            second: part.name.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        merged.entities.push(entity.clone());
                        owners.push(part.name.as_str());
                    }
                }
            }
        }
        Ok(merged)
    }
}
