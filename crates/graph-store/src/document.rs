use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Header describing which schema a store was written with.
///
/// Two metadata values are compatible when their entity hash maps are equal;
/// the model name and version identifier are informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Name of the model the store was written with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Version identifier recorded at write time (e.g. `"V1_1_0"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_identifier: Option<String>,
    /// Entity name -> entity version hash.
    #[serde(default)]
    pub entity_hashes: BTreeMap<String, String>,
}

impl StoreMetadata {
    /// Whether both headers describe the same entity structure.
    pub fn is_compatible_with(&self, other: &StoreMetadata) -> bool {
        self.entity_hashes == other.entity_hashes
    }
}

/// A single object in the graph: a stable id plus attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    /// Identifier, unique within its entity.
    pub id: String,
    /// Attribute name -> value.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl StoreRecord {
    /// Create a record with no attributes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Attribute value, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Entire contents of a store: metadata header and records per entity.
///
/// # Example
///
/// ```
/// use graph_store::{StoreDocument, StoreRecord};
///
/// let mut doc = StoreDocument::default();
/// doc.insert("Note", StoreRecord::new("n1").with("title", "groceries"));
/// doc.insert("Note", StoreRecord::new("n2").with("title", "errands"));
///
/// assert_eq!(doc.records("Note").len(), 2);
/// assert_eq!(doc.record_count(), 2);
/// assert!(doc.records("Tag").is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Schema header.
    pub metadata: StoreMetadata,
    /// Entity name -> records.
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<StoreRecord>>,
}

impl StoreDocument {
    /// Create an empty document with the given header.
    pub fn new(metadata: StoreMetadata) -> Self {
        Self {
            metadata,
            entities: BTreeMap::new(),
        }
    }

    /// Records of `entity`, empty if the entity has none.
    pub fn records(&self, entity: &str) -> &[StoreRecord] {
        self.entities.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append a record to `entity`.
    pub fn insert(&mut self, entity: impl Into<String>, record: StoreRecord) {
        self.entities.entry(entity.into()).or_default().push(record);
    }

    /// Total number of records across all entities.
    pub fn record_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    /// Names of entities that have at least one record slot.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}
