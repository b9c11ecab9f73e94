//! Versioned documents
//!
//! A document is a JSON object identified by its `_id` field and carrying an
//! integer `version`. Payload fields are arbitrary JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::StoreError;
use crate::versioning::initialize_version;

/// Identity key of every document
pub const ID_FIELD: &str = "_id";

/// Field holding the optimistic concurrency version
pub const VERSION_FIELD: &str = "version";

/// Data that carries a version for optimistic concurrency control
///
/// Implement this on typed records so they can be run through
/// [`initialize_version`] before their first insert.
pub trait Versioned {
    /// Current version of the data
    fn version(&self) -> i64;

    /// Mutable access to the version, for initialization
    fn version_mut(&mut self) -> &mut i64;
}

/// A schemaless document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Create an empty document with the given identity
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut doc = Self::new();
        doc.set(ID_FIELD, Value::String(id.into()));
        doc
    }

    /// Convert any serializable value that encodes as a JSON object
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, StoreError> {
        Self::try_from(serde_json::to_value(value)?)
    }

    /// Decode this document into a typed record
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// The document identity, if present and a string
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The document version, if present and an integer
    pub fn version(&self) -> Option<i64> {
        self.0.get(VERSION_FIELD).and_then(Value::as_i64)
    }

    /// Run the version initializer over the `version` field
    ///
    /// A missing or non-integer field counts as unset and becomes 1.
    pub fn initialize_version(&mut self) {
        let mut version = self.version().unwrap_or(0);
        initialize_version(&mut version);
        self.set(VERSION_FIELD, Value::from(version));
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl TryFrom<Value> for Document {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StoreError::InvalidDocument {
                details: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.0)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
