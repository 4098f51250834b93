//! Wire types of the hypermedia document format.
//!
//! These types describe outbound documents. Inbound bodies are read from
//! `serde_json::Value` by the reader so that every failure can carry a JSON
//! pointer into the request.

use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ATOMIC_EXTENSION, JSONAPI_VERSION};

/// Top-level document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonapi: Option<JsonApiObject>,
    #[serde(skip_serializing_if = "Links::is_empty")]
    pub links: Links,
    #[serde(skip_serializing_if = "PrimaryData::is_absent")]
    pub data: PrimaryData,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorObject>,
    #[serde(rename = "atomic:results", skip_serializing_if = "Option::is_none")]
    pub atomic_results: Option<Vec<AtomicResult>>,
}

impl Document {
    /// Error document carrying the given error objects.
    pub fn from_errors(errors: Vec<ErrorObject>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Primary resources in document order.
    pub fn primary(&self) -> Vec<&ResourceObject> {
        match &self.data {
            PrimaryData::Single(object) => vec![object.as_ref()],
            PrimaryData::Many(objects) => objects.iter().collect(),
            PrimaryData::Absent | PrimaryData::Null => Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The `jsonapi` member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonApiObject {
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ext: Vec<String>,
}

impl JsonApiObject {
    pub fn new() -> Self {
        Self {
            version: JSONAPI_VERSION.to_string(),
            ext: Vec::new(),
        }
    }

    pub fn atomic() -> Self {
        Self {
            version: JSONAPI_VERSION.to_string(),
            ext: vec![ATOMIC_EXTENSION.to_string()],
        }
    }
}

impl Default for JsonApiObject {
    fn default() -> Self {
        Self::new()
    }
}

/// Primary data of a document or an atomic result.
///
/// `Absent` omits the member, `Null` renders `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PrimaryData {
    #[default]
    Absent,
    Null,
    Single(Box<ResourceObject>),
    Many(Vec<ResourceObject>),
}

impl PrimaryData {
    pub fn is_absent(&self) -> bool {
        matches!(self, PrimaryData::Absent)
    }
}

impl Serialize for PrimaryData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PrimaryData::Absent | PrimaryData::Null => serializer.serialize_none(),
            PrimaryData::Single(object) => object.serialize(serializer),
            PrimaryData::Many(objects) => objects.serialize(serializer),
        }
    }
}

/// `self` and `related` links.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Links {
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
}

impl Links {
    pub fn is_empty(&self) -> bool {
        self.self_link.is_none() && self.related.is_none()
    }
}

/// A resource object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub relationships: IndexMap<String, RelationshipObject>,
    #[serde(skip_serializing_if = "Links::is_empty")]
    pub links: Links,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl ResourceObject {
    pub fn new(resource_type: impl Into<String>, id: Option<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id,
            lid: None,
            attributes: IndexMap::new(),
            relationships: IndexMap::new(),
            links: Links::default(),
            meta: None,
        }
    }

    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            lid: self.lid.clone(),
        }
    }
}

/// A `(type, id)` or `(type, lid)` pair on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

impl ResourceIdentifier {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: Some(id.into()),
            lid: None,
        }
    }
}

/// Relationship linkage as rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Linkage {
    /// Only links are rendered.
    #[default]
    Absent,
    ToOne(Option<ResourceIdentifier>),
    ToMany(Vec<ResourceIdentifier>),
}

impl Linkage {
    pub fn is_absent(&self) -> bool {
        matches!(self, Linkage::Absent)
    }

    /// Identifiers in linkage order.
    pub fn identifiers(&self) -> Vec<&ResourceIdentifier> {
        match self {
            Linkage::Absent | Linkage::ToOne(None) => Vec::new(),
            Linkage::ToOne(Some(identifier)) => vec![identifier],
            Linkage::ToMany(identifiers) => identifiers.iter().collect(),
        }
    }
}

impl Serialize for Linkage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Linkage::Absent | Linkage::ToOne(None) => serializer.serialize_none(),
            Linkage::ToOne(Some(identifier)) => identifier.serialize(serializer),
            Linkage::ToMany(identifiers) => identifiers.serialize(serializer),
        }
    }
}

/// A relationship object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelationshipObject {
    #[serde(skip_serializing_if = "Links::is_empty")]
    pub links: Links,
    #[serde(skip_serializing_if = "Linkage::is_absent")]
    pub data: Linkage,
}

/// Location of the input an error refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

impl ErrorSource {
    pub fn pointer(pointer: impl Into<String>) -> Self {
        Self {
            pointer: Some(pointer.into()),
            parameter: None,
        }
    }

    pub fn parameter(parameter: impl Into<String>) -> Self {
        Self {
            pointer: None,
            parameter: Some(parameter.into()),
        }
    }
}

/// An error object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

/// Kind of an atomic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpCode {
    Add,
    Update,
    Remove,
}

/// Target of an atomic operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationRef {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub lid: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
}

/// One entry of `atomic:operations`.
///
/// `data` is kept raw: whether it is a resource object, an identifier, a list
/// or `null` depends on the operation, so it is read later by the reader.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AtomicOperation {
    pub op: OpCode,
    #[serde(default, rename = "ref")]
    pub reference: Option<OperationRef>,
    #[serde(default, deserialize_with = "present")]
    pub data: Option<Value>,
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl AtomicOperation {
    pub fn new(op: OpCode) -> Self {
        Self {
            op,
            reference: None,
            data: None,
            meta: None,
        }
    }

    pub fn with_ref(mut self, reference: OperationRef) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// One entry of `atomic:results`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AtomicResult {
    pub data: PrimaryData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}
