//! Core types for resource metadata and document processing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AccessError;

/// JSON:API version advertised in the top-level `jsonapi` object.
pub const JSONAPI_VERSION: &str = "1.1";

/// URI of the atomic operations extension.
pub const ATOMIC_EXTENSION: &str = "https://jsonapi.org/ext/atomic";

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Value kind of an attribute.
///
/// Replaces runtime type inspection: each attribute declares the kind its
/// accessor pair reads and writes, and inbound JSON is converted against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrKind {
    Boolean,
    Integer,
    Float,
    Text,
    /// Arbitrary JSON, passed through unchanged.
    Json,
}

impl AttrKind {
    /// Convert an inbound JSON value into an attribute value of this kind.
    ///
    /// `null` is accepted only when `nullable` is set.
    pub fn convert(self, value: &Value, nullable: bool) -> Result<AttrValue, String> {
        if value.is_null() {
            return if nullable || self == AttrKind::Json {
                Ok(AttrValue::Null)
            } else {
                Err("null is not allowed".to_string())
            };
        }

        match (self, value) {
            (AttrKind::Boolean, Value::Bool(b)) => Ok(AttrValue::Bool(*b)),
            (AttrKind::Integer, Value::Number(n)) => n
                .as_i64()
                .map(AttrValue::Int)
                .ok_or_else(|| format!("expected integer, got {}", n)),
            (AttrKind::Float, Value::Number(n)) => n
                .as_f64()
                .map(AttrValue::Float)
                .ok_or_else(|| format!("expected number, got {}", n)),
            (AttrKind::Text, Value::String(s)) => Ok(AttrValue::Text(s.clone())),
            (AttrKind::Json, other) => Ok(AttrValue::Json(other.clone())),
            (kind, other) => Err(format!(
                "expected {}, got {}",
                kind.name(),
                json_type_name(other)
            )),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AttrKind::Boolean => "boolean",
            AttrKind::Integer => "integer",
            AttrKind::Float => "number",
            AttrKind::Text => "string",
            AttrKind::Json => "json",
        }
    }
}

/// A single attribute value read from or written to a resource.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AttrValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    /// Render as JSON for the wire.
    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Null => Value::Null,
            AttrValue::Bool(b) => Value::Bool(*b),
            AttrValue::Int(i) => Value::from(*i),
            AttrValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            AttrValue::Text(s) => Value::String(s.clone()),
            AttrValue::Json(v) => v.clone(),
        }
    }

    /// Extract a typed value, used by attribute setters.
    pub fn extract<T: FromAttrValue>(self) -> Result<T, AccessError> {
        T::from_attr(self)
    }

    fn kind_name(&self) -> &'static str {
        match self {
            AttrValue::Null => "null",
            AttrValue::Bool(_) => "boolean",
            AttrValue::Int(_) => "integer",
            AttrValue::Float(_) => "number",
            AttrValue::Text(_) => "string",
            AttrValue::Json(_) => "json",
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<Value> for AttrValue {
    fn from(value: Value) -> Self {
        AttrValue::Json(value)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AttrValue::Null)
    }
}

/// Conversion out of an [`AttrValue`] into a field type.
pub trait FromAttrValue: Sized {
    fn from_attr(value: AttrValue) -> Result<Self, AccessError>;
}

fn mismatch(expected: &str, value: &AttrValue) -> AccessError {
    AccessError::new(format!("expected {}, got {}", expected, value.kind_name()))
}

impl FromAttrValue for bool {
    fn from_attr(value: AttrValue) -> Result<Self, AccessError> {
        match value {
            AttrValue::Bool(b) => Ok(b),
            other => Err(mismatch("boolean", &other)),
        }
    }
}

impl FromAttrValue for i64 {
    fn from_attr(value: AttrValue) -> Result<Self, AccessError> {
        match value {
            AttrValue::Int(i) => Ok(i),
            other => Err(mismatch("integer", &other)),
        }
    }
}

impl FromAttrValue for i32 {
    fn from_attr(value: AttrValue) -> Result<Self, AccessError> {
        let wide = i64::from_attr(value)?;
        i32::try_from(wide).map_err(|_| AccessError::new(format!("{} is out of range", wide)))
    }
}

impl FromAttrValue for f64 {
    fn from_attr(value: AttrValue) -> Result<Self, AccessError> {
        match value {
            AttrValue::Float(f) => Ok(f),
            AttrValue::Int(i) => Ok(i as f64),
            other => Err(mismatch("number", &other)),
        }
    }
}

impl FromAttrValue for String {
    fn from_attr(value: AttrValue) -> Result<Self, AccessError> {
        match value {
            AttrValue::Text(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl FromAttrValue for Value {
    fn from_attr(value: AttrValue) -> Result<Self, AccessError> {
        Ok(value.to_json())
    }
}

impl<T: FromAttrValue> FromAttrValue for Option<T> {
    fn from_attr(value: AttrValue) -> Result<Self, AccessError> {
        match value {
            AttrValue::Null => Ok(None),
            other => T::from_attr(other).map(Some),
        }
    }
}

/// Value type of a resource's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    Integer,
    String,
    Uuid,
}

impl IdKind {
    /// Check that a wire id is a valid value of this kind.
    pub fn validate(self, id: &str) -> Result<(), String> {
        match self {
            IdKind::Integer => id
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| format!("'{}' is not a valid integer id", id)),
            IdKind::String if id.is_empty() => Err("id must not be empty".to_string()),
            IdKind::String => Ok(()),
            IdKind::Uuid => uuid::Uuid::parse_str(id)
                .map(|_| ())
                .map_err(|_| format!("'{}' is not a valid uuid", id)),
        }
    }
}

bitflags::bitflags! {
    /// What clients may do with an attribute.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttrCapabilities: u8 {
        const VIEW = 1 << 0;
        const FILTER = 1 << 1;
        const SORT = 1 << 2;
        const CREATE = 1 << 3;
        const CHANGE = 1 << 4;
    }
}

impl Default for AttrCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

bitflags::bitflags! {
    /// What clients may do with a relationship.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RelCapabilities: u8 {
        const VIEW = 1 << 0;
        /// Replace the relationship on create, update, or its relationship endpoint.
        const SET = 1 << 1;
        /// Append members to a to-many relationship.
        const ADD = 1 << 2;
        /// Remove members from a to-many relationship.
        const REMOVE = 1 << 3;
    }
}

impl Default for RelCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

bitflags::bitflags! {
    /// Which relationship links are rendered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LinkKinds: u8 {
        const SELF = 1 << 0;
        const RELATED = 1 << 1;
    }
}

impl Default for LinkKinds {
    fn default() -> Self {
        Self::all()
    }
}

/// Single capability name as written in model manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    View,
    Filter,
    Sort,
    Create,
    Change,
    Set,
    Add,
    Remove,
}

impl Capability {
    /// Attribute flag for this capability, if it applies to attributes.
    pub const fn as_attr(self) -> Option<AttrCapabilities> {
        match self {
            Self::View => Some(AttrCapabilities::VIEW),
            Self::Filter => Some(AttrCapabilities::FILTER),
            Self::Sort => Some(AttrCapabilities::SORT),
            Self::Create => Some(AttrCapabilities::CREATE),
            Self::Change => Some(AttrCapabilities::CHANGE),
            Self::Set | Self::Add | Self::Remove => None,
        }
    }

    /// Relationship flag for this capability, if it applies to relationships.
    pub const fn as_rel(self) -> Option<RelCapabilities> {
        match self {
            Self::View => Some(RelCapabilities::VIEW),
            Self::Set => Some(RelCapabilities::SET),
            Self::Add => Some(RelCapabilities::ADD),
            Self::Remove => Some(RelCapabilities::REMOVE),
            Self::Filter | Self::Sort | Self::Create | Self::Change => None,
        }
    }
}

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// How a resource's fields are being accessed in the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Rendering a response.
    Read,
    /// Reading a create request body.
    Create,
    /// Reading an update request body.
    Update,
}

impl Access {
    pub fn is_write(self) -> bool {
        !matches!(self, Access::Read)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Create => f.write_str("create"),
            Access::Update => f.write_str("update"),
        }
    }
}

/// Library configuration.
///
/// Deserializes from camelCase JSON with every key optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Upper bound on the number of operations in one atomic request.
    pub max_atomic_operations: usize,
    /// Accept `id` in create payloads.
    pub allow_client_generated_ids: bool,
    /// Skip unknown attributes in request bodies instead of rejecting them.
    pub allow_unknown_fields: bool,
    /// Longest accepted include chain, unlimited when unset.
    pub max_include_depth: Option<usize>,
    /// Prefix for generated links, e.g. `https://api.example.com`.
    pub base_url: Option<String>,
    pub emit_links: bool,
    pub emit_jsonapi_object: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_atomic_operations: 10,
            allow_client_generated_ids: false,
            allow_unknown_fields: false,
            max_include_depth: None,
            base_url: None,
            emit_links: true,
            emit_jsonapi_object: true,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_atomic_operations(mut self, max: usize) -> Self {
        self.max_atomic_operations = max;
        self
    }

    pub fn allow_client_generated_ids(mut self, allow: bool) -> Self {
        self.allow_client_generated_ids = allow;
        self
    }

    pub fn allow_unknown_fields(mut self, allow: bool) -> Self {
        self.allow_unknown_fields = allow;
        self
    }

    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = Some(depth);
        self
    }

    /// Trailing slashes are trimmed.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn emit_links(mut self, emit: bool) -> Self {
        self.emit_links = emit;
        self
    }

    pub fn emit_jsonapi_object(mut self, emit: bool) -> Self {
        self.emit_jsonapi_object = emit;
        self
    }

    /// Prefix used for links: the base url, or empty for relative links.
    pub fn link_prefix(&self) -> &str {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attr_kind_converts_matching_values() {
        assert_eq!(
            AttrKind::Text.convert(&json!("Yellow"), false).unwrap(),
            AttrValue::Text("Yellow".into())
        );
        assert_eq!(
            AttrKind::Integer.convert(&json!(271), false).unwrap(),
            AttrValue::Int(271)
        );
        assert_eq!(
            AttrKind::Float.convert(&json!(3), false).unwrap(),
            AttrValue::Float(3.0)
        );
        assert_eq!(
            AttrKind::Json.convert(&json!({"a": 1}), false).unwrap(),
            AttrValue::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn attr_kind_rejects_mismatches() {
        let err = AttrKind::Integer.convert(&json!("12"), false).unwrap_err();
        assert_eq!(err, "expected integer, got string");

        let err = AttrKind::Integer.convert(&json!(1.5), false).unwrap_err();
        assert!(err.starts_with("expected integer"));
    }

    #[test]
    fn attr_kind_null_requires_nullable() {
        assert!(AttrKind::Text.convert(&Value::Null, false).is_err());
        assert_eq!(
            AttrKind::Text.convert(&Value::Null, true).unwrap(),
            AttrValue::Null
        );
    }

    #[test]
    fn extract_optional_values() {
        let none: Option<String> = AttrValue::Null.extract().unwrap();
        assert_eq!(none, None);

        let some: Option<i64> = AttrValue::Int(7).extract().unwrap();
        assert_eq!(some, Some(7));

        assert!(AttrValue::Bool(true).extract::<String>().is_err());
    }

    #[test]
    fn id_kind_validation() {
        assert!(IdKind::Integer.validate("42").is_ok());
        assert!(IdKind::Integer.validate("forty-two").is_err());
        assert!(IdKind::Uuid
            .validate("6b0d7e58-8f1b-4a6b-9ad9-5ff4d1c2a1f0")
            .is_ok());
        assert!(IdKind::Uuid.validate("1").is_err());
        assert!(IdKind::String.validate("").is_err());
    }

    #[test]
    fn capability_flags_split_by_field_kind() {
        assert_eq!(Capability::Sort.as_attr(), Some(AttrCapabilities::SORT));
        assert_eq!(Capability::Sort.as_rel(), None);
        assert_eq!(Capability::Add.as_rel(), Some(RelCapabilities::ADD));
        assert_eq!(Capability::View.as_rel(), Some(RelCapabilities::VIEW));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: Options =
            serde_json::from_value(json!({ "maxAtomicOperations": 3, "baseUrl": "http://x" }))
                .unwrap();
        assert_eq!(options.max_atomic_operations, 3);
        assert_eq!(options.base_url.as_deref(), Some("http://x"));
        assert!(options.emit_links);
        assert!(!options.allow_client_generated_ids);
    }

    #[test]
    fn options_base_url_trims_slash() {
        let options = Options::new().base_url("https://api.example.com/");
        assert_eq!(options.link_prefix(), "https://api.example.com");
        assert_eq!(Options::new().link_prefix(), "");
    }
}
