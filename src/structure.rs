//! Structural validation of inbound bodies against the built-in document schema.
//!
//! Only the document shape is checked here: required members, member types,
//! mutually exclusive `id`/`lid`. Resource-type-specific rules belong to the
//! reader.

use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::{json, Value};

use crate::error::ReaderError;

fn definitions() -> Value {
    json!({
        "resource": {
            "type": "object",
            "required": ["type"],
            "properties": {
                "type": { "type": "string", "minLength": 1 },
                "id": { "type": "string" },
                "lid": { "type": "string", "minLength": 1 },
                "attributes": { "type": "object" },
                "relationships": {
                    "type": "object",
                    "additionalProperties": { "$ref": "#/$defs/relationship" }
                },
                "links": { "type": "object" },
                "meta": { "type": "object" }
            },
            "additionalProperties": false,
            "not": { "required": ["id", "lid"] }
        },
        "relationship": {
            "type": "object",
            "required": ["data"],
            "properties": {
                "data": { "$ref": "#/$defs/linkage" },
                "links": { "type": "object" },
                "meta": { "type": "object" }
            },
            "additionalProperties": false
        },
        "linkage": {
            "oneOf": [
                { "type": "null" },
                { "$ref": "#/$defs/identifier" },
                { "type": "array", "items": { "$ref": "#/$defs/identifier" } }
            ]
        },
        "identifier": {
            "type": "object",
            "required": ["type"],
            "properties": {
                "type": { "type": "string", "minLength": 1 },
                "id": { "type": "string" },
                "lid": { "type": "string", "minLength": 1 },
                "meta": { "type": "object" }
            },
            "additionalProperties": false,
            "oneOf": [
                { "required": ["id"] },
                { "required": ["lid"] }
            ]
        },
        "ref": {
            "type": "object",
            "required": ["type"],
            "properties": {
                "type": { "type": "string", "minLength": 1 },
                "id": { "type": "string" },
                "lid": { "type": "string", "minLength": 1 },
                "relationship": { "type": "string", "minLength": 1 }
            },
            "additionalProperties": false,
            "not": { "required": ["id", "lid"] }
        },
        "operation": {
            "type": "object",
            "required": ["op"],
            "properties": {
                "op": { "enum": ["add", "update", "remove"] },
                "ref": { "$ref": "#/$defs/ref" },
                "data": true,
                "meta": { "type": "object" }
            },
            "additionalProperties": false
        },
        "operations": {
            "type": "array",
            "items": { "$ref": "#/$defs/operation" }
        }
    })
}

fn schema_for(root: Value) -> Value {
    let mut schema = json!({ "$defs": definitions() });
    if let (Value::Object(map), Value::Object(root)) = (&mut schema, root) {
        map.extend(root);
    }
    schema
}

/// `{ "data": <resource object> }`
pub fn resource_document_schema() -> Value {
    schema_for(json!({
        "type": "object",
        "required": ["data"],
        "properties": {
            "data": { "$ref": "#/$defs/resource" },
            "meta": { "type": "object" },
            "jsonapi": { "type": "object" },
            "links": { "type": "object" }
        }
    }))
}

/// `{ "data": null | <identifier> | [<identifier>] }`
pub fn relationship_document_schema() -> Value {
    schema_for(json!({
        "type": "object",
        "required": ["data"],
        "properties": {
            "data": { "$ref": "#/$defs/linkage" },
            "meta": { "type": "object" }
        }
    }))
}

/// `{ "atomic:operations": [...] }`, also accepting the bare `operations` key.
pub fn atomic_envelope_schema() -> Value {
    schema_for(json!({
        "type": "object",
        "properties": {
            "atomic:operations": { "$ref": "#/$defs/operations" },
            "operations": { "$ref": "#/$defs/operations" },
            "meta": { "type": "object" },
            "jsonapi": { "type": "object" }
        },
        "anyOf": [
            { "required": ["atomic:operations"] },
            { "required": ["operations"] }
        ]
    }))
}

/// A bare resource object, as carried in an operation's `data`.
pub fn resource_object_schema() -> Value {
    schema_for(json!({ "$ref": "#/$defs/resource" }))
}

/// A bare linkage value, as carried in a relationship operation's `data`.
pub fn linkage_schema() -> Value {
    schema_for(json!({ "$ref": "#/$defs/linkage" }))
}

/// The inbound body shapes checked by the reader and the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    ResourceDocument,
    RelationshipDocument,
    AtomicEnvelope,
    ResourceObject,
    Linkage,
}

type Compiled = Result<Validator, String>;

static RESOURCE_DOCUMENT: OnceLock<Compiled> = OnceLock::new();
static RELATIONSHIP_DOCUMENT: OnceLock<Compiled> = OnceLock::new();
static ATOMIC_ENVELOPE: OnceLock<Compiled> = OnceLock::new();
static RESOURCE_OBJECT: OnceLock<Compiled> = OnceLock::new();
static LINKAGE: OnceLock<Compiled> = OnceLock::new();

impl Shape {
    pub fn schema(self) -> Value {
        match self {
            Shape::ResourceDocument => resource_document_schema(),
            Shape::RelationshipDocument => relationship_document_schema(),
            Shape::AtomicEnvelope => atomic_envelope_schema(),
            Shape::ResourceObject => resource_object_schema(),
            Shape::Linkage => linkage_schema(),
        }
    }

    /// Validator for this shape, compiled on first use.
    fn validator(self) -> Result<&'static Validator, &'static str> {
        let cell = match self {
            Shape::ResourceDocument => &RESOURCE_DOCUMENT,
            Shape::RelationshipDocument => &RELATIONSHIP_DOCUMENT,
            Shape::AtomicEnvelope => &ATOMIC_ENVELOPE,
            Shape::ResourceObject => &RESOURCE_OBJECT,
            Shape::Linkage => &LINKAGE,
        };
        cell.get_or_init(|| {
            tracing::debug!(shape = ?self, "compiling document schema");
            jsonschema::validator_for(&self.schema()).map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(String::as_str)
    }
}

/// Check `body` against the schema of `shape`.
///
/// Reports the violation with the deepest instance location, prefixed with
/// `prefix` so nested payloads point into the enclosing request.
///
/// # Errors
///
/// Returns `ReaderError::MalformedBody` on the first structural violation.
pub fn check(shape: Shape, body: &Value, prefix: &str) -> Result<(), ReaderError> {
    let validator = shape
        .validator()
        .map_err(|e| ReaderError::malformed(prefix, format!("invalid document schema: {}", e)))?;

    let worst = validator
        .iter_errors(body)
        .map(|e| (e.instance_path.to_string(), e.to_string()))
        .max_by_key(|(path, _)| path.matches('/').count());

    match worst {
        None => Ok(()),
        Some((path, message)) => Err(ReaderError::malformed(
            bracket_operation_index(&format!("{}{}", prefix, path)),
            message,
        )),
    }
}

/// Rewrite `/atomic:operations/3/...` as `/atomic:operations[3]/...`.
pub(crate) fn bracket_operation_index(pointer: &str) -> String {
    for key in ["/atomic:operations/", "/operations/"] {
        let Some(rest) = pointer.strip_prefix(key) else {
            continue;
        };
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            break;
        }
        return format!(
            "{}[{}]{}",
            key.trim_end_matches('/'),
            digits,
            &rest[digits.len()..]
        );
    }
    pointer.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer_of(result: Result<(), ReaderError>) -> String {
        match result {
            Err(ReaderError::MalformedBody { pointer, .. }) => pointer,
            other => panic!("expected malformed body, got {:?}", other),
        }
    }

    #[test]
    fn accepts_minimal_resource_document() {
        let body = json!({ "data": { "type": "musicTracks", "attributes": { "title": "Blue" } } });
        assert!(check(Shape::ResourceDocument, &body, "").is_ok());
    }

    #[test]
    fn rejects_missing_data() {
        let body = json!({ "meta": {} });
        assert_eq!(pointer_of(check(Shape::ResourceDocument, &body, "")), "");
    }

    #[test]
    fn rejects_id_and_lid_together() {
        let body = json!({ "data": { "type": "musicTracks", "id": "1", "lid": "a" } });
        assert_eq!(pointer_of(check(Shape::ResourceDocument, &body, "")), "/data");
    }

    #[test]
    fn points_into_relationship_data() {
        let body = json!({
            "data": {
                "type": "musicTracks",
                "relationships": { "ownedBy": { "data": { "type": "recordCompanies" } } }
            }
        });
        let pointer = pointer_of(check(Shape::ResourceDocument, &body, ""));
        assert!(pointer.starts_with("/data/relationships/ownedBy"), "{}", pointer);
    }

    #[test]
    fn envelope_requires_operations() {
        assert!(check(Shape::AtomicEnvelope, &json!({ "atomic:operations": [] }), "").is_ok());
        assert!(check(Shape::AtomicEnvelope, &json!({ "operations": [] }), "").is_ok());
        assert!(check(Shape::AtomicEnvelope, &json!({ "data": [] }), "").is_err());
    }

    #[test]
    fn envelope_errors_use_operation_index() {
        let body = json!({ "atomic:operations": [ { "op": "add" }, { "op": "upsert" } ] });
        let pointer = pointer_of(check(Shape::AtomicEnvelope, &body, ""));
        assert_eq!(pointer, "/atomic:operations[1]/op");
    }

    #[test]
    fn validators_are_compiled_once() {
        let first = Shape::Linkage.validator().unwrap();
        let second = Shape::Linkage.validator().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(check(Shape::Linkage, &json!(null), "/data").is_ok());
        assert_eq!(pointer_of(check(Shape::Linkage, &json!(5), "/data")), "/data");
    }

    #[test]
    fn brackets_operation_index() {
        assert_eq!(
            bracket_operation_index("/atomic:operations/12/data/id"),
            "/atomic:operations[12]/data/id"
        );
        assert_eq!(bracket_operation_index("/data/id"), "/data/id");
        assert_eq!(bracket_operation_index("/operations/0"), "/operations[0]");
    }
}
