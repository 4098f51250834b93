//! Reading request documents into typed change-sets.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::ReaderError;
use crate::fields::{CapabilityEvaluator, RequestContext};
use crate::ledger::{LocalIdLedger, ResolvedIdentity};
use crate::registry::{Registry, RelationshipDescriptor, ResourceType};
use crate::structure::{self, Shape};
use crate::types::{Access, AttrValue, Cardinality, Options};

/// Where local ids may appear.
#[derive(Debug, Clone, Copy)]
pub enum LocalIdScope<'l> {
    /// A plain request: local ids are rejected.
    Single,
    /// Operation `index` of an atomic request.
    Batch {
        ledger: &'l LocalIdLedger,
        index: usize,
    },
}

/// How a relationship change combines with the current members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeMode {
    Replace,
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipChange {
    pub mode: ChangeMode,
    pub targets: Vec<ResolvedIdentity>,
}

/// Typed content of a create or update request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub resource_type: String,
    pub id: Option<String>,
    /// Local id the resource declares, on create within a batch.
    pub lid: Option<String>,
    pub attributes: IndexMap<String, AttrValue>,
    pub relationships: IndexMap<String, RelationshipChange>,
}

impl ChangeSet {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: None,
            lid: None,
            attributes: IndexMap::new(),
            relationships: IndexMap::new(),
        }
    }

    /// Change-set touching a single relationship.
    pub fn relationship(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        relationship: impl Into<String>,
        change: RelationshipChange,
    ) -> Self {
        let mut changes = Self::new(resource_type);
        changes.id = Some(id.into());
        changes.relationships.insert(relationship.into(), change);
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.relationships.is_empty()
    }
}

fn child(pointer: &str, segment: &str) -> String {
    format!("{}/{}", pointer, segment)
}

/// Reads request bodies for one request.
pub struct DocumentReader<'r> {
    registry: &'r Registry,
    evaluator: CapabilityEvaluator<'r>,
    options: Options,
}

impl<'r> DocumentReader<'r> {
    pub fn new(registry: &'r Registry, context: RequestContext, options: Options) -> Self {
        Self {
            registry,
            evaluator: CapabilityEvaluator::new(registry, context),
            options,
        }
    }

    /// Read a `{ "data": <resource> }` body whose type must be assignable to
    /// `expected_type`.
    ///
    /// # Errors
    ///
    /// Returns `ReaderError` for missing or malformed bodies, unknown or
    /// incompatible types, fields that cannot be written, bad values and
    /// unresolvable relationship targets.
    pub fn deserialize(
        &mut self,
        body: &str,
        expected_type: &str,
        access: Access,
        scope: LocalIdScope<'_>,
    ) -> Result<ChangeSet, ReaderError> {
        let document = parse_body(body)?;
        structure::check(Shape::ResourceDocument, &document, "")?;
        self.read_checked(&document["data"], "/data", expected_type, None, access, scope)
    }

    /// Read an update body addressed to `expected_type` / `id`.
    ///
    /// # Errors
    ///
    /// As [`DocumentReader::deserialize`], plus `IdMismatch` when the body
    /// names another resource.
    pub fn deserialize_update(
        &mut self,
        body: &str,
        expected_type: &str,
        id: &str,
        scope: LocalIdScope<'_>,
    ) -> Result<ChangeSet, ReaderError> {
        let document = parse_body(body)?;
        structure::check(Shape::ResourceDocument, &document, "")?;
        self.read_checked(
            &document["data"],
            "/data",
            expected_type,
            Some(id),
            Access::Update,
            scope,
        )
    }

    /// Read a bare resource object found at `pointer`.
    pub(crate) fn read_resource(
        &mut self,
        data: &Value,
        pointer: &str,
        expected_type: &str,
        target_id: Option<&str>,
        access: Access,
        scope: LocalIdScope<'_>,
    ) -> Result<ChangeSet, ReaderError> {
        structure::check(Shape::ResourceObject, data, pointer)?;
        self.read_checked(data, pointer, expected_type, target_id, access, scope)
    }

    fn read_checked(
        &mut self,
        data: &Value,
        pointer: &str,
        expected_type: &str,
        target_id: Option<&str>,
        access: Access,
        scope: LocalIdScope<'_>,
    ) -> Result<ChangeSet, ReaderError> {
        let object = data
            .as_object()
            .ok_or_else(|| ReaderError::malformed(pointer, "expected a resource object"))?;
        let ty = self.resource_type(object, pointer, expected_type)?;

        let mut changes = ChangeSet::new(ty.name());
        self.read_identity(object, pointer, ty, target_id, access, scope, &mut changes)?;

        let fields = self
            .evaluator
            .resolve(ty.name(), access)
            .map_err(|e| ReaderError::malformed(pointer, e.to_string()))?;

        if let Some(attributes) = object.get("attributes").and_then(Value::as_object) {
            let attrs_pointer = child(pointer, "attributes");
            for (name, value) in attributes {
                let field_pointer = child(&attrs_pointer, name);
                let Some(attr) = ty.attribute(name) else {
                    if self.options.allow_unknown_fields {
                        tracing::debug!(
                            resource_type = ty.name(),
                            field = %name,
                            "skipped unknown attribute"
                        );
                        continue;
                    }
                    return Err(not_writable(ty, name, "does not exist", field_pointer));
                };
                // Server-owned values echoed back from a previous response.
                if attr.is_immutable() {
                    tracing::debug!(
                        resource_type = ty.name(),
                        field = %name,
                        "skipped immutable attribute"
                    );
                    continue;
                }
                if !fields.has_attribute(name) {
                    return Err(not_writable(
                        ty,
                        name,
                        &format!("cannot be assigned on {}", access),
                        field_pointer,
                    ));
                }
                let converted = attr.kind().convert(value, attr.is_nullable()).map_err(|message| {
                    ReaderError::InvalidAttributeValue {
                        resource_type: ty.name().to_string(),
                        field: name.clone(),
                        message,
                        pointer: field_pointer.clone(),
                    }
                })?;
                changes.attributes.insert(name.clone(), converted);
            }
        }

        if let Some(relationships) = object.get("relationships").and_then(Value::as_object) {
            let rels_pointer = child(pointer, "relationships");
            for (name, relationship) in relationships {
                let field_pointer = child(&rels_pointer, name);
                let Some(rel) = ty.relationship(name) else {
                    if self.options.allow_unknown_fields {
                        tracing::debug!(
                            resource_type = ty.name(),
                            field = %name,
                            "skipped unknown relationship"
                        );
                        continue;
                    }
                    return Err(not_writable(ty, name, "does not exist", field_pointer));
                };
                if !fields.has_relationship(name) {
                    return Err(not_writable(
                        ty,
                        name,
                        &format!("cannot be assigned on {}", access),
                        field_pointer,
                    ));
                }
                let data = relationship.get("data").unwrap_or(&Value::Null);
                let targets =
                    self.read_identifiers(data, &child(&field_pointer, "data"), rel, scope)?;
                changes.relationships.insert(
                    name.clone(),
                    RelationshipChange {
                        mode: ChangeMode::Replace,
                        targets,
                    },
                );
            }
        }

        Ok(changes)
    }

    fn resource_type(
        &self,
        object: &Map<String, Value>,
        pointer: &str,
        expected_type: &str,
    ) -> Result<&'r ResourceType, ReaderError> {
        let type_pointer = child(pointer, "type");
        let name = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ReaderError::malformed(&type_pointer, "'type' must be a string"))?;
        let ty = self
            .registry
            .get(name)
            .ok_or_else(|| ReaderError::UnknownResourceType {
                name: name.to_string(),
                pointer: type_pointer.clone(),
            })?;
        if !self.registry.is_assignable(name, expected_type) {
            return Err(ReaderError::ResourceTypeMismatch {
                expected: expected_type.to_string(),
                actual: name.to_string(),
                pointer: type_pointer,
            });
        }
        Ok(ty)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_identity(
        &self,
        object: &Map<String, Value>,
        pointer: &str,
        ty: &ResourceType,
        target_id: Option<&str>,
        access: Access,
        scope: LocalIdScope<'_>,
        changes: &mut ChangeSet,
    ) -> Result<(), ReaderError> {
        let id = object.get("id").and_then(Value::as_str);
        let lid = object.get("lid").and_then(Value::as_str);
        if id.is_some() && lid.is_some() {
            return Err(ReaderError::malformed(pointer, "'id' and 'lid' cannot both be present"));
        }
        let id_pointer = child(pointer, "id");
        let lid_pointer = child(pointer, "lid");

        if let Some(lid) = lid {
            let LocalIdScope::Batch { ledger, index } = scope else {
                return Err(ReaderError::LocalIdOutsideBatch {
                    lid: lid.to_string(),
                    pointer: lid_pointer,
                });
            };
            let local = |source| ReaderError::LocalId {
                pointer: lid_pointer.clone(),
                source,
            };
            match access {
                Access::Create => {
                    ledger.ensure_declarable(lid, index).map_err(local)?;
                    changes.lid = Some(lid.to_string());
                }
                Access::Update | Access::Read => {
                    let resolved = ledger
                        .resolve_as(self.registry, lid, index, ty.name())
                        .map_err(local)?;
                    changes.id = Some(resolved.id.clone());
                }
            }
        }

        if let Some(id) = id {
            if access == Access::Create && !self.options.allow_client_generated_ids {
                return Err(ReaderError::ClientIdNotAllowed {
                    resource_type: ty.name().to_string(),
                    pointer: id_pointer,
                });
            }
            ty.id_kind()
                .validate(id)
                .map_err(|message| ReaderError::InvalidId {
                    resource_type: ty.name().to_string(),
                    message,
                    pointer: id_pointer.clone(),
                })?;
            changes.id = Some(id.to_string());
        }

        if access == Access::Update {
            let Some(actual) = changes.id.as_deref() else {
                return Err(ReaderError::MissingId {
                    pointer: pointer.to_string(),
                });
            };
            if let Some(expected) = target_id {
                if expected != actual {
                    return Err(ReaderError::IdMismatch {
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                        pointer: id_pointer,
                    });
                }
            }
        }
        Ok(())
    }

    /// Read relationship linkage (`null`, one identifier or a list) for `rel`.
    ///
    /// # Errors
    ///
    /// Returns `RelationshipCardinalityMismatch`, `RelationshipTypeMismatch`,
    /// `InvalidId`, `UnknownResourceType` and local id errors.
    pub fn read_identifiers(
        &self,
        data: &Value,
        pointer: &str,
        rel: &RelationshipDescriptor,
        scope: LocalIdScope<'_>,
    ) -> Result<Vec<ResolvedIdentity>, ReaderError> {
        let mismatch = || ReaderError::RelationshipCardinalityMismatch {
            relationship: rel.name().to_string(),
            expected: rel.cardinality(),
            pointer: pointer.to_string(),
        };
        match (rel.cardinality(), data) {
            (Cardinality::ToOne, Value::Null) => Ok(Vec::new()),
            (Cardinality::ToOne, Value::Object(_)) => {
                Ok(vec![self.read_identifier(data, pointer, rel, scope)?])
            }
            (Cardinality::ToMany, Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    self.read_identifier(item, &child(pointer, &i.to_string()), rel, scope)
                })
                .collect(),
            _ => Err(mismatch()),
        }
    }

    fn read_identifier(
        &self,
        data: &Value,
        pointer: &str,
        rel: &RelationshipDescriptor,
        scope: LocalIdScope<'_>,
    ) -> Result<ResolvedIdentity, ReaderError> {
        let type_pointer = child(pointer, "type");
        let name = data
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ReaderError::malformed(&type_pointer, "'type' must be a string"))?;
        let ty = self
            .registry
            .get(name)
            .ok_or_else(|| ReaderError::UnknownResourceType {
                name: name.to_string(),
                pointer: type_pointer.clone(),
            })?;
        if !self.registry.is_assignable(name, rel.related_type()) {
            return Err(ReaderError::RelationshipTypeMismatch {
                relationship: rel.name().to_string(),
                expected: rel.related_type().to_string(),
                actual: name.to_string(),
                pointer: type_pointer,
            });
        }

        match (
            data.get("id").and_then(Value::as_str),
            data.get("lid").and_then(Value::as_str),
        ) {
            (Some(id), None) => {
                ty.id_kind()
                    .validate(id)
                    .map_err(|message| ReaderError::InvalidId {
                        resource_type: name.to_string(),
                        message,
                        pointer: child(pointer, "id"),
                    })?;
                Ok(ResolvedIdentity::new(name, id))
            }
            (None, Some(lid)) => {
                let lid_pointer = child(pointer, "lid");
                let LocalIdScope::Batch { ledger, index } = scope else {
                    return Err(ReaderError::LocalIdOutsideBatch {
                        lid: lid.to_string(),
                        pointer: lid_pointer,
                    });
                };
                ledger
                    .resolve_as(self.registry, lid, index, name)
                    .cloned()
                    .map_err(|source| ReaderError::LocalId {
                        pointer: lid_pointer,
                        source,
                    })
            }
            _ => Err(ReaderError::malformed(
                pointer,
                "a resource identifier needs exactly one of 'id' or 'lid'",
            )),
        }
    }
}

fn parse_body(body: &str) -> Result<Value, ReaderError> {
    if body.trim().is_empty() {
        return Err(ReaderError::MissingBody);
    }
    serde_json::from_str(body).map_err(|e| ReaderError::malformed("", e.to_string()))
}

fn not_writable(ty: &ResourceType, field: &str, reason: &str, pointer: String) -> ReaderError {
    ReaderError::FieldNotWritable {
        resource_type: ty.name().to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
        pointer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{AttrSpec, RecordTypeBuilder, RegistryBuilder, RelSpec};
    use crate::types::{AttrCapabilities, AttrKind, IdKind};
    use serde_json::json;

    fn registry() -> Registry {
        RegistryBuilder::new()
            .resource(
                RecordTypeBuilder::new("musicTracks", IdKind::Uuid)
                    .attribute(AttrSpec::new("title", AttrKind::Text))
                    .attribute(AttrSpec::new("lengthInSeconds", AttrKind::Float).nullable())
                    .attribute(AttrSpec::new("createdAt", AttrKind::Text).immutable())
                    .attribute(
                        AttrSpec::new("genre", AttrKind::Text)
                            .nullable()
                            .without(AttrCapabilities::CHANGE),
                    )
                    .relationship(
                        RelSpec::new("ownedBy").target("recordCompanies"),
                        Cardinality::ToOne,
                    )
                    .relationship(
                        RelSpec::new("performers").target("performers"),
                        Cardinality::ToMany,
                    ),
            )
            .resource(RecordTypeBuilder::new("recordCompanies", IdKind::Integer))
            .resource(RecordTypeBuilder::new("performers", IdKind::Integer))
            .build()
            .unwrap()
    }

    fn read(
        registry: &Registry,
        options: Options,
        body: Value,
        access: Access,
    ) -> Result<ChangeSet, ReaderError> {
        DocumentReader::new(registry, RequestContext::new(), options).deserialize(
            &body.to_string(),
            "musicTracks",
            access,
            LocalIdScope::Single,
        )
    }

    #[test]
    fn reads_attributes_and_relationships() {
        let registry = registry();
        let changes = read(
            &registry,
            Options::new(),
            json!({ "data": {
                "type": "musicTracks",
                "attributes": { "title": "Blue", "lengthInSeconds": 320 },
                "relationships": {
                    "ownedBy": { "data": { "type": "recordCompanies", "id": "4" } },
                    "performers": { "data": [] }
                }
            } }),
            Access::Create,
        )
        .unwrap();

        assert_eq!(changes.attributes["title"], AttrValue::Text("Blue".into()));
        assert_eq!(changes.attributes["lengthInSeconds"], AttrValue::Float(320.0));
        assert_eq!(
            changes.relationships["ownedBy"].targets,
            vec![ResolvedIdentity::new("recordCompanies", "4")]
        );
        assert!(changes.relationships["performers"].targets.is_empty());
    }

    #[test]
    fn empty_and_malformed_bodies() {
        let registry = registry();
        let mut reader = DocumentReader::new(&registry, RequestContext::new(), Options::new());
        assert_eq!(
            reader.deserialize("  ", "musicTracks", Access::Create, LocalIdScope::Single),
            Err(ReaderError::MissingBody)
        );
        assert!(matches!(
            reader.deserialize("{", "musicTracks", Access::Create, LocalIdScope::Single),
            Err(ReaderError::MalformedBody { .. })
        ));
    }

    #[test]
    fn unknown_and_mismatched_types() {
        let registry = registry();
        let err = read(
            &registry,
            Options::new(),
            json!({ "data": { "type": "albums" } }),
            Access::Create,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ReaderError::UnknownResourceType { pointer, .. } if pointer == "/data/type"
        ));

        let err = read(
            &registry,
            Options::new(),
            json!({ "data": { "type": "performers" } }),
            Access::Create,
        )
        .unwrap_err();
        assert!(matches!(err, ReaderError::ResourceTypeMismatch { .. }));
    }

    #[test]
    fn immutable_attributes_are_ignored() {
        let registry = registry();
        let changes = read(
            &registry,
            Options::new(),
            json!({ "data": {
                "type": "musicTracks",
                "attributes": { "title": "Blue", "createdAt": "now" }
            } }),
            Access::Create,
        )
        .unwrap();
        assert_eq!(changes.attributes.len(), 1);
        assert!(!changes.attributes.contains_key("createdAt"));
    }

    #[test]
    fn rejects_fields_that_cannot_be_written() {
        let registry = registry();
        let err = read(
            &registry,
            Options::new(),
            json!({ "data": {
                "type": "musicTracks",
                "id": "c0c9e4a2-6d3f-4a5e-9c2b-3e1f0a7b8d6c",
                "attributes": { "genre": "Jazz" }
            } }),
            Access::Update,
        )
        .unwrap_err();
        assert!(matches!(err, ReaderError::FieldNotWritable { field, .. } if field == "genre"));
    }

    #[test]
    fn unknown_attributes_are_skipped_when_allowed() {
        let registry = registry();
        let body = json!({ "data": { "type": "musicTracks", "attributes": { "mood": "calm" } } });
        assert!(matches!(
            read(&registry, Options::new(), body.clone(), Access::Create),
            Err(ReaderError::FieldNotWritable { .. })
        ));
        let changes = read(
            &registry,
            Options::new().allow_unknown_fields(true),
            body,
            Access::Create,
        )
        .unwrap();
        assert!(changes.attributes.is_empty());
    }

    #[test]
    fn invalid_attribute_values() {
        let registry = registry();
        let err = read(
            &registry,
            Options::new(),
            json!({ "data": { "type": "musicTracks", "attributes": { "title": null } } }),
            Access::Create,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ReaderError::InvalidAttributeValue { field, .. } if field == "title"
        ));
    }

    #[test]
    fn id_rules() {
        let registry = registry();
        let with_id = json!({ "data": { "type": "musicTracks", "id": "not-a-uuid" } });
        assert!(matches!(
            read(&registry, Options::new(), with_id.clone(), Access::Create),
            Err(ReaderError::ClientIdNotAllowed { .. })
        ));
        assert!(matches!(
            read(
                &registry,
                Options::new().allow_client_generated_ids(true),
                with_id,
                Access::Create
            ),
            Err(ReaderError::InvalidId { .. })
        ));
        assert!(matches!(
            read(
                &registry,
                Options::new(),
                json!({ "data": { "type": "musicTracks" } }),
                Access::Update
            ),
            Err(ReaderError::MissingId { .. })
        ));

        let mut reader = DocumentReader::new(&registry, RequestContext::new(), Options::new());
        let err = reader
            .deserialize_update(
                &json!({ "data": {
                    "type": "musicTracks",
                    "id": "c0c9e4a2-6d3f-4a5e-9c2b-3e1f0a7b8d6c"
                } })
                .to_string(),
                "musicTracks",
                "1f0e9d8c-7b6a-4e5d-8c3b-2a1f0e9d8c7b",
                LocalIdScope::Single,
            )
            .unwrap_err();
        assert!(matches!(err, ReaderError::IdMismatch { .. }));
    }

    #[test]
    fn relationship_shape_and_type_are_checked() {
        let registry = registry();
        let err = read(
            &registry,
            Options::new(),
            json!({ "data": {
                "type": "musicTracks",
                "relationships": { "ownedBy": { "data": [] } }
            } }),
            Access::Create,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ReaderError::RelationshipCardinalityMismatch { pointer, .. }
                if pointer == "/data/relationships/ownedBy/data"
        ));

        let err = read(
            &registry,
            Options::new(),
            json!({ "data": {
                "type": "musicTracks",
                "relationships": { "ownedBy": { "data": { "type": "performers", "id": "1" } } }
            } }),
            Access::Create,
        )
        .unwrap_err();
        assert!(matches!(err, ReaderError::RelationshipTypeMismatch { .. }));
    }

    #[test]
    fn local_ids_need_a_batch() {
        let registry = registry();
        let err = read(
            &registry,
            Options::new(),
            json!({ "data": {
                "type": "musicTracks",
                "relationships": {
                    "ownedBy": { "data": { "type": "recordCompanies", "lid": "c" } }
                }
            } }),
            Access::Create,
        )
        .unwrap_err();
        assert!(matches!(err, ReaderError::LocalIdOutsideBatch { lid, .. } if lid == "c"));
    }

    #[test]
    fn local_ids_resolve_through_ledger() {
        let registry = registry();
        let mut ledger = LocalIdLedger::new();
        ledger
            .declare("c", ResolvedIdentity::new("recordCompanies", "9"), 0)
            .unwrap();
        let body = json!({ "data": {
            "type": "musicTracks",
            "lid": "t",
            "relationships": {
                "ownedBy": { "data": { "type": "recordCompanies", "lid": "c" } }
            }
        } })
        .to_string();

        let scope = |index| LocalIdScope::Batch {
            ledger: &ledger,
            index,
        };
        let mut reader = DocumentReader::new(&registry, RequestContext::new(), Options::new());
        let changes = reader
            .deserialize(&body, "musicTracks", Access::Create, scope(1))
            .unwrap();
        assert_eq!(changes.lid.as_deref(), Some("t"));
        assert_eq!(changes.relationships["ownedBy"].targets[0].id, "9");

        let err = reader
            .deserialize(&body, "musicTracks", Access::Create, scope(0))
            .unwrap_err();
        assert!(matches!(
            err,
            ReaderError::LocalId {
                source: crate::error::LedgerError::UnassignedLocalId { index: 0, .. },
                ..
            }
        ));
    }
}
