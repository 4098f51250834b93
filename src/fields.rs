//! Field capability evaluation.
//!
//! Decides which attributes and relationships of a resource type take part in
//! the current request. Three stages, each of which can only narrow the set:
//! the registry capability flags, per-type [`FieldOverride`]s, and the
//! client's sparse fieldset (reads only).

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::QueryError;
use crate::query::{fields_parameter, FieldSelection};
use crate::registry::{Registry, ResourceType};
use crate::types::Access;

/// Per-request narrowing of a resource type's fields.
pub trait FieldOverride: Send + Sync {
    /// Return false to remove `field` for this kind of access.
    fn allows(&self, field: &str, access: Access) -> bool;
}

impl<F> FieldOverride for F
where
    F: Fn(&str, Access) -> bool + Send + Sync,
{
    fn allows(&self, field: &str, access: Access) -> bool {
        self(field, access)
    }
}

/// Overrides keyed by resource type name. An override on a base type also
/// applies to every type extending it.
#[derive(Clone, Default)]
pub struct FieldOverrides {
    by_type: HashMap<String, Arc<dyn FieldOverride>>,
}

impl FieldOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        resource_type: impl Into<String>,
        field_override: impl FieldOverride + 'static,
    ) -> Self {
        self.by_type
            .insert(resource_type.into(), Arc::new(field_override));
        self
    }

    fn allows(&self, registry: &Registry, ty: &ResourceType, field: &str, access: Access) -> bool {
        let mut current = Some(ty);
        while let Some(t) = current {
            if let Some(o) = self.by_type.get(t.name()) {
                if !o.allows(field, access) {
                    return false;
                }
            }
            current = registry.base_of(t);
        }
        true
    }
}

impl std::fmt::Debug for FieldOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.by_type.keys()).finish()
    }
}

/// Request-scoped inputs to the evaluator.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub selection: FieldSelection,
    pub overrides: FieldOverrides,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(mut self, selection: FieldSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn overrides(mut self, overrides: FieldOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Fields of one resource type active for one kind of access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveFieldSet {
    resource_type: String,
    access: Access,
    attributes: IndexSet<String>,
    relationships: IndexSet<String>,
}

impl EffectiveFieldSet {
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains(name)
    }

    pub fn has_relationship(&self, name: &str) -> bool {
        self.relationships.contains(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(String::as_str)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &str> {
        self.relationships.iter().map(String::as_str)
    }
}

/// Resolves [`EffectiveFieldSet`]s for one request, caching per (type, access).
pub struct CapabilityEvaluator<'r> {
    registry: &'r Registry,
    context: RequestContext,
    cache: HashMap<(String, Access), Arc<EffectiveFieldSet>>,
}

impl<'r> CapabilityEvaluator<'r> {
    pub fn new(registry: &'r Registry, context: RequestContext) -> Self {
        Self {
            registry,
            context,
            cache: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Check every requested sparse fieldset against the registry.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::UnknownResourceType` for an unknown type, and
    /// `UnknownField` / `FieldNotViewable` for requested fields that do not
    /// exist or cannot be retrieved.
    pub fn validate_selection(&self) -> Result<(), QueryError> {
        for (name, fields) in self.context.selection.iter() {
            let ty = self
                .registry
                .get(name)
                .ok_or_else(|| QueryError::UnknownResourceType {
                    name: name.to_string(),
                    parameter: fields_parameter(name),
                })?;
            for field in fields {
                check_requested_field(ty, field)?;
            }
        }
        Ok(())
    }

    /// Fields of `resource_type` that take part in `access`.
    ///
    /// # Errors
    ///
    /// Returns `QueryError` when the type is unknown or the sparse fieldset
    /// for it names a missing or non-viewable field.
    pub fn resolve(
        &mut self,
        resource_type: &str,
        access: Access,
    ) -> Result<Arc<EffectiveFieldSet>, QueryError> {
        let key = (resource_type.to_string(), access);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let ty = self
            .registry
            .get(resource_type)
            .ok_or_else(|| QueryError::UnknownResourceType {
                name: resource_type.to_string(),
                parameter: "type".to_string(),
            })?;

        let selected = match access {
            Access::Read => self.context.selection.get(resource_type),
            Access::Create | Access::Update => None,
        };
        if let Some(selected) = selected {
            for field in selected {
                check_requested_field(ty, field)?;
            }
        }
        let in_selection = |name: &str| selected.map_or(true, |s| s.contains(name));
        let overrides = &self.context.overrides;
        let registry = self.registry;

        let attributes = ty
            .attributes()
            .iter()
            .filter(|a| a.permits(access))
            .filter(|a| overrides.allows(registry, ty, a.name(), access))
            .filter(|a| in_selection(a.name()))
            .map(|a| a.name().to_string())
            .collect();
        let relationships = ty
            .relationships()
            .iter()
            .filter(|r| r.permits(access))
            .filter(|r| overrides.allows(registry, ty, r.name(), access))
            .filter(|r| in_selection(r.name()))
            .map(|r| r.name().to_string())
            .collect();

        let set = Arc::new(EffectiveFieldSet {
            resource_type: resource_type.to_string(),
            access,
            attributes,
            relationships,
        });
        tracing::trace!(
            resource_type,
            %access,
            attributes = set.attributes.len(),
            relationships = set.relationships.len(),
            "resolved field set"
        );
        self.cache.insert(key, set.clone());
        Ok(set)
    }
}

fn check_requested_field(ty: &ResourceType, field: &str) -> Result<(), QueryError> {
    let viewable = match (ty.attribute(field), ty.relationship(field)) {
        (Some(attr), _) => attr.permits(Access::Read),
        (None, Some(rel)) => rel.permits(Access::Read),
        (None, None) => {
            return Err(QueryError::UnknownField {
                resource_type: ty.name().to_string(),
                field: field.to_string(),
                parameter: fields_parameter(ty.name()),
            })
        }
    };
    if viewable {
        Ok(())
    } else {
        Err(QueryError::FieldNotViewable {
            resource_type: ty.name().to_string(),
            field: field.to_string(),
            parameter: fields_parameter(ty.name()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{AttrSpec, RecordTypeBuilder, RegistryBuilder, RelSpec};
    use crate::types::{AttrCapabilities, AttrKind, Cardinality, IdKind, RelCapabilities};

    fn registry() -> Registry {
        RegistryBuilder::new()
            .resource(
                RecordTypeBuilder::new("musicTracks", IdKind::Uuid)
                    .attribute(AttrSpec::new("title", AttrKind::Text))
                    .attribute(AttrSpec::new("genre", AttrKind::Text).nullable())
                    .attribute(
                        AttrSpec::new("isrcCode", AttrKind::Text)
                            .without(AttrCapabilities::VIEW),
                    )
                    .attribute(AttrSpec::new("createdAt", AttrKind::Text).immutable())
                    .attribute(
                        AttrSpec::new("releasedAt", AttrKind::Text)
                            .nullable()
                            .without(AttrCapabilities::CHANGE),
                    )
                    .relationship(
                        RelSpec::new("ownedBy").target("recordCompanies"),
                        Cardinality::ToOne,
                    )
                    .relationship(
                        RelSpec::new("performers")
                            .target("recordCompanies")
                            .without(RelCapabilities::SET),
                        Cardinality::ToMany,
                    ),
            )
            .resource(
                RecordTypeBuilder::new("recordCompanies", IdKind::Integer)
                    .attribute(AttrSpec::new("name", AttrKind::Text)),
            )
            .build()
            .unwrap()
    }

    fn names<'a>(it: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
        it.collect()
    }

    #[test]
    fn read_ceiling_is_view_capability() {
        let registry = registry();
        let mut evaluator = CapabilityEvaluator::new(&registry, RequestContext::new());
        let set = evaluator.resolve("musicTracks", Access::Read).unwrap();
        assert_eq!(
            names(set.attributes()),
            vec!["title", "genre", "createdAt", "releasedAt"]
        );
        assert_eq!(names(set.relationships()), vec!["ownedBy", "performers"]);
    }

    #[test]
    fn write_ceilings_respect_create_change_and_immutability() {
        let registry = registry();
        let mut evaluator = CapabilityEvaluator::new(&registry, RequestContext::new());

        let create = evaluator.resolve("musicTracks", Access::Create).unwrap();
        assert_eq!(
            names(create.attributes()),
            vec!["title", "genre", "isrcCode", "releasedAt"]
        );
        assert_eq!(names(create.relationships()), vec!["ownedBy"]);

        let update = evaluator.resolve("musicTracks", Access::Update).unwrap();
        assert_eq!(names(update.attributes()), vec!["title", "genre", "isrcCode"]);
    }

    #[test]
    fn sparse_fieldset_narrows_reads_only() {
        let registry = registry();
        let context = RequestContext::new()
            .selection(FieldSelection::new().with("musicTracks", ["title", "ownedBy"]));
        let mut evaluator = CapabilityEvaluator::new(&registry, context);

        let read = evaluator.resolve("musicTracks", Access::Read).unwrap();
        assert_eq!(names(read.attributes()), vec!["title"]);
        assert_eq!(names(read.relationships()), vec!["ownedBy"]);

        let update = evaluator.resolve("musicTracks", Access::Update).unwrap();
        assert!(update.has_attribute("genre"));
    }

    #[test]
    fn override_cannot_be_reinstated_by_selection() {
        let registry = registry();
        let context = RequestContext::new()
            .selection(FieldSelection::new().with("musicTracks", ["title", "genre"]))
            .overrides(FieldOverrides::new().with("musicTracks", |field: &str, _: Access| {
                field != "genre"
            }));
        let mut evaluator = CapabilityEvaluator::new(&registry, context);
        let read = evaluator.resolve("musicTracks", Access::Read).unwrap();
        assert_eq!(names(read.attributes()), vec!["title"]);
    }

    #[test]
    fn requesting_non_viewable_field_fails() {
        let registry = registry();
        let context = RequestContext::new()
            .selection(FieldSelection::new().with("musicTracks", ["isrcCode"]));
        let mut evaluator = CapabilityEvaluator::new(&registry, context);

        let err = evaluator.resolve("musicTracks", Access::Read).unwrap_err();
        assert_eq!(
            err,
            QueryError::FieldNotViewable {
                resource_type: "musicTracks".into(),
                field: "isrcCode".into(),
                parameter: "fields[musicTracks]".into(),
            }
        );
        assert!(evaluator.validate_selection().is_err());
    }

    #[test]
    fn validate_selection_reports_unknown_type_and_field() {
        let registry = registry();
        let unknown_type = CapabilityEvaluator::new(
            &registry,
            RequestContext::new().selection(FieldSelection::new().with("albums", ["title"])),
        );
        assert!(matches!(
            unknown_type.validate_selection(),
            Err(QueryError::UnknownResourceType { parameter, .. }) if parameter == "fields[albums]"
        ));

        let unknown_field = CapabilityEvaluator::new(
            &registry,
            RequestContext::new().selection(FieldSelection::new().with("musicTracks", ["lyrics"])),
        );
        assert!(matches!(
            unknown_field.validate_selection(),
            Err(QueryError::UnknownField { field, .. }) if field == "lyrics"
        ));
    }
}
