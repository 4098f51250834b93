//! The resource graph registry: immutable resource type metadata.
//!
//! Built once by [`Registry::build`] (or [`RegistryBuilder`](crate::RegistryBuilder)),
//! then shared read-only by every request.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{AccessError, RegistryError};
use crate::resource::{as_record, Resource};
use crate::types::{
    Access, AttrCapabilities, AttrKind, AttrValue, Cardinality, IdKind, LinkKinds, RelCapabilities,
};

pub(crate) type AttrGetter = Arc<dyn Fn(&dyn Any) -> Option<AttrValue> + Send + Sync>;
pub(crate) type AttrSetter =
    Arc<dyn Fn(&mut dyn Any, AttrValue) -> Result<(), AccessError> + Send + Sync>;
pub(crate) type IdGetter = Arc<dyn Fn(&dyn Any) -> Option<String> + Send + Sync>;
pub(crate) type IdSetter = Arc<dyn Fn(&mut dyn Any, &str) -> Result<(), AccessError> + Send + Sync>;
pub(crate) type RelatedVisitor =
    Arc<dyn for<'a> Fn(&'a dyn Any, &mut dyn FnMut(&'a dyn Resource)) + Send + Sync>;
pub(crate) type RelatedSetter =
    Arc<dyn Fn(&mut dyn Any, Vec<Box<dyn Resource>>) -> Result<(), AccessError> + Send + Sync>;
pub(crate) type Factory = Arc<dyn Fn() -> Box<dyn Resource> + Send + Sync>;

/// Pins a closure to the [`RelatedVisitor`] signature.
pub(crate) fn visitor<F>(f: F) -> RelatedVisitor
where
    F: for<'a> Fn(&'a dyn Any, &mut dyn FnMut(&'a dyn Resource)) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identity accessor pair.
#[derive(Clone)]
pub(crate) struct Identity {
    pub(crate) get: IdGetter,
    pub(crate) set: IdSetter,
}

/// Attribute metadata and its accessor pair.
#[derive(Clone)]
pub struct AttributeDescriptor {
    pub(crate) name: String,
    pub(crate) kind: AttrKind,
    pub(crate) nullable: bool,
    pub(crate) capabilities: AttrCapabilities,
    pub(crate) immutable: bool,
    pub(crate) declared_by: String,
    pub(crate) get: AttrGetter,
    pub(crate) set: AttrSetter,
}

impl AttributeDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AttrKind {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn capabilities(&self) -> AttrCapabilities {
        self.capabilities
    }

    /// Immutable attributes are server-owned and never accepted from clients.
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Resource type that declares this attribute (a base type for inherited ones).
    pub fn declared_by(&self) -> &str {
        &self.declared_by
    }

    /// Whether the registry flags permit this kind of access at all.
    pub fn permits(&self, access: Access) -> bool {
        match access {
            Access::Read => self.capabilities.contains(AttrCapabilities::VIEW),
            Access::Create => {
                !self.immutable && self.capabilities.contains(AttrCapabilities::CREATE)
            }
            Access::Update => {
                !self.immutable && self.capabilities.contains(AttrCapabilities::CHANGE)
            }
        }
    }

    pub fn read(&self, resource: &dyn Resource) -> Option<AttrValue> {
        (self.get)(resource.as_any())
    }

    pub fn write(&self, resource: &mut dyn Resource, value: AttrValue) -> Result<(), AccessError> {
        (self.set)(resource.as_any_mut(), value)
    }
}

impl fmt::Debug for AttributeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("nullable", &self.nullable)
            .field("capabilities", &self.capabilities)
            .field("immutable", &self.immutable)
            .field("declared_by", &self.declared_by)
            .finish_non_exhaustive()
    }
}

/// Indirection of a many-to-many relationship through a join collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Through {
    /// Name of the join collection.
    pub join: String,
    /// Navigation on the join back to the owning type.
    pub left: String,
    /// Navigation on the join to the related type.
    pub right: String,
}

/// Relationship metadata and its accessor pair.
#[derive(Clone)]
pub struct RelationshipDescriptor {
    pub(crate) name: String,
    pub(crate) cardinality: Cardinality,
    pub(crate) related_type: String,
    pub(crate) through: Option<Through>,
    pub(crate) capabilities: RelCapabilities,
    pub(crate) inverse: Option<String>,
    pub(crate) includable: bool,
    pub(crate) links: LinkKinds,
    pub(crate) declared_by: String,
    pub(crate) visit: RelatedVisitor,
    pub(crate) assign: RelatedSetter,
}

impl RelationshipDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }

    /// Public name of the related resource type.
    pub fn related_type(&self) -> &str {
        &self.related_type
    }

    pub fn through(&self) -> Option<&Through> {
        self.through.as_ref()
    }

    pub fn capabilities(&self) -> RelCapabilities {
        self.capabilities
    }

    pub fn inverse(&self) -> Option<&str> {
        self.inverse.as_deref()
    }

    pub fn is_includable(&self) -> bool {
        self.includable
    }

    pub fn links(&self) -> LinkKinds {
        self.links
    }

    pub fn declared_by(&self) -> &str {
        &self.declared_by
    }

    pub fn permits(&self, access: Access) -> bool {
        match access {
            Access::Read => self.capabilities.contains(RelCapabilities::VIEW),
            Access::Create | Access::Update => self.capabilities.contains(RelCapabilities::SET),
        }
    }

    /// Related instances currently held by `resource`.
    pub fn related<'a>(&self, resource: &'a dyn Resource) -> Vec<&'a dyn Resource> {
        let mut out: Vec<&'a dyn Resource> = Vec::new();
        (self.visit)(resource.as_any(), &mut |related| out.push(related));
        out
    }

    /// Replace the related instances held by `resource`.
    pub fn assign(
        &self,
        resource: &mut dyn Resource,
        related: Vec<Box<dyn Resource>>,
    ) -> Result<(), AccessError> {
        if self.cardinality == Cardinality::ToOne && related.len() > 1 {
            return Err(AccessError::new(format!(
                "to-one relationship '{}' cannot hold {} resources",
                self.name,
                related.len()
            )));
        }
        (self.assign)(resource.as_any_mut(), related)
    }
}

impl fmt::Debug for RelationshipDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipDescriptor")
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .field("related_type", &self.related_type)
            .field("through", &self.through)
            .field("capabilities", &self.capabilities)
            .field("inverse", &self.inverse)
            .field("includable", &self.includable)
            .field("links", &self.links)
            .field("declared_by", &self.declared_by)
            .finish_non_exhaustive()
    }
}

/// Intermediate collection used by through-relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinType {
    pub(crate) name: String,
    pub(crate) navigations: IndexMap<String, String>,
}

impl JoinType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            navigations: IndexMap::new(),
        }
    }

    /// Add a navigation from the join to a resource type.
    pub fn navigation(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.navigations.insert(name.into(), target.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target resource type of a navigation.
    pub fn target(&self, navigation: &str) -> Option<&str> {
        self.navigations.get(navigation).map(String::as_str)
    }
}

/// Metadata of one resource type.
#[derive(Clone)]
pub struct ResourceType {
    pub(crate) name: String,
    pub(crate) id_kind: IdKind,
    pub(crate) base: Option<String>,
    pub(crate) rust_type: Option<&'static str>,
    /// Own fields first, then inherited ones in base-chain order.
    pub(crate) attributes: Vec<AttributeDescriptor>,
    pub(crate) relationships: Vec<RelationshipDescriptor>,
    pub(crate) identity: Identity,
    pub(crate) factory: Factory,
}

impl ResourceType {
    /// Public name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_kind(&self) -> IdKind {
        self.id_kind
    }

    /// Name of the base type this one extends.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Bound Rust type, `None` for record-backed types.
    pub fn rust_type(&self) -> Option<&'static str> {
        self.rust_type
    }

    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    pub fn relationships(&self) -> &[RelationshipDescriptor] {
        &self.relationships
    }

    /// Find an attribute, checking own fields before inherited ones.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.attribute(name).is_some() || self.relationship(name).is_some()
    }

    /// Attributes declared by this type itself.
    pub fn own_attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes
            .iter()
            .filter(move |a| a.declared_by == self.name)
    }

    /// Read the id of an instance of this type.
    pub fn id_of(&self, resource: &dyn Resource) -> Option<String> {
        (self.identity.get)(resource.as_any())
    }

    pub fn set_id(&self, resource: &mut dyn Resource, id: &str) -> Result<(), AccessError> {
        (self.identity.set)(resource.as_any_mut(), id)
    }

    /// Fresh instance with default field values.
    pub fn instantiate(&self) -> Box<dyn Resource> {
        (self.factory)()
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name)
            .field("id_kind", &self.id_kind)
            .field("base", &self.base)
            .field("rust_type", &self.rust_type)
            .field("attributes", &self.attributes)
            .field("relationships", &self.relationships)
            .finish_non_exhaustive()
    }
}

/// Key accepted by [`Registry::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKey<'k> {
    Name(&'k str),
    Runtime(TypeId),
}

impl<'k> From<&'k str> for TypeKey<'k> {
    fn from(name: &'k str) -> Self {
        TypeKey::Name(name)
    }
}

impl<'k> From<&'k String> for TypeKey<'k> {
    fn from(name: &'k String) -> Self {
        TypeKey::Name(name)
    }
}

impl From<TypeId> for TypeKey<'_> {
    fn from(id: TypeId) -> Self {
        TypeKey::Runtime(id)
    }
}

/// The resource graph registry. Immutable after construction.
#[derive(Debug)]
pub struct Registry {
    types: Vec<ResourceType>,
    by_name: HashMap<String, usize>,
    by_runtime: HashMap<TypeId, usize>,
    joins: IndexMap<String, JoinType>,
}

impl Registry {
    pub(crate) fn new(
        types: Vec<ResourceType>,
        by_runtime: HashMap<TypeId, usize>,
        joins: IndexMap<String, JoinType>,
    ) -> Self {
        let by_name = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        Self {
            types,
            by_name,
            by_runtime,
            joins,
        }
    }

    /// Look up a resource type by public name or Rust type identity.
    pub fn lookup<'k>(&self, key: impl Into<TypeKey<'k>>) -> Result<&ResourceType, RegistryError> {
        match key.into() {
            TypeKey::Name(name) => self.get(name).ok_or_else(|| RegistryError::UnknownResourceType {
                name: name.to_string(),
            }),
            TypeKey::Runtime(id) => self
                .by_runtime
                .get(&id)
                .map(|&i| &self.types[i])
                .ok_or_else(|| RegistryError::UnknownResourceType {
                    name: format!("{:?}", id),
                }),
        }
    }

    /// Resource type bound to the Rust type `R`.
    pub fn lookup_type<R: Any>(&self) -> Result<&ResourceType, RegistryError> {
        self.lookup(TypeId::of::<R>())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceType> {
        self.by_name.get(name).map(|&i| &self.types[i])
    }

    /// Resource type of an instance.
    ///
    /// Typed resources resolve through their Rust type; records through the
    /// type name they carry.
    pub fn descriptor_of(&self, resource: &dyn Resource) -> Option<&ResourceType> {
        if let Some(record) = as_record(resource) {
            return self.get(&record.resource_type);
        }
        self.by_runtime
            .get(&resource.as_any().type_id())
            .map(|&i| &self.types[i])
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceType> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn join(&self, name: &str) -> Option<&JoinType> {
        self.joins.get(name)
    }

    /// Base type of `resource_type`, if it extends one.
    pub fn base_of(&self, resource_type: &ResourceType) -> Option<&ResourceType> {
        resource_type.base().and_then(|b| self.get(b))
    }

    /// Whether instances of `derived` may stand in for `base`.
    pub fn is_assignable(&self, derived: &str, base: &str) -> bool {
        let mut current = self.get(derived);
        while let Some(ty) = current {
            if ty.name == base {
                return true;
            }
            current = self.base_of(ty);
        }
        false
    }

    /// `name` and every type extending it, directly or indirectly.
    pub fn assignable_to(&self, name: &str) -> Vec<&ResourceType> {
        self.types
            .iter()
            .filter(|t| self.is_assignable(&t.name, name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{AttrSpec, RegistryBuilder, ResourceTypeBuilder};

    #[derive(Debug, Clone, Default)]
    struct Genre {
        id: Option<i64>,
        name: String,
    }

    #[derive(Debug, Clone, Default)]
    struct SubGenre {
        genre: Genre,
        origin: Option<String>,
    }

    fn genre_type() -> ResourceTypeBuilder<Genre> {
        ResourceTypeBuilder::<Genre>::new("genres", IdKind::Integer)
            .identity(
                |g| g.id.map(|id| id.to_string()),
                |g, raw| {
                    g.id = Some(raw.parse().map_err(|_| AccessError::new("bad id"))?);
                    Ok(())
                },
            )
            .attribute(
                AttrSpec::new("name", AttrKind::Text),
                |g| AttrValue::from(g.name.clone()),
                |g, v| {
                    g.name = v.extract()?;
                    Ok(())
                },
            )
    }

    fn registry() -> Registry {
        let sub = ResourceTypeBuilder::<SubGenre>::new("subGenres", IdKind::Integer)
            .extends("genres", |s| &s.genre, |s| &mut s.genre)
            .attribute(
                AttrSpec::new("origin", AttrKind::Text).nullable(),
                |s| AttrValue::from(s.origin.clone()),
                |s, v| {
                    s.origin = v.extract()?;
                    Ok(())
                },
            );
        RegistryBuilder::new()
            .resource(genre_type())
            .resource(sub)
            .build()
            .unwrap()
    }

    #[test]
    fn lookup_by_name_and_runtime_identity() {
        let registry = registry();
        assert_eq!(registry.lookup("genres").unwrap().name(), "genres");
        assert_eq!(registry.lookup_type::<SubGenre>().unwrap().name(), "subGenres");
        assert!(matches!(
            registry.lookup("albums"),
            Err(RegistryError::UnknownResourceType { name }) if name == "albums"
        ));
    }

    #[test]
    fn derived_type_exposes_base_fields() {
        let registry = registry();
        let sub = registry.lookup("subGenres").unwrap();
        let names: Vec<_> = sub.attributes().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["origin", "name"]);
        assert_eq!(sub.attribute("name").unwrap().declared_by(), "genres");
        assert_eq!(sub.own_attributes().count(), 1);
    }

    #[test]
    fn inherited_accessors_project_into_base() {
        let registry = registry();
        let sub_type = registry.lookup("subGenres").unwrap();
        let mut instance = sub_type.instantiate();

        sub_type.set_id(instance.as_mut(), "5").unwrap();
        sub_type
            .attribute("name")
            .unwrap()
            .write(instance.as_mut(), AttrValue::from("Bebop"))
            .unwrap();

        assert_eq!(sub_type.id_of(instance.as_ref()).as_deref(), Some("5"));
        assert_eq!(
            sub_type.attribute("name").unwrap().read(instance.as_ref()),
            Some(AttrValue::Text("Bebop".into()))
        );
        assert_eq!(
            registry.descriptor_of(instance.as_ref()).unwrap().name(),
            "subGenres"
        );
    }

    #[test]
    fn assignability_walks_base_chain() {
        let registry = registry();
        assert!(registry.is_assignable("subGenres", "genres"));
        assert!(registry.is_assignable("genres", "genres"));
        assert!(!registry.is_assignable("genres", "subGenres"));
        assert_eq!(registry.assignable_to("genres").len(), 2);
    }
}
