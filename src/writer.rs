//! Serialization of domain resources into response documents.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::document::{
    Document, JsonApiObject, Linkage, Links, PrimaryData, RelationshipObject, ResourceIdentifier,
    ResourceObject,
};
use crate::error::WriterError;
use crate::fields::{CapabilityEvaluator, RequestContext};
use crate::query::IncludeTree;
use crate::registry::{Registry, RelationshipDescriptor, ResourceType};
use crate::resource::Resource;
use crate::types::{Access, LinkKinds, Options};

/// Primary data handed to the writer.
#[derive(Debug)]
pub enum Primary<'a> {
    /// A to-one endpoint with nothing behind it.
    None,
    One(&'a dyn Resource),
    Many(Vec<&'a dyn Resource>),
}

impl<'a> Primary<'a> {
    fn resources(&self) -> Vec<&'a dyn Resource> {
        match self {
            Primary::None => Vec::new(),
            Primary::One(resource) => vec![*resource],
            Primary::Many(resources) => resources.clone(),
        }
    }
}

impl<'a> From<&'a dyn Resource> for Primary<'a> {
    fn from(resource: &'a dyn Resource) -> Self {
        Primary::One(resource)
    }
}

impl<'a> From<Option<&'a dyn Resource>> for Primary<'a> {
    fn from(resource: Option<&'a dyn Resource>) -> Self {
        resource.map_or(Primary::None, Primary::One)
    }
}

impl<'a> From<Vec<&'a dyn Resource>> for Primary<'a> {
    fn from(resources: Vec<&'a dyn Resource>) -> Self {
        Primary::Many(resources)
    }
}

type Identity = (String, String);

/// Renders resources through the capability evaluator for one request.
pub struct DocumentWriter<'r> {
    registry: &'r Registry,
    evaluator: CapabilityEvaluator<'r>,
    options: Options,
    self_link: Option<String>,
    meta: Option<Map<String, Value>>,
}

impl<'r> DocumentWriter<'r> {
    pub fn new(registry: &'r Registry, context: RequestContext, options: Options) -> Self {
        Self {
            registry,
            evaluator: CapabilityEvaluator::new(registry, context),
            options,
            self_link: None,
            meta: None,
        }
    }

    /// Top-level `links.self`, usually the request url.
    pub fn with_self_link(mut self, url: impl Into<String>) -> Self {
        self.self_link = Some(url.into());
        self
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Serialize `primary`, side-loading every path of `include`.
    ///
    /// # Errors
    ///
    /// Returns `WriterError::Query` for invalid sparse fieldsets or include
    /// paths, `UnregisteredResource` / `MissingIdentity` for resources the
    /// registry cannot describe, and `UnreadableAttribute` when an accessor
    /// does not match the instance.
    pub fn serialize<'a>(
        &mut self,
        primary: impl Into<Primary<'a>>,
        include: &IncludeTree,
    ) -> Result<Document, WriterError> {
        let primary = primary.into();
        self.evaluator.validate_selection()?;

        let resources = primary.resources();
        let mut validated = HashSet::new();
        for resource in &resources {
            let ty = self.descriptor(*resource)?;
            if validated.insert(ty.name()) {
                include.validate(self.registry, ty.name(), self.options.max_include_depth)?;
            }
        }

        let mut present: HashSet<Identity> = HashSet::new();
        let mut objects = Vec::with_capacity(resources.len());
        for resource in &resources {
            let object = self.resource_object(*resource, include)?;
            present.insert(identity_of(&object));
            objects.push(object);
        }

        let mut included: IndexMap<Identity, ResourceObject> = IndexMap::new();
        for resource in &resources {
            self.walk(*resource, include, &mut present, &mut included)?;
        }

        let data = match primary {
            Primary::None => PrimaryData::Null,
            Primary::One(_) => match objects.pop() {
                Some(object) => PrimaryData::Single(Box::new(object)),
                None => PrimaryData::Null,
            },
            Primary::Many(_) => PrimaryData::Many(objects),
        };

        tracing::debug!(
            primary = resources.len(),
            included = included.len(),
            "serialized document"
        );

        Ok(Document {
            jsonapi: self.options.emit_jsonapi_object.then(JsonApiObject::new),
            links: Links {
                self_link: self.self_link.clone(),
                related: None,
            },
            data,
            included: included.into_values().collect(),
            meta: self.meta.clone(),
            ..Document::default()
        })
    }

    /// Render a single resource without side-loading.
    ///
    /// # Errors
    ///
    /// Same as [`DocumentWriter::serialize`].
    pub fn resource(&mut self, resource: &dyn Resource) -> Result<ResourceObject, WriterError> {
        self.resource_object(resource, &IncludeTree::new())
    }

    fn descriptor(&self, resource: &dyn Resource) -> Result<&'r ResourceType, WriterError> {
        self.registry
            .descriptor_of(resource)
            .ok_or(WriterError::UnregisteredResource {
                rust_type: resource.rust_type_name(),
            })
    }

    fn identifier(&self, resource: &dyn Resource) -> Result<ResourceIdentifier, WriterError> {
        let ty = self.descriptor(resource)?;
        let id = ty
            .id_of(resource)
            .ok_or_else(|| WriterError::MissingIdentity {
                resource_type: ty.name().to_string(),
            })?;
        Ok(ResourceIdentifier::new(ty.name(), id))
    }

    fn walk(
        &mut self,
        resource: &dyn Resource,
        include: &IncludeTree,
        present: &mut HashSet<Identity>,
        included: &mut IndexMap<Identity, ResourceObject>,
    ) -> Result<(), WriterError> {
        if include.is_empty() {
            return Ok(());
        }
        let ty = self.descriptor(resource)?;
        for (name, child) in include.children() {
            // A mixed primary set may hold types without this relationship.
            let Some(rel) = ty.relationship(name) else {
                continue;
            };
            for related in rel.related(resource) {
                let identifier = self.identifier(related)?;
                let key = (identifier.resource_type, identifier.id.unwrap_or_default());
                if !present.contains(&key) {
                    let object = self.resource_object(related, child)?;
                    present.insert(key.clone());
                    included.insert(key, object);
                }
                self.walk(related, child, present, included)?;
            }
        }
        Ok(())
    }

    fn resource_object(
        &mut self,
        resource: &dyn Resource,
        include: &IncludeTree,
    ) -> Result<ResourceObject, WriterError> {
        let ty = self.descriptor(resource)?;
        let id = ty
            .id_of(resource)
            .ok_or_else(|| WriterError::MissingIdentity {
                resource_type: ty.name().to_string(),
            })?;
        let fields = self.evaluator.resolve(ty.name(), Access::Read)?;

        let mut object = ResourceObject::new(ty.name(), Some(id.clone()));
        for attr in ty.attributes() {
            if fields.has_attribute(attr.name()) {
                let value = attr
                    .read(resource)
                    .ok_or_else(|| WriterError::UnreadableAttribute {
                        resource_type: ty.name().to_string(),
                        field: attr.name().to_string(),
                    })?;
                object.attributes.insert(attr.name().to_string(), value.to_json());
            }
        }

        for rel in ty.relationships() {
            if !rel.permits(Access::Read) {
                continue;
            }
            let links = self.relationship_links(ty, &id, rel);
            let data = if fields.has_relationship(rel.name()) || include.contains(rel.name()) {
                self.linkage(resource, rel)?
            } else if links.is_empty() {
                continue;
            } else {
                Linkage::Absent
            };
            object
                .relationships
                .insert(rel.name().to_string(), RelationshipObject { links, data });
        }

        if self.options.emit_links {
            object.links.self_link = Some(format!(
                "{}/{}/{}",
                self.options.link_prefix(),
                ty.name(),
                id
            ));
        }
        Ok(object)
    }

    fn linkage(
        &self,
        resource: &dyn Resource,
        rel: &RelationshipDescriptor,
    ) -> Result<Linkage, WriterError> {
        let identifiers = rel
            .related(resource)
            .into_iter()
            .map(|related| self.identifier(related))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(if rel.is_to_many() {
            Linkage::ToMany(identifiers)
        } else {
            Linkage::ToOne(identifiers.into_iter().next())
        })
    }

    fn relationship_links(
        &self,
        ty: &ResourceType,
        id: &str,
        rel: &RelationshipDescriptor,
    ) -> Links {
        if !self.options.emit_links {
            return Links::default();
        }
        let base = format!("{}/{}/{}", self.options.link_prefix(), ty.name(), id);
        Links {
            self_link: rel
                .links()
                .contains(LinkKinds::SELF)
                .then(|| format!("{}/relationships/{}", base, rel.name())),
            related: rel
                .links()
                .contains(LinkKinds::RELATED)
                .then(|| format!("{}/{}", base, rel.name())),
        }
    }
}

fn identity_of(object: &ResourceObject) -> Identity {
    (
        object.resource_type.clone(),
        object.id.clone().unwrap_or_default(),
    )
}
