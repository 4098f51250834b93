//! Registration of resource types and construction of the [`Registry`].
//!
//! Typed resources are registered through [`ResourceTypeBuilder`], which erases
//! plain closures over the Rust type into the registry's accessor table.
//! Record-backed resources use [`RecordTypeBuilder`]. Both produce a
//! [`TypeCandidate`]; [`Registry::build`] validates all candidates together.

use std::any::{type_name, Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{AccessError, RegistryError};
use crate::registry::{
    visitor, AttrGetter, AttrSetter, AttributeDescriptor, Factory, Identity, JoinType, Registry,
    RelatedSetter, RelatedVisitor, RelationshipDescriptor, ResourceType, Through,
};
use crate::resource::{Record, Resource};
use crate::types::{
    AttrCapabilities, AttrKind, AttrValue, Cardinality, IdKind, LinkKinds, RelCapabilities,
};

/// Declared shape of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrSpec {
    pub(crate) name: String,
    pub(crate) kind: AttrKind,
    pub(crate) nullable: bool,
    pub(crate) capabilities: AttrCapabilities,
    pub(crate) immutable: bool,
}

impl AttrSpec {
    /// Non-nullable attribute with every capability.
    pub fn new(name: impl Into<String>, kind: AttrKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            capabilities: AttrCapabilities::default(),
            immutable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Server-owned; never accepted from clients.
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn capabilities(mut self, capabilities: AttrCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn without(mut self, capabilities: AttrCapabilities) -> Self {
        self.capabilities.remove(capabilities);
        self
    }
}

/// Declared shape of a relationship. Cardinality comes from the registering call.
#[derive(Debug, Clone, PartialEq)]
pub struct RelSpec {
    pub(crate) name: String,
    pub(crate) target: Option<String>,
    pub(crate) through: Option<Through>,
    pub(crate) inverse: Option<String>,
    pub(crate) includable: bool,
    pub(crate) capabilities: RelCapabilities,
    pub(crate) links: LinkKinds,
}

impl RelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            through: None,
            inverse: None,
            includable: true,
            capabilities: RelCapabilities::default(),
            links: LinkKinds::default(),
        }
    }

    /// Name the related resource type explicitly instead of deriving it
    /// from the Rust type.
    pub fn target(mut self, resource_type: impl Into<String>) -> Self {
        self.target = Some(resource_type.into());
        self
    }

    /// Route the relationship through a join collection.
    pub fn through(
        mut self,
        join: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.through = Some(Through {
            join: join.into(),
            left: left.into(),
            right: right.into(),
        });
        self
    }

    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    pub fn includable(mut self, includable: bool) -> Self {
        self.includable = includable;
        self
    }

    pub fn capabilities(mut self, capabilities: RelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn without(mut self, capabilities: RelCapabilities) -> Self {
        self.capabilities.remove(capabilities);
        self
    }

    pub fn links(mut self, links: LinkKinds) -> Self {
        self.links = links;
        self
    }
}

/// Maps a derived instance onto the base instance it embeds.
pub(crate) trait Projection: Send + Sync {
    fn project<'a>(&self, derived: &'a dyn Any) -> Option<&'a dyn Any>;
    fn project_mut<'a>(&self, derived: &'a mut dyn Any) -> Option<&'a mut dyn Any>;
}

struct FieldProjection<D, B> {
    get: fn(&D) -> &B,
    get_mut: fn(&mut D) -> &mut B,
}

impl<D: Any, B: Any> Projection for FieldProjection<D, B> {
    fn project<'a>(&self, derived: &'a dyn Any) -> Option<&'a dyn Any> {
        derived
            .downcast_ref::<D>()
            .map(|d| (self.get)(d) as &dyn Any)
    }

    fn project_mut<'a>(&self, derived: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        derived
            .downcast_mut::<D>()
            .map(|d| (self.get_mut)(d) as &mut dyn Any)
    }
}

/// Records of a derived type hold the base fields themselves.
struct SameInstance;

impl Projection for SameInstance {
    fn project<'a>(&self, derived: &'a dyn Any) -> Option<&'a dyn Any> {
        Some(derived)
    }

    fn project_mut<'a>(&self, derived: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        Some(derived)
    }
}

#[derive(Clone, Copy)]
pub(crate) struct RuntimeBinding {
    pub(crate) type_id: TypeId,
    pub(crate) rust_name: &'static str,
}

#[derive(Clone)]
pub(crate) struct BaseLink {
    pub(crate) name: String,
    projection: Arc<dyn Projection>,
}

#[derive(Clone)]
pub(crate) struct AttributeCandidate {
    spec: AttrSpec,
    get: AttrGetter,
    set: AttrSetter,
}

#[derive(Clone)]
pub(crate) enum RelTarget {
    Named(String),
    Runtime(RuntimeBinding),
}

#[derive(Clone)]
pub(crate) struct RelationshipCandidate {
    spec: RelSpec,
    cardinality: Cardinality,
    target: RelTarget,
    visit: RelatedVisitor,
    assign: RelatedSetter,
}

/// An unvalidated resource type, ready to be handed to [`Registry::build`].
#[derive(Clone)]
pub struct TypeCandidate {
    pub(crate) name: String,
    id_kind: IdKind,
    pub(crate) runtime: Option<RuntimeBinding>,
    pub(crate) base: Option<BaseLink>,
    identity: Option<Identity>,
    factory: Factory,
    attributes: Vec<AttributeCandidate>,
    relationships: Vec<RelationshipCandidate>,
}

impl TypeCandidate {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TypeCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeCandidate")
            .field("name", &self.name)
            .field("id_kind", &self.id_kind)
            .field("base", &self.base.as_ref().map(|b| &b.name))
            .finish_non_exhaustive()
    }
}

fn downcast_target<R: Any>(any: &mut dyn Any) -> Result<&mut R, AccessError> {
    any.downcast_mut::<R>().ok_or_else(|| {
        AccessError::new(format!("instance is not a {}", type_name::<R>()))
    })
}

fn downcast_owned<T: Resource>(related: Box<dyn Resource>) -> Result<T, AccessError> {
    let actual = related.rust_type_name();
    related
        .into_any()
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| {
            AccessError::new(format!(
                "expected related {}, got {}",
                type_name::<T>(),
                actual
            ))
        })
}

/// Registers a Rust type as a resource type.
///
/// ```
/// use hyperdoc::{AttrKind, AttrSpec, AttrValue, IdKind, ResourceTypeBuilder};
///
/// #[derive(Debug, Clone, Default)]
/// struct Tag {
///     id: Option<i64>,
///     name: String,
/// }
///
/// let candidate = ResourceTypeBuilder::<Tag>::new("tags", IdKind::Integer)
///     .identity(
///         |t| t.id.map(|id| id.to_string()),
///         |t, raw| {
///             t.id = Some(raw.parse().map_err(|_| hyperdoc::AccessError::new("bad id"))?);
///             Ok(())
///         },
///     )
///     .attribute(
///         AttrSpec::new("name", AttrKind::Text),
///         |t| AttrValue::from(t.name.clone()),
///         |t, v| {
///             t.name = v.extract()?;
///             Ok(())
///         },
///     )
///     .build();
/// assert_eq!(candidate.name(), "tags");
/// ```
pub struct ResourceTypeBuilder<R> {
    candidate: TypeCandidate,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Resource + Default> ResourceTypeBuilder<R> {
    pub fn new(name: impl Into<String>, id_kind: IdKind) -> Self {
        Self {
            candidate: TypeCandidate {
                name: name.into(),
                id_kind,
                runtime: Some(RuntimeBinding {
                    type_id: TypeId::of::<R>(),
                    rust_name: type_name::<R>(),
                }),
                base: None,
                identity: None,
                factory: Arc::new(|| Box::new(R::default()) as Box<dyn Resource>),
                attributes: Vec::new(),
                relationships: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    pub fn identity<G, S>(mut self, get: G, set: S) -> Self
    where
        G: Fn(&R) -> Option<String> + Send + Sync + 'static,
        S: Fn(&mut R, &str) -> Result<(), AccessError> + Send + Sync + 'static,
    {
        self.candidate.identity = Some(Identity {
            get: Arc::new(move |any: &dyn Any| any.downcast_ref::<R>().and_then(|r| get(r))),
            set: Arc::new(
                move |any: &mut dyn Any, id: &str| -> Result<(), AccessError> {
                    set(downcast_target::<R>(any)?, id)
                },
            ),
        });
        self
    }

    pub fn attribute<G, S>(mut self, spec: AttrSpec, get: G, set: S) -> Self
    where
        G: Fn(&R) -> AttrValue + Send + Sync + 'static,
        S: Fn(&mut R, AttrValue) -> Result<(), AccessError> + Send + Sync + 'static,
    {
        self.candidate.attributes.push(AttributeCandidate {
            spec,
            get: Arc::new(move |any: &dyn Any| any.downcast_ref::<R>().map(|r| get(r))),
            set: Arc::new(
                move |any: &mut dyn Any, value: AttrValue| -> Result<(), AccessError> {
                    set(downcast_target::<R>(any)?, value)
                },
            ),
        });
        self
    }

    /// Read-only attribute computed by the server. Always immutable.
    pub fn computed<G>(mut self, spec: AttrSpec, get: G) -> Self
    where
        G: Fn(&R) -> AttrValue + Send + Sync + 'static,
    {
        let name = spec.name.clone();
        self.candidate.attributes.push(AttributeCandidate {
            spec: spec.immutable(),
            get: Arc::new(move |any: &dyn Any| any.downcast_ref::<R>().map(|r| get(r))),
            set: Arc::new(
                move |_: &mut dyn Any, _: AttrValue| -> Result<(), AccessError> {
                    Err(AccessError::new(format!("attribute '{}' is computed", name)))
                },
            ),
        });
        self
    }

    pub fn to_one<T, G, S>(mut self, spec: RelSpec, get: G, set: S) -> Self
    where
        T: Resource,
        G: for<'a> Fn(&'a R) -> Option<&'a T> + Send + Sync + 'static,
        S: Fn(&mut R, Option<T>) + Send + Sync + 'static,
    {
        let target = typed_target::<T>(&spec);
        let visit = visitor(move |any, sink| {
            if let Some(related) = any.downcast_ref::<R>().and_then(|r| get(r)) {
                sink(related as &dyn Resource);
            }
        });
        let assign: RelatedSetter = Arc::new(
            move |any: &mut dyn Any, related: Vec<Box<dyn Resource>>| -> Result<(), AccessError> {
                let owner = downcast_target::<R>(any)?;
                let value = match related.into_iter().next() {
                    Some(boxed) => Some(downcast_owned::<T>(boxed)?),
                    None => None,
                };
                set(owner, value);
                Ok(())
            },
        );
        self.candidate.relationships.push(RelationshipCandidate {
            spec,
            cardinality: Cardinality::ToOne,
            target,
            visit,
            assign,
        });
        self
    }

    pub fn to_many<T, G, S>(mut self, spec: RelSpec, get: G, set: S) -> Self
    where
        T: Resource,
        G: for<'a> Fn(&'a R) -> Vec<&'a T> + Send + Sync + 'static,
        S: Fn(&mut R, Vec<T>) + Send + Sync + 'static,
    {
        let target = typed_target::<T>(&spec);
        let visit = visitor(move |any, sink| {
            if let Some(owner) = any.downcast_ref::<R>() {
                for related in get(owner) {
                    sink(related as &dyn Resource);
                }
            }
        });
        let assign: RelatedSetter = Arc::new(
            move |any: &mut dyn Any, related: Vec<Box<dyn Resource>>| -> Result<(), AccessError> {
                let owner = downcast_target::<R>(any)?;
                let values = related
                    .into_iter()
                    .map(downcast_owned::<T>)
                    .collect::<Result<Vec<_>, _>>()?;
                set(owner, values);
                Ok(())
            },
        );
        self.candidate.relationships.push(RelationshipCandidate {
            spec,
            cardinality: Cardinality::ToMany,
            target,
            visit,
            assign,
        });
        self
    }

    /// Inherit from resource type `base`, whose instance is embedded in `R`.
    pub fn extends<B: Any>(
        mut self,
        base: &str,
        project: fn(&R) -> &B,
        project_mut: fn(&mut R) -> &mut B,
    ) -> Self {
        self.candidate.base = Some(BaseLink {
            name: base.to_string(),
            projection: Arc::new(FieldProjection {
                get: project,
                get_mut: project_mut,
            }),
        });
        self
    }

    pub fn build(self) -> TypeCandidate {
        self.candidate
    }
}

impl<R: Resource + Default> From<ResourceTypeBuilder<R>> for TypeCandidate {
    fn from(builder: ResourceTypeBuilder<R>) -> Self {
        builder.build()
    }
}

fn typed_target<T: Resource>(spec: &RelSpec) -> RelTarget {
    match &spec.target {
        Some(name) => RelTarget::Named(name.clone()),
        None => RelTarget::Runtime(RuntimeBinding {
            type_id: TypeId::of::<T>(),
            rust_name: type_name::<T>(),
        }),
    }
}

/// Registers a [`Record`]-backed resource type.
pub struct RecordTypeBuilder {
    candidate: TypeCandidate,
}

impl RecordTypeBuilder {
    pub fn new(name: impl Into<String>, id_kind: IdKind) -> Self {
        let name = name.into();
        let factory_name = name.clone();
        Self {
            candidate: TypeCandidate {
                name,
                id_kind,
                runtime: None,
                base: None,
                identity: Some(Identity {
                    get: Arc::new(|any: &dyn Any| {
                        any.downcast_ref::<Record>().and_then(|r| r.id.clone())
                    }),
                    set: Arc::new(
                        |any: &mut dyn Any, id: &str| -> Result<(), AccessError> {
                            downcast_target::<Record>(any)?.id = Some(id.to_string());
                            Ok(())
                        },
                    ),
                }),
                factory: Arc::new(move || {
                    Box::new(Record::new(factory_name.clone())) as Box<dyn Resource>
                }),
                attributes: Vec::new(),
                relationships: Vec::new(),
            },
        }
    }

    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.candidate.base = Some(BaseLink {
            name: base.into(),
            projection: Arc::new(SameInstance),
        });
        self
    }

    pub fn attribute(mut self, spec: AttrSpec) -> Self {
        let (get_name, set_name) = (spec.name.clone(), spec.name.clone());
        self.candidate.attributes.push(AttributeCandidate {
            spec,
            get: Arc::new(move |any: &dyn Any| {
                any.downcast_ref::<Record>().map(|r| {
                    r.attributes
                        .get(&get_name)
                        .cloned()
                        .unwrap_or(AttrValue::Null)
                })
            }),
            set: Arc::new(
                move |any: &mut dyn Any, value: AttrValue| -> Result<(), AccessError> {
                    downcast_target::<Record>(any)?
                        .attributes
                        .insert(set_name.clone(), value);
                    Ok(())
                },
            ),
        });
        self
    }

    /// Relationship to another record type. `spec` must name its target.
    pub fn relationship(mut self, spec: RelSpec, cardinality: Cardinality) -> Self {
        let (visit_name, assign_name) = (spec.name.clone(), spec.name.clone());
        let target = RelTarget::Named(spec.target.clone().unwrap_or_default());
        let visit = visitor(move |any, sink| {
            if let Some(record) = any.downcast_ref::<Record>() {
                for related in record.related(&visit_name) {
                    sink(related as &dyn Resource);
                }
            }
        });
        let assign: RelatedSetter = Arc::new(
            move |any: &mut dyn Any, related: Vec<Box<dyn Resource>>| -> Result<(), AccessError> {
                let owner = downcast_target::<Record>(any)?;
                let records = related
                    .into_iter()
                    .map(downcast_owned::<Record>)
                    .collect::<Result<Vec<_>, _>>()?;
                owner.relationships.insert(assign_name.clone(), records);
                Ok(())
            },
        );
        self.candidate.relationships.push(RelationshipCandidate {
            spec,
            cardinality,
            target,
            visit,
            assign,
        });
        self
    }

    pub fn build(self) -> TypeCandidate {
        self.candidate
    }
}

impl From<RecordTypeBuilder> for TypeCandidate {
    fn from(builder: RecordTypeBuilder) -> Self {
        builder.build()
    }
}

/// Collects candidates and join collections, then builds the registry.
#[derive(Default)]
pub struct RegistryBuilder {
    candidates: Vec<TypeCandidate>,
    joins: Vec<JoinType>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, candidate: impl Into<TypeCandidate>) -> Self {
        self.candidates.push(candidate.into());
        self
    }

    pub fn join(mut self, join: JoinType) -> Self {
        self.joins.push(join);
        self
    }

    pub fn build(self) -> Result<Registry, RegistryError> {
        Registry::build(self.candidates, self.joins)
    }
}

impl Registry {
    /// Validate candidates and build the registry.
    pub fn build(
        candidates: Vec<TypeCandidate>,
        joins: Vec<JoinType>,
    ) -> Result<Registry, RegistryError> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, candidate) in candidates.iter().enumerate() {
            if index.insert(candidate.name.clone(), i).is_some() {
                return Err(RegistryError::DuplicateResourceName {
                    name: candidate.name.clone(),
                });
            }
        }

        let mut runtime: HashMap<TypeId, usize> = HashMap::new();
        for (i, candidate) in candidates.iter().enumerate() {
            if let Some(binding) = candidate.runtime {
                if let Some(&first) = runtime.get(&binding.type_id) {
                    return Err(RegistryError::DuplicateRuntimeType {
                        rust_type: binding.rust_name,
                        first: candidates[first].name.clone(),
                        second: candidate.name.clone(),
                    });
                }
                runtime.insert(binding.type_id, i);
            }
        }

        let joins: IndexMap<String, JoinType> =
            joins.into_iter().map(|j| (j.name.clone(), j)).collect();

        let ctx = BuildContext {
            candidates: &candidates,
            index: &index,
            runtime: &runtime,
            joins: &joins,
        };
        for candidate in &candidates {
            ctx.check_base_chain(candidate)?;
        }

        let mut built: Vec<Option<ResourceType>> = vec![None; candidates.len()];
        for i in 0..candidates.len() {
            ctx.flatten(i, &mut built)?;
        }
        let types: Vec<ResourceType> = built.into_iter().flatten().collect();
        check_inverses(&types, &index)?;

        tracing::info!(resource_types = types.len(), joins = joins.len(), "resource graph built");
        Ok(Registry::new(types, runtime, joins))
    }
}

struct BuildContext<'c> {
    candidates: &'c [TypeCandidate],
    index: &'c HashMap<String, usize>,
    runtime: &'c HashMap<TypeId, usize>,
    joins: &'c IndexMap<String, JoinType>,
}

impl BuildContext<'_> {
    fn base_of(&self, candidate: &TypeCandidate) -> Option<&TypeCandidate> {
        candidate
            .base
            .as_ref()
            .and_then(|b| self.index.get(&b.name))
            .map(|&i| &self.candidates[i])
    }

    fn check_base_chain(&self, candidate: &TypeCandidate) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        let mut current = candidate;
        while let Some(base) = &current.base {
            if !seen.insert(current.name.as_str()) {
                return Err(RegistryError::InheritanceCycle {
                    resource_type: candidate.name.clone(),
                });
            }
            current = match self.index.get(&base.name) {
                Some(&i) => &self.candidates[i],
                None => {
                    return Err(RegistryError::UnknownBaseType {
                        resource_type: current.name.clone(),
                        base: base.name.clone(),
                    })
                }
            };
            if current.name == candidate.name {
                return Err(RegistryError::InheritanceCycle {
                    resource_type: candidate.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Whether `derived` is `base` or extends it, judged on candidates.
    fn extends(&self, derived: &str, base: &str) -> bool {
        let mut current = self.index.get(derived).map(|&i| &self.candidates[i]);
        while let Some(candidate) = current {
            if candidate.name == base {
                return true;
            }
            current = self.base_of(candidate);
        }
        false
    }

    fn flatten(&self, i: usize, built: &mut [Option<ResourceType>]) -> Result<(), RegistryError> {
        if built[i].is_some() {
            return Ok(());
        }
        let candidate = &self.candidates[i];

        let base = match &candidate.base {
            Some(link) => {
                let base_index = self.index[&link.name];
                self.flatten(base_index, built)?;
                built[base_index].clone().map(|ty| (ty, link.projection.clone()))
            }
            None => None,
        };

        let mut own_names = HashSet::new();
        let field_names = candidate
            .attributes
            .iter()
            .map(|a| &a.spec.name)
            .chain(candidate.relationships.iter().map(|r| &r.spec.name));
        for name in field_names {
            if !own_names.insert(name.as_str()) {
                return Err(RegistryError::DuplicateFieldName {
                    resource_type: candidate.name.clone(),
                    field: name.clone(),
                });
            }
        }

        let mut attributes: Vec<AttributeDescriptor> = candidate
            .attributes
            .iter()
            .map(|a| AttributeDescriptor {
                name: a.spec.name.clone(),
                kind: a.spec.kind,
                nullable: a.spec.nullable,
                capabilities: a.spec.capabilities,
                immutable: a.spec.immutable,
                declared_by: candidate.name.clone(),
                get: a.get.clone(),
                set: a.set.clone(),
            })
            .collect();

        let mut relationships = Vec::with_capacity(candidate.relationships.len());
        for rel in &candidate.relationships {
            relationships.push(self.resolve_relationship(candidate, rel)?);
        }

        let identity = match (&candidate.identity, &base) {
            (Some(identity), _) => identity.clone(),
            (None, Some((base_type, projection))) => {
                inherit_identity(&base_type.identity, projection)
            }
            (None, None) => {
                return Err(RegistryError::MissingIdentity {
                    resource_type: candidate.name.clone(),
                })
            }
        };

        if let Some((base_type, projection)) = &base {
            attributes.extend(
                base_type
                    .attributes
                    .iter()
                    .filter(|a| !own_names.contains(a.name.as_str()))
                    .map(|a| inherit_attribute(a, projection)),
            );
            relationships.extend(
                base_type
                    .relationships
                    .iter()
                    .filter(|r| !own_names.contains(r.name.as_str()))
                    .map(|r| inherit_relationship(r, projection)),
            );
        }

        tracing::debug!(
            resource_type = %candidate.name,
            base = ?candidate.base.as_ref().map(|b| &b.name),
            attributes = attributes.len(),
            relationships = relationships.len(),
            "registered resource type"
        );

        built[i] = Some(ResourceType {
            name: candidate.name.clone(),
            id_kind: candidate.id_kind,
            base: candidate.base.as_ref().map(|b| b.name.clone()),
            rust_type: candidate.runtime.map(|r| r.rust_name),
            attributes,
            relationships,
            identity,
            factory: candidate.factory.clone(),
        });
        Ok(())
    }

    fn resolve_relationship(
        &self,
        owner: &TypeCandidate,
        rel: &RelationshipCandidate,
    ) -> Result<RelationshipDescriptor, RegistryError> {
        let unresolved = |target: String| RegistryError::UnresolvedRelationshipTarget {
            resource_type: owner.name.clone(),
            relationship: rel.spec.name.clone(),
            target,
        };
        let related_type = match &rel.target {
            RelTarget::Named(name) if self.index.contains_key(name) => name.clone(),
            RelTarget::Named(name) => return Err(unresolved(name.clone())),
            RelTarget::Runtime(binding) => match self.runtime.get(&binding.type_id) {
                Some(&i) => self.candidates[i].name.clone(),
                None => return Err(unresolved(binding.rust_name.to_string())),
            },
        };

        if let Some(through) = &rel.spec.through {
            self.check_through(owner, rel, through, &related_type)?;
        }

        Ok(RelationshipDescriptor {
            name: rel.spec.name.clone(),
            cardinality: rel.cardinality,
            related_type,
            through: rel.spec.through.clone(),
            capabilities: rel.spec.capabilities,
            inverse: rel.spec.inverse.clone(),
            includable: rel.spec.includable,
            links: rel.spec.links,
            declared_by: owner.name.clone(),
            visit: rel.visit.clone(),
            assign: rel.assign.clone(),
        })
    }

    fn check_through(
        &self,
        owner: &TypeCandidate,
        rel: &RelationshipCandidate,
        through: &Through,
        related_type: &str,
    ) -> Result<(), RegistryError> {
        let fail = |reason: String| RegistryError::UnresolvedThroughRelationship {
            resource_type: owner.name.clone(),
            relationship: rel.spec.name.clone(),
            reason,
        };
        if rel.cardinality != Cardinality::ToMany {
            return Err(fail("only to-many relationships can use a join collection".into()));
        }
        let join = self
            .joins
            .get(&through.join)
            .ok_or_else(|| fail(format!("join collection '{}' is not registered", through.join)))?;

        match join.target(&through.left) {
            None => {
                return Err(fail(format!(
                    "navigation '{}' does not exist on '{}'",
                    through.left, through.join
                )))
            }
            Some(left) if !self.extends(&owner.name, left) => {
                return Err(fail(format!(
                    "navigation '{}.{}' leads to '{}', not back to '{}'",
                    through.join, through.left, left, owner.name
                )))
            }
            Some(_) => {}
        }

        match join.target(&through.right) {
            None => Err(fail(format!(
                "far-side navigation '{}' does not exist on '{}'",
                through.right, through.join
            ))),
            Some(right) if !self.index.contains_key(right) => Err(fail(format!(
                "far-side navigation '{}.{}' leads to unregistered type '{}'",
                through.join, through.right, right
            ))),
            Some(right) if !self.extends(right, related_type) => Err(fail(format!(
                "far side leads to '{}' but the relationship targets '{}'",
                right, related_type
            ))),
            Some(_) => Ok(()),
        }
    }
}

fn check_inverses(
    types: &[ResourceType],
    index: &HashMap<String, usize>,
) -> Result<(), RegistryError> {
    for ty in types {
        for rel in ty.relationships.iter().filter(|r| r.declared_by == ty.name) {
            let Some(inverse) = &rel.inverse else { continue };
            let related = &types[index[&rel.related_type]];
            if related.relationship(inverse).is_none() {
                return Err(RegistryError::UnknownInverseRelationship {
                    resource_type: ty.name.clone(),
                    relationship: rel.name.clone(),
                    inverse: inverse.clone(),
                });
            }
        }
    }
    Ok(())
}

fn projection_mismatch() -> AccessError {
    AccessError::new("instance does not embed the declaring base type")
}

fn inherit_identity(base: &Identity, projection: &Arc<dyn Projection>) -> Identity {
    let (get, set) = (base.get.clone(), base.set.clone());
    let (p_get, p_set) = (projection.clone(), projection.clone());
    Identity {
        get: Arc::new(move |any: &dyn Any| p_get.project(any).and_then(|b| get(b))),
        set: Arc::new(move |any: &mut dyn Any, id: &str| match p_set.project_mut(any) {
            Some(b) => set(b, id),
            None => Err(projection_mismatch()),
        }),
    }
}

fn inherit_attribute(
    attr: &AttributeDescriptor,
    projection: &Arc<dyn Projection>,
) -> AttributeDescriptor {
    let (get, set) = (attr.get.clone(), attr.set.clone());
    let (p_get, p_set) = (projection.clone(), projection.clone());
    AttributeDescriptor {
        get: Arc::new(move |any: &dyn Any| p_get.project(any).and_then(|b| get(b))),
        set: Arc::new(move |any: &mut dyn Any, value: AttrValue| match p_set.project_mut(any) {
            Some(b) => set(b, value),
            None => Err(projection_mismatch()),
        }),
        ..attr.clone()
    }
}

fn inherit_relationship(
    rel: &RelationshipDescriptor,
    projection: &Arc<dyn Projection>,
) -> RelationshipDescriptor {
    let (visit, assign) = (rel.visit.clone(), rel.assign.clone());
    let (p_visit, p_assign) = (projection.clone(), projection.clone());
    RelationshipDescriptor {
        visit: visitor(move |any, sink| {
            if let Some(b) = p_visit.project(any) {
                visit(b, sink);
            }
        }),
        assign: Arc::new(move |any: &mut dyn Any, related: Vec<Box<dyn Resource>>| {
            match p_assign.project_mut(any) {
                Some(b) => assign(b, related),
                None => Err(projection_mismatch()),
            }
        }),
        ..rel.clone()
    }
}
