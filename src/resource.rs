//! Resource instances as seen by the registry.
//!
//! Any `Clone + Debug + Send + Sync + 'static` type is a [`Resource`]; how its
//! fields map onto the document format is described by the accessor table
//! registered for it, not by the type itself.

use std::any::Any;
use std::fmt::Debug;

use indexmap::IndexMap;

use crate::types::AttrValue;

/// A domain object that can be exposed as a resource.
pub trait Resource: Any + Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn clone_resource(&self) -> Box<dyn Resource>;
    fn rust_type_name(&self) -> &'static str;
}

impl<T> Resource for T
where
    T: Any + Clone + Send + Sync + Debug,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn clone_resource(&self) -> Box<dyn Resource> {
        Box::new(self.clone())
    }

    fn rust_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Dynamically shaped resource instance.
///
/// Backs resource types declared in a model manifest rather than by a Rust
/// type. All record-backed types share one Rust type, so a record carries the
/// public name of its resource type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub resource_type: String,
    pub id: Option<String>,
    pub attributes: IndexMap<String, AttrValue>,
    /// Related records by relationship name. To-one relationships hold at most one.
    pub relationships: IndexMap<String, Vec<Record>>,
}

impl Record {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_related(mut self, name: impl Into<String>, related: Vec<Record>) -> Self {
        self.relationships.insert(name.into(), related);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn related(&self, name: &str) -> &[Record] {
        self.relationships
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Downcast helper for the record case.
pub(crate) fn as_record(resource: &dyn Resource) -> Option<&Record> {
    resource.as_any().downcast_ref::<Record>()
}
