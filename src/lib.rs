//! hyperdoc
//!
//! Resource metadata and document (de)serialization for hypermedia JSON APIs
//! in the JSON:API 1.1 shape, including the atomic operations extension.
//!
//! A [`Registry`] describes every exposed resource type: its identity, its
//! attributes and relationships, and what clients may do with each field. The
//! [`DocumentWriter`] renders domain values into documents with sparse
//! fieldsets and side-loaded `included` resources, the [`DocumentReader`]
//! turns request bodies into typed [`ChangeSet`]s, and the
//! [`AtomicSequencer`] runs batches of mutations against a [`ResourceStore`]
//! with all-or-nothing semantics.
//!
//! # Example
//!
//! ```
//! use hyperdoc::{
//!     AttrKind, AttrSpec, AttrValue, DocumentWriter, IdKind, IncludeTree, Options,
//!     RegistryBuilder, RequestContext, ResourceTypeBuilder,
//! };
//!
//! #[derive(Debug, Clone, Default)]
//! struct Track {
//!     id: Option<String>,
//!     title: String,
//! }
//!
//! let registry = RegistryBuilder::new()
//!     .resource(
//!         ResourceTypeBuilder::<Track>::new("musicTracks", IdKind::String)
//!             .identity(
//!                 |t| t.id.clone(),
//!                 |t, id| {
//!                     t.id = Some(id.to_string());
//!                     Ok(())
//!                 },
//!             )
//!             .attribute(
//!                 AttrSpec::new("title", AttrKind::Text),
//!                 |t| AttrValue::from(t.title.clone()),
//!                 |t, v| {
//!                     t.title = v.extract()?;
//!                     Ok(())
//!                 },
//!             ),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let track = Track {
//!     id: Some("1".into()),
//!     title: "Yellow".into(),
//! };
//! let mut writer = DocumentWriter::new(&registry, RequestContext::new(), Options::new());
//! let document = writer
//!     .serialize(&track as &dyn hyperdoc::Resource, &IncludeTree::new())
//!     .unwrap();
//!
//! let json = document.to_value();
//! assert_eq!(json["data"]["type"], "musicTracks");
//! assert_eq!(json["data"]["attributes"]["title"], "Yellow");
//! ```
//!
//! # Atomic operations
//!
//! | `op` | `ref.relationship` | Effect |
//! |------|--------------------|--------|
//! | `add` | - | Create the resource in `data`; may declare a `lid` |
//! | `update` | - | Update the resource in `data` (or addressed by `ref`) |
//! | `remove` | - | Delete the resource addressed by `ref` |
//! | `update` | set | Replace the relationship with `data` |
//! | `add` | set | Append `data` to a to-many relationship |
//! | `remove` | set | Remove `data` from a to-many relationship |

mod atomic;
mod builder;
mod document;
mod error;
mod fields;
mod ledger;
mod loader;
mod model;
mod query;
mod reader;
mod registry;
mod resource;
mod store;
mod structure;
mod types;
mod writer;

pub use atomic::{AtomicSequencer, BatchResult, BatchState};
pub use builder::{
    AttrSpec, RecordTypeBuilder, RegistryBuilder, RelSpec, ResourceTypeBuilder, TypeCandidate,
};
pub use document::{
    AtomicOperation, AtomicResult, Document, ErrorObject, ErrorSource, JsonApiObject, Linkage,
    Links, OpCode, OperationRef, PrimaryData, RelationshipObject, ResourceIdentifier,
    ResourceObject,
};
pub use error::{
    operation_pointer, AccessError, ApiError, BatchError, ErrorCategory, LedgerError, LoadError,
    OperationError, QueryError, ReaderError, RegistryError, StoreError, WriterError,
};
pub use fields::{
    CapabilityEvaluator, EffectiveFieldSet, FieldOverride, FieldOverrides, RequestContext,
};
pub use ledger::{LedgerEntry, LocalIdLedger, ResolvedIdentity};
pub use loader::{
    is_url, load_auto, load_json, load_json_str, load_options, load_text, load_text_auto,
    load_typed,
};
pub use model::{
    AttributeDef, JoinDef, LinkKind, RelationshipDef, ResourceDef, ResourceModel, ThroughDef,
};
pub use query::{fields_parameter, FieldSelection, IncludeTree, QueryParams, INCLUDE_PARAMETER};
pub use reader::{ChangeMode, ChangeSet, DocumentReader, LocalIdScope, RelationshipChange};
pub use registry::{
    AttributeDescriptor, JoinType, Registry, RelationshipDescriptor, ResourceType, Through,
    TypeKey,
};
pub use resource::{Record, Resource};
pub use store::{Applied, InMemoryStore, OperationRecord, ResourceStore};
pub use structure::{
    atomic_envelope_schema, check as check_structure, linkage_schema,
    relationship_document_schema, resource_document_schema, resource_object_schema, Shape,
};
pub use types::{
    json_type_name, Access, AttrCapabilities, AttrKind, AttrValue, Capability, Cardinality,
    FromAttrValue, IdKind, LinkKinds, Options, RelCapabilities, ATOMIC_EXTENSION,
    JSONAPI_VERSION,
};
pub use writer::{DocumentWriter, Primary};

#[cfg(feature = "remote")]
pub use loader::load_url_text;
