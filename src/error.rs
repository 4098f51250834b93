//! Error types for registry construction, document processing and batches.
//!
//! Every error that can reach a client implements [`ApiError`], which maps it
//! onto a status, a stable title, a taxonomy category and a source location,
//! and renders it as an [`ErrorObject`].

use std::path::PathBuf;

use thiserror::Error;

use crate::document::{ErrorObject, ErrorSource};
use crate::types::Cardinality;

/// Broad classification of errors surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or malformed body.
    Structural,
    /// Unknown type or field, disallowed capability.
    Schema,
    /// Unassigned or duplicate local id, dangling relationship target.
    Reference,
    /// Batch empty or too large, include chain too deep.
    Limit,
    /// Anything unexpected.
    Internal,
}

/// Client-facing view of an error.
pub trait ApiError: std::error::Error {
    /// HTTP status code.
    fn status(&self) -> u16;

    /// Stable, human-readable title. Does not vary between occurrences.
    fn title(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    /// Location of the offending input, if known.
    fn error_source(&self) -> Option<ErrorSource> {
        None
    }

    fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            status: self.status().to_string(),
            title: self.title().to_string(),
            detail: Some(self.to_string()),
            source: self.error_source(),
            ..ErrorObject::default()
        }
    }
}

/// Failure inside a field accessor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AccessError {
    pub message: String,
}

impl AccessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors during registry construction and lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("resource type name '{name}' is registered more than once")]
    DuplicateResourceName { name: String },

    #[error("Rust type {rust_type} is bound to both '{first}' and '{second}'")]
    DuplicateRuntimeType {
        rust_type: &'static str,
        first: String,
        second: String,
    },

    #[error("resource type '{resource_type}' extends unknown type '{base}'")]
    UnknownBaseType { resource_type: String, base: String },

    #[error("inheritance cycle detected involving resource type '{resource_type}'")]
    InheritanceCycle { resource_type: String },

    #[error("resource type '{resource_type}' has no identity accessor")]
    MissingIdentity { resource_type: String },

    #[error("resource type '{resource_type}' declares field '{field}' more than once")]
    DuplicateFieldName { resource_type: String, field: String },

    #[error("relationship '{resource_type}.{relationship}' targets unregistered type '{target}'")]
    UnresolvedRelationshipTarget {
        resource_type: String,
        relationship: String,
        target: String,
    },

    #[error("through-relationship '{resource_type}.{relationship}' cannot be resolved: {reason}")]
    UnresolvedThroughRelationship {
        resource_type: String,
        relationship: String,
        reason: String,
    },

    #[error("relationship '{resource_type}.{relationship}' names unknown inverse '{inverse}'")]
    UnknownInverseRelationship {
        resource_type: String,
        relationship: String,
        inverse: String,
    },

    #[error("resource type '{name}' is not registered")]
    UnknownResourceType { name: String },
}

impl ApiError for RegistryError {
    fn status(&self) -> u16 {
        match self {
            RegistryError::UnknownResourceType { .. } => 400,
            _ => 500,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            RegistryError::UnknownResourceType { .. } => "Unknown resource type.",
            _ => "Invalid resource graph.",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            RegistryError::UnknownResourceType { .. } => ErrorCategory::Schema,
            _ => ErrorCategory::Internal,
        }
    }
}

/// Errors in query parameters (`fields[type]`, `include`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid value for '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("resource type '{name}' in '{parameter}' does not exist")]
    UnknownResourceType { name: String, parameter: String },

    #[error("field '{field}' in '{parameter}' does not exist on resource type '{resource_type}'")]
    UnknownField {
        resource_type: String,
        field: String,
        parameter: String,
    },

    #[error("field '{field}' in '{parameter}' cannot be retrieved on resource type '{resource_type}'")]
    FieldNotViewable {
        resource_type: String,
        field: String,
        parameter: String,
    },

    #[error("relationship '{relationship}' in '{parameter}' does not exist on resource type '{resource_type}'")]
    UnknownRelationship {
        resource_type: String,
        relationship: String,
        parameter: String,
    },

    #[error("relationship '{relationship}' on resource type '{resource_type}' cannot be included")]
    RelationshipNotIncludable {
        resource_type: String,
        relationship: String,
        parameter: String,
    },

    #[error("include path '{path}' exceeds the maximum depth of {max}")]
    IncludeTooDeep {
        path: String,
        max: usize,
        parameter: String,
    },
}

impl QueryError {
    fn parameter(&self) -> &str {
        match self {
            QueryError::InvalidParameter { parameter, .. }
            | QueryError::UnknownResourceType { parameter, .. }
            | QueryError::UnknownField { parameter, .. }
            | QueryError::FieldNotViewable { parameter, .. }
            | QueryError::UnknownRelationship { parameter, .. }
            | QueryError::RelationshipNotIncludable { parameter, .. }
            | QueryError::IncludeTooDeep { parameter, .. } => parameter,
        }
    }
}

impl ApiError for QueryError {
    fn status(&self) -> u16 {
        400
    }

    fn title(&self) -> &'static str {
        match self {
            QueryError::InvalidParameter { .. } => "Invalid query string parameter value.",
            QueryError::UnknownResourceType { .. } => "Unknown resource type.",
            QueryError::UnknownField { .. } => "Unknown field.",
            QueryError::FieldNotViewable { .. } => "Field cannot be retrieved.",
            QueryError::UnknownRelationship { .. } => "Unknown relationship.",
            QueryError::RelationshipNotIncludable { .. } => "Relationship cannot be included.",
            QueryError::IncludeTooDeep { .. } => "Include chain too deep.",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            QueryError::InvalidParameter { .. } => ErrorCategory::Structural,
            QueryError::IncludeTooDeep { .. } => ErrorCategory::Limit,
            _ => ErrorCategory::Schema,
        }
    }

    fn error_source(&self) -> Option<ErrorSource> {
        Some(ErrorSource::parameter(self.parameter()))
    }
}

/// Errors in the local identifier ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("local id '{lid}' is declared more than once (operation {index})")]
    DuplicateLocalId { lid: String, index: usize },

    #[error("local id '{lid}' is used before it is declared (operation {index})")]
    UnassignedLocalId { lid: String, index: usize },

    #[error("local id '{lid}' belongs to resource type '{declared}', not '{used}' (operation {index})")]
    LocalIdTypeMismatch {
        lid: String,
        declared: String,
        used: String,
        index: usize,
    },
}

impl LedgerError {
    /// Index of the operation that triggered the error.
    pub fn index(&self) -> usize {
        match self {
            LedgerError::DuplicateLocalId { index, .. }
            | LedgerError::UnassignedLocalId { index, .. }
            | LedgerError::LocalIdTypeMismatch { index, .. } => *index,
        }
    }
}

impl ApiError for LedgerError {
    fn status(&self) -> u16 {
        match self {
            LedgerError::LocalIdTypeMismatch { .. } => 409,
            _ => 400,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            LedgerError::DuplicateLocalId { .. } => "Duplicate local ID.",
            LedgerError::UnassignedLocalId { .. } => {
                "Server-generated value for local ID is not available at this point."
            }
            LedgerError::LocalIdTypeMismatch { .. } => "Incompatible type in local ID usage.",
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Reference
    }
}

/// Errors while reading a request document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReaderError {
    #[error("missing request body")]
    MissingBody,

    #[error("failed to deserialize request body: {message}")]
    MalformedBody { pointer: String, message: String },

    #[error("resource type '{name}' does not exist")]
    UnknownResourceType { name: String, pointer: String },

    #[error("resource type '{actual}' is incompatible with '{expected}'")]
    ResourceTypeMismatch {
        expected: String,
        actual: String,
        pointer: String,
    },

    #[error("field '{field}' on resource type '{resource_type}' {reason}")]
    FieldNotWritable {
        resource_type: String,
        field: String,
        reason: String,
        pointer: String,
    },

    #[error("invalid value for '{resource_type}.{field}': {message}")]
    InvalidAttributeValue {
        resource_type: String,
        field: String,
        message: String,
        pointer: String,
    },

    #[error("invalid id for resource type '{resource_type}': {message}")]
    InvalidId {
        resource_type: String,
        message: String,
        pointer: String,
    },

    #[error("client-generated ids are not allowed for resource type '{resource_type}'")]
    ClientIdNotAllowed {
        resource_type: String,
        pointer: String,
    },

    #[error("the 'id' element is required")]
    MissingId { pointer: String },

    #[error("resource id '{actual}' does not match the id '{expected}' in the request")]
    IdMismatch {
        expected: String,
        actual: String,
        pointer: String,
    },

    #[error("relationship '{relationship}' expects {}", cardinality_phrase(.expected))]
    RelationshipCardinalityMismatch {
        relationship: String,
        expected: Cardinality,
        pointer: String,
    },

    #[error("type '{actual}' is incompatible with relationship '{relationship}' of type '{expected}'")]
    RelationshipTypeMismatch {
        relationship: String,
        expected: String,
        actual: String,
        pointer: String,
    },

    #[error("local id '{lid}' can only be used in atomic operations")]
    LocalIdOutsideBatch { lid: String, pointer: String },

    #[error("{source}")]
    LocalId {
        pointer: String,
        #[source]
        source: LedgerError,
    },
}

fn cardinality_phrase(cardinality: &Cardinality) -> &'static str {
    match cardinality {
        Cardinality::ToOne => "a single resource identifier or null",
        Cardinality::ToMany => "an array of resource identifiers",
    }
}

impl ReaderError {
    pub(crate) fn malformed(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        ReaderError::MalformedBody {
            pointer: pointer.into(),
            message: message.into(),
        }
    }

    /// JSON pointer into the request body.
    pub fn pointer(&self) -> Option<&str> {
        match self {
            ReaderError::MissingBody => None,
            ReaderError::MalformedBody { pointer, .. }
            | ReaderError::UnknownResourceType { pointer, .. }
            | ReaderError::ResourceTypeMismatch { pointer, .. }
            | ReaderError::FieldNotWritable { pointer, .. }
            | ReaderError::InvalidAttributeValue { pointer, .. }
            | ReaderError::InvalidId { pointer, .. }
            | ReaderError::ClientIdNotAllowed { pointer, .. }
            | ReaderError::MissingId { pointer }
            | ReaderError::IdMismatch { pointer, .. }
            | ReaderError::RelationshipCardinalityMismatch { pointer, .. }
            | ReaderError::RelationshipTypeMismatch { pointer, .. }
            | ReaderError::LocalIdOutsideBatch { pointer, .. }
            | ReaderError::LocalId { pointer, .. } => Some(pointer),
        }
    }
}

impl ApiError for ReaderError {
    fn status(&self) -> u16 {
        match self {
            ReaderError::ResourceTypeMismatch { .. }
            | ReaderError::RelationshipTypeMismatch { .. }
            | ReaderError::IdMismatch { .. } => 409,
            ReaderError::FieldNotWritable { .. } | ReaderError::InvalidAttributeValue { .. } => {
                422
            }
            ReaderError::ClientIdNotAllowed { .. } => 403,
            ReaderError::LocalId { source, .. } => source.status(),
            _ => 400,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ReaderError::MissingBody => "Missing request body.",
            ReaderError::MalformedBody { .. } => "Failed to deserialize request body.",
            ReaderError::UnknownResourceType { .. } => "Unknown resource type.",
            ReaderError::ResourceTypeMismatch { .. } => "Incompatible resource type.",
            ReaderError::FieldNotWritable { .. } => "Field cannot be assigned.",
            ReaderError::InvalidAttributeValue { .. } => "Incompatible attribute value.",
            ReaderError::InvalidId { .. } => "Invalid resource id.",
            ReaderError::ClientIdNotAllowed { .. } => "Client-generated id is not allowed.",
            ReaderError::MissingId { .. } => "Missing resource id.",
            ReaderError::IdMismatch { .. } => "Conflicting resource id.",
            ReaderError::RelationshipCardinalityMismatch { .. } => "Invalid relationship data.",
            ReaderError::RelationshipTypeMismatch { .. } => "Incompatible relationship type.",
            ReaderError::LocalIdOutsideBatch { .. } => "Local id is not allowed here.",
            ReaderError::LocalId { source, .. } => source.title(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            ReaderError::MissingBody
            | ReaderError::MalformedBody { .. }
            | ReaderError::MissingId { .. } => ErrorCategory::Structural,
            ReaderError::LocalIdOutsideBatch { .. } | ReaderError::LocalId { .. } => {
                ErrorCategory::Reference
            }
            _ => ErrorCategory::Schema,
        }
    }

    fn error_source(&self) -> Option<ErrorSource> {
        self.pointer().map(ErrorSource::pointer)
    }
}

/// Errors reported by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("resource of type '{resource_type}' with id '{id}' does not exist")]
    NotFound { resource_type: String, id: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("cannot apply changes to '{resource_type}': {source}")]
    Access {
        resource_type: String,
        #[source]
        source: AccessError,
    },

    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

impl ApiError for StoreError {
    fn status(&self) -> u16 {
        match self {
            StoreError::NotFound { .. } => 404,
            StoreError::Conflict { .. } => 409,
            StoreError::Access { .. } => 500,
            StoreError::Unavailable { .. } => 503,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "The requested resource does not exist.",
            StoreError::Conflict { .. } => "The request conflicts with the current state.",
            StoreError::Access { .. } | StoreError::Unavailable { .. } => {
                "An unhandled error occurred while processing this request."
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            StoreError::NotFound { .. } | StoreError::Conflict { .. } => ErrorCategory::Reference,
            _ => ErrorCategory::Internal,
        }
    }
}

/// Errors while rendering a response document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriterError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Rust type {rust_type} is not bound to a resource type")]
    UnregisteredResource { rust_type: &'static str },

    #[error("resource of type '{resource_type}' has no id")]
    MissingIdentity { resource_type: String },

    #[error("attribute '{field}' of '{resource_type}' could not be read from the instance")]
    UnreadableAttribute {
        resource_type: String,
        field: String,
    },
}

impl ApiError for WriterError {
    fn status(&self) -> u16 {
        match self {
            WriterError::Query(e) => e.status(),
            _ => 500,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            WriterError::Query(e) => e.title(),
            _ => "An unhandled error occurred while processing this request.",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            WriterError::Query(e) => e.category(),
            _ => ErrorCategory::Internal,
        }
    }

    fn error_source(&self) -> Option<ErrorSource> {
        match self {
            WriterError::Query(e) => e.error_source(),
            _ => None,
        }
    }
}

/// Failure of a single operation within an atomic batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("{message}")]
    Unsupported { message: String, pointer: String },
}

impl ApiError for OperationError {
    fn status(&self) -> u16 {
        match self {
            OperationError::Reader(e) => e.status(),
            OperationError::Ledger(e) => e.status(),
            OperationError::Store(e) => e.status(),
            OperationError::Writer(e) => e.status(),
            OperationError::Unsupported { .. } => 422,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            OperationError::Reader(e) => e.title(),
            OperationError::Ledger(e) => e.title(),
            OperationError::Store(e) => e.title(),
            OperationError::Writer(e) => e.title(),
            OperationError::Unsupported { .. } => "Unsupported operation.",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            OperationError::Reader(e) => e.category(),
            OperationError::Ledger(e) => e.category(),
            OperationError::Store(e) => e.category(),
            OperationError::Writer(e) => e.category(),
            OperationError::Unsupported { .. } => ErrorCategory::Schema,
        }
    }

    fn error_source(&self) -> Option<ErrorSource> {
        match self {
            OperationError::Reader(e) => e.error_source(),
            OperationError::Unsupported { pointer, .. } => Some(ErrorSource::pointer(pointer)),
            _ => None,
        }
    }
}

/// The single error an atomic batch reports.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error("no operations found")]
    NoOperations,

    #[error("the number of operations ({count}) exceeds the maximum of {max}")]
    TooManyOperations { count: usize, max: usize },

    #[error(transparent)]
    Envelope(ReaderError),

    #[error("operation {index} failed: {source}")]
    Operation {
        index: usize,
        #[source]
        source: OperationError,
    },
}

impl BatchError {
    /// Index of the failing operation, for errors raised during execution.
    pub fn index(&self) -> Option<usize> {
        match self {
            BatchError::Operation { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Pointer to an operation in the request envelope.
pub fn operation_pointer(index: usize) -> String {
    format!("/atomic:operations[{}]", index)
}

impl ApiError for BatchError {
    fn status(&self) -> u16 {
        match self {
            BatchError::NoOperations => 400,
            BatchError::TooManyOperations { .. } => 413,
            BatchError::Envelope(e) => e.status(),
            BatchError::Operation { source, .. } => source.status(),
        }
    }

    fn title(&self) -> &'static str {
        match self {
            BatchError::NoOperations => "No operations found.",
            BatchError::TooManyOperations { .. } => "Too many operations in request.",
            BatchError::Envelope(e) => e.title(),
            BatchError::Operation { source, .. } => source.title(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            BatchError::NoOperations | BatchError::TooManyOperations { .. } => {
                ErrorCategory::Limit
            }
            BatchError::Envelope(e) => e.category(),
            BatchError::Operation { source, .. } => source.category(),
        }
    }

    fn error_source(&self) -> Option<ErrorSource> {
        match self {
            BatchError::Envelope(e) => e.error_source(),
            BatchError::Operation { index, source } => {
                let base = operation_pointer(*index);
                let inner = source.error_source().and_then(|s| s.pointer);
                Some(ErrorSource::pointer(match inner {
                    Some(p) if !p.is_empty() && p != "/" => format!("{}{}", base, p),
                    _ => base,
                }))
            }
            _ => None,
        }
    }

    fn to_error_object(&self) -> ErrorObject {
        let detail = match self {
            BatchError::Operation { source, .. } => source.to_string(),
            other => other.to_string(),
        };
        ErrorObject {
            status: self.status().to_string(),
            title: self.title().to_string(),
            detail: Some(detail),
            source: self.error_source(),
            ..ErrorObject::default()
        }
    }
}

/// Errors while loading models, documents and configuration.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid model: {message}")]
    InvalidModel { message: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}
