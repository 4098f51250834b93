//! Atomic operations: ordered, all-or-nothing batches of mutations.
//!
//! Operations run strictly in order against a [`ResourceStore`]. Local ids
//! declared by earlier operations are visible to later ones through the
//! [`LocalIdLedger`]. On the first failure every applied mutation is undone
//! in reverse order and exactly one error is reported.
//!
//! Dropping the future returned by [`AtomicSequencer::run`] abandons the
//! batch without compensation; the ledger lives inside that future and a lid
//! is only declared after its create call has returned.

use serde_json::Value;
use tracing::Instrument;

use crate::document::{
    AtomicOperation, AtomicResult, Document, JsonApiObject, OpCode, OperationRef, PrimaryData,
};
use crate::error::{ApiError, BatchError, OperationError, ReaderError};
use crate::fields::RequestContext;
use crate::ledger::LocalIdLedger;
use crate::reader::{ChangeMode, ChangeSet, DocumentReader, LocalIdScope, RelationshipChange};
use crate::registry::{Registry, ResourceType};
use crate::store::{OperationRecord, ResourceStore};
use crate::structure::{self, Shape};
use crate::types::{Access, Cardinality, Options, RelCapabilities};
use crate::writer::DocumentWriter;

/// Lifecycle of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Validating,
    Executing(usize),
    Committed,
    RolledBack { failed_at: usize },
    /// Refused before any operation ran.
    Rejected,
}

/// Outcome of a batch.
#[derive(Debug)]
pub struct BatchResult {
    pub state: BatchState,
    pub outcome: Result<Vec<AtomicResult>, BatchError>,
}

impl BatchResult {
    fn rejected(error: BatchError) -> Self {
        Self {
            state: BatchState::Rejected,
            outcome: Err(error),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == BatchState::Committed
    }

    /// HTTP status of the response.
    pub fn status(&self) -> u16 {
        match &self.outcome {
            Ok(_) => 200,
            Err(error) => error.status(),
        }
    }

    /// `{"atomic:results": [...]}` on success, a single-error document otherwise.
    pub fn to_document(&self) -> Document {
        let mut document = match &self.outcome {
            Ok(results) => Document {
                atomic_results: Some(results.clone()),
                ..Document::default()
            },
            Err(error) => Document::from_errors(vec![error.to_error_object()]),
        };
        document.jsonapi = Some(JsonApiObject::atomic());
        document
    }
}

/// Runs atomic batches against a store.
pub struct AtomicSequencer<'r> {
    registry: &'r Registry,
    store: &'r dyn ResourceStore,
    options: Options,
    context: RequestContext,
    state: BatchState,
}

impl<'r> AtomicSequencer<'r> {
    pub fn new(registry: &'r Registry, store: &'r dyn ResourceStore, options: Options) -> Self {
        Self {
            registry,
            store,
            options,
            context: RequestContext::default(),
            state: BatchState::Idle,
        }
    }

    /// Field selection and overrides applied to reads and writes of the batch.
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Parse an `atomic:operations` envelope and run it with the configured
    /// operation limit.
    pub async fn run_body(&mut self, body: &str) -> BatchResult {
        self.state = BatchState::Validating;
        let operations = match parse_envelope(body) {
            Ok(operations) => operations,
            Err(error) => {
                self.state = BatchState::Rejected;
                return BatchResult::rejected(BatchError::Envelope(error));
            }
        };
        let max = self.options.max_atomic_operations;
        self.run(operations, max).await
    }

    /// Validate and execute `operations`.
    pub async fn run(&mut self, operations: Vec<AtomicOperation>, max_count: usize) -> BatchResult {
        self.state = BatchState::Validating;
        if operations.is_empty() {
            self.state = BatchState::Rejected;
            return BatchResult::rejected(BatchError::NoOperations);
        }
        if operations.len() > max_count {
            self.state = BatchState::Rejected;
            return BatchResult::rejected(BatchError::TooManyOperations {
                count: operations.len(),
                max: max_count,
            });
        }

        let span = tracing::info_span!("atomic_batch", operations = operations.len());
        self.execute_all(operations).instrument(span).await
    }

    async fn execute_all(&mut self, operations: Vec<AtomicOperation>) -> BatchResult {
        let mut ledger = LocalIdLedger::new();
        let mut applied: Vec<OperationRecord> = Vec::new();
        let mut results = Vec::with_capacity(operations.len());

        for (index, operation) in operations.iter().enumerate() {
            self.state = BatchState::Executing(index);
            let outcome = self
                .execute(index, operation, &mut ledger, &mut applied)
                .instrument(tracing::debug_span!("operation", index, op = ?operation.op))
                .await;
            match outcome {
                Ok(result) => results.push(result),
                Err(source) => {
                    tracing::warn!(
                        index,
                        error = %source,
                        undo = applied.len(),
                        "atomic operation failed, rolling back"
                    );
                    self.rollback(applied).await;
                    self.state = BatchState::RolledBack { failed_at: index };
                    return BatchResult {
                        state: self.state,
                        outcome: Err(BatchError::Operation { index, source }),
                    };
                }
            }
        }

        self.state = BatchState::Committed;
        tracing::info!(operations = results.len(), "atomic batch committed");
        BatchResult {
            state: self.state,
            outcome: Ok(results),
        }
    }

    async fn rollback(&self, applied: Vec<OperationRecord>) {
        for record in applied.into_iter().rev() {
            let identity = record.identity();
            if let Err(error) = self.store.undo(record).await {
                tracing::error!(%identity, %error, "failed to undo operation");
            }
        }
    }

    async fn execute(
        &self,
        index: usize,
        operation: &AtomicOperation,
        ledger: &mut LocalIdLedger,
        applied: &mut Vec<OperationRecord>,
    ) -> Result<AtomicResult, OperationError> {
        let relationship = operation.reference.as_ref().and_then(|reference| {
            reference
                .relationship
                .as_deref()
                .map(|name| (reference, name))
        });
        match (operation.op, relationship) {
            (op, Some((reference, name))) => {
                self.relationship_operation(index, op, operation, reference, name, ledger, applied)
                    .await
            }
            (OpCode::Add, None) => self.add_resource(index, operation, ledger, applied).await,
            (OpCode::Update, None) => self.update_resource(index, operation, ledger, applied).await,
            (OpCode::Remove, None) => self.remove_resource(index, operation, ledger, applied).await,
        }
    }

    fn reader(&self) -> DocumentReader<'r> {
        DocumentReader::new(self.registry, self.context.clone(), self.options.clone())
    }

    fn resource_result(
        &self,
        resource: &dyn crate::resource::Resource,
    ) -> Result<AtomicResult, OperationError> {
        let mut writer =
            DocumentWriter::new(self.registry, self.context.clone(), self.options.clone());
        let object = writer.resource(resource)?;
        Ok(AtomicResult {
            data: PrimaryData::Single(Box::new(object)),
            meta: None,
        })
    }

    async fn add_resource(
        &self,
        index: usize,
        operation: &AtomicOperation,
        ledger: &mut LocalIdLedger,
        applied: &mut Vec<OperationRecord>,
    ) -> Result<AtomicResult, OperationError> {
        if operation.reference.is_some() {
            return Err(OperationError::Unsupported {
                message: "'ref' is only allowed when adding to a relationship".to_string(),
                pointer: "/ref".to_string(),
            });
        }
        let data = required_data(operation)?;
        let resource_type = data
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ReaderError::malformed("/data/type", "'type' must be a string"))?;

        let scope = LocalIdScope::Batch {
            ledger: &*ledger,
            index,
        };
        let changes = self
            .reader()
            .read_resource(data, "/data", resource_type, None, Access::Create, scope)?;

        let outcome = self.store.create(&changes).await?;
        let identity = outcome.record.identity();
        applied.push(outcome.record);
        if let Some(lid) = &changes.lid {
            ledger.declare(lid, identity, index)?;
        }
        self.resource_result(outcome.resource.as_ref())
    }

    async fn update_resource(
        &self,
        index: usize,
        operation: &AtomicOperation,
        ledger: &mut LocalIdLedger,
        applied: &mut Vec<OperationRecord>,
    ) -> Result<AtomicResult, OperationError> {
        let data = required_data(operation)?;
        let (expected_type, target_id) = match &operation.reference {
            Some(reference) => {
                self.resource_type(reference)?;
                let id = self.target_id(reference, ledger, index)?;
                (reference.resource_type.as_str(), Some(id))
            }
            None => (
                data.get("type").and_then(Value::as_str).ok_or_else(|| {
                    ReaderError::malformed("/data/type", "'type' must be a string")
                })?,
                None,
            ),
        };

        let scope = LocalIdScope::Batch {
            ledger: &*ledger,
            index,
        };
        let changes = self.reader().read_resource(
            data,
            "/data",
            expected_type,
            target_id.as_deref(),
            Access::Update,
            scope,
        )?;

        let outcome = self.store.update(&changes).await?;
        applied.push(outcome.record);
        self.resource_result(outcome.resource.as_ref())
    }

    async fn remove_resource(
        &self,
        index: usize,
        operation: &AtomicOperation,
        ledger: &mut LocalIdLedger,
        applied: &mut Vec<OperationRecord>,
    ) -> Result<AtomicResult, OperationError> {
        let reference = operation
            .reference
            .as_ref()
            .ok_or_else(|| ReaderError::malformed("", "'ref' is required to remove a resource"))?;
        let ty = self.resource_type(reference)?;
        let id = self.target_id(reference, ledger, index)?;

        let record = self.store.delete(ty.name(), &id).await?;
        applied.push(record);
        Ok(null_result())
    }

    #[allow(clippy::too_many_arguments)]
    async fn relationship_operation(
        &self,
        index: usize,
        op: OpCode,
        operation: &AtomicOperation,
        reference: &OperationRef,
        relationship: &str,
        ledger: &mut LocalIdLedger,
        applied: &mut Vec<OperationRecord>,
    ) -> Result<AtomicResult, OperationError> {
        let ty = self.resource_type(reference)?;
        let rel = ty.relationship(relationship).ok_or_else(|| ReaderError::FieldNotWritable {
            resource_type: ty.name().to_string(),
            field: relationship.to_string(),
            reason: "does not exist".to_string(),
            pointer: "/ref/relationship".to_string(),
        })?;

        let (mode, capability) = match op {
            OpCode::Update => (ChangeMode::Replace, RelCapabilities::SET),
            OpCode::Add => (ChangeMode::Add, RelCapabilities::ADD),
            OpCode::Remove => (ChangeMode::Remove, RelCapabilities::REMOVE),
        };
        if mode != ChangeMode::Replace && rel.cardinality() == Cardinality::ToOne {
            return Err(OperationError::Unsupported {
                message: format!(
                    "members can only be added to or removed from to-many relationships; \
                     '{}' is to-one",
                    relationship
                ),
                pointer: "/op".to_string(),
            });
        }
        if !rel.capabilities().contains(capability) {
            return Err(ReaderError::FieldNotWritable {
                resource_type: ty.name().to_string(),
                field: relationship.to_string(),
                reason: format!("does not allow '{}' operations", op_name(op)),
                pointer: "/ref/relationship".to_string(),
            }
            .into());
        }

        let id = self.target_id(reference, ledger, index)?;
        let data = required_data(operation)?;
        structure::check(Shape::Linkage, data, "/data")?;
        let scope = LocalIdScope::Batch {
            ledger: &*ledger,
            index,
        };
        let targets = self.reader().read_identifiers(data, "/data", rel, scope)?;

        let changes = ChangeSet::relationship(
            ty.name(),
            id,
            relationship,
            RelationshipChange { mode, targets },
        );
        let outcome = self.store.update(&changes).await?;
        applied.push(outcome.record);
        Ok(null_result())
    }

    fn resource_type(&self, reference: &OperationRef) -> Result<&'r ResourceType, ReaderError> {
        self.registry
            .get(&reference.resource_type)
            .ok_or_else(|| ReaderError::UnknownResourceType {
                name: reference.resource_type.clone(),
                pointer: "/ref/type".to_string(),
            })
    }

    /// Id addressed by `ref`, resolving a local id through the ledger.
    fn target_id(
        &self,
        reference: &OperationRef,
        ledger: &LocalIdLedger,
        index: usize,
    ) -> Result<String, ReaderError> {
        match (&reference.id, &reference.lid) {
            (Some(id), None) => Ok(id.clone()),
            (None, Some(lid)) => ledger
                .resolve_as(self.registry, lid, index, &reference.resource_type)
                .map(|identity| identity.id.clone())
                .map_err(|source| ReaderError::LocalId {
                    pointer: "/ref/lid".to_string(),
                    source,
                }),
            _ => Err(ReaderError::MissingId {
                pointer: "/ref".to_string(),
            }),
        }
    }
}

fn op_name(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "add",
        OpCode::Update => "update",
        OpCode::Remove => "remove",
    }
}

fn null_result() -> AtomicResult {
    AtomicResult {
        data: PrimaryData::Null,
        meta: None,
    }
}

fn required_data(operation: &AtomicOperation) -> Result<&Value, ReaderError> {
    match &operation.data {
        Some(data) => Ok(data),
        None => Err(ReaderError::malformed("", "'data' is required for this operation")),
    }
}

fn parse_envelope(body: &str) -> Result<Vec<AtomicOperation>, ReaderError> {
    if body.trim().is_empty() {
        return Err(ReaderError::MissingBody);
    }
    let envelope: Value =
        serde_json::from_str(body).map_err(|e| ReaderError::malformed("", e.to_string()))?;
    structure::check(Shape::AtomicEnvelope, &envelope, "")?;

    let (key, operations) = match envelope.get("atomic:operations") {
        Some(operations) => ("/atomic:operations", operations),
        None => ("/operations", &envelope["operations"]),
    };
    serde_json::from_value(operations.clone())
        .map_err(|e| ReaderError::malformed(key, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::builder::{AttrSpec, RecordTypeBuilder, RegistryBuilder};
    use crate::store::InMemoryStore;
    use crate::types::{AttrKind, IdKind};
    use serde_json::json;

    fn registry() -> Arc<Registry> {
        Arc::new(
            RegistryBuilder::new()
                .resource(
                    RecordTypeBuilder::new("tags", IdKind::Integer)
                        .attribute(AttrSpec::new("name", AttrKind::Text)),
                )
                .build()
                .unwrap(),
        )
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn empty_batch_is_rejected() {
        let registry = registry();
        let store = InMemoryStore::new(registry.clone());
        let mut sequencer = AtomicSequencer::new(&registry, &store, Options::new());
        let result = block_on(sequencer.run(Vec::new(), 10));
        assert_eq!(result.state, BatchState::Rejected);
        assert!(matches!(result.outcome, Err(BatchError::NoOperations)));
    }

    #[test]
    fn envelope_alias_and_results() {
        let registry = registry();
        let store = InMemoryStore::new(registry.clone());
        let mut sequencer = AtomicSequencer::new(&registry, &store, Options::new());
        let body = json!({ "operations": [
            { "op": "add", "data": { "type": "tags", "attributes": { "name": "live" } } }
        ] });

        let result = block_on(sequencer.run_body(&body.to_string()));
        assert!(result.is_committed());
        assert_eq!(sequencer.state(), BatchState::Committed);
        let document = result.to_document().to_value();
        assert_eq!(document["atomic:results"][0]["data"]["id"], json!("1"));
        assert_eq!(document["jsonapi"]["ext"][0], json!(crate::types::ATOMIC_EXTENSION));
    }

    #[test]
    fn malformed_envelope_is_rejected() {
        let registry = registry();
        let store = InMemoryStore::new(registry.clone());
        let mut sequencer = AtomicSequencer::new(&registry, &store, Options::new());
        let result = block_on(sequencer.run_body("{\"data\": []}"));
        assert_eq!(result.state, BatchState::Rejected);
        assert!(matches!(
            result.outcome,
            Err(BatchError::Envelope(ReaderError::MalformedBody { .. }))
        ));
        assert_eq!(result.status(), 400);
    }
}
