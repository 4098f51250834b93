//! The persistence collaborator and an in-memory implementation.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::ledger::ResolvedIdentity;
use crate::reader::{ChangeMode, ChangeSet};
use crate::registry::{Registry, ResourceType};
use crate::resource::Resource;
use crate::types::IdKind;

/// What the store needs to reverse one applied mutation.
#[derive(Debug)]
pub enum OperationRecord {
    Created {
        resource_type: String,
        id: String,
    },
    Updated {
        resource_type: String,
        id: String,
        previous: Box<dyn Resource>,
    },
    Deleted {
        resource_type: String,
        id: String,
        snapshot: Box<dyn Resource>,
    },
}

impl OperationRecord {
    pub fn identity(&self) -> ResolvedIdentity {
        match self {
            OperationRecord::Created { resource_type, id }
            | OperationRecord::Updated {
                resource_type, id, ..
            }
            | OperationRecord::Deleted {
                resource_type, id, ..
            } => ResolvedIdentity::new(resource_type.clone(), id.clone()),
        }
    }
}

/// Result of a successful create or update.
#[derive(Debug)]
pub struct Applied {
    /// The resource as stored after the change.
    pub resource: Box<dyn Resource>,
    pub record: OperationRecord,
}

/// Persistence collaborator driven by the atomic sequencer.
///
/// Every mutation returns an [`OperationRecord`]; handing it back to
/// [`ResourceStore::undo`] must reverse that mutation.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, resource_type: &str, id: &str) -> Result<Box<dyn Resource>, StoreError>;

    /// Create a resource. The store assigns the id unless `changes.id` is set.
    async fn create(&self, changes: &ChangeSet) -> Result<Applied, StoreError>;

    async fn update(&self, changes: &ChangeSet) -> Result<Applied, StoreError>;

    async fn delete(&self, resource_type: &str, id: &str) -> Result<OperationRecord, StoreError>;

    async fn undo(&self, record: OperationRecord) -> Result<(), StoreError>;
}

type Key = (String, String);

#[derive(Debug, Default)]
struct StoreState {
    resources: IndexMap<Key, Box<dyn Resource>>,
    next_id: u64,
}

/// Keeps resources in memory, keyed by concrete type and id.
///
/// Relationships hold copies of the related resources taken when the
/// relationship was assigned.
#[derive(Debug)]
pub struct InMemoryStore {
    registry: Arc<Registry>,
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Seed a resource as-is. It must already carry its id.
    pub fn insert(&self, resource: Box<dyn Resource>) -> Result<ResolvedIdentity, StoreError> {
        let ty = self.descriptor(resource.as_ref())?;
        let id = ty.id_of(resource.as_ref()).ok_or_else(|| StoreError::Conflict {
            message: format!("cannot store '{}' without an id", ty.name()),
        })?;
        let key = (ty.name().to_string(), id.clone());
        let mut state = self.state.lock();
        if state.resources.contains_key(&key) {
            return Err(already_exists(&key));
        }
        if let Ok(n) = id.parse::<u64>() {
            state.next_id = state.next_id.max(n);
        }
        state.resources.insert(key, resource);
        Ok(ResolvedIdentity::new(ty.name(), id))
    }

    /// Copies of every stored resource assignable to `resource_type`.
    pub fn all(&self, resource_type: &str) -> Vec<Box<dyn Resource>> {
        let state = self.state.lock();
        state
            .resources
            .iter()
            .filter(|((t, _), _)| self.registry.is_assignable(t, resource_type))
            .map(|(_, r)| (**r).clone_resource())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn descriptor(&self, resource: &dyn Resource) -> Result<&ResourceType, StoreError> {
        self.registry
            .descriptor_of(resource)
            .ok_or_else(|| StoreError::Conflict {
                message: format!("{} is not a registered resource", resource.rust_type_name()),
            })
    }

    fn resource_type(&self, name: &str) -> Result<&ResourceType, StoreError> {
        self.registry
            .lookup(name)
            .map_err(|e| StoreError::Conflict {
                message: e.to_string(),
            })
    }

    /// Key of the stored resource with `id` whose type is assignable to `resource_type`.
    fn find_key(&self, state: &StoreState, resource_type: &str, id: &str) -> Option<Key> {
        let exact = (resource_type.to_string(), id.to_string());
        if state.resources.contains_key(&exact) {
            return Some(exact);
        }
        self.registry
            .assignable_to(resource_type)
            .into_iter()
            .map(|t| (t.name().to_string(), id.to_string()))
            .find(|key| state.resources.contains_key(key))
    }

    fn generate_id(&self, state: &mut StoreState, ty: &ResourceType) -> String {
        match ty.id_kind() {
            IdKind::Integer => loop {
                state.next_id += 1;
                let candidate = state.next_id.to_string();
                if self.find_key(state, ty.name(), &candidate).is_none() {
                    break candidate;
                }
            },
            IdKind::String | IdKind::Uuid => uuid::Uuid::new_v4().to_string(),
        }
    }

    fn apply(
        &self,
        state: &StoreState,
        ty: &ResourceType,
        resource: &mut dyn Resource,
        changes: &ChangeSet,
    ) -> Result<(), StoreError> {
        let access = |source| StoreError::Access {
            resource_type: ty.name().to_string(),
            source,
        };

        for (name, value) in &changes.attributes {
            let attr = ty.attribute(name).ok_or_else(|| StoreError::Conflict {
                message: format!("'{}' has no attribute '{}'", ty.name(), name),
            })?;
            attr.write(resource, value.clone()).map_err(access)?;
        }

        for (name, change) in &changes.relationships {
            let rel = ty.relationship(name).ok_or_else(|| StoreError::Conflict {
                message: format!("'{}' has no relationship '{}'", ty.name(), name),
            })?;

            let mut members: IndexMap<ResolvedIdentity, Box<dyn Resource>> = IndexMap::new();
            if change.mode != ChangeMode::Replace {
                for related in rel.related(resource) {
                    let related_type = self.descriptor(related)?;
                    if let Some(id) = related_type.id_of(related) {
                        members.insert(
                            ResolvedIdentity::new(related_type.name(), id),
                            related.clone_resource(),
                        );
                    }
                }
            }

            for target in &change.targets {
                let key = self
                    .find_key(state, &target.resource_type, &target.id)
                    .ok_or_else(|| not_found(&target.resource_type, &target.id))?;
                let identity = ResolvedIdentity::new(key.0.clone(), key.1.clone());
                match change.mode {
                    ChangeMode::Replace | ChangeMode::Add => {
                        if let Some(stored) = state.resources.get(&key) {
                            members.insert(identity, (**stored).clone_resource());
                        }
                    }
                    ChangeMode::Remove => {
                        members.shift_remove(&identity);
                    }
                }
            }

            rel.assign(resource, members.into_values().collect())
                .map_err(access)?;
        }
        Ok(())
    }
}

fn not_found(resource_type: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
    }
}

fn already_exists(key: &Key) -> StoreError {
    StoreError::Conflict {
        message: format!("resource '{}' with id '{}' already exists", key.0, key.1),
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, resource_type: &str, id: &str) -> Result<Box<dyn Resource>, StoreError> {
        let state = self.state.lock();
        self.find_key(&state, resource_type, id)
            .and_then(|key| state.resources.get(&key))
            .map(|r| (**r).clone_resource())
            .ok_or_else(|| not_found(resource_type, id))
    }

    async fn create(&self, changes: &ChangeSet) -> Result<Applied, StoreError> {
        let ty = self.resource_type(&changes.resource_type)?;
        let mut state = self.state.lock();

        let id = match &changes.id {
            Some(id) => id.clone(),
            None => self.generate_id(&mut state, ty),
        };
        let key = (ty.name().to_string(), id.clone());
        if self.find_key(&state, ty.name(), &id).is_some() {
            return Err(already_exists(&key));
        }

        let mut resource = ty.instantiate();
        ty.set_id(resource.as_mut(), &id)
            .map_err(|source| StoreError::Access {
                resource_type: ty.name().to_string(),
                source,
            })?;
        self.apply(&state, ty, resource.as_mut(), changes)?;

        tracing::debug!(resource_type = ty.name(), %id, "created resource");
        let copy = resource.clone_resource();
        state.resources.insert(key, resource);
        Ok(Applied {
            resource: copy,
            record: OperationRecord::Created {
                resource_type: ty.name().to_string(),
                id,
            },
        })
    }

    async fn update(&self, changes: &ChangeSet) -> Result<Applied, StoreError> {
        let id = changes.id.as_deref().ok_or_else(|| StoreError::Conflict {
            message: format!("update of '{}' without an id", changes.resource_type),
        })?;
        let mut state = self.state.lock();
        let key = self
            .find_key(&state, &changes.resource_type, id)
            .ok_or_else(|| not_found(&changes.resource_type, id))?;
        let ty = self.resource_type(&key.0)?;

        let previous = match state.resources.get(&key) {
            Some(stored) => (**stored).clone_resource(),
            None => return Err(not_found(&changes.resource_type, id)),
        };
        let mut working = previous.clone_resource();
        self.apply(&state, ty, working.as_mut(), changes)?;

        tracing::debug!(resource_type = ty.name(), %id, "updated resource");
        let copy = working.clone_resource();
        state.resources.insert(key.clone(), working);
        Ok(Applied {
            resource: copy,
            record: OperationRecord::Updated {
                resource_type: key.0,
                id: key.1,
                previous,
            },
        })
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<OperationRecord, StoreError> {
        let mut state = self.state.lock();
        let key = self
            .find_key(&state, resource_type, id)
            .ok_or_else(|| not_found(resource_type, id))?;
        let snapshot = state
            .resources
            .shift_remove(&key)
            .ok_or_else(|| not_found(resource_type, id))?;
        tracing::debug!(resource_type = %key.0, id = %key.1, "deleted resource");
        Ok(OperationRecord::Deleted {
            resource_type: key.0,
            id: key.1,
            snapshot,
        })
    }

    async fn undo(&self, record: OperationRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        match record {
            OperationRecord::Created { resource_type, id } => {
                let key = (resource_type, id);
                state
                    .resources
                    .shift_remove(&key)
                    .map(|_| ())
                    .ok_or_else(|| not_found(&key.0, &key.1))
            }
            OperationRecord::Updated {
                resource_type,
                id,
                previous,
            } => {
                state.resources.insert((resource_type, id), previous);
                Ok(())
            }
            OperationRecord::Deleted {
                resource_type,
                id,
                snapshot,
            } => {
                state.resources.insert((resource_type, id), snapshot);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{AttrSpec, RecordTypeBuilder, RegistryBuilder, RelSpec};
    use crate::reader::RelationshipChange;
    use crate::resource::Record;
    use crate::types::{AttrKind, AttrValue, Cardinality};

    fn store() -> InMemoryStore {
        let registry = RegistryBuilder::new()
            .resource(
                RecordTypeBuilder::new("playlists", IdKind::Integer)
                    .attribute(AttrSpec::new("name", AttrKind::Text))
                    .relationship(RelSpec::new("tracks").target("tracks"), Cardinality::ToMany),
            )
            .resource(RecordTypeBuilder::new("tracks", IdKind::Uuid))
            .build()
            .unwrap();
        InMemoryStore::new(Arc::new(registry))
    }

    fn playlist(name: &str) -> ChangeSet {
        let mut changes = ChangeSet::new("playlists");
        changes
            .attributes
            .insert("name".into(), AttrValue::from(name));
        changes
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn create_assigns_sequential_integer_ids() {
        let store = store();
        let first = block_on(store.create(&playlist("a"))).unwrap();
        let second = block_on(store.create(&playlist("b"))).unwrap();
        assert_eq!(first.record.identity().id, "1");
        assert_eq!(second.record.identity().id, "2");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn relationship_modes_add_and_remove_members() {
        let store = store();
        store
            .insert(Box::new(Record::new("tracks").with_id("t1")))
            .unwrap();
        store
            .insert(Box::new(Record::new("tracks").with_id("t2")))
            .unwrap();
        let created = block_on(store.create(&playlist("mix"))).unwrap();
        let id = created.record.identity().id;

        let add = ChangeSet::relationship(
            "playlists",
            id.clone(),
            "tracks",
            RelationshipChange {
                mode: ChangeMode::Add,
                targets: vec![
                    ResolvedIdentity::new("tracks", "t1"),
                    ResolvedIdentity::new("tracks", "t2"),
                ],
            },
        );
        block_on(store.update(&add)).unwrap();

        let remove = ChangeSet::relationship(
            "playlists",
            id.clone(),
            "tracks",
            RelationshipChange {
                mode: ChangeMode::Remove,
                targets: vec![ResolvedIdentity::new("tracks", "t1")],
            },
        );
        let applied = block_on(store.update(&remove)).unwrap();
        let record = applied
            .resource
            .into_any()
            .downcast::<Record>()
            .unwrap();
        let ids: Vec<_> = record
            .related("tracks")
            .iter()
            .map(|r| r.id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["t2"]);
    }

    #[test]
    fn copies_keep_the_stored_type() {
        let store = store();
        store
            .insert(Box::new(Record::new("tracks").with_id("t1")))
            .unwrap();

        let all = store.all("tracks");
        assert_eq!(all.len(), 1);
        let listed = all[0].as_any().downcast_ref::<Record>().unwrap();
        assert_eq!(listed.id.as_deref(), Some("t1"));

        let mut fetched = block_on(store.get("tracks", "t1"))
            .unwrap()
            .into_any()
            .downcast::<Record>()
            .unwrap();
        fetched.attributes.insert("title".into(), AttrValue::from("edited"));
        let again = block_on(store.get("tracks", "t1")).unwrap();
        let again = again.as_any().downcast_ref::<Record>().unwrap();
        assert!(again.attr("title").is_none());
    }

    #[test]
    fn missing_target_is_not_found() {
        let store = store();
        let mut changes = playlist("x");
        changes.relationships.insert(
            "tracks".into(),
            RelationshipChange {
                mode: ChangeMode::Replace,
                targets: vec![ResolvedIdentity::new("tracks", "nope")],
            },
        );
        assert!(matches!(
            block_on(store.create(&changes)),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn undo_reverses_each_kind_of_change() {
        let store = store();
        let created = block_on(store.create(&playlist("a"))).unwrap();
        let id = created.record.identity().id;

        let mut rename = playlist("b");
        rename.id = Some(id.clone());
        let updated = block_on(store.update(&rename)).unwrap();
        block_on(store.undo(updated.record)).unwrap();
        let current = block_on(store.get("playlists", &id)).unwrap();
        let current = current.into_any().downcast::<Record>().unwrap();
        assert_eq!(current.attr("name"), Some(&AttrValue::Text("a".into())));

        let deleted = block_on(store.delete("playlists", &id)).unwrap();
        assert!(store.is_empty());
        block_on(store.undo(deleted)).unwrap();
        assert_eq!(store.len(), 1);

        block_on(store.undo(created.record)).unwrap();
        assert!(store.is_empty());
    }
}
