//! In-memory entity directory.
//!
//! Thread-safe reference implementation of [`EntityDirectory`]. It is intended
//! for embedded usage and tests; production deployments point the resolver at
//! their own entity store.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::Utc;

use crate::entity::{Entity, EntityId, NewEntity};
use crate::storage::traits::{EntityDirectory, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct DirectoryState {
    by_id: HashMap<EntityId, Entity>,
    rooms: BTreeMap<String, Vec<EntityId>>,
}

impl DirectoryState {
    fn join(&mut self, room_id: &str, id: EntityId) {
        let members = self.rooms.entry(room_id.to_string()).or_default();
        if !members.contains(&id) {
            members.push(id);
        }
    }
}

/// Room-aware in-memory directory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a room with no members.
    pub fn add_room(&self, room_id: impl Into<String>) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("directory"))?;
        state.rooms.entry(room_id.into()).or_default();
        Ok(())
    }

    /// Inserts a fully-formed entity, optionally placing it in a room.
    pub fn insert(&self, entity: Entity, room_id: Option<&str>) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("directory"))?;
        if state.by_id.contains_key(&entity.id) {
            return Err(StorageError::DuplicateKey(entity.id.to_string()));
        }
        let id = entity.id;
        state.by_id.insert(id, entity);
        if let Some(room) = room_id {
            state.join(room, id);
        }
        Ok(())
    }

    /// Adds an existing entity to a room.
    pub fn join_room(&self, room_id: &str, id: EntityId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("directory"))?;
        if !state.by_id.contains_key(&id) {
            return Err(StorageError::EntityNotFound(id));
        }
        state.join(room_id, id);
        Ok(())
    }

    /// Number of stored entities.
    pub fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("directory"))?;
        Ok(state.by_id.len())
    }

    /// Returns true if no entities are stored.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl EntityDirectory for InMemoryDirectory {
    fn get_entity_by_id(&self, id: EntityId) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("directory"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn create_entity(&self, spec: NewEntity) -> Result<EntityId, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("directory"))?;
        let id = EntityId::new();
        let now = Utc::now();
        let entity = Entity {
            id,
            names: spec.names,
            metadata: spec.metadata,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        state.by_id.insert(id, entity);
        if let Some(room) = spec.room_id.as_deref() {
            state.join(room, id);
        }
        Ok(id)
    }

    fn update_entity(&self, entity: Entity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("directory"))?;
        let Some(slot) = state.by_id.get_mut(&entity.id) else {
            return Err(StorageError::EntityNotFound(entity.id));
        };
        *slot = entity;
        Ok(())
    }

    fn list_entities_for_room(&self, room_id: &str) -> Result<Vec<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("directory"))?;
        let Some(members) = state.rooms.get(room_id) else {
            return Err(StorageError::RoomNotFound(room_id.to_string()));
        };
        Ok(members
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect())
    }

    fn list_rooms_for_agent(&self) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("directory"))?;
        Ok(state.rooms.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_update_and_room_listing() {
        let dir = InMemoryDirectory::new();
        let id = dir
            .create_entity(NewEntity {
                names: vec!["Alice".to_string()],
                room_id: Some("general".to_string()),
                ..NewEntity::default()
            })
            .unwrap();

        let mut entity = dir.get_entity_by_id(id).unwrap().unwrap();
        assert_eq!(entity.names, vec!["Alice".to_string()]);

        entity.add_name("Ali");
        dir.update_entity(entity).unwrap();
        let fetched = dir.get_entity_by_id(id).unwrap().unwrap();
        assert_eq!(fetched.names.len(), 2);
        assert_eq!(fetched.version, 2);

        let members = dir.list_entities_for_room("general").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(dir.list_rooms_for_agent().unwrap(), vec!["general".to_string()]);
    }

    #[test]
    fn update_missing_entity_fails() {
        let dir = InMemoryDirectory::new();
        let err = dir.update_entity(Entity::new("ghost")).unwrap_err();
        assert!(matches!(err, StorageError::EntityNotFound(_)));
    }

    #[test]
    fn insert_rejects_duplicates_and_unknown_rooms_error() {
        let dir = InMemoryDirectory::new();
        let entity = Entity::new("Bob");
        dir.insert(entity.clone(), Some("r1")).unwrap();
        assert!(matches!(
            dir.insert(entity, None),
            Err(StorageError::DuplicateKey(_))
        ));
        assert!(matches!(
            dir.list_entities_for_room("nope"),
            Err(StorageError::RoomNotFound(_))
        ));
    }

    #[test]
    fn join_room_is_idempotent() {
        let dir = InMemoryDirectory::new();
        let entity = Entity::new("Carol");
        let id = entity.id;
        dir.insert(entity, None).unwrap();
        dir.join_room("r1", id).unwrap();
        dir.join_room("r1", id).unwrap();
        assert_eq!(dir.list_entities_for_room("r1").unwrap().len(), 1);
        assert!(!dir.is_empty().unwrap());
    }
}
