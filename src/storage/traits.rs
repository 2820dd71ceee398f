//! Collaborator contracts for kyroid.
//!
//! The resolver never persists canonical entities itself. These traits define
//! what it needs from the outside world:
//! - an entity directory (durable store of canonical entities and rooms)
//! - a relationship service that can re-point edges after a merge

use thiserror::Error;

use crate::entity::{Entity, EntityId, NewEntity};

/// Errors that can occur during directory operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Room not found.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Durable store of canonical entities, organised by room.
///
/// # Safety Considerations
/// - `update_entity` must replace the whole record in a single write
/// - Implementations should handle concurrent access safely
pub trait EntityDirectory: Send + Sync {
    /// Get an entity by ID.
    fn get_entity_by_id(&self, id: EntityId) -> Result<Option<Entity>, StorageError>;

    /// Create a new entity, returning its assigned ID.
    fn create_entity(&self, spec: NewEntity) -> Result<EntityId, StorageError>;

    /// Replace an existing entity. Returns error if not found.
    fn update_entity(&self, entity: Entity) -> Result<(), StorageError>;

    /// List entities participating in a room.
    fn list_entities_for_room(&self, room_id: &str) -> Result<Vec<Entity>, StorageError>;

    /// List rooms the agent participates in.
    fn list_rooms_for_agent(&self) -> Result<Vec<String>, StorageError>;
}

/// Errors from the relationship collaborator.
#[derive(Debug, Error)]
#[error("relationship redirect failed: {0}")]
pub struct RedirectError(pub String);

/// Relationship service able to re-point edges after a merge.
pub trait RelationshipRedirector: Send + Sync {
    /// Redirect every relationship edge touching `from` onto `to`.
    fn redirect(&self, from: &[EntityId], to: EntityId) -> Result<(), RedirectError>;
}

/// Redirector for deployments without a relationship service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRedirector;

impl RelationshipRedirector for NoopRedirector {
    fn redirect(&self, _from: &[EntityId], _to: EntityId) -> Result<(), RedirectError> {
        Ok(())
    }
}
