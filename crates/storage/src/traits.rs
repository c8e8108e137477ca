use coalesce_core::{Entity, EntityId, FieldValue, SchemaRegistry};

use crate::error::StorageError;

/// Row-level view of an entity, without its fields.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub entity_id: EntityId,
    pub entity_type: String,
    pub created_at: i64,
}

/// The persistence executor the merge engine runs against: entity
/// metadata-validated saves, link primitives, and scoped transactional
/// execution.
pub trait Store {
    /// Schema the executor validates against.
    fn registry(&self) -> &SchemaRegistry;

    /// Insert a new entity row together with its fields and to-one links.
    /// Validates like [`Store::save`].
    fn insert(&mut self, entity: &Entity) -> Result<(), StorageError>;

    fn get_entity(&self, entity_id: EntityId) -> Result<Option<EntityRecord>, StorageError>;

    /// Assemble a full in-memory view: row, fields, and to-one link slots.
    fn load(&self, entity_id: EntityId) -> Result<Option<Entity>, StorageError>;

    fn get_field(
        &self,
        entity_id: EntityId,
        field_key: &str,
    ) -> Result<Option<FieldValue>, StorageError>;

    fn get_fields(&self, entity_id: EntityId) -> Result<Vec<(String, FieldValue)>, StorageError>;

    /// Read a to-one link slot.
    fn get_link(
        &self,
        entity_id: EntityId,
        relation: &str,
    ) -> Result<Option<EntityId>, StorageError>;

    /// Write a to-one link slot, replacing any existing row.
    fn set_link(
        &mut self,
        entity_id: EntityId,
        relation: &str,
        target: Option<EntityId>,
    ) -> Result<(), StorageError>;

    /// Read a to-many membership in insertion order.
    fn get_linked(
        &self,
        entity_id: EntityId,
        relation: &str,
    ) -> Result<Vec<EntityId>, StorageError>;

    /// Add one member to a to-many relation. Adding an existing member
    /// is a no-op, never an error.
    fn add_link(
        &mut self,
        entity_id: EntityId,
        relation: &str,
        target: EntityId,
    ) -> Result<(), StorageError>;

    /// Persist an entity's fields and to-one links. Fails with
    /// [`StorageError::Validation`] when the entity violates its
    /// declared schema; nothing is written on failure paths inside a
    /// transaction.
    fn save(&mut self, entity: &Entity) -> Result<(), StorageError>;

    /// Remove an entity row, its fields, and every link row naming it as
    /// source or target. Fails with [`StorageError::Delete`] when the
    /// row does not exist.
    fn delete(&mut self, entity_id: EntityId) -> Result<(), StorageError>;

    /// Run `f` as one atomic unit: committed when it returns `Ok`,
    /// rolled back when it returns `Err`.
    fn in_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, StorageError>,
    ) -> Result<T, StorageError>
    where
        Self: Sized;
}
