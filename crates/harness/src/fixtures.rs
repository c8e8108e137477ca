//! Shared fixtures for the integration suites: a CRM-flavoured schema
//! and an engine over an in-memory store.

use std::sync::Arc;

use coalesce_core::{
    Entity, EntityId, FieldDef, FieldValue, RelationDef, SchemaBuilder, SchemaRegistry,
};
use coalesce_engine::MergeEngine;
use coalesce_storage::{SqliteStore, Store, StorageError};

/// Five entity types covering every relationship kind:
///
/// - `user` — one_to_one address, one_to_many subscriptions,
///   many_to_many roles, plus a foreign-key-shaped scalar field;
/// - `address` — one_to_one back to user;
/// - `subscription` — many_to_one user and service;
/// - `service` — one_to_many subscriptions, and a derived many_to_many
///   `users` computed through them;
/// - `role` — many_to_many users.
pub fn crm_schema() -> SchemaRegistry {
    let mut builder = SchemaBuilder::new();
    builder
        .entity("user")
        .field(FieldDef::new("name"))
        .field(FieldDef::new("email"))
        .field(FieldDef::new("legacy_crm_ref").foreign_key())
        .relation(RelationDef::one_to_one("address", "address"))
        .relation(RelationDef::one_to_many("subscriptions", "subscription"))
        .relation(RelationDef::many_to_many("roles", "role"))
        .finish()
        .expect("user type");
    builder
        .entity("address")
        .field(FieldDef::new("street"))
        .field(FieldDef::new("city"))
        .relation(RelationDef::one_to_one("resident", "user"))
        .finish()
        .expect("address type");
    builder
        .entity("subscription")
        .field(FieldDef::new("plan"))
        .relation(RelationDef::many_to_one("user", "user"))
        .relation(RelationDef::many_to_one("service", "service"))
        .finish()
        .expect("subscription type");
    builder
        .entity("service")
        .field(FieldDef::new("name"))
        .relation(RelationDef::one_to_many("subscriptions", "subscription"))
        .relation(RelationDef::many_to_many("users", "user").derived())
        .finish()
        .expect("service type");
    builder
        .entity("role")
        .field(FieldDef::new("title"))
        .relation(RelationDef::many_to_many("users", "user"))
        .finish()
        .expect("role type");
    builder.build().expect("crm schema")
}

/// A merge engine over a fresh in-memory store.
pub struct TestBed {
    pub engine: MergeEngine<SqliteStore>,
}

impl TestBed {
    pub fn new() -> Result<Self, StorageError> {
        let registry = Arc::new(crm_schema());
        let store = SqliteStore::open_in_memory(registry.clone())?;
        Ok(Self {
            engine: MergeEngine::new(registry, store),
        })
    }

    /// Insert an entity with the given fields and return its id.
    pub fn create(
        &mut self,
        entity_type: &str,
        fields: Vec<(&str, FieldValue)>,
    ) -> Result<EntityId, StorageError> {
        let mut entity = Entity::new(entity_type);
        for (key, value) in fields {
            entity.set_field(key, value);
        }
        self.engine.store_mut().insert(&entity)?;
        Ok(entity.id)
    }

    pub fn create_user(&mut self, name: Option<&str>) -> Result<EntityId, StorageError> {
        let name = match name {
            Some(n) => FieldValue::Text(n.into()),
            None => FieldValue::Null,
        };
        self.create("user", vec![("name", name)])
    }

    pub fn set_link(
        &mut self,
        source: EntityId,
        relation: &str,
        target: Option<EntityId>,
    ) -> Result<(), StorageError> {
        self.engine.store_mut().set_link(source, relation, target)
    }

    pub fn add_link(
        &mut self,
        source: EntityId,
        relation: &str,
        target: EntityId,
    ) -> Result<(), StorageError> {
        self.engine.store_mut().add_link(source, relation, target)
    }

    pub fn linked(&self, source: EntityId, relation: &str) -> Result<Vec<EntityId>, StorageError> {
        self.engine.store().get_linked(source, relation)
    }

    pub fn field(
        &self,
        entity_id: EntityId,
        key: &str,
    ) -> Result<Option<FieldValue>, StorageError> {
        self.engine.store().get_field(entity_id, key)
    }
}
