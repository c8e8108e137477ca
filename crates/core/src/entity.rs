//! In-memory view of a persisted entity.

use std::collections::BTreeMap;

use crate::field_value::FieldValue;
use crate::ids::EntityId;

/// A loaded entity instance: its declared type, scalar fields, and the
/// to-one link slots. To-many memberships are not materialized here;
/// they are read from the store on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Identifying key.
    pub id: EntityId,
    /// Declared type name (registry key).
    pub entity_type: String,
    /// Scalar field values. Absent keys read as null.
    pub fields: BTreeMap<String, FieldValue>,
    /// To-one link slots by relation name. `None` means unset.
    pub links: BTreeMap<String, Option<EntityId>>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self::with_id(EntityId::new(), entity_type)
    }

    pub fn with_id(id: EntityId, entity_type: impl Into<String>) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    /// Get a field value by name. Missing fields are null.
    pub fn field(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&FieldValue::Null)
    }

    /// Set a field value.
    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Get a to-one link slot. Missing slots are unset.
    pub fn link(&self, relation: &str) -> Option<EntityId> {
        self.links.get(relation).copied().flatten()
    }

    /// Set a to-one link slot.
    pub fn set_link(&mut self, relation: impl Into<String>, target: Option<EntityId>) {
        self.links.insert(relation.into(), target);
    }

    /// Builder-style field assignment for fixtures and inserts.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn with_link(mut self, relation: impl Into<String>, target: Option<EntityId>) -> Self {
        self.set_link(relation, target);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_reads_as_null() {
        let entity = Entity::new("user");
        assert!(entity.field("name").is_null());
    }

    #[test]
    fn link_slot_distinguishes_unset_from_none() {
        let mut entity = Entity::new("subscription");
        assert_eq!(entity.link("user"), None);
        assert!(!entity.links.contains_key("user"));

        entity.set_link("user", None);
        assert_eq!(entity.link("user"), None);
        assert!(entity.links.contains_key("user"));
    }

    #[test]
    fn with_field_chains() {
        let entity = Entity::new("user")
            .with_field("name", FieldValue::Text("Alice".into()))
            .with_field("age", FieldValue::Integer(30));
        assert_eq!(entity.field("name").as_text(), Some("Alice"));
        assert_eq!(entity.field("age").as_integer(), Some(30));
    }
}
