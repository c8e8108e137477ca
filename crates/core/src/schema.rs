//! Static entity metadata: field lists, key fields, and relationship
//! descriptors. The merge engine never introspects live records; every
//! type it touches is declared here ahead of time.

use std::collections::BTreeMap;

use crate::error::SchemaError;

/// Cardinality of a declared relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneToOne => "one_to_one",
            Self::ManyToOne => "many_to_one",
            Self::OneToMany => "one_to_many",
            Self::ManyToMany => "many_to_many",
        }
    }

    /// Parse a kind string from configuration. Unknown kinds are a
    /// metadata contract defect, not a runtime data problem.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        match s {
            "one_to_one" => Ok(Self::OneToOne),
            "many_to_one" => Ok(Self::ManyToOne),
            "one_to_many" => Ok(Self::OneToMany),
            "many_to_many" => Ok(Self::ManyToMany),
            _ => Err(SchemaError::UnsupportedRelationKind(s.to_string())),
        }
    }

    /// True for kinds holding a single link slot on the declaring side.
    pub fn is_to_one(&self) -> bool {
        matches!(self, Self::OneToOne | Self::ManyToOne)
    }

    /// True for kinds holding a collection on the declaring side.
    pub fn is_to_many(&self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }
}

/// A declared scalar field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    /// Save fails while this field is null.
    pub required: bool,
    /// Holds a reference to another entity. Excluded from scalar
    /// reconciliation; the relationship pass owns reference consistency.
    pub foreign_key: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            foreign_key: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn foreign_key(mut self) -> Self {
        self.foreign_key = true;
        self
    }
}

/// A declared relationship on an entity type.
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    /// Entity type on the other side.
    pub target: String,
    /// Membership is computed through another relationship; never
    /// mutated directly.
    pub derived: bool,
}

impl RelationDef {
    pub fn new(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            derived: false,
        }
    }

    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::OneToOne, target)
    }

    pub fn many_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::ManyToOne, target)
    }

    pub fn one_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::OneToMany, target)
    }

    pub fn many_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::ManyToMany, target)
    }

    pub fn derived(mut self) -> Self {
        self.derived = true;
        self
    }
}

/// One entity type: its key field, scalar fields, and relationships.
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub name: String,
    pub key_field: String,
    pub fields: Vec<FieldDef>,
    pub relations: Vec<RelationDef>,
}

impl EntityDef {
    pub fn scalar_fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Immutable name → definition lookup. Built once via [`SchemaBuilder`],
/// then shared read-only between the store and the merge engine.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    types: BTreeMap<String, EntityDef>,
}

impl SchemaRegistry {
    pub fn entity_def(&self, name: &str) -> Result<&EntityDef, SchemaError> {
        self.types
            .get(name)
            .ok_or_else(|| SchemaError::UnknownEntityType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityDef> {
        self.types.values()
    }
}

/// Builder for a [`SchemaRegistry`]. Declaration order within a type is
/// preserved; cross-type checks run at [`SchemaBuilder::build`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<EntityDef>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start declaring an entity type with the conventional `id` key field.
    pub fn entity(&mut self, name: impl Into<String>) -> EntityBuilder<'_> {
        EntityBuilder {
            builder: self,
            def: EntityDef {
                name: name.into(),
                key_field: "id".to_string(),
                fields: Vec::new(),
                relations: Vec::new(),
            },
        }
    }

    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let mut types: BTreeMap<String, EntityDef> = BTreeMap::new();
        for def in &self.types {
            if types.insert(def.name.clone(), def.clone()).is_some() {
                return Err(SchemaError::DuplicateEntityType(def.name.clone()));
            }
        }
        for def in types.values() {
            for rel in &def.relations {
                if !types.contains_key(&rel.target) {
                    return Err(SchemaError::UnknownRelationTarget {
                        entity_type: def.name.clone(),
                        relation: rel.name.clone(),
                        target: rel.target.clone(),
                    });
                }
            }
        }
        Ok(SchemaRegistry { types })
    }
}

pub struct EntityBuilder<'a> {
    builder: &'a mut SchemaBuilder,
    def: EntityDef,
}

impl EntityBuilder<'_> {
    pub fn key_field(mut self, name: impl Into<String>) -> Self {
        self.def.key_field = name.into();
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.def.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.def.relations.push(relation);
        self
    }

    /// Finish this type. Fails on duplicate field or relation names
    /// within the type.
    pub fn finish(self) -> Result<(), SchemaError> {
        for (i, field) in self.def.fields.iter().enumerate() {
            if self.def.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateField {
                    entity_type: self.def.name.clone(),
                    field: field.name.clone(),
                });
            }
        }
        for (i, rel) in self.def.relations.iter().enumerate() {
            if self.def.relations[..i].iter().any(|r| r.name == rel.name) {
                return Err(SchemaError::DuplicateRelation {
                    entity_type: self.def.name.clone(),
                    relation: rel.name.clone(),
                });
            }
        }
        self.builder.types.push(self.def);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_type_schema() -> SchemaRegistry {
        let mut builder = SchemaBuilder::new();
        builder
            .entity("user")
            .field(FieldDef::new("name"))
            .field(FieldDef::new("legacy_account_id").foreign_key())
            .relation(RelationDef::one_to_many("posts", "post"))
            .finish()
            .unwrap();
        builder
            .entity("post")
            .key_field("post_id")
            .field(FieldDef::new("title").required())
            .relation(RelationDef::many_to_one("author", "user"))
            .finish()
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn lookup_by_name() {
        let schema = two_type_schema();
        assert_eq!(schema.entity_types().count(), 2);

        let user = schema.entity_def("user").unwrap();
        assert_eq!(user.key_field(), "id");
        assert!(user.field("legacy_account_id").unwrap().foreign_key);
        assert_eq!(user.relation("posts").unwrap().kind, RelationKind::OneToMany);

        assert_eq!(schema.entity_def("post").unwrap().key_field(), "post_id");
        assert!(schema.entity_def("ghost").is_err());
    }

    #[test]
    fn kind_strings_round_trip() {
        for kind in [
            RelationKind::OneToOne,
            RelationKind::ManyToOne,
            RelationKind::OneToMany,
            RelationKind::ManyToMany,
        ] {
            assert_eq!(RelationKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(matches!(
            RelationKind::parse("has_and_belongs_to_many"),
            Err(SchemaError::UnsupportedRelationKind(_))
        ));
    }

    #[test]
    fn build_rejects_dangling_relation_target() {
        let mut builder = SchemaBuilder::new();
        builder
            .entity("user")
            .relation(RelationDef::one_to_one("address", "address"))
            .finish()
            .unwrap();
        assert!(matches!(
            builder.build(),
            Err(SchemaError::UnknownRelationTarget { .. })
        ));
    }

    #[test]
    fn finish_rejects_duplicate_field() {
        let mut builder = SchemaBuilder::new();
        let result = builder
            .entity("user")
            .field(FieldDef::new("name"))
            .field(FieldDef::new("name"))
            .finish();
        assert!(matches!(result, Err(SchemaError::DuplicateField { .. })));
    }
}
