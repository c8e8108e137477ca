use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("duplicate entity type: {0}")]
    DuplicateEntityType(String),

    #[error("duplicate field {field} on entity type {entity_type}")]
    DuplicateField { entity_type: String, field: String },

    #[error("duplicate relation {relation} on entity type {entity_type}")]
    DuplicateRelation {
        entity_type: String,
        relation: String,
    },

    #[error("relation {relation} on {entity_type} targets unknown entity type {target}")]
    UnknownRelationTarget {
        entity_type: String,
        relation: String,
        target: String,
    },

    #[error("unsupported relation kind: {0}")]
    UnsupportedRelationKind(String),
}
