pub mod entity;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod schema;

pub use entity::Entity;
pub use error::SchemaError;
pub use field_value::FieldValue;
pub use ids::EntityId;
pub use schema::{EntityDef, FieldDef, RelationDef, RelationKind, SchemaBuilder, SchemaRegistry};
