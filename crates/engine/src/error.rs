use coalesce_core::{EntityId, SchemaError};
use coalesce_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("cannot merge a {duplicate} into a {survivor}")]
    TypeMismatch { survivor: String, duplicate: String },

    #[error("cannot merge entity {0} into itself")]
    SelfMerge(EntityId),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}
