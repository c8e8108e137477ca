//! Merges two persisted entities of the same declared type into one.
//!
//! The survivor keeps every value it already has; the duplicate only
//! fills gaps. To-many memberships are unioned onto the survivor, then
//! the survivor is saved and the duplicate deleted as one atomic unit.

pub mod error;

pub use error::MergeError;

use std::sync::Arc;

use tracing::{debug, info};

use coalesce_core::{Entity, EntityDef, EntityId, SchemaRegistry};
use coalesce_storage::Store;

/// What a merge changed, for callers and logs.
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Scalar fields filled from the duplicate.
    pub fields_filled: Vec<String>,
    /// To-one slots filled from the duplicate.
    pub links_filled: Vec<String>,
    /// To-many memberships re-pointed at the survivor.
    pub links_added: usize,
}

/// A pending to-many link for the survivor, flushed inside the commit
/// transaction.
struct LinkAdd {
    relation: String,
    target: EntityId,
}

pub struct MergeEngine<S: Store> {
    registry: Arc<SchemaRegistry>,
    store: S,
}

impl<S: Store> MergeEngine<S> {
    pub fn new(registry: Arc<SchemaRegistry>, store: S) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Load a full in-memory view of an entity.
    pub fn load_entity(&self, entity_id: EntityId) -> Result<Entity, MergeError> {
        self.store
            .load(entity_id)?
            .ok_or_else(|| MergeError::EntityNotFound(entity_id.to_string()))
    }

    /// Load both entities by id, merge, and return the reconciled
    /// survivor. The duplicate no longer exists on success.
    pub fn merge_by_id(
        &mut self,
        survivor_id: EntityId,
        duplicate_id: EntityId,
    ) -> Result<(Entity, MergeReport), MergeError> {
        let mut survivor = self.load_entity(survivor_id)?;
        let duplicate = self.load_entity(duplicate_id)?;
        let report = self.merge(&mut survivor, &duplicate)?;
        Ok((survivor, report))
    }

    /// Merge `duplicate` into `survivor`: reconcile scalar fields, then
    /// relationships, then save the survivor and delete the duplicate in
    /// one transaction.
    ///
    /// On an `Err` nothing is durable; storage holds both entities
    /// exactly as before the call. The survivor's in-memory mutations
    /// are not rolled back, so a failed survivor instance must be
    /// reloaded rather than reused.
    pub fn merge(
        &mut self,
        survivor: &mut Entity,
        duplicate: &Entity,
    ) -> Result<MergeReport, MergeError> {
        if survivor.entity_type != duplicate.entity_type {
            return Err(MergeError::TypeMismatch {
                survivor: survivor.entity_type.clone(),
                duplicate: duplicate.entity_type.clone(),
            });
        }
        if survivor.id == duplicate.id {
            return Err(MergeError::SelfMerge(survivor.id));
        }

        let registry = self.registry.clone();
        let def = registry.entity_def(&survivor.entity_type)?;

        let fields_filled = reconcile_scalars(def, survivor, duplicate);
        let (links_filled, link_adds) = self.reconcile_relations(def, survivor, duplicate)?;
        let report = MergeReport {
            fields_filled,
            links_filled,
            links_added: link_adds.len(),
        };

        self.commit(survivor, duplicate.id, &link_adds)?;

        info!(
            survivor = %survivor.id,
            duplicate = %duplicate.id,
            entity_type = %survivor.entity_type,
            fields_filled = report.fields_filled.len(),
            links_filled = report.links_filled.len(),
            links_added = report.links_added,
            "merged entities"
        );
        Ok(report)
    }

    /// Walk the declared relationships and apply the kind-specific
    /// policy. To-one slots are filled in place on the survivor; to-many
    /// memberships become pending adds for the commit transaction.
    fn reconcile_relations(
        &self,
        def: &EntityDef,
        survivor: &mut Entity,
        duplicate: &Entity,
    ) -> Result<(Vec<String>, Vec<LinkAdd>), MergeError> {
        let mut links_filled = Vec::new();
        let mut link_adds = Vec::new();

        for rel in def.relations() {
            // Derived membership follows its underlying relationship;
            // only the underlying one is merged.
            if rel.derived {
                debug!(relation = %rel.name, "skipping derived relation");
                continue;
            }

            use coalesce_core::RelationKind::*;
            match rel.kind {
                OneToOne | ManyToOne => {
                    if survivor.link(&rel.name).is_none() {
                        survivor.set_link(rel.name.clone(), duplicate.link(&rel.name));
                        if duplicate.link(&rel.name).is_some() {
                            links_filled.push(rel.name.clone());
                        }
                    }
                }
                OneToMany | ManyToMany => {
                    // Added, not moved: the duplicate's rows go away with
                    // it, but its members must point at the survivor first.
                    for target in self.store.get_linked(duplicate.id, &rel.name)? {
                        link_adds.push(LinkAdd {
                            relation: rel.name.clone(),
                            target,
                        });
                    }
                }
            }
        }
        Ok((links_filled, link_adds))
    }

    /// Make the reconciled survivor durable and remove the duplicate as
    /// one unit. Save failures and delete failures both roll the whole
    /// transaction back.
    fn commit(
        &mut self,
        survivor: &Entity,
        duplicate_id: EntityId,
        link_adds: &[LinkAdd],
    ) -> Result<(), MergeError> {
        self.store.in_transaction(|store| {
            store.save(survivor)?;
            for add in link_adds {
                store.add_link(survivor.id, &add.relation, add.target)?;
            }
            store.delete(duplicate_id)?;
            Ok(())
        })?;
        Ok(())
    }
}

/// Copy the duplicate's value into the survivor for every declared
/// scalar field whose survivor-side value is null. The key field and
/// foreign-key-shaped fields are structural, not content, and stay put.
fn reconcile_scalars(def: &EntityDef, survivor: &mut Entity, duplicate: &Entity) -> Vec<String> {
    let mut filled = Vec::new();
    for field in def.scalar_fields() {
        if field.name == def.key_field() || field.foreign_key {
            continue;
        }
        if survivor.field(&field.name).is_null() {
            let fallback = duplicate.field(&field.name);
            if !fallback.is_null() {
                survivor.set_field(field.name.clone(), fallback.clone());
                filled.push(field.name.clone());
            }
        }
    }
    filled
}
