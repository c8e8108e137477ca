use std::sync::Arc;

use rusqlite::Connection;
use tracing::debug;

use coalesce_core::{Entity, EntityId, FieldValue, SchemaRegistry};

use crate::error::StorageError;
use crate::traits::{EntityRecord, Store};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

pub struct SqliteStore {
    conn: Connection,
    registry: Arc<SchemaRegistry>,
}

impl SqliteStore {
    pub fn open(path: &str, registry: Arc<SchemaRegistry>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn, registry })
    }

    pub fn open_in_memory(registry: Arc<SchemaRegistry>) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn, registry })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn exec_batch(&self, sql: &str) -> Result<(), StorageError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Check an entity against its declared schema before any write.
    fn validate(&self, entity: &Entity) -> Result<(), StorageError> {
        let def = self.registry.entity_def(&entity.entity_type)?;

        for key in entity.fields.keys() {
            if def.field(key).is_none() {
                return Err(StorageError::Validation(format!(
                    "undeclared field {key} on entity type {}",
                    def.name
                )));
            }
        }
        for field in def.scalar_fields() {
            if field.required && entity.field(&field.name).is_null() {
                return Err(StorageError::Validation(format!(
                    "required field {} on entity type {} is null",
                    field.name, def.name
                )));
            }
        }
        for relation in entity.links.keys() {
            match def.relation(relation) {
                None => {
                    return Err(StorageError::Validation(format!(
                        "undeclared relation {relation} on entity type {}",
                        def.name
                    )));
                }
                Some(rel) if rel.kind.is_to_many() => {
                    return Err(StorageError::Validation(format!(
                        "relation {relation} on entity type {} is not to-one",
                        def.name
                    )));
                }
                Some(rel) if rel.derived => {
                    return Err(StorageError::Validation(format!(
                        "relation {relation} on entity type {} is derived",
                        def.name
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Upsert fields and replace to-one link slots for an entity that
    /// already has a row.
    fn write_state(&mut self, entity: &Entity) -> Result<(), StorageError> {
        for (key, value) in &entity.fields {
            let value_bytes = value
                .to_msgpack()
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            self.conn.execute(
                "INSERT INTO fields (entity_id, field_key, value, updated_at) VALUES (?1, ?2, ?3, unixepoch())
                 ON CONFLICT(entity_id, field_key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![entity.id.as_bytes().as_slice(), key, value_bytes],
            )?;
        }
        for (relation, target) in &entity.links {
            self.replace_link(entity.id, relation, *target)?;
        }
        Ok(())
    }

    fn replace_link(
        &mut self,
        entity_id: EntityId,
        relation: &str,
        target: Option<EntityId>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM links WHERE source_id = ?1 AND relation = ?2",
            rusqlite::params![entity_id.as_bytes().as_slice(), relation],
        )?;
        if let Some(target) = target {
            self.conn.execute(
                "INSERT INTO links (source_id, relation, target_id) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    entity_id.as_bytes().as_slice(),
                    relation,
                    target.as_bytes().as_slice(),
                ],
            )?;
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn insert(&mut self, entity: &Entity) -> Result<(), StorageError> {
        self.validate(entity)?;

        let result = self.conn.execute(
            "INSERT INTO entities (entity_id, entity_type) VALUES (?1, ?2)",
            rusqlite::params![entity.id.as_bytes().as_slice(), entity.entity_type],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StorageError::Validation(format!(
                    "entity {} already exists",
                    entity.id
                )));
            }
            Err(e) => return Err(StorageError::Sqlite(e)),
        }

        self.write_state(entity)?;
        debug!(entity_id = %entity.id, entity_type = %entity.entity_type, "inserted entity");
        Ok(())
    }

    fn get_entity(&self, entity_id: EntityId) -> Result<Option<EntityRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT entity_id, entity_type, created_at FROM entities WHERE entity_id = ?1")?;
        let mut rows = stmt.query_map(
            rusqlite::params![entity_id.as_bytes().as_slice()],
            |row| {
                let eid_bytes: Vec<u8> = row.get(0)?;
                let entity_type: String = row.get(1)?;
                let created_at: i64 = row.get(2)?;
                Ok((eid_bytes, entity_type, created_at))
            },
        )?;

        match rows.next() {
            Some(Ok((eid_bytes, entity_type, created_at))) => Ok(Some(EntityRecord {
                entity_id: EntityId::from_bytes(to_array::<16>(eid_bytes, "entity_id")?),
                entity_type,
                created_at,
            })),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn load(&self, entity_id: EntityId) -> Result<Option<Entity>, StorageError> {
        let record = match self.get_entity(entity_id)? {
            Some(record) => record,
            None => return Ok(None),
        };

        let mut entity = Entity::with_id(record.entity_id, record.entity_type);
        for (key, value) in self.get_fields(entity_id)? {
            entity.set_field(key, value);
        }

        // Only direct to-one slots materialize on the entity; to-many
        // memberships stay in storage and derived views are never loaded.
        let def = self.registry.entity_def(&entity.entity_type)?;
        for rel in def.relations() {
            if rel.kind.is_to_one() && !rel.derived {
                entity.set_link(rel.name.clone(), self.get_link(entity_id, &rel.name)?);
            }
        }
        Ok(Some(entity))
    }

    fn get_field(
        &self,
        entity_id: EntityId,
        field_key: &str,
    ) -> Result<Option<FieldValue>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM fields WHERE entity_id = ?1 AND field_key = ?2")?;
        let mut rows = stmt.query_map(
            rusqlite::params![entity_id.as_bytes().as_slice(), field_key],
            |row| row.get::<_, Vec<u8>>(0),
        )?;

        match rows.next() {
            Some(Ok(val_bytes)) => {
                let value = FieldValue::from_msgpack(&val_bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn get_fields(&self, entity_id: EntityId) -> Result<Vec<(String, FieldValue)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT field_key, value FROM fields WHERE entity_id = ?1 ORDER BY field_key",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![entity_id.as_bytes().as_slice()],
            |row| {
                let key: String = row.get(0)?;
                let val_bytes: Vec<u8> = row.get(1)?;
                Ok((key, val_bytes))
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            let (key, val_bytes) = row?;
            let value = FieldValue::from_msgpack(&val_bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            result.push((key, value));
        }
        Ok(result)
    }

    fn get_link(
        &self,
        entity_id: EntityId,
        relation: &str,
    ) -> Result<Option<EntityId>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id FROM links WHERE source_id = ?1 AND relation = ?2 LIMIT 1",
        )?;
        let mut rows = stmt.query_map(
            rusqlite::params![entity_id.as_bytes().as_slice(), relation],
            |row| row.get::<_, Vec<u8>>(0),
        )?;

        match rows.next() {
            Some(Ok(target_bytes)) => Ok(Some(EntityId::from_bytes(to_array::<16>(
                target_bytes,
                "target_id",
            )?))),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn set_link(
        &mut self,
        entity_id: EntityId,
        relation: &str,
        target: Option<EntityId>,
    ) -> Result<(), StorageError> {
        self.replace_link(entity_id, relation, target)
    }

    fn get_linked(
        &self,
        entity_id: EntityId,
        relation: &str,
    ) -> Result<Vec<EntityId>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id FROM links WHERE source_id = ?1 AND relation = ?2 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![entity_id.as_bytes().as_slice(), relation],
            |row| row.get::<_, Vec<u8>>(0),
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(EntityId::from_bytes(to_array::<16>(row?, "target_id")?));
        }
        Ok(result)
    }

    fn add_link(
        &mut self,
        entity_id: EntityId,
        relation: &str,
        target: EntityId,
    ) -> Result<(), StorageError> {
        // INSERT OR IGNORE over the (source, relation, target) key is
        // the idempotent-add contract.
        self.conn.execute(
            "INSERT OR IGNORE INTO links (source_id, relation, target_id) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                entity_id.as_bytes().as_slice(),
                relation,
                target.as_bytes().as_slice(),
            ],
        )?;
        Ok(())
    }

    fn save(&mut self, entity: &Entity) -> Result<(), StorageError> {
        self.validate(entity)?;
        match self.get_entity(entity.id)? {
            Some(record) if record.entity_type == entity.entity_type => {}
            Some(record) => {
                return Err(StorageError::Validation(format!(
                    "entity {} is a {}, not a {}",
                    entity.id, record.entity_type, entity.entity_type
                )));
            }
            None => return Err(StorageError::NotFound(entity.id.to_string())),
        }

        self.write_state(entity)?;
        debug!(entity_id = %entity.id, entity_type = %entity.entity_type, "saved entity");
        Ok(())
    }

    fn delete(&mut self, entity_id: EntityId) -> Result<(), StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM entities WHERE entity_id = ?1",
            rusqlite::params![entity_id.as_bytes().as_slice()],
        )?;
        if removed == 0 {
            return Err(StorageError::Delete(format!(
                "entity {entity_id} does not exist"
            )));
        }
        self.conn.execute(
            "DELETE FROM fields WHERE entity_id = ?1",
            rusqlite::params![entity_id.as_bytes().as_slice()],
        )?;
        // Cascade: every link row naming this entity goes with it, on
        // either side. Inbound to-one slots read as unset afterwards.
        self.conn.execute(
            "DELETE FROM links WHERE source_id = ?1 OR target_id = ?1",
            rusqlite::params![entity_id.as_bytes().as_slice()],
        )?;
        debug!(entity_id = %entity_id, "deleted entity");
        Ok(())
    }

    fn in_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.exec_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => {
                self.exec_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.exec_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coalesce_core::{FieldDef, RelationDef, SchemaBuilder};

    fn library_schema() -> Arc<SchemaRegistry> {
        let mut builder = SchemaBuilder::new();
        builder
            .entity("book")
            .field(FieldDef::new("title").required())
            .field(FieldDef::new("year"))
            .relation(RelationDef::many_to_one("shelf", "shelf"))
            .relation(RelationDef::many_to_many("tags", "tag"))
            .finish()
            .unwrap();
        builder.entity("shelf").finish().unwrap();
        builder.entity("tag").finish().unwrap();
        Arc::new(builder.build().unwrap())
    }

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(library_schema()).unwrap()
    }

    #[test]
    fn insert_then_load_round_trips() {
        let mut store = store();
        let shelf = Entity::new("shelf");
        store.insert(&shelf).unwrap();

        let book = Entity::new("book")
            .with_field("title", FieldValue::Text("Dune".into()))
            .with_field("year", FieldValue::Integer(1965))
            .with_link("shelf", Some(shelf.id));
        store.insert(&book).unwrap();

        let loaded = store.load(book.id).unwrap().unwrap();
        assert_eq!(loaded.entity_type, "book");
        assert_eq!(loaded.field("title").as_text(), Some("Dune"));
        assert_eq!(loaded.field("year").as_integer(), Some(1965));
        assert_eq!(loaded.link("shelf"), Some(shelf.id));
    }

    #[test]
    fn load_missing_entity_is_none() {
        let store = store();
        assert!(store.load(EntityId::new()).unwrap().is_none());
    }

    #[test]
    fn add_link_is_idempotent_and_ordered() {
        let mut store = store();
        let book = Entity::new("book").with_field("title", FieldValue::Text("Dune".into()));
        let tag_a = Entity::new("tag");
        let tag_b = Entity::new("tag");
        store.insert(&book).unwrap();
        store.insert(&tag_a).unwrap();
        store.insert(&tag_b).unwrap();

        store.add_link(book.id, "tags", tag_a.id).unwrap();
        store.add_link(book.id, "tags", tag_b.id).unwrap();
        store.add_link(book.id, "tags", tag_a.id).unwrap();

        assert_eq!(
            store.get_linked(book.id, "tags").unwrap(),
            vec![tag_a.id, tag_b.id]
        );
    }

    #[test]
    fn set_link_replaces_existing_slot() {
        let mut store = store();
        let book = Entity::new("book").with_field("title", FieldValue::Text("Dune".into()));
        let shelf_a = Entity::new("shelf");
        let shelf_b = Entity::new("shelf");
        store.insert(&book).unwrap();
        store.insert(&shelf_a).unwrap();
        store.insert(&shelf_b).unwrap();

        store.set_link(book.id, "shelf", Some(shelf_a.id)).unwrap();
        store.set_link(book.id, "shelf", Some(shelf_b.id)).unwrap();
        assert_eq!(store.get_link(book.id, "shelf").unwrap(), Some(shelf_b.id));

        store.set_link(book.id, "shelf", None).unwrap();
        assert_eq!(store.get_link(book.id, "shelf").unwrap(), None);
    }

    #[test]
    fn save_rejects_missing_required_field() {
        let mut store = store();
        let book = Entity::new("book").with_field("title", FieldValue::Text("Dune".into()));
        store.insert(&book).unwrap();

        let mut broken = book.clone();
        broken.set_field("title", FieldValue::Null);
        assert!(matches!(
            store.save(&broken),
            Err(StorageError::Validation(_))
        ));
    }

    #[test]
    fn save_rejects_undeclared_field() {
        let mut store = store();
        let book = Entity::new("book").with_field("title", FieldValue::Text("Dune".into()));
        store.insert(&book).unwrap();

        let broken = book.with_field("isbn", FieldValue::Text("none".into()));
        assert!(matches!(
            store.save(&broken),
            Err(StorageError::Validation(_))
        ));
    }

    #[test]
    fn delete_removes_fields_and_both_link_sides() {
        let mut store = store();
        let book = Entity::new("book").with_field("title", FieldValue::Text("Dune".into()));
        let shelf = Entity::new("shelf");
        let tag = Entity::new("tag");
        store.insert(&book).unwrap();
        store.insert(&shelf).unwrap();
        store.insert(&tag).unwrap();
        store.set_link(book.id, "shelf", Some(shelf.id)).unwrap();
        store.add_link(book.id, "tags", tag.id).unwrap();

        store.delete(shelf.id).unwrap();
        // Inbound side cascades: book's slot reads as unset.
        assert_eq!(store.get_link(book.id, "shelf").unwrap(), None);

        store.delete(book.id).unwrap();
        assert!(store.get_entity(book.id).unwrap().is_none());
        assert!(store.get_fields(book.id).unwrap().is_empty());
        assert!(store.get_linked(book.id, "tags").unwrap().is_empty());

        assert!(matches!(
            store.delete(book.id),
            Err(StorageError::Delete(_))
        ));
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let mut store = store();
        let book = Entity::new("book").with_field("title", FieldValue::Text("Dune".into()));
        store.insert(&book).unwrap();

        let result: Result<(), StorageError> = store.in_transaction(|store| {
            store.set_field_for_test(book.id)?;
            Err(StorageError::Validation("forced".into()))
        });
        assert!(result.is_err());
        assert_eq!(
            store.get_field(book.id, "year").unwrap(),
            None,
            "write inside failed transaction must not persist"
        );
    }

    impl SqliteStore {
        fn set_field_for_test(&mut self, entity_id: EntityId) -> Result<(), StorageError> {
            let value_bytes = FieldValue::Integer(1965).to_msgpack().unwrap();
            self.conn.execute(
                "INSERT INTO fields (entity_id, field_key, value) VALUES (?1, 'year', ?2)",
                rusqlite::params![entity_id.as_bytes().as_slice(), value_bytes],
            )?;
            Ok(())
        }
    }

    #[test]
    fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coalesce.db");
        let mut store =
            SqliteStore::open(path.to_str().unwrap(), library_schema()).unwrap();
        let shelf = Entity::new("shelf");
        store.insert(&shelf).unwrap();
        drop(store);

        let store = SqliteStore::open(path.to_str().unwrap(), library_schema()).unwrap();
        assert!(store.get_entity(shelf.id).unwrap().is_some());
    }
}
