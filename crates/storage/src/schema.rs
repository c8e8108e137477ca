use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS entities (
    entity_id BLOB PRIMARY KEY CHECK (length(entity_id) = 16),
    entity_type TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (unixepoch())
);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities (entity_type);

CREATE TABLE IF NOT EXISTS fields (
    entity_id BLOB NOT NULL CHECK (length(entity_id) = 16),
    field_key TEXT NOT NULL,
    value BLOB NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (unixepoch()),
    PRIMARY KEY (entity_id, field_key)
);

CREATE TABLE IF NOT EXISTS links (
    source_id BLOB NOT NULL CHECK (length(source_id) = 16),
    relation TEXT NOT NULL,
    target_id BLOB NOT NULL CHECK (length(target_id) = 16),
    created_at INTEGER NOT NULL DEFAULT (unixepoch()),
    PRIMARY KEY (source_id, relation, target_id)
);
CREATE INDEX IF NOT EXISTS idx_links_source ON links (source_id, relation);
CREATE INDEX IF NOT EXISTS idx_links_target ON links (target_id);
";
