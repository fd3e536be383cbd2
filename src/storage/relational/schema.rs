//! Five-table relational schema plus the control table.
//!
//! Each principal table holds one row per version. A partial unique index
//! on the key columns `WHERE end_time IS NULL` enforces at most one current
//! version per chain. Property rows cascade with their version.

use crate::models::Timestamp;
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};

/// Schema version written to the control table.
pub const SCHEMA_VERSION: i64 = 1;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS control (
    repository_name TEXT NOT NULL,
    metadata_collection_id TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS entity (
    guid TEXT NOT NULL,
    version INTEGER NOT NULL,
    type_guid TEXT NOT NULL,
    type_name TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata_collection_id TEXT NOT NULL,
    created_by TEXT NOT NULL,
    updated_by TEXT,
    create_time INTEGER NOT NULL,
    update_time INTEGER,
    effective_from INTEGER,
    effective_to INTEGER,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    is_proxy INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (guid, version)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entity_current ON entity(guid) WHERE end_time IS NULL;
CREATE INDEX IF NOT EXISTS idx_entity_type ON entity(type_name, status);
CREATE INDEX IF NOT EXISTS idx_entity_start ON entity(guid, start_time);

CREATE TABLE IF NOT EXISTS entity_attribute_value (
    guid TEXT NOT NULL,
    version INTEGER NOT NULL,
    attribute_name TEXT NOT NULL,
    value_type TEXT NOT NULL,
    value TEXT,
    PRIMARY KEY (guid, version, attribute_name),
    FOREIGN KEY (guid, version) REFERENCES entity(guid, version) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_entity_attribute ON entity_attribute_value(attribute_name, value);

CREATE TABLE IF NOT EXISTS relationship (
    guid TEXT NOT NULL,
    version INTEGER NOT NULL,
    type_guid TEXT NOT NULL,
    type_name TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata_collection_id TEXT NOT NULL,
    created_by TEXT NOT NULL,
    updated_by TEXT,
    create_time INTEGER NOT NULL,
    update_time INTEGER,
    effective_from INTEGER,
    effective_to INTEGER,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    end1_guid TEXT NOT NULL,
    end2_guid TEXT NOT NULL,
    end1_proxy TEXT NOT NULL,
    end2_proxy TEXT NOT NULL,
    PRIMARY KEY (guid, version)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_relationship_current ON relationship(guid) WHERE end_time IS NULL;
CREATE INDEX IF NOT EXISTS idx_relationship_end1 ON relationship(end1_guid);
CREATE INDEX IF NOT EXISTS idx_relationship_end2 ON relationship(end2_guid);

CREATE TABLE IF NOT EXISTS relationship_attribute_value (
    guid TEXT NOT NULL,
    version INTEGER NOT NULL,
    attribute_name TEXT NOT NULL,
    value_type TEXT NOT NULL,
    value TEXT,
    PRIMARY KEY (guid, version, attribute_name),
    FOREIGN KEY (guid, version) REFERENCES relationship(guid, version) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS classification (
    guid TEXT NOT NULL,
    classification_name TEXT NOT NULL,
    version INTEGER NOT NULL,
    type_guid TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata_collection_id TEXT NOT NULL,
    created_by TEXT NOT NULL,
    updated_by TEXT,
    create_time INTEGER NOT NULL,
    update_time INTEGER,
    effective_from INTEGER,
    effective_to INTEGER,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    PRIMARY KEY (guid, classification_name, version)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_classification_current
    ON classification(guid, classification_name) WHERE end_time IS NULL;

CREATE TABLE IF NOT EXISTS classification_attribute_value (
    guid TEXT NOT NULL,
    classification_name TEXT NOT NULL,
    version INTEGER NOT NULL,
    attribute_name TEXT NOT NULL,
    value_type TEXT NOT NULL,
    value TEXT,
    PRIMARY KEY (guid, classification_name, version, attribute_name),
    FOREIGN KEY (guid, classification_name, version)
        REFERENCES classification(guid, classification_name, version) ON DELETE CASCADE
);
";

/// Repository identity stored in the control table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRow {
    /// Repository name.
    pub repository_name: String,
    /// Owning metadata collection.
    pub metadata_collection_id: String,
    /// Schema version.
    pub schema_version: i64,
    /// When the database was initialised.
    pub created_at: Timestamp,
}

/// Creates missing tables and returns the control row, writing it on first use.
///
/// An existing control row wins over the requested identity so that a
/// database keeps the metadata collection it was created with.
///
/// # Errors
///
/// Returns [`Error::Repository`] if the DDL fails, or [`Error::InvalidParameter`]
/// if the stored schema version is newer than this crate understands.
pub fn initialize(
    conn: &Connection,
    repository_name: &str,
    metadata_collection_id: &str,
) -> Result<ControlRow> {
    let fail = |e: rusqlite::Error| Error::repository("initialize_schema", repository_name, e);
    conn.execute_batch(DDL).map_err(fail)?;

    let existing = conn
        .query_row(
            "SELECT repository_name, metadata_collection_id, schema_version, created_at
             FROM control LIMIT 1",
            [],
            |row| {
                Ok(ControlRow {
                    repository_name: row.get(0)?,
                    metadata_collection_id: row.get(1)?,
                    schema_version: row.get(2)?,
                    created_at: Timestamp::from_millis(row.get(3)?),
                })
            },
        )
        .optional()
        .map_err(fail)?;

    if let Some(control) = existing {
        if control.schema_version > SCHEMA_VERSION {
            return Err(Error::InvalidParameter(format!(
                "database schema version {} is newer than supported version {SCHEMA_VERSION}",
                control.schema_version
            )));
        }
        if control.metadata_collection_id != metadata_collection_id {
            tracing::debug!(
                stored = %control.metadata_collection_id,
                requested = metadata_collection_id,
                "Keeping stored metadata collection id"
            );
        }
        return Ok(control);
    }

    let control = ControlRow {
        repository_name: repository_name.to_string(),
        metadata_collection_id: metadata_collection_id.to_string(),
        schema_version: SCHEMA_VERSION,
        created_at: Timestamp::now(),
    };
    conn.execute(
        "INSERT INTO control (repository_name, metadata_collection_id, schema_version, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            control.repository_name,
            control.metadata_collection_id,
            control.schema_version,
            control.created_at.as_millis()
        ],
    )
    .map_err(fail)?;
    Ok(control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent_and_keeps_identity() {
        let conn = Connection::open_in_memory().unwrap();
        let first = initialize(&conn, "repo", "mc-1").unwrap();
        let second = initialize(&conn, "repo", "mc-2").unwrap();
        assert_eq!(first, second);
        assert_eq!(second.metadata_collection_id, "mc-1");
    }

    #[test]
    fn test_single_current_version_is_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn, "repo", "mc").unwrap();
        let insert = "INSERT INTO entity (guid, version, type_guid, type_name, status,
            metadata_collection_id, created_by, create_time, start_time)
            VALUES ('g', ?1, 't', 'T', 'ACTIVE', 'mc', 'u', 0, ?1)";
        conn.execute(insert, [1]).unwrap();
        assert!(conn.execute(insert, [2]).is_err());
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn, "repo", "mc").unwrap();
        conn.execute("UPDATE control SET schema_version = 99", []).unwrap();
        assert!(matches!(
            initialize(&conn, "repo", "mc"),
            Err(Error::InvalidParameter(_))
        ));
    }
}
