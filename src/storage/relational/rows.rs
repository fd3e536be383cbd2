//! Row reading and batched reassembly.
//!
//! Headers and property rows are fetched in separate batched queries keyed
//! by `(guid[, classification_name], version)` and grouped back together.
//! A property row whose key has no header row is a data-integrity fault.

use super::connection::map_query_error;
use crate::deadline::Deadline;
use crate::models::{
    Classification, EffectivityWindow, Entity, EntityProxy, FlatProperty, Guid, InstanceHeader,
    InstanceKind, InstanceProperties, InstanceStatus, Relationship, Snapshot, StorageWindow,
    Timestamp,
};
use crate::query::sql::{Alias, Column, SqlFragment, SqlParam, SqlTranslator, Table};
use crate::{Error, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params_from_iter};
use std::collections::{HashMap, HashSet};

/// Keys per batched query.
pub const BATCH_KEYS: usize = 400;

/// Key of one stored version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    /// Instance GUID (classified entity for classifications).
    pub guid: String,
    /// Classification name.
    pub classification: Option<String>,
    /// Version.
    pub version: i64,
}

impl RowKey {
    /// Key of an entity or relationship version.
    #[must_use]
    pub fn instance(guid: impl Into<String>, version: i64) -> Self {
        Self {
            guid: guid.into(),
            classification: None,
            version,
        }
    }

    fn of(header: &InstanceHeader, kind: InstanceKind) -> Self {
        Self {
            guid: header.guid.as_str().to_string(),
            classification: (kind == InstanceKind::Classification)
                .then(|| header.type_name.clone()),
            version: header.version,
        }
    }
}

/// One property row with its owning key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRow {
    /// Owning version.
    pub key: RowKey,
    /// Flattened property.
    pub flat: FlatProperty,
}

/// Which classifications to attach to loaded entities.
#[derive(Debug, Clone, Copy)]
pub enum ClassificationView {
    /// Those visible under the snapshot.
    Snapshot(Snapshot),
    /// Those visible at each entity version's own start time.
    VersionStart,
}

/// Columns identifying a version of `kind` under `alias`.
pub fn key_columns(alias: Alias, kind: InstanceKind) -> String {
    let columns: &[Column] = match kind {
        InstanceKind::Classification => {
            &[Column::Guid, Column::ClassificationName, Column::Version]
        },
        _ => &[Column::Guid, Column::Version],
    };
    columns
        .iter()
        .map(|c| alias.col(*c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Header columns of `kind` plus its kind-specific extras, in read order.
pub fn header_column_list(kind: InstanceKind) -> Vec<Column> {
    let type_column = match kind {
        InstanceKind::Classification => Column::ClassificationName,
        _ => Column::TypeName,
    };
    let mut columns = vec![
        Column::Guid,
        Column::Version,
        Column::TypeGuid,
        type_column,
        Column::Status,
        Column::MetadataCollectionId,
        Column::CreatedBy,
        Column::UpdatedBy,
        Column::CreateTime,
        Column::UpdateTime,
        Column::EffectiveFrom,
        Column::EffectiveTo,
        Column::StartTime,
        Column::EndTime,
    ];
    match kind {
        InstanceKind::Entity => columns.push(Column::IsProxy),
        InstanceKind::Relationship => {
            columns.push(Column::End1Proxy);
            columns.push(Column::End2Proxy);
        },
        InstanceKind::Classification => {},
    }
    columns
}

/// Header columns of `kind` qualified by `alias`.
pub fn header_columns(alias: Alias, kind: InstanceKind) -> String {
    header_column_list(kind)
        .iter()
        .map(|c| alias.col(*c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Column index of the first kind-specific extra.
const EXTRA: usize = 14;

fn conversion_error(index: usize, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, cause.into())
}

fn millis(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<Timestamp>> {
    Ok(row.get::<_, Option<i64>>(index)?.map(Timestamp::from_millis))
}

fn read_header(row: &Row<'_>) -> rusqlite::Result<InstanceHeader> {
    let status: String = row.get(4)?;
    let status = status
        .parse::<InstanceStatus>()
        .map_err(|e| conversion_error(4, e))?;
    Ok(InstanceHeader {
        guid: Guid::new(row.get::<_, String>(0)?),
        version: row.get(1)?,
        type_guid: row.get(2)?,
        type_name: row.get(3)?,
        status,
        metadata_collection_id: row.get(5)?,
        created_by: row.get(6)?,
        updated_by: row.get(7)?,
        create_time: Timestamp::from_millis(row.get(8)?),
        update_time: millis(row, 9)?,
        effective: EffectivityWindow {
            from: millis(row, 10)?,
            to: millis(row, 11)?,
        },
        storage: StorageWindow {
            start: Timestamp::from_millis(row.get(12)?),
            end: millis(row, 13)?,
        },
    })
}

fn read_entity(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        header: read_header(row)?,
        properties: InstanceProperties::new(),
        classifications: Vec::new(),
        is_proxy: row.get(EXTRA)?,
    })
}

fn read_proxy(row: &Row<'_>, index: usize) -> rusqlite::Result<EntityProxy> {
    let text: String = row.get(index)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(index, e))
}

fn read_relationship(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    Ok(Relationship {
        header: read_header(row)?,
        properties: InstanceProperties::new(),
        end1: read_proxy(row, EXTRA)?,
        end2: read_proxy(row, EXTRA + 1)?,
    })
}

fn read_classification(row: &Row<'_>) -> rusqlite::Result<Classification> {
    Ok(Classification {
        header: read_header(row)?,
        properties: InstanceProperties::new(),
    })
}

/// Groups property rows onto their owners, in owner order.
///
/// # Errors
///
/// Returns a description of the first orphaned row group or malformed bag.
pub fn assemble<T>(
    items: Vec<T>,
    key_of: impl Fn(&T) -> RowKey,
    rows: Vec<AttributeRow>,
    mut attach: impl FnMut(&mut T, InstanceProperties),
) -> std::result::Result<Vec<T>, String> {
    let mut grouped: HashMap<RowKey, Vec<FlatProperty>> = HashMap::new();
    for row in rows {
        grouped.entry(row.key).or_default().push(row.flat);
    }

    let mut assembled = Vec::with_capacity(items.len());
    for mut item in items {
        let key = key_of(&item);
        if let Some(flat) = grouped.remove(&key) {
            let properties = InstanceProperties::from_flat(flat)
                .map_err(|e| format!("{} version {}: {e}", key.guid, key.version))?;
            attach(&mut item, properties);
        }
        assembled.push(item);
    }

    if let Some(orphan) = grouped.keys().min_by(|a, b| {
        (&a.guid, &a.classification, a.version).cmp(&(&b.guid, &b.classification, b.version))
    }) {
        return Err(format!(
            "property rows for {} version {} have no header row",
            orphan.guid, orphan.version
        ));
    }
    Ok(assembled)
}

fn key_values(kind: InstanceKind, keys: &[RowKey]) -> (String, Vec<SqlParam>) {
    let tuple = match kind {
        InstanceKind::Classification => "(?, ?, ?)",
        _ => "(?, ?)",
    };
    let mut params = Vec::with_capacity(keys.len() * 3);
    for key in keys {
        params.push(SqlParam::Text(key.guid.clone()));
        if kind == InstanceKind::Classification {
            params.push(SqlParam::Text(key.classification.clone().unwrap_or_default()));
        }
        params.push(SqlParam::Integer(key.version));
    }
    (vec![tuple; keys.len()].join(", "), params)
}

/// Reads and reassembles instances on one locked connection.
pub struct Reader<'c> {
    conn: &'c Connection,
    repository: &'c str,
    deadline: Deadline,
}

impl<'c> Reader<'c> {
    /// Creates a reader; interrupts are reported against `deadline`.
    pub const fn new(conn: &'c Connection, repository: &'c str, deadline: Deadline) -> Self {
        Self {
            conn,
            repository,
            deadline,
        }
    }

    fn fail(&self, operation: &'static str) -> impl Fn(rusqlite::Error) -> Error + '_ {
        map_query_error(operation, self.repository, self.deadline)
    }

    fn integrity(&self, operation: &'static str, cause: &str) -> Error {
        Error::repository(operation, self.repository, format!("data integrity fault: {cause}"))
    }

    /// Runs a key-selecting statement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] or [`Error::Timeout`].
    pub fn keys(
        &self,
        kind: InstanceKind,
        statement: &SqlFragment,
        operation: &'static str,
    ) -> Result<Vec<RowKey>> {
        tracing::debug!(operation, sql = %statement.inline(), "Running key query");
        let mut stmt = self.conn.prepare(statement.sql()).map_err(self.fail(operation))?;
        let rows = stmt
            .query_map(statement.param_refs().as_slice(), |row| {
                Ok(match kind {
                    InstanceKind::Classification => RowKey {
                        guid: row.get(0)?,
                        classification: Some(row.get(1)?),
                        version: row.get(2)?,
                    },
                    _ => RowKey::instance(row.get::<_, String>(0)?, row.get(1)?),
                })
            })
            .map_err(self.fail(operation))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(self.fail(operation))
    }

    fn headers<T>(
        &self,
        kind: InstanceKind,
        keys: &[RowKey],
        parse: fn(&Row<'_>) -> rusqlite::Result<T>,
        key_of: impl Fn(&T) -> RowKey,
    ) -> Result<Vec<T>> {
        let alias = alias_for(kind);
        let mut found: HashMap<RowKey, T> = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(BATCH_KEYS) {
            let (values, params) = key_values(kind, chunk);
            let sql = format!(
                "SELECT {} FROM {} {} WHERE ({}) IN (VALUES {values})",
                header_columns(alias, kind),
                Table::principal(kind).name(),
                alias.name(),
                key_columns(alias, kind),
            );
            let mut stmt = self.conn.prepare(&sql).map_err(self.fail("load_headers"))?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), parse)
                .map_err(self.fail("load_headers"))?;
            for row in rows {
                let item = row.map_err(self.fail("load_headers"))?;
                found.insert(key_of(&item), item);
            }
        }
        Ok(keys.iter().filter_map(|k| found.remove(k)).collect())
    }

    fn attribute_rows(&self, kind: InstanceKind, keys: &[RowKey]) -> Result<Vec<AttributeRow>> {
        let p = Alias::Attribute;
        let classified = kind == InstanceKind::Classification;
        let mut out = Vec::new();
        for chunk in keys.chunks(BATCH_KEYS) {
            let (values, params) = key_values(kind, chunk);
            let sql = format!(
                "SELECT {}, {}, {}, {} FROM {} {} WHERE ({}) IN (VALUES {values})",
                key_columns(p, kind),
                p.col(Column::AttributeName),
                p.col(Column::ValueType),
                p.col(Column::Value),
                Table::attributes(kind).name(),
                p.name(),
                key_columns(p, kind),
            );
            let mut stmt = self.conn.prepare(&sql).map_err(self.fail("load_properties"))?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    let offset = usize::from(classified);
                    Ok(AttributeRow {
                        key: RowKey {
                            guid: row.get(0)?,
                            classification: if classified { Some(row.get(1)?) } else { None },
                            version: row.get(1 + offset)?,
                        },
                        flat: FlatProperty {
                            path: row.get(2 + offset)?,
                            value_type: row.get(3 + offset)?,
                            value: row.get(4 + offset)?,
                        },
                    })
                })
                .map_err(self.fail("load_properties"))?;
            for row in rows {
                out.push(row.map_err(self.fail("load_properties"))?);
            }
        }
        Ok(out)
    }

    /// Loads entity versions in key order with classifications attached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] on failure or integrity faults.
    pub fn entities(&self, keys: &[RowKey], view: ClassificationView) -> Result<Vec<Entity>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let kind = InstanceKind::Entity;
        let headers = self.headers(kind, keys, read_entity, |e| RowKey::of(&e.header, kind))?;
        let rows = self.attribute_rows(kind, keys)?;
        let mut entities = assemble(
            headers,
            |e| RowKey::of(&e.header, kind),
            rows,
            |e, p| e.properties = p,
        )
        .map_err(|e| self.integrity("reassemble_entities", &e))?;

        let guids: Vec<String> = entities
            .iter()
            .filter(|e| !e.is_proxy)
            .map(|e| e.header.guid.as_str().to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let snapshot = match view {
            ClassificationView::Snapshot(snapshot) => Some(snapshot),
            ClassificationView::VersionStart => None,
        };
        let classifications = self.classifications_of(&guids, snapshot)?;
        for entity in &mut entities {
            let start = entity.header.storage.start;
            entity.classifications = classifications
                .iter()
                .filter(|c| c.header.guid == entity.header.guid)
                .filter(|c| snapshot.is_some() || c.header.storage.contains(start))
                .cloned()
                .collect();
        }
        Ok(entities)
    }

    /// Loads relationship versions in key order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] on failure or integrity faults.
    pub fn relationships(&self, keys: &[RowKey]) -> Result<Vec<Relationship>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let kind = InstanceKind::Relationship;
        let headers =
            self.headers(kind, keys, read_relationship, |r| RowKey::of(&r.header, kind))?;
        let rows = self.attribute_rows(kind, keys)?;
        assemble(
            headers,
            |r| RowKey::of(&r.header, kind),
            rows,
            |r, p| r.properties = p,
        )
        .map_err(|e| self.integrity("reassemble_relationships", &e))
    }

    /// Loads classification versions in key order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] on failure or integrity faults.
    pub fn classifications(&self, keys: &[RowKey]) -> Result<Vec<Classification>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let kind = InstanceKind::Classification;
        let headers =
            self.headers(kind, keys, read_classification, |c| RowKey::of(&c.header, kind))?;
        let rows = self.attribute_rows(kind, keys)?;
        assemble(
            headers,
            |c| RowKey::of(&c.header, kind),
            rows,
            |c, p| c.properties = p,
        )
        .map_err(|e| self.integrity("reassemble_classifications", &e))
    }

    /// Classification versions of the given entities, optionally restricted
    /// to those visible under a snapshot, ordered by name then start time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] on failure.
    pub fn classifications_of(
        &self,
        guids: &[String],
        snapshot: Option<Snapshot>,
    ) -> Result<Vec<Classification>> {
        let c = Alias::Classification;
        let kind = InstanceKind::Classification;
        let mut keys = Vec::new();
        for chunk in guids.chunks(BATCH_KEYS) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut statement = SqlFragment::new(
                format!(
                    "SELECT {} FROM {} {} WHERE {} IN ({placeholders})",
                    key_columns(c, kind),
                    Table::Classification.name(),
                    c.name(),
                    c.col(Column::Guid),
                ),
                chunk.iter().cloned().map(SqlParam::Text).collect(),
            );
            if let Some(snapshot) = snapshot {
                statement = statement.then(SqlFragment::new(
                    format!("AND {}", SqlTranslator::visibility(c, snapshot).sql()),
                    SqlTranslator::visibility(c, snapshot).params().to_vec(),
                ));
            }
            statement = statement.then(SqlFragment::new(
                format!(
                    "ORDER BY {}, {}",
                    c.col(Column::ClassificationName),
                    c.col(Column::StartTime)
                ),
                Vec::new(),
            ));
            keys.extend(self.keys(kind, &statement, "load_classifications")?);
        }
        self.classifications(&keys)
    }
}

/// Alias used for each principal table in loader queries.
pub const fn alias_for(kind: InstanceKind) -> Alias {
    match kind {
        InstanceKind::Classification => Alias::Classification,
        _ => Alias::Instance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(path: &str, value_type: &str, value: Option<&str>) -> FlatProperty {
        FlatProperty {
            path: path.to_string(),
            value_type: value_type.to_string(),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_assemble_groups_rows_by_key() {
        let items = vec![RowKey::instance("a", 1), RowKey::instance("b", 2)];
        let rows = vec![
            AttributeRow {
                key: RowKey::instance("b", 2),
                flat: flat("name", "string", Some("Bee")),
            },
            AttributeRow {
                key: RowKey::instance("a", 1),
                flat: flat("name", "string", Some("Ay")),
            },
        ];
        let mut seen = Vec::new();
        let out = assemble(items, Clone::clone, rows, |k, p| {
            seen.push((k.guid.clone(), p.get("name").and_then(|v| v.as_str()).map(str::to_string)));
        })
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), Some("Ay".to_string())),
                ("b".to_string(), Some("Bee".to_string()))
            ]
        );
    }

    #[test]
    fn test_assemble_reports_orphans() {
        let rows = vec![AttributeRow {
            key: RowKey::instance("ghost", 3),
            flat: flat("name", "string", Some("x")),
        }];
        let err = assemble(vec![RowKey::instance("a", 1)], Clone::clone, rows, |_, _| {})
            .unwrap_err();
        assert!(err.contains("ghost version 3"));
    }

    #[test]
    fn test_assemble_reports_malformed_bags() {
        let rows = vec![AttributeRow {
            key: RowKey::instance("a", 1),
            flat: flat("address.city", "string", Some("Oslo")),
        }];
        assert!(assemble(vec![RowKey::instance("a", 1)], Clone::clone, rows, |_, _| {}).is_err());
    }

    #[test]
    fn test_column_lists() {
        assert_eq!(key_columns(Alias::Classification, InstanceKind::Classification), "c.guid, c.classification_name, c.version");
        assert!(header_columns(Alias::Instance, InstanceKind::Relationship).ends_with("i.end1_proxy, i.end2_proxy"));
        assert!(header_columns(Alias::Instance, InstanceKind::Entity).ends_with("i.end_time, i.is_proxy"));
    }
}
