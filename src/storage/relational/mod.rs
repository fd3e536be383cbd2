//! `SQLite` backend over the five-table relational schema.
//!
//! # Concurrency Model
//!
//! Uses a `Mutex<Connection>` for thread-safe access. WAL mode and
//! `busy_timeout` handle contention with other processes; within the process
//! the mutex serialises statements, and every multi-statement write runs in
//! one transaction.
//!
//! # Query Shape
//!
//! Searches run in two phases: a key query built from the translator's
//! fragments selects `(guid, version)` pairs in result order, then the
//! [`rows::Reader`] loads headers and property rows for those keys in batches.

// SQLite integers are i64; counts and batch sizes are small and non-negative.
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]

mod connection;
mod rows;
mod schema;

pub use connection::{acquire_lock, configure_connection};
pub use rows::{AttributeRow, ClassificationView, RowKey, assemble};
pub use schema::{ControlRow, SCHEMA_VERSION};

use super::BackendContext;
use super::traits::{
    DEFAULT_HISTORY_BATCH, HistoryCursor, Hop, HopFilter, PurgeReport, Record, RepositoryBackend,
    VersionKey,
};
use crate::deadline::Deadline;
use crate::models::{
    Classification, Entity, Guid, InstanceHeader, InstanceKind, Relationship, Snapshot, Timestamp,
};
use crate::query::sql::{Alias, Column, SqlFragment, SqlParam, SqlTranslator, Table};
use crate::query::{Conditions, QueryTranslator, SearchRequest};
use crate::{Error, Result};
use connection::{DeadlineGuard, map_query_error};
use rows::{Reader, alias_for, header_column_list, key_columns};
use rusqlite::types::Value;
use rusqlite::{Connection, Transaction, params, params_from_iter};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;

/// `SQLite`-based versioned store.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    context: BackendContext,
    control: ControlRow,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("db_path", &self.db_path)
            .field("repository", &self.context.repository_name)
            .field("metadata_collection_id", &self.control.metadata_collection_id)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Opens (creating if needed) a file-backed store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] if the database cannot be opened or
    /// initialised.
    pub fn open(db_path: impl Into<PathBuf>, context: BackendContext) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::repository("open_sqlite", &context.repository_name, e))?;
        Self::from_connection(conn, Some(db_path), context)
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] if the database cannot be initialised.
    pub fn in_memory(context: BackendContext) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::repository("open_sqlite_memory", &context.repository_name, e))?;
        Self::from_connection(conn, None, context)
    }

    fn from_connection(
        conn: Connection,
        db_path: Option<PathBuf>,
        context: BackendContext,
    ) -> Result<Self> {
        configure_connection(&conn, &context.repository_name, context.guard.size_limit())?;
        let control = schema::initialize(
            &conn,
            &context.repository_name,
            &context.metadata_collection_id,
        )?;
        tracing::info!(
            repository = %context.repository_name,
            metadata_collection_id = %control.metadata_collection_id,
            path = ?db_path,
            "Opened SQLite repository"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            context,
            control,
        })
    }

    /// Returns the database path (`None` for in-memory).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Repository identity stored in the control table.
    #[must_use]
    pub const fn control(&self) -> &ControlRow {
        &self.control
    }

    fn translator(&self, snapshot: Snapshot) -> SqlTranslator<'_> {
        SqlTranslator::new(&self.context.types, self.context.guard, snapshot)
    }

    fn fail(&self, operation: &'static str) -> impl Fn(rusqlite::Error) -> Error + '_ {
        move |e| Error::repository(operation, &self.context.repository_name, e)
    }

    /// Runs `write` in a transaction and commits it.
    fn transaction<T>(
        &self,
        operation: &'static str,
        write: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn.transaction().map_err(self.fail(operation))?;
        let value = write(&tx)?;
        tx.commit().map_err(self.fail(operation))?;
        Ok(value)
    }

    /// Fetches one history batch with `deadline` installed on the connection.
    fn history_batch<T>(
        &self,
        deadline: Deadline,
        operation: &'static str,
        fetch: impl FnOnce(&Reader<'_>) -> Result<Vec<T>>,
    ) -> Result<Vec<T>> {
        deadline.check(operation)?;
        let conn = acquire_lock(&self.conn);
        let _guard = DeadlineGuard::install(&conn, deadline);
        let reader = Reader::new(&conn, &self.context.repository_name, deadline);
        fetch(&reader)
    }

    /// Key query selecting versions of one chain visible under `snapshot`.
    fn point_keys(
        kind: InstanceKind,
        guids: &[Guid],
        classification: Option<&str>,
        snapshot: Snapshot,
    ) -> SqlFragment {
        let a = alias_for(kind);
        let placeholders = vec!["?"; guids.len()].join(", ");
        let mut statement = SqlFragment::new(
            format!(
                "SELECT {} FROM {} {} WHERE {} IN ({placeholders})",
                key_columns(a, kind),
                Table::principal(kind).name(),
                a.name(),
                a.col(Column::Guid)
            ),
            guids
                .iter()
                .map(|g| SqlParam::Text(g.as_str().to_string()))
                .collect(),
        );
        if let Some(name) = classification {
            statement = statement.then(SqlFragment::new(
                format!("AND {} = ?", a.col(Column::ClassificationName)),
                vec![SqlParam::Text(name.to_string())],
            ));
        }
        let visibility = SqlTranslator::visibility(a, snapshot);
        statement.then(SqlFragment::new(
            format!("AND {}", visibility.sql()),
            visibility.params().to_vec(),
        ))
    }

    /// Key query for one keyset batch of a version chain, newest first.
    fn history_keys(
        kind: InstanceKind,
        guid: &str,
        classification: Option<&str>,
        before: Option<Timestamp>,
        limit: usize,
    ) -> SqlFragment {
        let a = alias_for(kind);
        let mut sql = format!(
            "SELECT {} FROM {} {} WHERE {} = ?",
            key_columns(a, kind),
            Table::principal(kind).name(),
            a.name(),
            a.col(Column::Guid)
        );
        let mut params = vec![SqlParam::Text(guid.to_string())];
        if let Some(name) = classification {
            sql.push_str(&format!(" AND {} = ?", a.col(Column::ClassificationName)));
            params.push(SqlParam::Text(name.to_string()));
        }
        if let Some(before) = before {
            sql.push_str(&format!(" AND {} < ?", a.col(Column::StartTime)));
            params.push(SqlParam::Integer(before.as_millis()));
        }
        sql.push_str(&format!(" ORDER BY {} DESC LIMIT ?", a.col(Column::StartTime)));
        params.push(SqlParam::Integer(limit as i64));
        SqlFragment::new(sql, params)
    }

    fn search_statement(
        &self,
        request: &SearchRequest,
        kind: InstanceKind,
    ) -> Result<SqlFragment> {
        let translator = self.translator(request.snapshot);
        let condition = translator.render_request(request, kind)?;
        let order = translator.order_by(&request.order, kind)?;
        Ok(SqlFragment::new(
            format!(
                "SELECT {} FROM {} {} WHERE",
                key_columns(Alias::Instance, kind),
                Table::principal(kind).name(),
                Alias::Instance.name()
            ),
            Vec::new(),
        )
        .then(condition)
        .then(order))
    }

    fn neighbor_statement(
        &self,
        guid: &Guid,
        filter: &HopFilter,
        snapshot: Snapshot,
    ) -> Result<SqlFragment> {
        let (r, e) = (Alias::Edge, Alias::Neighbor);
        let edge = self.translator(snapshot).with_alias(r);
        let neighbor = self.translator(snapshot).with_alias(e);
        let seed = || SqlParam::Text(guid.as_str().to_string());

        let mut conditions = vec![
            SqlFragment::new(
                format!("{} = ? OR {} = ?", r.col(Column::End1Guid), r.col(Column::End2Guid)),
                vec![seed(), seed()],
            ),
            edge.render(Conditions::AsOf(snapshot), InstanceKind::Relationship)?,
            edge.render(Conditions::Types(&filter.relationship_types), InstanceKind::Relationship)?,
            edge.render(Conditions::Status(&filter.status), InstanceKind::Relationship)?,
            neighbor.render(Conditions::AsOf(snapshot), InstanceKind::Entity)?,
            neighbor.render(Conditions::Types(&filter.entity_types), InstanceKind::Entity)?,
            neighbor.render(Conditions::Status(&filter.status), InstanceKind::Entity)?,
        ];
        if let Some(classifications) = &filter.classifications {
            conditions.push(
                neighbor.render(Conditions::Classifications(classifications), InstanceKind::Entity)?,
            );
        }

        Ok(SqlFragment::new(
            format!(
                "SELECT {}, {}, {}, {} FROM {} {} JOIN {} {} ON {} = CASE WHEN {} = ? THEN {} ELSE {} END WHERE",
                r.col(Column::Guid),
                r.col(Column::Version),
                e.col(Column::Guid),
                e.col(Column::Version),
                Table::Relationship.name(),
                r.name(),
                Table::Entity.name(),
                e.name(),
                e.col(Column::Guid),
                r.col(Column::End1Guid),
                r.col(Column::End2Guid),
                r.col(Column::End1Guid),
            ),
            vec![seed()],
        )
        .then(SqlFragment::and(conditions))
        .then(SqlFragment::new(
            format!("ORDER BY {}", r.col(Column::Guid)),
            Vec::new(),
        )))
    }
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn optional_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, text)
}

fn optional_millis(value: Option<Timestamp>) -> Value {
    value.map_or(Value::Null, |t| Value::Integer(t.as_millis()))
}

/// Values for [`header_column_list`], in the same order.
fn header_values(header: &InstanceHeader) -> Vec<Value> {
    vec![
        text(header.guid.as_str()),
        Value::Integer(header.version),
        text(&header.type_guid),
        text(&header.type_name),
        text(header.status.as_str()),
        text(&header.metadata_collection_id),
        text(&header.created_by),
        optional_text(header.updated_by.as_deref()),
        Value::Integer(header.create_time.as_millis()),
        optional_millis(header.update_time),
        optional_millis(header.effective.from),
        optional_millis(header.effective.to),
        Value::Integer(header.storage.start.as_millis()),
        optional_millis(header.storage.end),
    ]
}

fn proxy_json(proxy: &crate::models::EntityProxy) -> Result<Value> {
    serde_json::to_string(proxy)
        .map(Value::Text)
        .map_err(|e| Error::InvalidParameter(format!("entity proxy cannot be encoded: {e}")))
}

/// `INSERT` of one row into `table` with a placeholder per column.
fn insert_statement(table: Table, columns: &[Column]) -> String {
    let names: Vec<&str> = columns.iter().map(|c| c.name()).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name(),
        names.join(", "),
        vec!["?"; names.len()].join(", ")
    )
}

/// Columns of a property row, in the order [`insert_record`] binds them.
fn attribute_columns(kind: InstanceKind) -> Vec<Column> {
    let mut columns = vec![Column::Guid];
    if kind == InstanceKind::Classification {
        columns.push(Column::ClassificationName);
    }
    columns.extend([Column::Version, Column::AttributeName, Column::ValueType, Column::Value]);
    columns
}

/// Inserts one version and its property rows.
fn insert_record(tx: &Transaction<'_>, record: Record<'_>, repository: &str) -> Result<()> {
    let kind = record.kind();
    let header = record.header();
    let mut columns = header_column_list(kind);
    let mut values = header_values(header);
    let properties = match record {
        Record::Entity(entity) => {
            values.push(Value::Integer(i64::from(entity.is_proxy)));
            &entity.properties
        },
        Record::Relationship(relationship) => {
            values.push(proxy_json(&relationship.end1)?);
            values.push(proxy_json(&relationship.end2)?);
            columns.push(Column::End1Guid);
            columns.push(Column::End2Guid);
            values.push(text(relationship.end1.guid.as_str()));
            values.push(text(relationship.end2.guid.as_str()));
            &relationship.properties
        },
        Record::Classification(classification) => &classification.properties,
    };
    let flat = properties.flatten()?;

    let fail = |e: rusqlite::Error| Error::repository("insert_version", repository, e);
    tx.execute(
        &insert_statement(Table::principal(kind), &columns),
        params_from_iter(values.iter()),
    )
    .map_err(fail)?;

    let classified = kind == InstanceKind::Classification;
    let mut stmt = tx
        .prepare_cached(&insert_statement(Table::attributes(kind), &attribute_columns(kind)))
        .map_err(fail)?;
    for row in flat {
        let mut row_values = vec![text(header.guid.as_str())];
        if classified {
            row_values.push(text(&header.type_name));
        }
        row_values.push(Value::Integer(header.version));
        row_values.push(Value::Text(row.path));
        row_values.push(Value::Text(row.value_type));
        row_values.push(row.value.map_or(Value::Null, Value::Text));
        stmt.execute(params_from_iter(row_values.iter())).map_err(fail)?;
    }
    Ok(())
}

/// Closes a version if it is still open.
fn close_version(tx: &Transaction<'_>, key: &VersionKey, end: Timestamp, repository: &str) -> Result<()> {
    let mut sql = format!(
        "UPDATE {} SET {end} = ? WHERE {} = ? AND {} = ?",
        Table::principal(key.kind).name(),
        Column::Guid.name(),
        Column::Version.name(),
        end = Column::EndTime.name(),
    );
    let mut values = vec![
        Value::Integer(end.as_millis()),
        text(key.guid.as_str()),
        Value::Integer(key.version),
    ];
    if let Some(name) = &key.classification {
        sql.push_str(&format!(" AND {} = ?", Column::ClassificationName.name()));
        values.push(text(name));
    }
    sql.push_str(&format!(" AND {} IS NULL", Column::EndTime.name()));
    tx.execute(&sql, params_from_iter(values.iter()))
        .map_err(|e| Error::repository("close_out", repository, e))?;
    Ok(())
}

impl RepositoryBackend for SqliteBackend {
    fn repository_name(&self) -> &str {
        &self.context.repository_name
    }

    fn metadata_collection_id(&self) -> &str {
        &self.control.metadata_collection_id
    }

    #[instrument(skip(self), fields(guid = %guid))]
    fn get_entity(&self, guid: &Guid, snapshot: Snapshot) -> Result<Option<Entity>> {
        Ok(self
            .get_entities(std::slice::from_ref(guid), snapshot)?
            .into_iter()
            .next())
    }

    #[instrument(skip(self, guids), fields(count = guids.len()))]
    fn get_entities(&self, guids: &[Guid], snapshot: Snapshot) -> Result<Vec<Entity>> {
        let conn = acquire_lock(&self.conn);
        let reader = Reader::new(&conn, &self.context.repository_name, Deadline::unbounded());
        let mut keys = Vec::with_capacity(guids.len());
        for chunk in guids.chunks(rows::BATCH_KEYS) {
            let statement = Self::point_keys(InstanceKind::Entity, chunk, None, snapshot);
            keys.extend(reader.keys(InstanceKind::Entity, &statement, "get_entities")?);
        }
        reader.entities(&keys, ClassificationView::Snapshot(snapshot))
    }

    #[instrument(skip(self), fields(guid = %guid))]
    fn get_relationship(&self, guid: &Guid, snapshot: Snapshot) -> Result<Option<Relationship>> {
        let conn = acquire_lock(&self.conn);
        let reader = Reader::new(&conn, &self.context.repository_name, Deadline::unbounded());
        let statement =
            Self::point_keys(InstanceKind::Relationship, std::slice::from_ref(guid), None, snapshot);
        let keys = reader.keys(InstanceKind::Relationship, &statement, "get_relationship")?;
        Ok(reader.relationships(&keys)?.into_iter().next())
    }

    #[instrument(skip(self), fields(guid = %entity))]
    fn get_classification(
        &self,
        entity: &Guid,
        name: &str,
        snapshot: Snapshot,
    ) -> Result<Option<Classification>> {
        let conn = acquire_lock(&self.conn);
        let reader = Reader::new(&conn, &self.context.repository_name, Deadline::unbounded());
        let statement = Self::point_keys(
            InstanceKind::Classification,
            std::slice::from_ref(entity),
            Some(name),
            snapshot,
        );
        let keys = reader.keys(InstanceKind::Classification, &statement, "get_classification")?;
        Ok(reader.classifications(&keys)?.into_iter().next())
    }

    fn entity_exists(&self, guid: &Guid) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM entity WHERE guid = ?1)",
            params![guid.as_str()],
            |row| row.get(0),
        )
        .map_err(self.fail("entity_exists"))
    }

    fn entity_history(&self, guid: &Guid, deadline: Deadline) -> Result<HistoryCursor<'_, Entity>> {
        let guid = guid.as_str().to_string();
        Ok(HistoryCursor::new(
            DEFAULT_HISTORY_BATCH,
            Box::new(move |before: Option<Timestamp>, limit: usize| {
                self.history_batch(deadline, "entity_history", |reader| {
                    let statement =
                        Self::history_keys(InstanceKind::Entity, &guid, None, before, limit);
                    let keys = reader.keys(InstanceKind::Entity, &statement, "entity_history")?;
                    reader.entities(&keys, ClassificationView::VersionStart)
                })
            }),
        ))
    }

    fn relationship_history(
        &self,
        guid: &Guid,
        deadline: Deadline,
    ) -> Result<HistoryCursor<'_, Relationship>> {
        let guid = guid.as_str().to_string();
        Ok(HistoryCursor::new(
            DEFAULT_HISTORY_BATCH,
            Box::new(move |before: Option<Timestamp>, limit: usize| {
                self.history_batch(deadline, "relationship_history", |reader| {
                    let statement =
                        Self::history_keys(InstanceKind::Relationship, &guid, None, before, limit);
                    let keys =
                        reader.keys(InstanceKind::Relationship, &statement, "relationship_history")?;
                    reader.relationships(&keys)
                })
            }),
        ))
    }

    fn classification_history(
        &self,
        entity: &Guid,
        name: &str,
        deadline: Deadline,
    ) -> Result<HistoryCursor<'_, Classification>> {
        let guid = entity.as_str().to_string();
        let name = name.to_string();
        Ok(HistoryCursor::new(
            DEFAULT_HISTORY_BATCH,
            Box::new(move |before: Option<Timestamp>, limit: usize| {
                self.history_batch(deadline, "classification_history", |reader| {
                    let statement = Self::history_keys(
                        InstanceKind::Classification,
                        &guid,
                        Some(&name),
                        before,
                        limit,
                    );
                    let keys = reader.keys(
                        InstanceKind::Classification,
                        &statement,
                        "classification_history",
                    )?;
                    reader.classifications(&keys)
                })
            }),
        ))
    }

    #[instrument(skip(self, record), fields(kind = %record.kind(), guid = %record.header().guid))]
    fn insert(&self, record: Record<'_>) -> Result<()> {
        self.transaction("insert", |tx| {
            insert_record(tx, record, &self.context.repository_name)
        })?;
        metrics::counter!("metarepo_versions_written_total", "kind" => record.kind().as_str(), "backend" => "sqlite")
            .increment(1);
        Ok(())
    }

    #[instrument(skip(self), fields(guid = %key.guid, version = key.version))]
    fn close_out(&self, key: &VersionKey, end: Timestamp) -> Result<()> {
        self.transaction("close_out", |tx| {
            close_version(tx, key, end, &self.context.repository_name)
        })
    }

    #[instrument(skip(self, previous, next), fields(kind = %next.kind(), guid = %previous.guid, version = next.header().version))]
    fn supersede(&self, previous: &VersionKey, next: Record<'_>) -> Result<()> {
        self.transaction("supersede", |tx| {
            close_version(tx, previous, next.header().storage.start, &self.context.repository_name)?;
            insert_record(tx, next, &self.context.repository_name)
        })?;
        metrics::counter!("metarepo_versions_written_total", "kind" => next.kind().as_str(), "backend" => "sqlite")
            .increment(1);
        Ok(())
    }

    #[instrument(skip(self, relationship, proxies), fields(guid = %relationship.header.guid))]
    fn insert_relationship(&self, relationship: &Relationship, proxies: &[Entity]) -> Result<usize> {
        let created = self.transaction("insert_relationship", |tx| {
            let mut created = 0;
            for proxy in proxies {
                let known: bool = tx
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM entity WHERE guid = ?1)",
                        params![proxy.header.guid.as_str()],
                        |row| row.get(0),
                    )
                    .map_err(self.fail("insert_relationship"))?;
                if !known {
                    insert_record(tx, Record::Entity(proxy), &self.context.repository_name)?;
                    created += 1;
                }
            }
            insert_record(tx, Record::Relationship(relationship), &self.context.repository_name)?;
            Ok(created)
        })?;
        metrics::counter!("metarepo_versions_written_total", "kind" => "relationship", "backend" => "sqlite")
            .increment(1);
        if created > 0 {
            metrics::counter!("metarepo_proxies_created_total", "backend" => "sqlite")
                .increment(created as u64);
        }
        Ok(created)
    }

    #[instrument(skip(self), fields(guid = %guid))]
    fn purge_entity(&self, guid: &Guid) -> Result<PurgeReport> {
        self.transaction("purge_entity", |tx| {
            let fail = self.fail("purge_entity");
            let relationships: i64 = tx
                .query_row(
                    "SELECT COUNT(DISTINCT guid) FROM relationship WHERE end1_guid = ?1 OR end2_guid = ?1",
                    params![guid.as_str()],
                    |row| row.get(0),
                )
                .map_err(&fail)?;
            tx.execute(
                "DELETE FROM relationship WHERE end1_guid = ?1 OR end2_guid = ?1",
                params![guid.as_str()],
            )
            .map_err(&fail)?;
            let classifications = tx
                .execute("DELETE FROM classification WHERE guid = ?1", params![guid.as_str()])
                .map_err(&fail)?;
            let versions = tx
                .execute("DELETE FROM entity WHERE guid = ?1", params![guid.as_str()])
                .map_err(&fail)?;
            Ok(PurgeReport {
                versions,
                classifications,
                relationships: relationships as usize,
            })
        })
    }

    #[instrument(skip(self), fields(guid = %guid))]
    fn purge_relationship(&self, guid: &Guid) -> Result<PurgeReport> {
        self.transaction("purge_relationship", |tx| {
            let versions = tx
                .execute("DELETE FROM relationship WHERE guid = ?1", params![guid.as_str()])
                .map_err(self.fail("purge_relationship"))?;
            Ok(PurgeReport {
                versions,
                ..PurgeReport::default()
            })
        })
    }

    #[instrument(skip(self, request), fields(snapshot = ?request.snapshot))]
    fn find_entities(&self, request: &SearchRequest) -> Result<Vec<Entity>> {
        request.deadline.check("find_entities")?;
        let statement = self.search_statement(request, InstanceKind::Entity)?;
        metrics::counter!("metarepo_searches_total", "kind" => "entity", "backend" => "sqlite")
            .increment(1);

        let conn = acquire_lock(&self.conn);
        let _deadline = DeadlineGuard::install(&conn, request.deadline);
        let reader = Reader::new(&conn, &self.context.repository_name, request.deadline);
        let keys = reader.keys(InstanceKind::Entity, &statement, "find_entities")?;
        reader.entities(&keys, ClassificationView::Snapshot(request.snapshot))
    }

    #[instrument(skip(self, request), fields(snapshot = ?request.snapshot))]
    fn find_relationships(&self, request: &SearchRequest) -> Result<Vec<Relationship>> {
        request.deadline.check("find_relationships")?;
        let statement = self.search_statement(request, InstanceKind::Relationship)?;
        metrics::counter!("metarepo_searches_total", "kind" => "relationship", "backend" => "sqlite")
            .increment(1);

        let conn = acquire_lock(&self.conn);
        let _deadline = DeadlineGuard::install(&conn, request.deadline);
        let reader = Reader::new(&conn, &self.context.repository_name, request.deadline);
        let keys = reader.keys(InstanceKind::Relationship, &statement, "find_relationships")?;
        reader.relationships(&keys)
    }

    #[instrument(skip(self, filter, deadline), fields(guid = %guid))]
    fn neighbors(
        &self,
        guid: &Guid,
        filter: &HopFilter,
        snapshot: Snapshot,
        deadline: Deadline,
    ) -> Result<Vec<Hop>> {
        deadline.check("neighbors")?;
        let statement = self.neighbor_statement(guid, filter, snapshot)?;
        tracing::debug!(sql = %statement.inline(), "Running neighbor query");

        let conn = acquire_lock(&self.conn);
        let _guard = DeadlineGuard::install(&conn, deadline);
        let fail = map_query_error("neighbors", &self.context.repository_name, deadline);
        let pairs: Vec<(RowKey, RowKey)> = {
            let mut stmt = conn.prepare(statement.sql()).map_err(&fail)?;
            let rows = stmt
                .query_map(statement.param_refs().as_slice(), |row| {
                    Ok((
                        RowKey::instance(row.get::<_, String>(0)?, row.get(1)?),
                        RowKey::instance(row.get::<_, String>(2)?, row.get(3)?),
                    ))
                })
                .map_err(&fail)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(&fail)?
        };

        let reader = Reader::new(&conn, &self.context.repository_name, deadline);
        let edge_keys: Vec<RowKey> = pairs.iter().map(|(r, _)| r.clone()).collect();
        let entity_keys: Vec<RowKey> = pairs.iter().map(|(_, e)| e.clone()).collect();
        let mut relationships: HashMap<String, Relationship> = reader
            .relationships(&edge_keys)?
            .into_iter()
            .map(|r| (r.header.guid.as_str().to_string(), r))
            .collect();
        let entities: HashMap<String, Entity> = reader
            .entities(&entity_keys, ClassificationView::Snapshot(snapshot))?
            .into_iter()
            .map(|e| (e.header.guid.as_str().to_string(), e))
            .collect();

        let mut hops = Vec::with_capacity(pairs.len());
        for (edge, end) in pairs {
            if let (Some(relationship), Some(entity)) =
                (relationships.remove(&edge.guid), entities.get(&end.guid))
            {
                hops.push(Hop {
                    relationship,
                    entity: entity.clone(),
                });
            }
        }
        Ok(hops)
    }
}
