//! Relational translator: SQL fragments over the five-table schema.
//!
//! Identifiers (tables, columns, aliases) come only from the closed
//! [`Table`], [`Column`] and [`Alias`] enumerations. Every caller-supplied
//! value, including property paths, is a bound `?` parameter; fragments use
//! anonymous placeholders so they compose without renumbering.
//!
//! Property conditions become correlated `EXISTS` subqueries on the paired
//! `*_attribute_value` table:
//!
//! ```text
//! EXISTS (SELECT 1 FROM entity_attribute_value p
//!         WHERE p.guid = i.guid AND p.version = i.version
//!           AND p.attribute_name = ? AND p.value_type = ? AND p.value = ?)
//! ```

use super::{
    Conditions, LeafTest, Operand, PropertyPredicate, QueryTranslator, RangeOp, TextTest,
    lower_properties, lower_text, require_target,
};
use crate::models::{InstanceKind, MatchCriteria, PATH_SEPARATOR, SequencingOrder, Snapshot};
use crate::regex_guard::RegexGuard;
use crate::types::TypeRegistry;
use crate::{Error, Result};
use rusqlite::types::ToSqlOutput;

/// Name of the scalar function registered for regex evaluation.
pub const REGEXP_FUNCTION: &str = "regexp";

/// Tables of the relational schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Entity versions.
    Entity,
    /// Relationship versions.
    Relationship,
    /// Classification versions.
    Classification,
    /// Entity property rows.
    EntityAttributeValue,
    /// Relationship property rows.
    RelationshipAttributeValue,
    /// Classification property rows.
    ClassificationAttributeValue,
    /// Repository identity (single row).
    Control,
}

impl Table {
    /// Table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Relationship => "relationship",
            Self::Classification => "classification",
            Self::EntityAttributeValue => "entity_attribute_value",
            Self::RelationshipAttributeValue => "relationship_attribute_value",
            Self::ClassificationAttributeValue => "classification_attribute_value",
            Self::Control => "control",
        }
    }

    /// Principal (header) table of an instance kind.
    #[must_use]
    pub const fn principal(kind: InstanceKind) -> Self {
        match kind {
            InstanceKind::Entity => Self::Entity,
            InstanceKind::Relationship => Self::Relationship,
            InstanceKind::Classification => Self::Classification,
        }
    }

    /// Property table paired with an instance kind.
    #[must_use]
    pub const fn attributes(kind: InstanceKind) -> Self {
        match kind {
            InstanceKind::Entity => Self::EntityAttributeValue,
            InstanceKind::Relationship => Self::RelationshipAttributeValue,
            InstanceKind::Classification => Self::ClassificationAttributeValue,
        }
    }
}

/// Columns of the relational schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// Instance (or classified entity) GUID.
    Guid,
    /// Version number.
    Version,
    /// Type GUID.
    TypeGuid,
    /// Type name.
    TypeName,
    /// Classification name.
    ClassificationName,
    /// Lifecycle status.
    Status,
    /// Proxy flag (entities).
    IsProxy,
    /// Owning metadata collection.
    MetadataCollectionId,
    /// Creator.
    CreatedBy,
    /// Last updater.
    UpdatedBy,
    /// Creation time.
    CreateTime,
    /// Update time.
    UpdateTime,
    /// Effective from.
    EffectiveFrom,
    /// Effective to.
    EffectiveTo,
    /// Storage window start.
    StartTime,
    /// Storage window end.
    EndTime,
    /// First end GUID (relationships).
    End1Guid,
    /// Second end GUID (relationships).
    End2Guid,
    /// First end proxy JSON (relationships).
    End1Proxy,
    /// Second end proxy JSON (relationships).
    End2Proxy,
    /// Flattened property path.
    AttributeName,
    /// Property type code.
    ValueType,
    /// Encoded property value.
    Value,
}

impl Column {
    /// Column name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Guid => "guid",
            Self::Version => "version",
            Self::TypeGuid => "type_guid",
            Self::TypeName => "type_name",
            Self::ClassificationName => "classification_name",
            Self::Status => "status",
            Self::IsProxy => "is_proxy",
            Self::MetadataCollectionId => "metadata_collection_id",
            Self::CreatedBy => "created_by",
            Self::UpdatedBy => "updated_by",
            Self::CreateTime => "create_time",
            Self::UpdateTime => "update_time",
            Self::EffectiveFrom => "effective_from",
            Self::EffectiveTo => "effective_to",
            Self::StartTime => "start_time",
            Self::EndTime => "end_time",
            Self::End1Guid => "end1_guid",
            Self::End2Guid => "end2_guid",
            Self::End1Proxy => "end1_proxy",
            Self::End2Proxy => "end2_proxy",
            Self::AttributeName => "attribute_name",
            Self::ValueType => "value_type",
            Self::Value => "value",
        }
    }
}

/// Table aliases used in generated SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alias {
    /// The instance being searched.
    Instance,
    /// The entity across a relationship (neighbor queries).
    Neighbor,
    /// The relationship of a neighbor query.
    Edge,
    /// A classification row.
    Classification,
    /// A property row in a condition subquery.
    Attribute,
    /// A property row in an ORDER BY subquery.
    Sort,
}

impl Alias {
    /// Alias text.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Instance => "i",
            Self::Neighbor => "e",
            Self::Edge => "r",
            Self::Classification => "c",
            Self::Attribute => "p",
            Self::Sort => "s",
        }
    }

    /// Qualified column reference.
    #[must_use]
    pub fn col(self, column: Column) -> String {
        format!("{}.{}", self.name(), column.name())
    }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// TEXT.
    Text(String),
    /// INTEGER.
    Integer(i64),
    /// REAL.
    Real(f64),
}

impl SqlParam {
    fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

impl rusqlite::ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Text(s) => s.to_sql(),
            Self::Integer(i) => i.to_sql(),
            Self::Real(f) => f.to_sql(),
        }
    }
}

/// Escapes a string as a single-quoted SQL literal.
///
/// Only used to render fragments for diagnostics; execution always binds.
#[must_use]
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// SQL text with its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    sql: String,
    params: Vec<SqlParam>,
}

impl SqlFragment {
    /// Creates a fragment.
    #[must_use]
    pub const fn new(sql: String, params: Vec<SqlParam>) -> Self {
        Self { sql, params }
    }

    /// Always-true predicate.
    #[must_use]
    pub fn always() -> Self {
        Self::new("1 = 1".to_string(), Vec::new())
    }

    /// Always-false predicate.
    #[must_use]
    pub fn never() -> Self {
        Self::new("0 = 1".to_string(), Vec::new())
    }

    /// SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters.
    #[must_use]
    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    /// Parameters as `rusqlite` trait objects.
    #[must_use]
    pub fn param_refs(&self) -> Vec<&dyn rusqlite::ToSql> {
        self.params.iter().map(|p| p as &dyn rusqlite::ToSql).collect()
    }

    fn join(fragments: Vec<Self>, separator: &str, empty: Self) -> Self {
        if fragments.is_empty() {
            return empty;
        }
        let mut sql = Vec::with_capacity(fragments.len());
        let mut params = Vec::new();
        for fragment in fragments {
            sql.push(format!("({})", fragment.sql));
            params.extend(fragment.params);
        }
        Self::new(sql.join(separator), params)
    }

    /// Logical AND; empty is true.
    #[must_use]
    pub fn and(fragments: Vec<Self>) -> Self {
        Self::join(fragments, " AND ", Self::always())
    }

    /// Logical OR; empty is false.
    #[must_use]
    pub fn or(fragments: Vec<Self>) -> Self {
        Self::join(fragments, " OR ", Self::never())
    }

    /// Logical NOT.
    #[must_use]
    pub fn not(self) -> Self {
        Self::new(format!("NOT ({})", self.sql), self.params)
    }

    /// Appends raw SQL text and parameters.
    #[must_use]
    pub fn then(mut self, other: Self) -> Self {
        if !other.sql.is_empty() {
            self.sql.push(' ');
            self.sql.push_str(&other.sql);
            self.params.extend(other.params);
        }
        self
    }

    fn combine(criteria: MatchCriteria, fragments: Vec<Self>) -> Self {
        match criteria {
            MatchCriteria::All => Self::and(fragments),
            MatchCriteria::Any => Self::or(fragments),
            MatchCriteria::None => Self::and(fragments.into_iter().map(Self::not).collect()),
        }
    }

    /// Renders the fragment with parameters inlined as escaped literals.
    #[must_use]
    pub fn inline(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut params = self.params.iter();
        for ch in self.sql.chars() {
            if ch == '?' {
                match params.next() {
                    Some(SqlParam::Text(s)) => out.push_str(&quote_literal(s)),
                    Some(SqlParam::Integer(i)) => out.push_str(&i.to_string()),
                    Some(SqlParam::Real(f)) => out.push_str(&f.to_string()),
                    None => out.push('?'),
                }
            } else {
                out.push(ch);
            }
        }
        out
    }
}

/// Renders condition fragments for one aliased table.
///
/// The snapshot governs classification visibility inside classification
/// conditions; row visibility of the searched table itself is rendered from
/// [`Conditions::AsOf`].
#[derive(Debug, Clone, Copy)]
pub struct SqlTranslator<'a> {
    types: &'a TypeRegistry,
    guard: RegexGuard,
    alias: Alias,
    snapshot: Snapshot,
}

impl<'a> SqlTranslator<'a> {
    /// Creates a translator for alias `i`.
    #[must_use]
    pub const fn new(types: &'a TypeRegistry, guard: RegexGuard, snapshot: Snapshot) -> Self {
        Self {
            types,
            guard,
            alias: Alias::Instance,
            snapshot,
        }
    }

    /// Targets another alias.
    #[must_use]
    pub const fn with_alias(mut self, alias: Alias) -> Self {
        self.alias = alias;
        self
    }

    /// Renders `ORDER BY` for the target, always ending with a GUID tiebreak.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadSearchProperty`] for an unusable sequencing property.
    pub fn order_by(&self, order: &SequencingOrder, target: InstanceKind) -> Result<SqlFragment> {
        let a = self.alias;
        let guid = a.col(Column::Guid);
        let updated = format!(
            "COALESCE({}, {})",
            a.col(Column::UpdateTime),
            a.col(Column::CreateTime)
        );
        let text = |sql: String| Ok(SqlFragment::new(sql, Vec::new()));
        match order {
            SequencingOrder::Any | SequencingOrder::Guid => text(format!("ORDER BY {guid} ASC")),
            SequencingOrder::CreationDateRecent => text(format!(
                "ORDER BY {} DESC, {guid} ASC",
                a.col(Column::CreateTime)
            )),
            SequencingOrder::CreationDateOldest => text(format!(
                "ORDER BY {} ASC, {guid} ASC",
                a.col(Column::CreateTime)
            )),
            SequencingOrder::LastUpdateRecent => {
                text(format!("ORDER BY {updated} DESC, {guid} ASC"))
            },
            SequencingOrder::LastUpdateOldest => {
                text(format!("ORDER BY {updated} ASC, {guid} ASC"))
            },
            SequencingOrder::PropertyAscending(name) | SequencingOrder::PropertyDescending(name) => {
                if name.is_empty() || name.contains(PATH_SEPARATOR) {
                    return Err(Error::BadSearchProperty {
                        property: name.clone(),
                        reason: "only top-level properties can be used for sequencing".to_string(),
                    });
                }
                let direction = if matches!(order, SequencingOrder::PropertyAscending(_)) {
                    "ASC"
                } else {
                    "DESC"
                };
                let s = Alias::Sort;
                let sql = format!(
                    "ORDER BY (SELECT CASE WHEN {vt} IN (?, ?, ?) THEN CAST({v} AS REAL) ELSE {v} END \
                     FROM {table} {s_name} WHERE {corr} AND {attr} = ?) {direction}, {guid} ASC",
                    vt = s.col(Column::ValueType),
                    v = s.col(Column::Value),
                    table = Table::attributes(target).name(),
                    s_name = s.name(),
                    corr = self.correlate(target, s),
                    attr = s.col(Column::AttributeName),
                );
                Ok(SqlFragment::new(
                    sql,
                    vec![
                        SqlParam::text("int"),
                        SqlParam::text("float"),
                        SqlParam::text("date"),
                        SqlParam::text(name.clone()),
                    ],
                ))
            },
        }
    }

    /// Storage-time visibility of `alias` rows.
    #[must_use]
    pub fn visibility(alias: Alias, snapshot: Snapshot) -> SqlFragment {
        let end = alias.col(Column::EndTime);
        match snapshot {
            Snapshot::Current => SqlFragment::new(format!("{end} IS NULL"), Vec::new()),
            Snapshot::AsOf(at) => SqlFragment::new(
                format!(
                    "{} <= ? AND ({end} IS NULL OR {end} > ?)",
                    alias.col(Column::StartTime)
                ),
                vec![
                    SqlParam::Integer(at.as_millis()),
                    SqlParam::Integer(at.as_millis()),
                ],
            ),
        }
    }

    /// Join condition tying a property row alias to its owner row.
    fn correlate(&self, target: InstanceKind, attr: Alias) -> String {
        let owner = match target {
            InstanceKind::Classification => Alias::Classification,
            _ => self.alias,
        };
        Self::correlate_owner(target, owner, attr)
    }

    fn correlate_owner(target: InstanceKind, owner: Alias, attr: Alias) -> String {
        let mut parts = vec![
            format!("{} = {}", attr.col(Column::Guid), owner.col(Column::Guid)),
            format!("{} = {}", attr.col(Column::Version), owner.col(Column::Version)),
        ];
        if target == InstanceKind::Classification {
            parts.push(format!(
                "{} = {}",
                attr.col(Column::ClassificationName),
                owner.col(Column::ClassificationName)
            ));
        }
        parts.join(" AND ")
    }

    fn predicate(&self, tree: &PropertyPredicate, target: InstanceKind, owner: Alias) -> SqlFragment {
        match tree {
            PropertyPredicate::Leaf { path, test } => Self::leaf(target, owner, path, test),
            PropertyPredicate::All(children) => SqlFragment::and(
                children
                    .iter()
                    .map(|c| self.predicate(c, target, owner))
                    .collect(),
            ),
            PropertyPredicate::Any(children) => SqlFragment::or(
                children
                    .iter()
                    .map(|c| self.predicate(c, target, owner))
                    .collect(),
            ),
            PropertyPredicate::Not(child) => self.predicate(child, target, owner).not(),
        }
    }

    fn leaf(target: InstanceKind, owner: Alias, path: &str, test: &LeafTest) -> SqlFragment {
        let p = Alias::Attribute;
        let (exists, positive, negated) = match test {
            LeafTest::Present => (true, None, false),
            LeafTest::Absent => (false, None, false),
            LeafTest::Equals { operand } => (true, Some(Self::equals(operand)), false),
            LeafTest::NotEquals { operand } => (true, Some(Self::equals(operand)), true),
            LeafTest::Compare { op, operand } => (true, Some(Self::compare(*op, operand)), false),
            LeafTest::Matches { pattern } => (true, Some(Self::matches(pattern)), false),
            LeafTest::NotMatches { pattern } => (true, Some(Self::matches(pattern)), true),
        };

        let mut sql = format!(
            "{}EXISTS (SELECT 1 FROM {} {} WHERE {} AND {} = ?",
            if exists { "" } else { "NOT " },
            Table::attributes(target).name(),
            p.name(),
            Self::correlate_owner(target, owner, p),
            p.col(Column::AttributeName),
        );
        let mut params = vec![SqlParam::text(path)];
        if let Some(positive) = positive {
            if negated {
                sql.push_str(&format!(" AND NOT COALESCE(({}), 0)", positive.sql));
            } else {
                sql.push_str(&format!(" AND {}", positive.sql));
            }
            params.extend(positive.params);
        }
        sql.push(')');
        SqlFragment::new(sql, params)
    }

    fn equals(operand: &Operand) -> SqlFragment {
        let p = Alias::Attribute;
        let vt = p.col(Column::ValueType);
        let v = p.col(Column::Value);
        match operand {
            Operand::Boolean(b) => SqlFragment::new(
                format!("{vt} = ? AND {v} = ?"),
                vec![SqlParam::text("boolean"), SqlParam::text(b.to_string())],
            ),
            Operand::Number(n) => SqlFragment::new(
                format!("{vt} IN (?, ?) AND CAST({v} AS REAL) = ?"),
                vec![
                    SqlParam::text("int"),
                    SqlParam::text("float"),
                    SqlParam::Real(*n),
                ],
            ),
            Operand::Date(d) => SqlFragment::new(
                format!("{vt} = ? AND CAST({v} AS INTEGER) = ?"),
                vec![SqlParam::text("date"), SqlParam::Integer(*d)],
            ),
            Operand::Text(s) => SqlFragment::new(
                format!("{vt} = ? AND {v} = ?"),
                vec![SqlParam::text("string"), SqlParam::text(s.clone())],
            ),
            Operand::Symbol(s) => SqlFragment::new(
                format!("{vt} LIKE ? AND {v} = ?"),
                vec![SqlParam::text("enum:%"), SqlParam::text(s.clone())],
            ),
        }
    }

    fn compare(op: RangeOp, operand: &Operand) -> SqlFragment {
        let p = Alias::Attribute;
        let vt = p.col(Column::ValueType);
        let v = p.col(Column::Value);
        let symbol = op.symbol();
        match operand {
            Operand::Number(n) => SqlFragment::new(
                format!("{vt} IN (?, ?) AND CAST({v} AS REAL) {symbol} ?"),
                vec![
                    SqlParam::text("int"),
                    SqlParam::text("float"),
                    SqlParam::Real(*n),
                ],
            ),
            Operand::Date(d) => SqlFragment::new(
                format!("{vt} = ? AND CAST({v} AS INTEGER) {symbol} ?"),
                vec![SqlParam::text("date"), SqlParam::Integer(*d)],
            ),
            _ => SqlFragment::never(),
        }
    }

    fn matches(pattern: &str) -> SqlFragment {
        let p = Alias::Attribute;
        SqlFragment::new(
            format!(
                "{} = ? AND {REGEXP_FUNCTION}(?, {})",
                p.col(Column::ValueType),
                p.col(Column::Value)
            ),
            vec![SqlParam::text("string"), SqlParam::text(pattern)],
        )
    }

    fn type_column(target: InstanceKind) -> Column {
        match target {
            InstanceKind::Classification => Column::ClassificationName,
            _ => Column::TypeName,
        }
    }

    fn in_list(column: String, values: impl IntoIterator<Item = String>) -> SqlFragment {
        let params: Vec<SqlParam> = values.into_iter().map(SqlParam::Text).collect();
        if params.is_empty() {
            return SqlFragment::never();
        }
        let placeholders = vec!["?"; params.len()].join(", ");
        SqlFragment::new(format!("{column} IN ({placeholders})"), params)
    }
}

impl QueryTranslator for SqlTranslator<'_> {
    type Fragment = SqlFragment;

    fn render(&self, conditions: Conditions<'_>, target: InstanceKind) -> Result<SqlFragment> {
        let a = self.alias;
        match conditions {
            Conditions::Properties(properties) => {
                let tree = lower_properties(properties, &self.guard)?;
                let owner = match target {
                    InstanceKind::Classification => Alias::Classification,
                    _ => a,
                };
                Ok(self.predicate(&tree, target, owner))
            },
            Conditions::Classifications(classifications) => {
                require_target("classification", target, &[InstanceKind::Entity])?;
                let c = Alias::Classification;
                let mut fragments = Vec::with_capacity(classifications.conditions.len());
                for condition in &classifications.conditions {
                    let mut parts = vec![
                        SqlFragment::new(
                            format!("{} = ?", c.col(Column::ClassificationName)),
                            vec![SqlParam::text(condition.name.clone())],
                        ),
                        Self::visibility(c, self.snapshot),
                    ];
                    if let Some(properties) = &condition.properties {
                        let tree = lower_properties(properties, &self.guard)?;
                        parts.push(self.predicate(&tree, InstanceKind::Classification, c));
                    }
                    let body = SqlFragment::and(parts);
                    fragments.push(SqlFragment::new(
                        format!(
                            "EXISTS (SELECT 1 FROM {} {} WHERE {} = {} AND {})",
                            Table::Classification.name(),
                            c.name(),
                            c.col(Column::Guid),
                            a.col(Column::Guid),
                            body.sql
                        ),
                        body.params,
                    ));
                }
                Ok(SqlFragment::combine(
                    classifications.match_criteria,
                    fragments,
                ))
            },
            Conditions::Types(filter) => {
                let names = self.types.resolve(filter, target.into())?;
                Ok(Self::in_list(a.col(Self::type_column(target)), names))
            },
            Conditions::Status(filter) => Ok(Self::in_list(
                a.col(Column::Status),
                filter
                    .accepted()
                    .into_iter()
                    .map(|s| s.as_str().to_string()),
            )),
            Conditions::AsOf(snapshot) => Ok(Self::visibility(a, snapshot)),
            Conditions::Text(pattern) => {
                let test = lower_text(pattern, &self.guard)?;
                let p = Alias::Attribute;
                let (check, value) = match test {
                    TextTest::Literal(text) => (format!("{} = ?", p.col(Column::Value)), text),
                    TextTest::Pattern(pattern) => (
                        format!("{REGEXP_FUNCTION}(?, {})", p.col(Column::Value)),
                        pattern,
                    ),
                };
                Ok(SqlFragment::new(
                    format!(
                        "EXISTS (SELECT 1 FROM {} {} WHERE {} AND {} = ? AND {check})",
                        Table::attributes(target).name(),
                        p.name(),
                        self.correlate(target, p),
                        p.col(Column::ValueType),
                    ),
                    vec![SqlParam::text("string"), SqlParam::Text(value)],
                ))
            },
            Conditions::EndEntity(guid) => {
                require_target("end entity", target, &[InstanceKind::Relationship])?;
                Ok(SqlFragment::new(
                    format!(
                        "{} = ? OR {} = ?",
                        a.col(Column::End1Guid),
                        a.col(Column::End2Guid)
                    ),
                    vec![
                        SqlParam::text(guid.as_str()),
                        SqlParam::text(guid.as_str()),
                    ],
                ))
            },
        }
    }

    fn conjoin(&self, fragments: Vec<SqlFragment>) -> SqlFragment {
        SqlFragment::and(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ClassificationCondition, Guid, PropertyCondition, SearchClassifications, SearchProperties,
        StatusFilter, Timestamp, TypeFilter,
    };
    use crate::types::{TypeCategory, TypeDefSummary};

    fn registry() -> TypeRegistry {
        TypeRegistry::with_types([
            TypeDefSummary::new("t-asset", "Asset", TypeCategory::Entity),
            TypeDefSummary::new("t-table", "Table", TypeCategory::Entity).with_supertype("t-asset"),
        ])
        .unwrap()
    }

    fn placeholders(fragment: &SqlFragment) -> usize {
        fragment.sql().matches('?').count()
    }

    #[test]
    fn test_values_are_bound_not_inlined() {
        let reg = registry();
        let t = SqlTranslator::new(&reg, RegexGuard::default(), Snapshot::Current);
        let props = SearchProperties::all([PropertyCondition::eq("name", "O'Brien; DROP TABLE entity")]);
        let fragment = t
            .render(Conditions::Properties(&props), InstanceKind::Entity)
            .unwrap();
        assert!(!fragment.sql().contains("O'Brien"));
        assert!(!fragment.sql().contains("DROP"));
        assert_eq!(placeholders(&fragment), fragment.params().len());
        assert!(fragment.inline().contains("'O''Brien; DROP TABLE entity'"));
    }

    #[test]
    fn test_property_paths_are_bound() {
        let reg = registry();
        let t = SqlTranslator::new(&reg, RegexGuard::default(), Snapshot::Current);
        let props = SearchProperties::all([PropertyCondition::not_null("x') OR 1=1 --")]);
        let fragment = t
            .render(Conditions::Properties(&props), InstanceKind::Entity)
            .unwrap();
        assert!(!fragment.sql().contains("OR 1=1"));
        assert_eq!(
            fragment.params()[0],
            SqlParam::Text("x') OR 1=1 --".to_string())
        );
    }

    #[test]
    fn test_type_filter_expands_subtypes() {
        let reg = registry();
        let t = SqlTranslator::new(&reg, RegexGuard::default(), Snapshot::Current);
        let fragment = t
            .render(Conditions::Types(&TypeFilter::of("t-asset")), InstanceKind::Entity)
            .unwrap();
        assert_eq!(fragment.sql(), "i.type_name IN (?, ?)");
        assert_eq!(
            fragment.params(),
            &[
                SqlParam::Text("Asset".to_string()),
                SqlParam::Text("Table".to_string())
            ]
        );
    }

    #[test]
    fn test_default_status_excludes_deleted() {
        let reg = registry();
        let t = SqlTranslator::new(&reg, RegexGuard::default(), Snapshot::Current);
        let fragment = t
            .render(Conditions::Status(&StatusFilter::default()), InstanceKind::Entity)
            .unwrap();
        assert!(!fragment.inline().contains("DELETED"));
        assert!(fragment.inline().contains("ACTIVE"));
    }

    #[test]
    fn test_visibility_rendering() {
        let current = SqlTranslator::visibility(Alias::Instance, Snapshot::Current);
        assert_eq!(current.sql(), "i.end_time IS NULL");
        let as_of = SqlTranslator::visibility(
            Alias::Instance,
            Snapshot::AsOf(Timestamp::from_millis(42)),
        );
        assert_eq!(
            as_of.inline(),
            "i.start_time <= 42 AND (i.end_time IS NULL OR i.end_time > 42)"
        );
    }

    #[test]
    fn test_classification_condition_uses_classification_tables() {
        let reg = registry();
        let t = SqlTranslator::new(&reg, RegexGuard::default(), Snapshot::Current);
        let search = SearchClassifications::new(
            [ClassificationCondition::named("Confidential").with_properties(
                SearchProperties::all([PropertyCondition::eq("level", 3_i64)]),
            )],
            MatchCriteria::All,
        );
        let fragment = t
            .render(Conditions::Classifications(&search), InstanceKind::Entity)
            .unwrap();
        assert!(fragment.sql().contains("FROM classification c"));
        assert!(fragment.sql().contains("FROM classification_attribute_value p"));
        assert!(fragment.sql().contains("p.classification_name = c.classification_name"));
        assert_eq!(placeholders(&fragment), fragment.params().len());
    }

    #[test]
    fn test_classifications_rejected_for_relationships() {
        let reg = registry();
        let t = SqlTranslator::new(&reg, RegexGuard::default(), Snapshot::Current);
        let search = SearchClassifications::default();
        assert!(t
            .render(Conditions::Classifications(&search), InstanceKind::Relationship)
            .is_err());
    }

    #[test]
    fn test_end_entity_and_order() {
        let reg = registry();
        let t = SqlTranslator::new(&reg, RegexGuard::default(), Snapshot::Current);
        let guid = Guid::new("g-1");
        let fragment = t
            .render(Conditions::EndEntity(&guid), InstanceKind::Relationship)
            .unwrap();
        assert_eq!(fragment.inline(), "i.end1_guid = 'g-1' OR i.end2_guid = 'g-1'");

        let order = t
            .order_by(&SequencingOrder::PropertyDescending("age".to_string()), InstanceKind::Entity)
            .unwrap();
        assert!(order.sql().ends_with("DESC, i.guid ASC"));
        assert!(t
            .order_by(&SequencingOrder::PropertyAscending("a.b".to_string()), InstanceKind::Entity)
            .is_err());
    }

    #[test]
    fn test_combinators() {
        assert_eq!(SqlFragment::and(Vec::new()).sql(), "1 = 1");
        assert_eq!(SqlFragment::or(Vec::new()).sql(), "0 = 1");
        let none = SqlFragment::combine(
            MatchCriteria::None,
            vec![SqlFragment::always(), SqlFragment::never()],
        );
        assert_eq!(none.sql(), "(NOT (1 = 1)) AND (NOT (0 = 1))");
    }

    #[test]
    fn test_quote_literal_doubles_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
