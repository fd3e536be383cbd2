//! Query translation.
//!
//! The abstract condition model in [`crate::models::search`] is first lowered
//! into a validated, backend-independent [`PropertyPredicate`] tree. Each
//! backend then renders that tree into its native form:
//!
//! | Translator | Fragment | Backend |
//! |------------|----------|---------|
//! | [`SqlTranslator`] | [`SqlFragment`] (text + bound parameters) | [`crate::storage::SqliteBackend`] |
//! | [`DatalogTranslator`] | [`Clause`] list | [`crate::storage::DocumentStore`] |
//!
//! Validation happens during lowering, so an operator used against a value
//! type it cannot support fails with [`Error::BadSearchProperty`] before any
//! backend work starts. LIKE patterns are probed by the [`RegexGuard`] here.
//!
//! # Leaf Semantics
//!
//! | Test | Holds when |
//! |------|-----------|
//! | `Present` / `Absent` | a row exists / does not exist at the path |
//! | `Equals` | a leaf of the operand's family exists with an equal value |
//! | `NotEquals` | a row exists at the path and `Equals` does not hold |
//! | `Compare` | a numeric (or date) leaf exists and the ordering holds |
//! | `Matches` | a string leaf exists and fully matches the pattern |
//! | `NotMatches` | a row exists at the path and `Matches` does not hold |

pub mod datalog;
pub mod sql;

pub use datalog::{Clause, DatalogQuery, DatalogTranslator, DocAttribute};
pub use sql::{Alias, Column, SqlFragment, SqlParam, SqlTranslator, Table};

use crate::deadline::Deadline;
use crate::models::{
    Guid, InstanceKind, MatchCriteria, PATH_SEPARATOR, PrimitiveValue, PropertyComparisonOperator,
    PropertyCondition, PropertyValue, SearchClassifications, SearchProperties, SequencingOrder,
    Snapshot, StatusFilter, TypeFilter,
};
use crate::regex_guard::{RegexGuard, exact_literal};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One part of a search, rendered into a composable fragment.
#[derive(Debug, Clone, Copy)]
pub enum Conditions<'a> {
    /// Property comparisons on the instance itself.
    Properties(&'a SearchProperties),
    /// Classification conditions (entities only).
    Classifications(&'a SearchClassifications),
    /// Type restriction, expanded to the subtype closure.
    Types(&'a TypeFilter),
    /// Status restriction.
    Status(&'a StatusFilter),
    /// Storage-time visibility.
    AsOf(Snapshot),
    /// Regular expression over every string property.
    Text(&'a str),
    /// Relationships with the given entity at either end.
    EndEntity(&'a Guid),
}

/// Contract shared by the relational and document translators.
///
/// Every fragment is composable by logical AND via [`Self::conjoin`].
pub trait QueryTranslator {
    /// Backend-native query fragment.
    type Fragment;

    /// Renders one part of a search against `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadSearchProperty`], [`Error::TypeError`] or
    /// [`Error::Timeout`] (regex probe) for conditions that cannot be rendered.
    fn render(&self, conditions: Conditions<'_>, target: InstanceKind) -> Result<Self::Fragment>;

    /// Combines fragments with logical AND.
    fn conjoin(&self, fragments: Vec<Self::Fragment>) -> Self::Fragment;

    /// Renders every part of `request` and conjoins them.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::render`].
    fn render_request(
        &self,
        request: &SearchRequest,
        target: InstanceKind,
    ) -> Result<Self::Fragment> {
        let mut fragments = vec![
            self.render(Conditions::AsOf(request.snapshot), target)?,
            self.render(Conditions::Types(&request.types), target)?,
            self.render(Conditions::Status(&request.status), target)?,
        ];
        if let Some(properties) = &request.properties {
            fragments.push(self.render(Conditions::Properties(properties), target)?);
        }
        if let Some(classifications) = &request.classifications {
            fragments.push(self.render(Conditions::Classifications(classifications), target)?);
        }
        if let Some(text) = &request.text {
            fragments.push(self.render(Conditions::Text(text), target)?);
        }
        if let Some(guid) = &request.end_entity {
            fragments.push(self.render(Conditions::EndEntity(guid), target)?);
        }
        Ok(self.conjoin(fragments))
    }
}

/// Everything a backend needs to run one search.
///
/// Paging is applied afterwards by [`crate::paging`].
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Type restriction.
    pub types: TypeFilter,
    /// Property conditions.
    pub properties: Option<SearchProperties>,
    /// Classification conditions (entities only).
    pub classifications: Option<SearchClassifications>,
    /// Regular expression over all string properties.
    pub text: Option<String>,
    /// Status restriction.
    pub status: StatusFilter,
    /// Read snapshot.
    pub snapshot: Snapshot,
    /// Result order.
    pub order: SequencingOrder,
    /// Restrict relationships to those touching this entity.
    pub end_entity: Option<Guid>,
    /// Execution budget.
    pub deadline: Deadline,
}

impl SearchRequest {
    /// Creates an unrestricted request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets property conditions.
    #[must_use]
    pub fn with_properties(mut self, properties: SearchProperties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Sets classification conditions.
    #[must_use]
    pub fn with_classifications(mut self, classifications: SearchClassifications) -> Self {
        self.classifications = Some(classifications);
        self
    }

    /// Sets the text pattern.
    #[must_use]
    pub fn with_text(mut self, pattern: impl Into<String>) -> Self {
        self.text = Some(pattern.into());
        self
    }

    /// Sets the type filter.
    #[must_use]
    pub fn with_types(mut self, types: TypeFilter) -> Self {
        self.types = types;
        self
    }

    /// Sets the status filter.
    #[must_use]
    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    /// Sets the snapshot.
    #[must_use]
    pub const fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Sets the order.
    #[must_use]
    pub fn with_order(mut self, order: SequencingOrder) -> Self {
        self.order = order;
        self
    }

    /// Restricts relationships to one end entity.
    #[must_use]
    pub fn with_end_entity(mut self, guid: Guid) -> Self {
        self.end_entity = Some(guid);
        self
    }

    /// Sets the execution budget.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Validated comparison operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    /// Boolean leaf.
    Boolean(bool),
    /// `int` or `float` leaf.
    Number(f64),
    /// Date leaf, epoch milliseconds.
    Date(i64),
    /// String leaf.
    Text(String),
    /// Enum leaf, by symbolic name.
    Symbol(String),
}

impl Operand {
    fn from_primitive(value: &PrimitiveValue) -> Self {
        match value {
            PrimitiveValue::Boolean(b) => Self::Boolean(*b),
            PrimitiveValue::Int(_) | PrimitiveValue::Float(_) => {
                Self::Number(value.as_f64().unwrap_or_default())
            },
            PrimitiveValue::String(s) => Self::Text(s.clone()),
            PrimitiveValue::Date(ts) => Self::Date(ts.as_millis()),
        }
    }
}

/// Ordering comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeOp {
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl RangeOp {
    /// SQL operator text.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }

    /// Applies the comparison to an ordering of `stored` against the operand.
    #[must_use]
    pub const fn holds(self, ordering: std::cmp::Ordering) -> bool {
        match self {
            Self::Lt => ordering.is_lt(),
            Self::Lte => ordering.is_le(),
            Self::Gt => ordering.is_gt(),
            Self::Gte => ordering.is_ge(),
        }
    }
}

/// Test applied to the row at one property path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum LeafTest {
    /// Some row exists at the path.
    Present,
    /// No row exists at the path.
    Absent,
    /// A leaf of the operand's family with an equal value.
    Equals {
        /// Operand.
        operand: Operand,
    },
    /// A row exists and `Equals` does not hold.
    NotEquals {
        /// Operand.
        operand: Operand,
    },
    /// Numeric or date ordering.
    Compare {
        /// Comparison.
        op: RangeOp,
        /// `Number` or `Date` operand.
        operand: Operand,
    },
    /// A string leaf fully matching the (probed) pattern.
    Matches {
        /// Regular expression.
        pattern: String,
    },
    /// A row exists and `Matches` does not hold.
    NotMatches {
        /// Regular expression.
        pattern: String,
    },
}

/// Validated, backend-independent property condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyPredicate {
    /// Test at one path.
    Leaf {
        /// Dotted property path.
        path: String,
        /// Test.
        test: LeafTest,
    },
    /// Conjunction; empty is true.
    All(Vec<Self>),
    /// Disjunction; empty is false.
    Any(Vec<Self>),
    /// Negation.
    Not(Box<Self>),
}

impl PropertyPredicate {
    /// Combines children under a match criteria.
    #[must_use]
    pub fn combine(criteria: MatchCriteria, children: Vec<Self>) -> Self {
        match criteria {
            MatchCriteria::All => Self::All(children),
            MatchCriteria::Any => Self::Any(children),
            MatchCriteria::None => {
                Self::All(children.into_iter().map(|c| Self::Not(Box::new(c))).collect())
            },
        }
    }
}

/// Text search after literal detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextTest {
    /// Exact string equality.
    Literal(String),
    /// Full-match regular expression.
    Pattern(String),
}

/// Lowers search properties into a validated predicate tree.
///
/// # Errors
///
/// - [`Error::BadSearchProperty`] for unsupported operator/value combinations
/// - [`Error::Timeout`] if a LIKE pattern fails the regex probe
pub fn lower_properties(properties: &SearchProperties, guard: &RegexGuard) -> Result<PropertyPredicate> {
    let children = properties
        .conditions
        .iter()
        .map(|condition| lower_condition(condition, guard))
        .collect::<Result<Vec<_>>>()?;
    Ok(PropertyPredicate::combine(properties.match_criteria, children))
}

/// Lowers a text-search pattern, probing it unless it is a literal.
///
/// # Errors
///
/// Returns the probe's error for unsafe or invalid patterns.
pub fn lower_text(pattern: &str, guard: &RegexGuard) -> Result<TextTest> {
    if let Some(literal) = exact_literal(pattern) {
        return Ok(TextTest::Literal(literal));
    }
    guard.probe("*", pattern)?;
    Ok(TextTest::Pattern(pattern.to_string()))
}

fn lower_condition(condition: &PropertyCondition, guard: &RegexGuard) -> Result<PropertyPredicate> {
    let property = condition.property.as_str();
    if property.is_empty() || property.contains(PATH_SEPARATOR) {
        return Err(bad(property, "property name must be a single non-empty segment"));
    }

    match condition.operator {
        PropertyComparisonOperator::IsNull => {
            return Ok(leaf(property.to_string(), LeafTest::Absent));
        },
        PropertyComparisonOperator::NotNull => {
            return Ok(leaf(property.to_string(), LeafTest::Present));
        },
        _ => {},
    }

    let Some(value) = &condition.value else {
        return Err(bad(
            property,
            &format!("{} requires a value", condition.operator.as_str()),
        ));
    };

    if value.is_container() {
        let mut leaves = Vec::new();
        collect_leaves(property.to_string(), value, &mut leaves);
        if leaves.is_empty() {
            return Err(bad(property, "container value has no leaves to compare"));
        }
        let children = leaves
            .into_iter()
            .map(|(path, leaf_value)| lower_leaf(path, condition.operator, leaf_value, guard))
            .collect::<Result<Vec<_>>>()?;
        return Ok(PropertyPredicate::combine(condition.container_match, children));
    }

    lower_leaf(property.to_string(), condition.operator, value, guard)
}

fn collect_leaves<'a>(path: String, value: &'a PropertyValue, out: &mut Vec<(String, &'a PropertyValue)>) {
    match value {
        PropertyValue::Primitive { .. } | PropertyValue::Enum { .. } => out.push((path, value)),
        PropertyValue::Map { entries: children }
        | PropertyValue::Struct {
            fields: children, ..
        } => {
            for (key, child) in children {
                collect_leaves(format!("{path}{PATH_SEPARATOR}{key}"), child, out);
            }
        },
        PropertyValue::Array { elements } => {
            for (index, child) in elements.iter().enumerate() {
                collect_leaves(format!("{path}{PATH_SEPARATOR}{index}"), child, out);
            }
        },
    }
}

fn lower_leaf(
    path: String,
    operator: PropertyComparisonOperator,
    value: &PropertyValue,
    guard: &RegexGuard,
) -> Result<PropertyPredicate> {
    use PropertyComparisonOperator as Op;

    let operand = match value {
        PropertyValue::Primitive { value } => Operand::from_primitive(value),
        PropertyValue::Enum { symbolic_name, .. } => Operand::Symbol(symbolic_name.clone()),
        _ => return Err(bad(&path, "nested containers are expanded before comparison")),
    };
    if let Operand::Number(n) = &operand
        && !n.is_finite()
    {
        return Err(bad(&path, "numeric values must be finite"));
    }

    let test = match operator {
        Op::Eq => LeafTest::Equals { operand },
        Op::Neq => LeafTest::NotEquals { operand },
        Op::Lt | Op::Lte | Op::Gt | Op::Gte => {
            if !matches!(operand, Operand::Number(_) | Operand::Date(_)) {
                return Err(bad(
                    &path,
                    &format!("{} requires a numeric or date value", operator.as_str()),
                ));
            }
            let op = match operator {
                Op::Lt => RangeOp::Lt,
                Op::Lte => RangeOp::Lte,
                Op::Gt => RangeOp::Gt,
                _ => RangeOp::Gte,
            };
            LeafTest::Compare { op, operand }
        },
        Op::Like | Op::NotLike => {
            let Operand::Text(pattern) = operand else {
                return Err(bad(
                    &path,
                    &format!("{} requires a string value", operator.as_str()),
                ));
            };
            let negated = operator == Op::NotLike;
            match exact_literal(&pattern) {
                Some(literal) if negated => LeafTest::NotEquals {
                    operand: Operand::Text(literal),
                },
                Some(literal) => LeafTest::Equals {
                    operand: Operand::Text(literal),
                },
                None => {
                    guard.probe(&path, &pattern)?;
                    if negated {
                        LeafTest::NotMatches { pattern }
                    } else {
                        LeafTest::Matches { pattern }
                    }
                },
            }
        },
        Op::IsNull => LeafTest::Absent,
        Op::NotNull => LeafTest::Present,
    };
    Ok(leaf(path, test))
}

const fn leaf(path: String, test: LeafTest) -> PropertyPredicate {
    PropertyPredicate::Leaf { path, test }
}

fn bad(property: &str, reason: &str) -> Error {
    Error::BadSearchProperty {
        property: property.to_string(),
        reason: reason.to_string(),
    }
}

/// Checks that a condition kind applies to the target.
pub(crate) fn require_target(
    conditions: &str,
    target: InstanceKind,
    allowed: &[InstanceKind],
) -> Result<()> {
    if allowed.contains(&target) {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "{conditions} conditions do not apply to {target} searches"
        )))
    }
}
