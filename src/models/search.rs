//! Backend-independent query conditions.
//!
//! These objects are built per request and never persisted. The query
//! translators lower them into SQL fragments or Datalog clauses.
//!
//! # Match Criteria
//!
//! | Criteria | Meaning |
//! |----------|---------|
//! | `All` | every condition holds |
//! | `Any` | at least one condition holds |
//! | `None` | no condition holds (each condition is logically negated) |
//!
//! A condition whose value is a map, array or struct expands into one leaf
//! condition per primitive or enum leaf, combined with the condition's own
//! `container_match`. Under `None` the combined container result is negated
//! as a whole, so `None` over an `Any` container means "no leaf matches".

use super::instance::InstanceStatus;
use super::value::PropertyValue;
use serde::{Deserialize, Serialize};

/// Combinator for a list of conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchCriteria {
    /// All conditions must hold.
    #[default]
    All,
    /// At least one condition must hold.
    Any,
    /// No condition may hold.
    None,
}

/// Comparison operator of a property condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyComparisonOperator {
    /// Equal.
    Eq,
    /// Not equal.
    Neq,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Full-string regular expression match.
    Like,
    /// Negated regular expression match.
    NotLike,
    /// Property absent.
    IsNull,
    /// Property present.
    NotNull,
}

impl PropertyComparisonOperator {
    /// Operator name as used in diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Neq => "NEQ",
            Self::Lt => "LT",
            Self::Lte => "LTE",
            Self::Gt => "GT",
            Self::Gte => "GTE",
            Self::Like => "LIKE",
            Self::NotLike => "NOT_LIKE",
            Self::IsNull => "IS_NULL",
            Self::NotNull => "NOT_NULL",
        }
    }

    /// Returns `true` for operators that take no value.
    #[must_use]
    pub const fn is_nullity(self) -> bool {
        matches!(self, Self::IsNull | Self::NotNull)
    }

    /// Returns `true` for ordering comparisons.
    #[must_use]
    pub const fn is_range(self) -> bool {
        matches!(self, Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }
}

/// One comparison against a named property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyCondition {
    /// Top-level property name.
    pub property: String,
    /// Comparison operator.
    pub operator: PropertyComparisonOperator,
    /// Operand; `None` only for `IS_NULL` / `NOT_NULL`.
    pub value: Option<PropertyValue>,
    /// How leaves of a container operand combine.
    #[serde(default)]
    pub container_match: MatchCriteria,
}

impl PropertyCondition {
    /// Creates a condition with an operand.
    #[must_use]
    pub fn new(
        property: impl Into<String>,
        operator: PropertyComparisonOperator,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self {
            property: property.into(),
            operator,
            value: Some(value.into()),
            container_match: MatchCriteria::All,
        }
    }

    /// `property == value`.
    #[must_use]
    pub fn eq(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::new(property, PropertyComparisonOperator::Eq, value)
    }

    /// `property` matches the regular expression.
    #[must_use]
    pub fn like(property: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(
            property,
            PropertyComparisonOperator::Like,
            PropertyValue::string(pattern),
        )
    }

    /// `property` is absent.
    #[must_use]
    pub fn is_null(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            operator: PropertyComparisonOperator::IsNull,
            value: None,
            container_match: MatchCriteria::All,
        }
    }

    /// `property` is present.
    #[must_use]
    pub fn not_null(property: impl Into<String>) -> Self {
        Self {
            operator: PropertyComparisonOperator::NotNull,
            ..Self::is_null(property)
        }
    }

    /// Sets how leaves of a container operand combine.
    #[must_use]
    pub const fn with_container_match(mut self, criteria: MatchCriteria) -> Self {
        self.container_match = criteria;
        self
    }
}

/// A list of property conditions under one match criteria.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchProperties {
    /// Conditions.
    pub conditions: Vec<PropertyCondition>,
    /// How conditions combine.
    pub match_criteria: MatchCriteria,
}

impl SearchProperties {
    /// Every condition must hold.
    #[must_use]
    pub fn all(conditions: impl IntoIterator<Item = PropertyCondition>) -> Self {
        Self {
            conditions: conditions.into_iter().collect(),
            match_criteria: MatchCriteria::All,
        }
    }

    /// At least one condition must hold.
    #[must_use]
    pub fn any(conditions: impl IntoIterator<Item = PropertyCondition>) -> Self {
        Self {
            match_criteria: MatchCriteria::Any,
            ..Self::all(conditions)
        }
    }

    /// No condition may hold.
    #[must_use]
    pub fn none(conditions: impl IntoIterator<Item = PropertyCondition>) -> Self {
        Self {
            match_criteria: MatchCriteria::None,
            ..Self::all(conditions)
        }
    }
}

/// Condition on one named classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationCondition {
    /// Classification name.
    pub name: String,
    /// Optional conditions on the classification's properties.
    pub properties: Option<SearchProperties>,
}

impl ClassificationCondition {
    /// The entity carries the classification.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: None,
        }
    }

    /// Restricts the classification's properties.
    #[must_use]
    pub fn with_properties(mut self, properties: SearchProperties) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// A list of classification conditions under one match criteria.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchClassifications {
    /// Conditions.
    pub conditions: Vec<ClassificationCondition>,
    /// How conditions combine.
    pub match_criteria: MatchCriteria,
}

impl SearchClassifications {
    /// Creates a classification search.
    #[must_use]
    pub fn new(
        conditions: impl IntoIterator<Item = ClassificationCondition>,
        match_criteria: MatchCriteria,
    ) -> Self {
        Self {
            conditions: conditions.into_iter().collect(),
            match_criteria,
        }
    }
}

/// Restriction on instance types.
///
/// With neither field set, all types of the target category are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFilter {
    /// Type GUID whose transitive subtypes are accepted.
    pub type_guid: Option<String>,
    /// Explicit subtype GUIDs, each expanded to its own subtypes.
    pub subtype_guids: Vec<String>,
}

impl TypeFilter {
    /// Accepts any type of the target category.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Accepts `type_guid` and its subtypes.
    #[must_use]
    pub fn of(type_guid: impl Into<String>) -> Self {
        Self {
            type_guid: Some(type_guid.into()),
            subtype_guids: Vec::new(),
        }
    }

    /// Restricts to explicit subtypes.
    #[must_use]
    pub fn with_subtypes(mut self, subtypes: impl IntoIterator<Item = String>) -> Self {
        self.subtype_guids = subtypes.into_iter().collect();
        self
    }
}

/// Restriction on instance status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFilter {
    /// Accepted statuses; empty means every status except `DELETED`.
    pub statuses: Vec<InstanceStatus>,
}

impl StatusFilter {
    /// Accepts exactly the given statuses.
    #[must_use]
    pub fn only(statuses: impl IntoIterator<Item = InstanceStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }

    /// The statuses this filter accepts.
    #[must_use]
    pub fn accepted(&self) -> Vec<InstanceStatus> {
        if self.statuses.is_empty() {
            InstanceStatus::ALL
                .into_iter()
                .filter(|s| *s != InstanceStatus::Deleted)
                .collect()
        } else {
            self.statuses.clone()
        }
    }
}

/// Result ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencingOrder {
    /// Backend order.
    #[default]
    Any,
    /// By GUID ascending.
    Guid,
    /// Newest creation first.
    CreationDateRecent,
    /// Oldest creation first.
    CreationDateOldest,
    /// Most recently updated first.
    LastUpdateRecent,
    /// Least recently updated first.
    LastUpdateOldest,
    /// By a top-level primitive property, ascending.
    PropertyAscending(String),
    /// By a top-level primitive property, descending.
    PropertyDescending(String),
}

/// Requested slice of a result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Number of leading (deduplicated) results to skip.
    pub from_element: usize,
    /// Maximum results to return; 0 means the configured default. Larger
    /// values are clamped to the configured maximum.
    pub page_size: usize,
}

impl PageRequest {
    /// Creates a page request.
    #[must_use]
    pub const fn new(from_element: usize, page_size: usize) -> Self {
        Self {
            from_element,
            page_size,
        }
    }

    /// Returns `true` if the caller asked for a bounded slice.
    #[must_use]
    pub const fn is_paged(&self) -> bool {
        self.from_element > 0 || self.page_size > 0
    }

    /// Order to apply: paging without an order sorts newest creation first.
    #[must_use]
    pub fn effective_order(&self, order: &SequencingOrder) -> SequencingOrder {
        match order {
            SequencingOrder::Any if self.is_paged() => SequencingOrder::CreationDateRecent,
            other => other.clone(),
        }
    }
}

/// Direction of history results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrder {
    /// Oldest version first.
    Forward,
    /// Newest version first.
    #[default]
    Backward,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_filter_excludes_deleted() {
        let accepted = StatusFilter::default().accepted();
        assert!(accepted.contains(&InstanceStatus::Active));
        assert!(!accepted.contains(&InstanceStatus::Deleted));

        let explicit = StatusFilter::only([InstanceStatus::Deleted]).accepted();
        assert_eq!(explicit, vec![InstanceStatus::Deleted]);
    }

    #[test]
    fn test_paging_defaults_to_recent_creation() {
        let page = PageRequest::new(0, 10);
        assert_eq!(
            page.effective_order(&SequencingOrder::Any),
            SequencingOrder::CreationDateRecent
        );
        assert_eq!(
            PageRequest::default().effective_order(&SequencingOrder::Any),
            SequencingOrder::Any
        );
        assert_eq!(
            page.effective_order(&SequencingOrder::Guid),
            SequencingOrder::Guid
        );
    }

    #[test]
    fn test_condition_builders() {
        let cond = PropertyCondition::not_null("name");
        assert_eq!(cond.operator, PropertyComparisonOperator::NotNull);
        assert!(cond.value.is_none());
        assert!(cond.operator.is_nullity());

        let props = SearchProperties::none([PropertyCondition::eq("name", "Ann")]);
        assert_eq!(props.match_criteria, MatchCriteria::None);
    }
}
