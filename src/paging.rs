//! Result ordering, deduplication and paging.
//!
//! Backends may return the same instance more than once (a relationship
//! reached from both ends, an entity matched through two classifications).
//! The [`Pager`] keeps the first occurrence of each key, then skips
//! `from_element` survivors and takes at most one page.
//!
//! Ordering mirrors the relational backend so that both backends agree on
//! every order except [`SequencingOrder::Any`]:
//!
//! | Value | Sorts as |
//! |-------|----------|
//! | missing property, container | null (first ascending, last descending) |
//! | `int`, `float`, `date` | number |
//! | `string`, `boolean`, enum | text, byte-wise |
//!
//! Ties always break on GUID ascending.

use crate::models::{
    Classification, Entity, InstanceProperties, PageRequest, PrimitiveValue, PropertyValue,
    Relationship, SequencingOrder, Versioned,
};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;

/// Instances that carry a property bag.
pub trait HasProperties: Versioned {
    /// The version's property bag.
    fn properties(&self) -> &InstanceProperties;
}

impl HasProperties for Entity {
    fn properties(&self) -> &InstanceProperties {
        &self.properties
    }
}

impl HasProperties for Relationship {
    fn properties(&self) -> &InstanceProperties {
        &self.properties
    }
}

impl HasProperties for Classification {
    fn properties(&self) -> &InstanceProperties {
        &self.properties
    }
}

/// One sort key component.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    /// No comparable value.
    Null,
    /// Numeric or date value.
    Number(f64),
    /// Textual value.
    Text(String),
}

impl SortValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Number(_) => 1,
            Self::Text(_) => 2,
        }
    }

    /// Sort value of a top-level property.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of_property(value: Option<&PropertyValue>) -> Self {
        match value {
            Some(PropertyValue::Primitive { value }) => match value {
                PrimitiveValue::Int(_) | PrimitiveValue::Float(_) => {
                    value.as_f64().map_or(Self::Null, Self::Number)
                },
                PrimitiveValue::Date(ts) => Self::Number(ts.as_millis() as f64),
                PrimitiveValue::Boolean(_) | PrimitiveValue::String(_) => {
                    Self::Text(value.encode())
                },
            },
            Some(PropertyValue::Enum { symbolic_name, .. }) => Self::Text(symbolic_name.clone()),
            _ => Self::Null,
        }
    }
}

impl Eq for SortValue {}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn sort_value<T: HasProperties>(item: &T, order: &SequencingOrder) -> SortValue {
    let header = item.header();
    match order {
        SequencingOrder::Any | SequencingOrder::Guid => SortValue::Null,
        SequencingOrder::CreationDateRecent | SequencingOrder::CreationDateOldest => {
            SortValue::Number(header.create_time.as_millis() as f64)
        },
        SequencingOrder::LastUpdateRecent | SequencingOrder::LastUpdateOldest => SortValue::Number(
            header.update_time.unwrap_or(header.create_time).as_millis() as f64,
        ),
        SequencingOrder::PropertyAscending(name) | SequencingOrder::PropertyDescending(name) => {
            SortValue::of_property(item.properties().get(name))
        },
    }
}

const fn descending(order: &SequencingOrder) -> bool {
    matches!(
        order,
        SequencingOrder::CreationDateRecent
            | SequencingOrder::LastUpdateRecent
            | SequencingOrder::PropertyDescending(_)
    )
}

/// Compares two instances under `order`, breaking ties on GUID.
pub fn compare<T: HasProperties>(a: &T, b: &T, order: &SequencingOrder) -> Ordering {
    let primary = sort_value(a, order).cmp(&sort_value(b, order));
    let primary = if descending(order) {
        primary.reverse()
    } else {
        primary
    };
    primary.then_with(|| a.guid().as_str().cmp(b.guid().as_str()))
}

/// Sorts in place; [`SequencingOrder::Any`] keeps the input order.
pub fn sort<T: HasProperties>(items: &mut [T], order: &SequencingOrder) {
    if *order == SequencingOrder::Any {
        return;
    }
    items.sort_by(|a, b| compare(a, b, order));
}

/// Deduplicating pager with configured size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    max_page_size: usize,
    default_page_size: usize,
}

impl Pager {
    /// Creates a pager. A default larger than the maximum is clamped.
    #[must_use]
    pub fn new(max_page_size: usize, default_page_size: usize) -> Self {
        let max_page_size = max_page_size.max(1);
        Self {
            max_page_size,
            default_page_size: default_page_size.clamp(1, max_page_size),
        }
    }

    /// Page size actually used for a request.
    #[must_use]
    pub fn page_size(&self, request: &PageRequest) -> usize {
        match request.page_size {
            0 => self.default_page_size,
            n => n.min(self.max_page_size),
        }
    }

    /// Keeps the first occurrence of each key, skips and takes one page.
    pub fn page<T, K, I>(&self, items: I, request: &PageRequest, key: impl Fn(&T) -> K) -> Vec<T>
    where
        I: IntoIterator<Item = T>,
        K: Eq + Hash,
    {
        let mut seen = HashSet::new();
        items
            .into_iter()
            .filter(|item| seen.insert(key(item)))
            .skip(request.from_element)
            .take(self.page_size(request))
            .collect()
    }
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(1_000, 100)
    }
}
