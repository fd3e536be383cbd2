//! Property bags and their flattened storage form.
//!
//! Both backends store a property bag as one row per node of the value tree,
//! addressed by a dotted path:
//!
//! | Path | Type code | Value |
//! |------|-----------|-------|
//! | `name` | `string` | `Ann` |
//! | `address` | `map` | (none) |
//! | `address.city` | `string` | `Oslo` |
//! | `tags` | `array` | (none) |
//! | `tags.0` | `enum:2` | `GOLD` |
//! | `point` | `struct:Point` | (none) |
//!
//! Container nodes get a marker row so that empty containers and struct type
//! names survive the round trip. Because `.` is the path separator, property
//! names and map keys must not contain it.

use super::value::{PrimitiveValue, PropertyValue};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Path separator in flattened property names.
pub const PATH_SEPARATOR: char = '.';

/// Ordered mapping of property name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceProperties(BTreeMap<String, PropertyValue>);

impl InstanceProperties {
    /// Creates an empty property bag.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds a property (builder style).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Sets a property, returning the previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.0.insert(name.into(), value.into())
    }

    /// Looks up a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.get(name)
    }

    /// Iterates properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    /// Property names in order.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of top-level properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that every name and map key is usable as a path segment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for empty names, names containing
    /// `.`, or non-finite floats.
    pub fn validate(&self) -> Result<()> {
        self.flatten().map(|_| ())
    }

    /// Flattens the bag into storage rows (parents before children).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for empty names, names containing
    /// `.`, or non-finite floats.
    pub fn flatten(&self) -> Result<Vec<FlatProperty>> {
        let mut rows = Vec::new();
        for (name, value) in &self.0 {
            check_segment(name)?;
            flatten_into(name.clone(), value, &mut rows)?;
        }
        Ok(rows)
    }

    /// Rebuilds a bag from storage rows in any order.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed row: unknown type code,
    /// unparseable value, a child whose parent row is missing, or an array
    /// with gaps.
    pub fn from_flat(
        rows: impl IntoIterator<Item = FlatProperty>,
    ) -> std::result::Result<Self, String> {
        let mut rows: Vec<FlatProperty> = rows.into_iter().collect();
        rows.sort_by(|a, b| a.depth().cmp(&b.depth()).then_with(|| a.path.cmp(&b.path)));

        let mut root: BTreeMap<String, Node> = BTreeMap::new();
        for row in rows {
            let node = Node::from_row(&row)?;
            let segments: Vec<&str> = row.path.split(PATH_SEPARATOR).collect();
            insert_node(&mut root, &segments, node, &row.path)?;
        }

        let mut properties = Self::new();
        for (name, node) in root {
            let value = node.into_value(&name)?;
            properties.0.insert(name, value);
        }
        Ok(properties)
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for InstanceProperties {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One flattened storage row of a property bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatProperty {
    /// Dotted path from the top-level property name.
    pub path: String,
    /// Type code: a primitive code, `enum:<ordinal>`, `map`, `array` or `struct:<name>`.
    pub value_type: String,
    /// Encoded leaf value; `None` for container markers.
    pub value: Option<String>,
}

impl FlatProperty {
    /// Number of path segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.split(PATH_SEPARATOR).count()
    }

    /// Decodes a primitive leaf row.
    #[must_use]
    pub fn primitive(&self) -> Option<PrimitiveValue> {
        self.value
            .as_deref()
            .and_then(|text| PrimitiveValue::decode(&self.value_type, text))
    }

    /// Returns `true` for enum leaf rows.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.value_type.starts_with("enum:")
    }

    /// Returns `true` for string leaf rows.
    #[must_use]
    pub fn is_string(&self) -> bool {
        self.value_type == "string"
    }
}

fn check_segment(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidParameter(
            "property names must not be empty".to_string(),
        ));
    }
    if name.contains(PATH_SEPARATOR) {
        return Err(Error::InvalidParameter(format!(
            "property name '{name}' must not contain '{PATH_SEPARATOR}'"
        )));
    }
    Ok(())
}

fn flatten_into(path: String, value: &PropertyValue, rows: &mut Vec<FlatProperty>) -> Result<()> {
    match value {
        PropertyValue::Primitive { value } => {
            if let PrimitiveValue::Float(f) = value
                && !f.is_finite()
            {
                return Err(Error::InvalidParameter(format!(
                    "property '{path}' must hold a finite float, not {f}"
                )));
            }
            rows.push(FlatProperty {
                path,
                value_type: value.type_code().to_string(),
                value: Some(value.encode()),
            });
        },
        PropertyValue::Enum {
            ordinal,
            symbolic_name,
        } => rows.push(FlatProperty {
            path,
            value_type: format!("enum:{ordinal}"),
            value: Some(symbolic_name.clone()),
        }),
        PropertyValue::Map { entries } => {
            rows.push(marker(&path, "map".to_string()));
            for (key, child) in entries {
                check_segment(key)?;
                flatten_into(format!("{path}{PATH_SEPARATOR}{key}"), child, rows)?;
            }
        },
        PropertyValue::Struct { type_name, fields } => {
            rows.push(marker(&path, format!("struct:{type_name}")));
            for (key, child) in fields {
                check_segment(key)?;
                flatten_into(format!("{path}{PATH_SEPARATOR}{key}"), child, rows)?;
            }
        },
        PropertyValue::Array { elements } => {
            rows.push(marker(&path, "array".to_string()));
            for (index, child) in elements.iter().enumerate() {
                flatten_into(format!("{path}{PATH_SEPARATOR}{index}"), child, rows)?;
            }
        },
    }
    Ok(())
}

fn marker(path: &str, value_type: String) -> FlatProperty {
    FlatProperty {
        path: path.to_string(),
        value_type,
        value: None,
    }
}

fn parse_index(segment: &str, path: &str) -> std::result::Result<usize, String> {
    segment
        .parse()
        .map_err(|_| format!("array element '{path}' has a non-numeric index"))
}

fn no_parent(path: &str) -> String {
    format!("property row '{path}' has no parent container")
}

fn insert_node(
    tree: &mut BTreeMap<String, Node>,
    segments: &[&str],
    node: Node,
    path: &str,
) -> std::result::Result<(), String> {
    let Some((first, rest)) = segments.split_first() else {
        return Err("empty property path".to_string());
    };
    if rest.is_empty() {
        return match tree.insert((*first).to_string(), node) {
            Some(_) => Err(format!("duplicate property row '{path}'")),
            None => Ok(()),
        };
    }
    tree.get_mut(*first)
        .ok_or_else(|| no_parent(path))?
        .insert_child(rest, node, path)
}

/// Intermediate tree used while reassembling rows.
enum Node {
    Leaf(PropertyValue),
    Map(BTreeMap<String, Self>),
    Struct(String, BTreeMap<String, Self>),
    Array(BTreeMap<usize, Self>),
}

impl Node {
    fn from_row(row: &FlatProperty) -> std::result::Result<Self, String> {
        match row.value_type.as_str() {
            "map" => Ok(Self::Map(BTreeMap::new())),
            "array" => Ok(Self::Array(BTreeMap::new())),
            code => {
                if let Some(type_name) = code.strip_prefix("struct:") {
                    return Ok(Self::Struct(type_name.to_string(), BTreeMap::new()));
                }
                let text = row
                    .value
                    .as_deref()
                    .ok_or_else(|| format!("leaf property '{}' has no value", row.path))?;
                if let Some(ordinal) = code.strip_prefix("enum:") {
                    let ordinal = ordinal
                        .parse()
                        .map_err(|_| format!("enum property '{}' has a bad ordinal", row.path))?;
                    return Ok(Self::Leaf(PropertyValue::enumeration(ordinal, text)));
                }
                PrimitiveValue::decode(code, text)
                    .map(|value| Self::Leaf(PropertyValue::primitive(value)))
                    .ok_or_else(|| {
                        format!("property '{}' has undecodable type '{code}'", row.path)
                    })
            },
        }
    }

    fn insert_child(
        &mut self,
        segments: &[&str],
        node: Self,
        path: &str,
    ) -> std::result::Result<(), String> {
        match self {
            Self::Map(entries) | Self::Struct(_, entries) => {
                insert_node(entries, segments, node, path)
            },
            Self::Array(elements) => {
                let Some((first, rest)) = segments.split_first() else {
                    return Err("empty property path".to_string());
                };
                let index = parse_index(first, path)?;
                if rest.is_empty() {
                    return match elements.insert(index, node) {
                        Some(_) => Err(format!("duplicate property row '{path}'")),
                        None => Ok(()),
                    };
                }
                elements
                    .get_mut(&index)
                    .ok_or_else(|| no_parent(path))?
                    .insert_child(rest, node, path)
            },
            Self::Leaf(_) => Err(no_parent(path)),
        }
    }

    fn into_value(self, path: &str) -> std::result::Result<PropertyValue, String> {
        let nested = |entries: BTreeMap<String, Self>| {
            entries
                .into_iter()
                .map(|(key, node)| {
                    let value = node.into_value(&format!("{path}{PATH_SEPARATOR}{key}"))?;
                    Ok((key, value))
                })
                .collect::<std::result::Result<BTreeMap<_, _>, String>>()
        };
        match self {
            Self::Leaf(value) => Ok(value),
            Self::Map(entries) => Ok(PropertyValue::Map {
                entries: nested(entries)?,
            }),
            Self::Struct(type_name, fields) => Ok(PropertyValue::Struct {
                type_name,
                fields: nested(fields)?,
            }),
            Self::Array(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for (expected, (index, node)) in elements.into_iter().enumerate() {
                    if index != expected {
                        return Err(format!("array '{path}' is missing element {expected}"));
                    }
                    values.push(node.into_value(&format!("{path}{PATH_SEPARATOR}{index}"))?);
                }
                Ok(PropertyValue::Array { elements: values })
            },
        }
    }
}
