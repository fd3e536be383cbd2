//! Typed property values.
//!
//! A property value is a tree: leaves are primitives or enum symbols, inner
//! nodes are maps, arrays or structs of further values.

use super::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Leaf value of a primitive property type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PrimitiveValue {
    /// Boolean.
    Boolean(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Date/time as epoch milliseconds.
    Date(Timestamp),
}

impl PrimitiveValue {
    /// Storage type code for this primitive.
    #[must_use]
    pub const fn type_code(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Date(_) => "date",
        }
    }

    /// Canonical text encoding used by both backends.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::Date(ts) => ts.as_millis().to_string(),
        }
    }

    /// Decodes a value previously produced by [`Self::encode`].
    ///
    /// Returns `None` if the type code is unknown or the text does not parse.
    #[must_use]
    pub fn decode(type_code: &str, text: &str) -> Option<Self> {
        match type_code {
            "boolean" => text.parse().ok().map(Self::Boolean),
            "int" => text.parse().ok().map(Self::Int),
            "float" => text.parse().ok().map(Self::Float),
            "string" => Some(Self::String(text.to_string())),
            "date" => text
                .parse()
                .ok()
                .map(|millis| Self::Date(Timestamp::from_millis(millis))),
            _ => None,
        }
    }

    /// Numeric view used for range comparisons (`int` and `float` only).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Any value a property may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum PropertyValue {
    /// Primitive leaf.
    Primitive {
        /// The primitive value.
        value: PrimitiveValue,
    },
    /// Enumeration symbol.
    Enum {
        /// Ordinal within the enum definition.
        ordinal: i32,
        /// Symbolic name.
        symbolic_name: String,
    },
    /// String-keyed map of nested values.
    Map {
        /// Entries.
        entries: BTreeMap<String, PropertyValue>,
    },
    /// Ordered array of nested values.
    Array {
        /// Elements.
        elements: Vec<PropertyValue>,
    },
    /// Named struct of nested values.
    Struct {
        /// Struct type name.
        type_name: String,
        /// Field values.
        fields: BTreeMap<String, PropertyValue>,
    },
}

impl PropertyValue {
    /// Wraps a primitive.
    #[must_use]
    pub const fn primitive(value: PrimitiveValue) -> Self {
        Self::Primitive { value }
    }

    /// Creates a string value.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::primitive(PrimitiveValue::String(value.into()))
    }

    /// Creates an integer value.
    #[must_use]
    pub const fn int(value: i64) -> Self {
        Self::primitive(PrimitiveValue::Int(value))
    }

    /// Creates a float value.
    #[must_use]
    pub const fn float(value: f64) -> Self {
        Self::primitive(PrimitiveValue::Float(value))
    }

    /// Creates a boolean value.
    #[must_use]
    pub const fn boolean(value: bool) -> Self {
        Self::primitive(PrimitiveValue::Boolean(value))
    }

    /// Creates a date value.
    #[must_use]
    pub const fn date(value: Timestamp) -> Self {
        Self::primitive(PrimitiveValue::Date(value))
    }

    /// Creates an enum value.
    #[must_use]
    pub fn enumeration(ordinal: i32, symbolic_name: impl Into<String>) -> Self {
        Self::Enum {
            ordinal,
            symbolic_name: symbolic_name.into(),
        }
    }

    /// Creates a map value.
    #[must_use]
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Map {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Creates an array value.
    #[must_use]
    pub fn array(elements: impl IntoIterator<Item = Self>) -> Self {
        Self::Array {
            elements: elements.into_iter().collect(),
        }
    }

    /// Creates a struct value.
    #[must_use]
    pub fn structure<K: Into<String>>(
        type_name: impl Into<String>,
        fields: impl IntoIterator<Item = (K, Self)>,
    ) -> Self {
        Self::Struct {
            type_name: type_name.into(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Returns the string content of a primitive string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Primitive {
                value: PrimitiveValue::String(s),
            } => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for map, array and struct values.
    #[must_use]
    pub const fn is_container(&self) -> bool {
        matches!(
            self,
            Self::Map { .. } | Self::Array { .. } | Self::Struct { .. }
        )
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::string(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::boolean(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(PrimitiveValue::Boolean(true); "boolean")]
    #[test_case(PrimitiveValue::Int(-42); "int")]
    #[test_case(PrimitiveValue::Float(0.1); "float")]
    #[test_case(PrimitiveValue::String("it's".to_string()); "string with quote")]
    #[test_case(PrimitiveValue::Date(Timestamp::from_millis(1_700_000_000_123)); "date")]
    fn test_primitive_encoding_is_lossless(value: PrimitiveValue) {
        let decoded = PrimitiveValue::decode(value.type_code(), &value.encode());
        assert_eq!(decoded, Some(value));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(PrimitiveValue::decode("int", "abc"), None);
        assert_eq!(PrimitiveValue::decode("blob", "00"), None);
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(PrimitiveValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(PrimitiveValue::String("3".into()).as_f64(), None);
    }

    #[test]
    fn test_container_detection() {
        assert!(PropertyValue::array([PropertyValue::int(1)]).is_container());
        assert!(!PropertyValue::enumeration(1, "ACTIVE").is_container());
        assert_eq!(PropertyValue::from("x").as_str(), Some("x"));
    }
}
