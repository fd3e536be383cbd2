//! Construction of caller-facing elements from stored instances.
//!
//! A [`ConversionContext`] carries everything a conversion may need, and an
//! [`ElementKind`] picks the constructor. Well-known properties are read
//! through a [`PropertyReader`]; whatever it did not consume becomes the
//! element's extended properties.
//!
//! | Kind | Needs | Produces |
//! |------|-------|----------|
//! | `Summary` | entity | [`ElementSummary`] |
//! | `Related` | entity, relationships | one [`RelatedElement`] per relationship |

use crate::models::{
    Entity, EntityProxy, Guid, InstanceProperties, InstanceStatus, PrimitiveValue, PropertyValue,
    Relationship, Timestamp,
};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Unique name property.
pub const QUALIFIED_NAME: &str = "qualifiedName";
/// Display name property.
pub const DISPLAY_NAME: &str = "displayName";
/// Fallback display name property.
pub const NAME: &str = "name";
/// Description property.
pub const DESCRIPTION: &str = "description";
/// Free-form string map property.
pub const ADDITIONAL_PROPERTIES: &str = "additionalProperties";

/// Reads properties without mutating the bag, tracking what was consumed.
#[derive(Debug)]
pub struct PropertyReader<'p> {
    properties: &'p InstanceProperties,
    consumed: BTreeSet<String>,
}

impl<'p> PropertyReader<'p> {
    /// Creates a reader with nothing consumed.
    #[must_use]
    pub const fn new(properties: &'p InstanceProperties) -> Self {
        Self {
            properties,
            consumed: BTreeSet::new(),
        }
    }

    /// Takes a value of any kind.
    pub fn take(&mut self, name: &str) -> Option<&'p PropertyValue> {
        let value = self.properties.get(name)?;
        self.consumed.insert(name.to_string());
        Some(value)
    }

    /// Takes a string value; other kinds are left unconsumed.
    pub fn take_string(&mut self, name: &str) -> Option<String> {
        match self.properties.get(name)? {
            PropertyValue::Primitive {
                value: PrimitiveValue::String(s),
            } => {
                self.consumed.insert(name.to_string());
                Some(s.clone())
            },
            _ => None,
        }
    }

    /// Takes an integer value; other kinds are left unconsumed.
    pub fn take_int(&mut self, name: &str) -> Option<i64> {
        match self.properties.get(name)? {
            PropertyValue::Primitive {
                value: PrimitiveValue::Int(i),
            } => {
                self.consumed.insert(name.to_string());
                Some(*i)
            },
            _ => None,
        }
    }

    /// Takes a map whose entries are all strings.
    pub fn take_string_map(&mut self, name: &str) -> Option<BTreeMap<String, String>> {
        let PropertyValue::Map { entries } = self.properties.get(name)? else {
            return None;
        };
        let map = entries
            .iter()
            .map(|(key, value)| match value {
                PropertyValue::Primitive {
                    value: PrimitiveValue::String(s),
                } => Some((key.clone(), s.clone())),
                _ => None,
            })
            .collect::<Option<BTreeMap<_, _>>>()?;
        self.consumed.insert(name.to_string());
        Some(map)
    }

    /// Returns `true` if `name` was consumed.
    #[must_use]
    pub fn is_consumed(&self, name: &str) -> bool {
        self.consumed.contains(name)
    }

    /// The bag minus every consumed property.
    #[must_use]
    pub fn extended_properties(&self) -> InstanceProperties {
        let mut extended = InstanceProperties::new();
        for (name, value) in self.properties.iter() {
            if !self.consumed.contains(name) {
                extended.insert(name.clone(), value.clone());
            }
        }
        extended
    }
}

/// Which element a conversion builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// [`ElementSummary`] of the context entity.
    Summary,
    /// [`RelatedElement`]s around the context entity.
    Related,
}

/// Inputs of one conversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionContext<'a> {
    /// Anchor entity.
    pub entity: Option<&'a Entity>,
    /// Relationships of the anchor entity.
    pub relationships: &'a [Relationship],
    /// Classification names to report; all when `None`.
    pub classification_filter: Option<&'a [String]>,
}

impl<'a> ConversionContext<'a> {
    /// Context anchored on `entity`.
    #[must_use]
    pub const fn for_entity(entity: &'a Entity) -> Self {
        Self {
            entity: Some(entity),
            relationships: &[],
            classification_filter: None,
        }
    }

    /// Adds the anchor's relationships.
    #[must_use]
    pub const fn with_relationships(mut self, relationships: &'a [Relationship]) -> Self {
        self.relationships = relationships;
        self
    }

    /// Reports only the named classifications.
    #[must_use]
    pub const fn with_classification_filter(mut self, names: &'a [String]) -> Self {
        self.classification_filter = Some(names);
        self
    }

    fn anchor(&self) -> Result<&'a Entity> {
        self.entity
            .ok_or_else(|| Error::InvalidParameter("conversion needs an entity".to_string()))
    }
}

/// Header fields and well-known properties of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSummary {
    /// Entity GUID.
    pub guid: Guid,
    /// Type name.
    pub type_name: String,
    /// Version number.
    pub version: i64,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Creator.
    pub created_by: String,
    /// Last updater.
    pub updated_by: Option<String>,
    /// Creation time.
    pub create_time: Timestamp,
    /// Last update time.
    pub update_time: Option<Timestamp>,
    /// `qualifiedName`.
    pub qualified_name: Option<String>,
    /// `displayName`, else `name`.
    pub display_name: Option<String>,
    /// `description`.
    pub description: Option<String>,
    /// `additionalProperties`.
    pub additional_properties: BTreeMap<String, String>,
    /// Reported classification names.
    pub classifications: Vec<String>,
    /// Properties not mapped to a field.
    pub extended_properties: InstanceProperties,
}

/// Minimal view of the entity at the far end of a relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementStub {
    /// Entity GUID.
    pub guid: Guid,
    /// Type name.
    pub type_name: String,
    /// `qualifiedName` from the proxy, if carried.
    pub qualified_name: Option<String>,
}

impl From<&EntityProxy> for ElementStub {
    fn from(proxy: &EntityProxy) -> Self {
        Self {
            guid: proxy.guid.clone(),
            type_name: proxy.type_name.clone(),
            qualified_name: PropertyReader::new(&proxy.unique_properties)
                .take_string(QUALIFIED_NAME),
        }
    }
}

/// One relationship seen from the anchor entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedElement {
    /// Relationship GUID.
    pub relationship_guid: Guid,
    /// Relationship type name.
    pub relationship_type: String,
    /// Relationship properties.
    pub relationship_properties: InstanceProperties,
    /// `true` if the anchor is end 1.
    pub anchor_at_end1: bool,
    /// The entity at the other end.
    pub related: ElementStub,
}

/// Result of a conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Entity summary.
    Summary(ElementSummary),
    /// Related elements.
    Related(Vec<RelatedElement>),
}

/// Builds the element selected by `kind`.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if the context lacks an entity, or a
/// relationship does not touch it.
pub fn convert(kind: ElementKind, context: &ConversionContext<'_>) -> Result<Element> {
    match kind {
        ElementKind::Summary => summary(context).map(Element::Summary),
        ElementKind::Related => related(context).map(Element::Related),
    }
}

fn summary(context: &ConversionContext<'_>) -> Result<ElementSummary> {
    let entity = context.anchor()?;
    let header = &entity.header;
    let mut reader = PropertyReader::new(&entity.properties);
    let qualified_name = reader.take_string(QUALIFIED_NAME);
    let display_name = reader
        .take_string(DISPLAY_NAME)
        .or_else(|| reader.take_string(NAME));
    let description = reader.take_string(DESCRIPTION);
    let additional_properties = reader
        .take_string_map(ADDITIONAL_PROPERTIES)
        .unwrap_or_default();

    let classifications = entity
        .classification_names()
        .filter(|name| {
            context
                .classification_filter
                .is_none_or(|names| names.iter().any(|n| n == name))
        })
        .map(str::to_string)
        .collect();

    Ok(ElementSummary {
        guid: header.guid.clone(),
        type_name: header.type_name.clone(),
        version: header.version,
        status: header.status,
        created_by: header.created_by.clone(),
        updated_by: header.updated_by.clone(),
        create_time: header.create_time,
        update_time: header.update_time,
        qualified_name,
        display_name,
        description,
        additional_properties,
        classifications,
        extended_properties: reader.extended_properties(),
    })
}

fn related(context: &ConversionContext<'_>) -> Result<Vec<RelatedElement>> {
    let anchor = &context.anchor()?.header.guid;
    context
        .relationships
        .iter()
        .map(|relationship| {
            let other = relationship.other_end(anchor).ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "relationship '{}' does not touch entity '{anchor}'",
                    relationship.header.guid
                ))
            })?;
            Ok(RelatedElement {
                relationship_guid: relationship.header.guid.clone(),
                relationship_type: relationship.header.type_name.clone(),
                relationship_properties: relationship.properties.clone(),
                anchor_at_end1: &relationship.end1.guid == anchor,
                related: ElementStub::from(other),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, EffectivityWindow, InstanceHeader, StorageWindow};

    fn header(guid: &str, type_name: &str) -> InstanceHeader {
        InstanceHeader {
            guid: Guid::new(guid),
            type_guid: format!("t-{type_name}"),
            type_name: type_name.to_string(),
            version: 2,
            status: InstanceStatus::Active,
            metadata_collection_id: "mc".to_string(),
            created_by: "alice".to_string(),
            updated_by: Some("bob".to_string()),
            create_time: Timestamp::from_millis(1),
            update_time: Some(Timestamp::from_millis(2)),
            effective: EffectivityWindow::unbounded(),
            storage: StorageWindow::open(Timestamp::from_millis(2)),
        }
    }

    fn glossary() -> Entity {
        let extra = PropertyValue::map([("owner".to_string(), PropertyValue::string("team-a"))]);
        Entity {
            header: header("g-1", "Glossary"),
            properties: InstanceProperties::new()
                .with(QUALIFIED_NAME, "glossary::finance")
                .with(NAME, "Finance")
                .with("language", "en")
                .with(ADDITIONAL_PROPERTIES, extra),
            classifications: vec![
                Classification {
                    header: header("g-1", "Confidential"),
                    properties: InstanceProperties::new(),
                },
                Classification {
                    header: header("g-1", "Anchors"),
                    properties: InstanceProperties::new(),
                },
            ],
            is_proxy: false,
        }
    }

    #[test]
    fn test_reader_tracks_consumed_keys() {
        let properties = InstanceProperties::new()
            .with("a", "x")
            .with("b", 3_i64)
            .with("c", true);
        let mut reader = PropertyReader::new(&properties);
        assert_eq!(reader.take_string("a").as_deref(), Some("x"));
        assert_eq!(reader.take_string("b"), None);
        assert_eq!(reader.take_int("b"), Some(3));
        assert!(reader.take("missing").is_none());

        let extended = reader.extended_properties();
        assert_eq!(extended.names().collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(properties.len(), 3);
    }

    #[test]
    fn test_summary() {
        let entity = glossary();
        let Element::Summary(summary) =
            convert(ElementKind::Summary, &ConversionContext::for_entity(&entity)).unwrap()
        else {
            panic!("expected a summary");
        };
        assert_eq!(summary.qualified_name.as_deref(), Some("glossary::finance"));
        assert_eq!(summary.display_name.as_deref(), Some("Finance"));
        assert_eq!(summary.additional_properties["owner"], "team-a");
        assert_eq!(summary.classifications, vec!["Confidential", "Anchors"]);
        assert_eq!(
            summary.extended_properties,
            InstanceProperties::new().with("language", "en")
        );
        assert_eq!(summary.updated_by.as_deref(), Some("bob"));
    }

    #[test]
    fn test_classification_filter() {
        let entity = glossary();
        let wanted = vec!["Anchors".to_string()];
        let context = ConversionContext::for_entity(&entity).with_classification_filter(&wanted);
        let Element::Summary(summary) = convert(ElementKind::Summary, &context).unwrap() else {
            panic!("expected a summary");
        };
        assert_eq!(summary.classifications, vec!["Anchors"]);
    }

    #[test]
    fn test_related_elements() {
        let entity = glossary();
        let term = EntityProxy::new(Guid::new("t-1"), "t-Term", "Term").with_unique_properties(
            InstanceProperties::new().with(QUALIFIED_NAME, "term::revenue"),
        );
        let relationships = vec![Relationship {
            header: header("r-1", "TermAnchor"),
            properties: InstanceProperties::new(),
            end1: entity.to_proxy(),
            end2: term,
        }];
        let context = ConversionContext::for_entity(&entity).with_relationships(&relationships);
        let Element::Related(related) = convert(ElementKind::Related, &context).unwrap() else {
            panic!("expected related elements");
        };
        assert_eq!(related.len(), 1);
        assert!(related[0].anchor_at_end1);
        assert_eq!(related[0].related.guid.as_str(), "t-1");
        assert_eq!(related[0].related.qualified_name.as_deref(), Some("term::revenue"));
    }

    #[test]
    fn test_missing_entity_is_rejected() {
        let result = convert(ElementKind::Summary, &ConversionContext::default());
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
