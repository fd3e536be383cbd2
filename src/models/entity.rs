//! Entities, entity proxies and classifications.

use super::instance::{Guid, InstanceHeader, Versioned};
use super::properties::InstanceProperties;
use serde::{Deserialize, Serialize};

/// One stored version of an entity.
///
/// Proxy records carry only the identifying properties known from a
/// relationship end; `is_proxy` distinguishes them from full records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Version header.
    pub header: InstanceHeader,
    /// Property bag of this version.
    pub properties: InstanceProperties,
    /// Classifications visible alongside this version.
    pub classifications: Vec<Classification>,
    /// `true` if only a stub is held for this GUID.
    pub is_proxy: bool,
}

impl Entity {
    /// Builds the proxy that represents this entity at a relationship end.
    #[must_use]
    pub fn to_proxy(&self) -> EntityProxy {
        EntityProxy {
            guid: self.header.guid.clone(),
            type_guid: self.header.type_guid.clone(),
            type_name: self.header.type_name.clone(),
            unique_properties: self.properties.clone(),
        }
    }

    /// Finds a classification by name.
    #[must_use]
    pub fn classification(&self, name: &str) -> Option<&Classification> {
        self.classifications.iter().find(|c| c.name() == name)
    }

    /// Names of attached classifications.
    pub fn classification_names(&self) -> impl Iterator<Item = &str> {
        self.classifications.iter().map(Classification::name)
    }
}

impl Versioned for Entity {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }
}

/// Minimal stand-in for an entity referenced by a relationship end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProxy {
    /// Entity GUID.
    pub guid: Guid,
    /// Entity type GUID.
    pub type_guid: String,
    /// Entity type name.
    pub type_name: String,
    /// Identifying properties, usually just the qualified name.
    pub unique_properties: InstanceProperties,
}

impl EntityProxy {
    /// Creates a proxy with no identifying properties.
    #[must_use]
    pub fn new(guid: Guid, type_guid: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            guid,
            type_guid: type_guid.into(),
            type_name: type_name.into(),
            unique_properties: InstanceProperties::new(),
        }
    }

    /// Adds identifying properties.
    #[must_use]
    pub fn with_unique_properties(mut self, properties: InstanceProperties) -> Self {
        self.unique_properties = properties;
        self
    }
}

/// One stored version of a classification on an entity.
///
/// Keyed by (entity GUID, classification name); `header.guid` is the entity
/// GUID and `header.type_name` the classification name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Version header.
    pub header: InstanceHeader,
    /// Property bag of this version.
    pub properties: InstanceProperties,
}

impl Classification {
    /// Classification name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.header.type_name
    }

    /// GUID of the classified entity.
    #[must_use]
    pub const fn entity_guid(&self) -> &Guid {
        &self.header.guid
    }
}

impl Versioned for Classification {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }
}
