//! Relationships between entities.

use super::entity::EntityProxy;
use super::instance::{Guid, InstanceHeader, Versioned};
use super::properties::InstanceProperties;
use serde::{Deserialize, Serialize};

/// One stored version of a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Version header.
    pub header: InstanceHeader,
    /// Property bag of this version.
    pub properties: InstanceProperties,
    /// First end.
    pub end1: EntityProxy,
    /// Second end.
    pub end2: EntityProxy,
}

impl Relationship {
    /// Returns the end opposite to `guid`, or `None` if `guid` is not an end.
    ///
    /// For a self-relationship both ends are the same entity.
    #[must_use]
    pub fn other_end(&self, guid: &Guid) -> Option<&EntityProxy> {
        if &self.end1.guid == guid {
            Some(&self.end2)
        } else if &self.end2.guid == guid {
            Some(&self.end1)
        } else {
            None
        }
    }

    /// Returns `true` if `guid` is one of the ends.
    #[must_use]
    pub fn touches(&self, guid: &Guid) -> bool {
        &self.end1.guid == guid || &self.end2.guid == guid
    }
}

impl Versioned for Relationship {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }
}
