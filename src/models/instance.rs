//! Instance identity and headers.

use super::temporal::{EffectivityWindow, Snapshot, StorageWindow, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Globally unique identifier of one logical instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Guid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle status of an instance version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Status not set.
    Unknown,
    /// Being drafted.
    Draft,
    /// Proposed for approval.
    Proposed,
    /// In use.
    Active,
    /// Soft-deleted.
    Deleted,
}

impl InstanceStatus {
    /// All statuses in ordinal order.
    pub const ALL: [Self; 5] = [
        Self::Unknown,
        Self::Draft,
        Self::Proposed,
        Self::Active,
        Self::Deleted,
    ];

    /// Storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Draft => "DRAFT",
            Self::Proposed => "PROPOSED",
            Self::Active => "ACTIVE",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown instance status '{s}'"))
    }
}

/// The three versioned instance kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    /// Graph node.
    Entity,
    /// Graph edge between two entities.
    Relationship,
    /// Independently versioned facet attached to an entity.
    Classification,
}

impl InstanceKind {
    /// Lower-case name, used in errors and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Relationship => "relationship",
            Self::Classification => "classification",
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header fields shared by every stored version of every instance kind.
///
/// For classifications `guid` is the classified entity's GUID and
/// `type_name` is the classification name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHeader {
    /// Instance identifier.
    pub guid: Guid,
    /// GUID of the instance's type definition.
    pub type_guid: String,
    /// Name of the instance's type definition.
    pub type_name: String,
    /// Version number, starting at 1 and increasing by 1 per stored version.
    pub version: i64,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Metadata collection that owns the instance.
    pub metadata_collection_id: String,
    /// Creator identity.
    pub created_by: String,
    /// Identity behind the latest update, if any.
    pub updated_by: Option<String>,
    /// When version 1 was created.
    pub create_time: Timestamp,
    /// When this version was written, if it is not version 1.
    pub update_time: Option<Timestamp>,
    /// Business effectivity of the properties.
    pub effective: EffectivityWindow,
    /// Storage window of this version.
    pub storage: StorageWindow,
}

impl InstanceHeader {
    /// Returns `true` if this version is visible under `snapshot`.
    #[must_use]
    pub fn visible(&self, snapshot: Snapshot) -> bool {
        self.storage.visible(snapshot)
    }

    /// Builds the header of the next version, written by `user` at `start`.
    #[must_use]
    pub fn next_version(&self, user: &str, start: Timestamp) -> Self {
        Self {
            version: self.version + 1,
            updated_by: Some(user.to_string()),
            update_time: Some(start),
            storage: StorageWindow::open(start),
            ..self.clone()
        }
    }

    /// Start time for a version that supersedes this one.
    ///
    /// Strictly after this version's start so chains stay ordered even when
    /// the clock does not advance between writes.
    #[must_use]
    pub fn successor_start(&self, now: Timestamp) -> Timestamp {
        now.max(self.storage.start.plus_millis(1))
    }
}

/// Access to the header of any versioned instance.
pub trait Versioned {
    /// The version's header.
    fn header(&self) -> &InstanceHeader;

    /// Shorthand for the GUID.
    fn guid(&self) -> &Guid {
        &self.header().guid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(start: i64) -> InstanceHeader {
        InstanceHeader {
            guid: Guid::new("g-1"),
            type_guid: "t-1".to_string(),
            type_name: "Person".to_string(),
            version: 1,
            status: InstanceStatus::Active,
            metadata_collection_id: "local".to_string(),
            created_by: "alice".to_string(),
            updated_by: None,
            create_time: Timestamp::from_millis(start),
            update_time: None,
            effective: EffectivityWindow::unbounded(),
            storage: StorageWindow::open(Timestamp::from_millis(start)),
        }
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in InstanceStatus::ALL {
            assert_eq!(status.as_str().parse::<InstanceStatus>(), Ok(status));
        }
        assert!("gone".parse::<InstanceStatus>().is_err());
    }

    #[test]
    fn test_successor_start_is_strictly_later() {
        let h = header(1_000);
        assert_eq!(
            h.successor_start(Timestamp::from_millis(1_000)),
            Timestamp::from_millis(1_001)
        );
        assert_eq!(
            h.successor_start(Timestamp::from_millis(5_000)),
            Timestamp::from_millis(5_000)
        );
    }

    #[test]
    fn test_next_version_keeps_identity() {
        let h = header(1_000);
        let next = h.next_version("bob", Timestamp::from_millis(2_000));
        assert_eq!(next.guid, h.guid);
        assert_eq!(next.version, 2);
        assert_eq!(next.created_by, "alice");
        assert_eq!(next.updated_by.as_deref(), Some("bob"));
        assert!(next.storage.is_current());
    }

    #[test]
    fn test_generated_guids_differ() {
        assert_ne!(Guid::generate(), Guid::generate());
    }
}
