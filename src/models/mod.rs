//! Data models for the metadata repository.
//!
//! Instances (entities, relationships, classifications), their property-value
//! trees, bitemporal windows and the abstract search condition model.

mod entity;
mod instance;
mod properties;
mod relationship;
pub mod search;
pub mod temporal;
mod value;

pub use entity::{Classification, Entity, EntityProxy};
pub use instance::{Guid, InstanceHeader, InstanceKind, InstanceStatus, Versioned};
pub use properties::{FlatProperty, InstanceProperties, PATH_SEPARATOR};
pub use relationship::Relationship;
pub use search::{
    ClassificationCondition, HistoryOrder, MatchCriteria, PageRequest, PropertyComparisonOperator,
    PropertyCondition, SearchClassifications, SearchProperties, SequencingOrder, StatusFilter,
    TypeFilter,
};
pub use temporal::{EffectivityWindow, Snapshot, StorageWindow, Timestamp};
pub use value::{PrimitiveValue, PropertyValue};
