//! Bitemporal types for instance versioning.
//!
//! Two independent time dimensions are tracked for every stored version:
//!
//! | Dimension | Question Answered | Type |
//! |-----------|-------------------|------|
//! | **Effectivity** | When are these properties business-meaningful? | [`EffectivityWindow`] |
//! | **Storage** | When was this version the repository's current one? | [`StorageWindow`] |
//!
//! # Storage Visibility
//!
//! Storage windows are half-open intervals `[start, end)`. A version is
//! visible at time `T` iff `start <= T` and (`end` is `None` or `T < end`).
//! Within one version chain at most one window has `end == None`.
//!
//! # Example
//!
//! ```rust
//! use metarepo::models::{StorageWindow, Timestamp};
//!
//! let window = StorageWindow::closed(Timestamp::from_millis(10), Timestamp::from_millis(20));
//! assert!(window.contains(Timestamp::from_millis(10)));
//! assert!(!window.contains(Timestamp::from_millis(20)));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Returns epoch milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns this timestamp shifted by `millis` milliseconds.
    #[must_use]
    pub const fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Converts to a `chrono` date-time, if representable.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

/// Interval during which an instance's properties are business-meaningful.
///
/// Independent of storage versioning; both bounds are optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectivityWindow {
    /// Effective from (inclusive), `None` for unbounded past.
    pub from: Option<Timestamp>,
    /// Effective until (exclusive), `None` for unbounded future.
    pub to: Option<Timestamp>,
}

impl EffectivityWindow {
    /// Creates an unbounded window.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            from: None,
            to: None,
        }
    }

    /// Creates a bounded window.
    #[must_use]
    pub const fn between(from: Timestamp, to: Timestamp) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Checks whether `at` falls within `[from, to)`.
    #[must_use]
    pub fn contains(&self, at: Timestamp) -> bool {
        self.from.is_none_or(|f| at >= f) && self.to.is_none_or(|t| at < t)
    }
}

/// Storage-time window of one stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageWindow {
    /// When this version became current (inclusive).
    pub start: Timestamp,
    /// When this version was superseded (exclusive), `None` while current.
    pub end: Option<Timestamp>,
}

impl StorageWindow {
    /// Creates an open (current) window starting at `start`.
    #[must_use]
    pub const fn open(start: Timestamp) -> Self {
        Self { start, end: None }
    }

    /// Creates a closed window.
    #[must_use]
    pub const fn closed(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Returns `true` if this is the current version of its chain.
    #[must_use]
    pub const fn is_current(&self) -> bool {
        self.end.is_none()
    }

    /// Half-open containment test.
    #[must_use]
    pub fn contains(&self, at: Timestamp) -> bool {
        self.start <= at && self.end.is_none_or(|end| at < end)
    }

    /// Visibility under a snapshot.
    #[must_use]
    pub fn visible(&self, snapshot: Snapshot) -> bool {
        match snapshot {
            Snapshot::Current => self.is_current(),
            Snapshot::AsOf(at) => self.contains(at),
        }
    }
}

/// Point-in-time read handle.
///
/// Passed down through every read of one logical operation so that all
/// queries it issues agree on which versions are visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Snapshot {
    /// Current versions only (`end` is `None`).
    #[default]
    Current,
    /// Versions whose storage window contains the given time.
    AsOf(Timestamp),
}

impl Snapshot {
    /// Builds a snapshot from an optional as-of time.
    #[must_use]
    pub const fn from_as_of(as_of: Option<Timestamp>) -> Self {
        match as_of {
            Some(at) => Self::AsOf(at),
            None => Self::Current,
        }
    }

    /// Returns the as-of time, if any.
    #[must_use]
    pub const fn as_of(self) -> Option<Timestamp> {
        match self {
            Self::Current => None,
            Self::AsOf(at) => Some(at),
        }
    }

    /// Resolves [`Self::Current`] to the fixed instant `at`.
    ///
    /// An operation that issues several reads pins its snapshot once so that
    /// writes landing between those reads stay invisible to it.
    #[must_use]
    pub const fn pinned(self, at: Timestamp) -> Self {
        match self {
            Self::Current => Self::AsOf(at),
            as_of @ Self::AsOf(_) => as_of,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn test_storage_window_half_open() {
        let window = StorageWindow::closed(ts(100), ts(200));
        assert!(!window.contains(ts(99)));
        assert!(window.contains(ts(100)));
        assert!(window.contains(ts(199)));
        assert!(!window.contains(ts(200)));
        assert!(!window.is_current());
    }

    #[test]
    fn test_open_window_visibility() {
        let window = StorageWindow::open(ts(100));
        assert!(window.visible(Snapshot::Current));
        assert!(window.visible(Snapshot::AsOf(ts(5_000))));
        assert!(!window.visible(Snapshot::AsOf(ts(50))));
    }

    #[test]
    fn test_closed_window_not_current() {
        let window = StorageWindow::closed(ts(1), ts(2));
        assert!(!window.visible(Snapshot::Current));
    }

    #[test]
    fn test_effectivity_window() {
        assert!(EffectivityWindow::unbounded().contains(ts(0)));
        let window = EffectivityWindow::between(ts(10), ts(20));
        assert!(window.contains(ts(10)));
        assert!(!window.contains(ts(20)));
    }

    #[test]
    fn test_timestamp_display_is_rfc3339() {
        assert_eq!(ts(0).to_string(), "1970-01-01T00:00:00.000Z");
        assert_eq!(ts(5).plus_millis(1), ts(6));
    }

    #[test]
    fn test_snapshot_from_as_of() {
        assert_eq!(Snapshot::from_as_of(None), Snapshot::Current);
        assert_eq!(Snapshot::from_as_of(Some(ts(3))).as_of(), Some(ts(3)));
    }

    #[test]
    fn test_pinned_snapshot_ignores_later_versions() {
        let pinned = Snapshot::Current.pinned(ts(150));
        assert_eq!(pinned, Snapshot::AsOf(ts(150)));
        assert_eq!(Snapshot::AsOf(ts(7)).pinned(ts(150)), Snapshot::AsOf(ts(7)));

        let before = StorageWindow::closed(ts(100), ts(200));
        let after = StorageWindow::open(ts(200));
        assert!(before.visible(pinned));
        assert!(!after.visible(pinned));
    }
}
