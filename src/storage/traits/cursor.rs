//! Lazily evaluated, most-recent-first version cursor.

use crate::Result;
use crate::models::{Timestamp, Versioned};
use std::collections::VecDeque;

/// Fetches up to `limit` versions whose storage start is strictly before
/// `before` (all versions when `None`), newest first.
pub type BatchFetch<'a, T> = Box<dyn FnMut(Option<Timestamp>, usize) -> Result<Vec<T>> + 'a>;

/// Default number of versions fetched per batch.
pub const DEFAULT_HISTORY_BATCH: usize = 16;

/// Iterator over a version chain, newest version first.
///
/// Versions are pulled from the backend in keyset batches on storage start
/// time, so a caller that stops early never materialises the whole chain.
/// A backend error ends the iteration after it is yielded.
pub struct HistoryCursor<'a, T> {
    fetch: BatchFetch<'a, T>,
    buffer: VecDeque<T>,
    before: Option<Timestamp>,
    batch_size: usize,
    exhausted: bool,
}

impl<'a, T: Versioned> HistoryCursor<'a, T> {
    /// Creates a cursor over `fetch`.
    #[must_use]
    pub fn new(batch_size: usize, fetch: BatchFetch<'a, T>) -> Self {
        Self {
            fetch,
            buffer: VecDeque::new(),
            before: None,
            batch_size: batch_size.max(1),
            exhausted: false,
        }
    }

    /// Cursor over an already materialised chain, newest first.
    #[must_use]
    pub fn from_versions(versions: Vec<T>) -> Self
    where
        T: 'a,
    {
        Self {
            fetch: Box::new(|_, _| Ok(Vec::new())),
            buffer: versions.into(),
            before: None,
            batch_size: 1,
            exhausted: true,
        }
    }
}

impl<T: Versioned> Iterator for HistoryCursor<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match (self.fetch)(self.before, self.batch_size) {
                Ok(batch) => {
                    if batch.len() < self.batch_size {
                        self.exhausted = true;
                    }
                    if let Some(last) = batch.last() {
                        self.before = Some(last.header().storage.start);
                    }
                    self.buffer.extend(batch);
                },
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                },
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl<T> std::fmt::Debug for HistoryCursor<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryCursor")
            .field("buffered", &self.buffer.len())
            .field("before", &self.before)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::models::{
        Classification, EffectivityWindow, Guid, InstanceHeader, InstanceProperties,
        InstanceStatus, StorageWindow,
    };
    use std::cell::Cell;

    fn version(v: i64) -> Classification {
        let start = Timestamp::from_millis(v * 10);
        Classification {
            header: InstanceHeader {
                guid: Guid::new("e-1"),
                type_guid: "t-c".to_string(),
                type_name: "Confidential".to_string(),
                version: v,
                status: InstanceStatus::Active,
                metadata_collection_id: "mc".to_string(),
                created_by: "test".to_string(),
                updated_by: None,
                create_time: Timestamp::from_millis(10),
                update_time: None,
                effective: EffectivityWindow::unbounded(),
                storage: StorageWindow::open(start),
            },
            properties: InstanceProperties::new(),
        }
    }

    #[test]
    fn test_cursor_pages_by_start_time() {
        let chain: Vec<Classification> = (1..=5).rev().map(version).collect();
        let calls = Cell::new(0);
        let cursor = HistoryCursor::new(
            2,
            Box::new(|before, limit| {
                calls.set(calls.get() + 1);
                Ok(chain
                    .iter()
                    .filter(|c| before.is_none_or(|b| c.header.storage.start < b))
                    .take(limit)
                    .cloned()
                    .collect())
            }),
        );
        let versions: Vec<i64> = cursor.map(|c| c.unwrap().header.version).collect();
        assert_eq!(versions, vec![5, 4, 3, 2, 1]);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_cursor_stops_early_without_fetching_more() {
        let calls = Cell::new(0);
        let mut cursor = HistoryCursor::new(
            2,
            Box::new(|_, _| {
                calls.set(calls.get() + 1);
                Ok(vec![version(9), version(8)])
            }),
        );
        assert_eq!(cursor.next().unwrap().unwrap().header.version, 9);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_cursor_yields_error_then_ends() {
        let mut cursor: HistoryCursor<'_, Classification> = HistoryCursor::new(
            2,
            Box::new(|_, _| Err(Error::InvalidParameter("boom".to_string()))),
        );
        assert!(cursor.next().unwrap().is_err());
        assert!(cursor.next().is_none());
    }
}
