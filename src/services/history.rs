//! History retrieval over most-recent-first cursors.

use crate::models::{Guid, HistoryOrder, PageRequest, Timestamp, Versioned};
use crate::paging::Pager;
use crate::{Error, Result};

/// Time range, page and direction of a history request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Earliest version start to include; unbounded when `None`.
    pub from: Option<Timestamp>,
    /// Versions starting at or after this time are excluded.
    pub to: Option<Timestamp>,
    /// Requested page.
    pub page: PageRequest,
    /// Result direction.
    pub order: HistoryOrder,
}

impl HistoryRequest {
    /// Whole history, newest first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to versions starting in `[from, to)`.
    #[must_use]
    pub const fn between(mut self, from: Option<Timestamp>, to: Option<Timestamp>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// Sets the page.
    #[must_use]
    pub const fn with_page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    /// Sets the direction.
    #[must_use]
    pub const fn with_order(mut self, order: HistoryOrder) -> Self {
        self.order = order;
        self
    }
}

/// Walks a newest-first cursor only as far as the request needs.
///
/// Versions starting at or after `to` are skipped. Walking stops at the first
/// version starting at or before `from`, which is included when it starts
/// exactly at `from`. Backward requests stop once the page is full; forward
/// requests collect the whole range and reverse it.
///
/// # Errors
///
/// Returns [`Error::NotKnown`] when no version falls in the range, or the
/// first error the cursor yields.
pub fn collect<T, I>(
    cursor: I,
    request: &HistoryRequest,
    pager: &Pager,
    kind: &'static str,
    guid: &Guid,
) -> Result<Vec<T>>
where
    T: Versioned,
    I: IntoIterator<Item = Result<T>>,
{
    let needed = match request.order {
        HistoryOrder::Backward => request
            .page
            .from_element
            .saturating_add(pager.page_size(&request.page)),
        HistoryOrder::Forward => usize::MAX,
    };

    let mut versions = Vec::new();
    for version in cursor {
        let version = version?;
        let start = version.header().storage.start;
        if request.to.is_some_and(|to| start >= to) {
            continue;
        }
        let boundary = request.from.is_some_and(|from| start <= from);
        if request.from.is_none_or(|from| start >= from) {
            versions.push(version);
        }
        if boundary || versions.len() >= needed {
            break;
        }
    }

    if versions.is_empty() {
        return Err(Error::NotKnown {
            kind,
            guid: guid.to_string(),
        });
    }
    if request.order == HistoryOrder::Forward {
        versions.reverse();
    }
    Ok(pager.page(versions, &request.page, |v| v.header().version))
}
