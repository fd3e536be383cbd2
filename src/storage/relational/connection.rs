//! Connection handling for the `SQLite` backend.
//!
//! Lock acquisition with poison recovery, pragma configuration, the
//! `regexp` scalar function used by LIKE predicates, and the progress
//! handler that enforces query deadlines.

use crate::deadline::Deadline;
use crate::query::sql::REGEXP_FUNCTION;
use crate::regex_guard::build_matcher;
use crate::{Error, Result};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, ErrorCode};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Virtual machine instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// How long a statement waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Acquires the connection mutex, recovering from poisoning.
///
/// A panic inside a previous critical section leaves the connection itself
/// usable; the recovery is logged and counted.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("metarepo_sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Applies pragmas and registers the `regexp` function.
///
/// # Configuration Applied
///
/// - **WAL mode** for concurrent readers alongside one writer
/// - **NORMAL synchronous**
/// - **`busy_timeout`** of 5 seconds
/// - **`foreign_keys`** so property rows cascade with their version
///
/// # Errors
///
/// Returns [`Error::Repository`] if foreign keys cannot be enabled or the
/// function cannot be registered.
pub fn configure_connection(conn: &Connection, repository: &str, size_limit: usize) -> Result<()> {
    // In-memory databases answer "memory" instead of switching to WAL.
    match conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0)) {
        Ok(mode) => tracing::debug!(repository, mode = %mode, "SQLite journal mode set"),
        Err(e) => tracing::warn!(repository, error = %e, "Failed to enable WAL mode"),
    }
    if let Err(e) = conn.pragma_update(None, "synchronous", "NORMAL") {
        tracing::warn!(repository, error = %e, "Failed to set synchronous pragma");
    }
    if let Err(e) = conn.busy_timeout(BUSY_TIMEOUT) {
        tracing::warn!(repository, error = %e, "Failed to set busy timeout");
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::repository("configure_connection", repository, e))?;
    register_regexp(conn, size_limit)
        .map_err(|e| Error::repository("register_regexp", repository, e))
}

/// Registers `regexp(pattern, value)` with full-match semantics.
///
/// The compiled pattern is cached per statement as auxiliary data, so it is
/// built once per query rather than once per row. `NULL` values never match.
fn register_regexp(conn: &Connection, size_limit: usize) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        REGEXP_FUNCTION,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let matcher = ctx.get_or_create_aux(0, |pattern| -> std::result::Result<Regex, BoxError> {
                Ok(build_matcher(pattern.as_str()?, size_limit)?)
            })?;
            let value: Option<String> = ctx.get(1)?;
            Ok(value.is_some_and(|v| matcher.is_match(&v)))
        },
    )
}

/// Installs a deadline on the connection for the lifetime of the guard.
///
/// Statements running past the deadline are interrupted and fail with
/// `SQLITE_INTERRUPT`, which [`map_query_error`] turns into a timeout.
pub struct DeadlineGuard<'c> {
    conn: &'c Connection,
}

impl<'c> DeadlineGuard<'c> {
    /// Installs the progress handler unless the deadline is unbounded.
    pub fn install(conn: &'c Connection, deadline: Deadline) -> Self {
        if deadline.remaining().is_some() {
            let _ = conn.progress_handler(PROGRESS_INTERVAL, Some(move || deadline.is_expired()));
        }
        Self { conn }
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        let _ = self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

/// Maps a query error, turning deadline interrupts into [`Error::Timeout`].
pub fn map_query_error<'a>(
    operation: &'static str,
    repository: &'a str,
    deadline: Deadline,
) -> impl Fn(rusqlite::Error) -> Error + 'a {
    move |e| {
        if e.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
            deadline.timeout(operation)
        } else {
            Error::repository(operation, repository, e)
        }
    }
}
