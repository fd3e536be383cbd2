//! Observability.
//!
//! The library only emits `tracing` events and `metrics` counters; installing
//! a subscriber is up to the embedding process. [`init_logging`] is a
//! convenience for processes that want the default formatter.
//!
//! | Counter | Labels |
//! |---------|--------|
//! | `metarepo_versions_written_total` | `kind`, `backend` |
//! | `metarepo_proxies_created_total` | `backend` |
//! | `metarepo_searches_total` | `kind`, `backend` |
//! | `metarepo_purges_total` | `kind` |
//! | `metarepo_regex_rejected_total` | `reason` |
//! | `metarepo_timeouts_total` | `operation` |

mod logging;

pub use logging::{DEFAULT_FILTER, LogFormat, LoggingConfig};

use crate::{Error, Result};
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global `tracing` subscriber.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if logging was already initialised in
/// this process; the first subscriber stays in place.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Err(already_initialized());
    }

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .with(config.filter)
            .try_init()
            .map_err(init_error)?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .with(config.filter)
            .try_init()
            .map_err(init_error)?,
    }

    LOGGING_INIT.set(()).map_err(|()| already_initialized())
}

fn already_initialized() -> Error {
    Error::InvalidParameter("logging already initialized".to_string())
}

#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::InvalidParameter(format!("logging initialization failed: {e}"))
}
