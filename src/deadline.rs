//! Wall-clock budgets for backend queries and traversals.

use crate::{Error, Result};
use std::time::{Duration, Instant};

/// Point in time after which an operation must give up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            expires: Instant::now().checked_add(budget),
            budget,
        }
    }

    /// Deadline that never expires.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            expires: None,
            budget: Duration::MAX,
        }
    }

    /// Returns `true` once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.expires
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// The configured budget.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Fails with [`Error::Timeout`] if the deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] naming `operation`.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_expired() {
            return Err(self.timeout(operation));
        }
        Ok(())
    }

    /// Builds the timeout error for `operation`.
    #[must_use]
    pub fn timeout(&self, operation: &str) -> Error {
        metrics::counter!("metarepo_timeouts_total", "operation" => operation.to_string())
            .increment(1);
        Error::Timeout {
            operation: operation.to_string(),
            budget_ms: u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budget_expires_immediately() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        let err = deadline.check("find_entities").unwrap_err();
        assert!(matches!(err, Error::Timeout { budget_ms: 0, .. }));
    }

    #[test]
    fn test_unbounded_never_expires() {
        let deadline = Deadline::unbounded();
        assert!(!deadline.is_expired());
        assert!(deadline.remaining().is_none());
        assert!(deadline.check("neighborhood").is_ok());
    }

    #[test]
    fn test_generous_budget_has_time_left() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(deadline.remaining().is_some_and(|left| left > Duration::from_secs(1)));
    }
}
