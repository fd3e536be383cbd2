//! Cost probe for caller-supplied regular expressions.
//!
//! LIKE / NOT_LIKE operands and text-search patterns are regular expressions
//! with full-string match semantics. Before a pattern reaches a backend it is
//! built and run once against a fixed benign probe string inside a worker
//! thread; if that does not finish inside the probe budget the request fails
//! with [`Error::Timeout`].
//!
//! The `regex` engine matches in linear time, so the expensive part is
//! construction. A pattern whose compiled program exceeds the size limit is
//! treated the same as one that overruns the budget. This bounds the cost of
//! building the matcher only; backend evaluation is bounded separately by the
//! query deadline.
//!
//! Patterns that are plain literals (no metacharacters, or wrapped in
//! `\Q...\E`) are detected so translators can use equality instead.

use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::sync::mpsc;
use std::time::Duration;

/// Benign 60-character string every pattern is probed against.
pub const PROBE_TEXT: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa!";

/// Default probe budget.
pub const DEFAULT_PROBE_BUDGET: Duration = Duration::from_millis(500);

/// Default limit on the compiled program size, in bytes.
pub const DEFAULT_SIZE_LIMIT: usize = 1 << 20;

static QUOTED_LITERAL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\\Q((?s:.)*?)\\E$").ok());

/// Builds the full-match matcher both backends evaluate.
///
/// # Errors
///
/// Returns the `regex` build error unchanged.
pub fn build_matcher(pattern: &str, size_limit: usize) -> std::result::Result<Regex, regex::Error> {
    // The bare pattern must stand alone, otherwise `a)|(b` would escape the anchors.
    RegexBuilder::new(pattern)
        .size_limit(size_limit)
        .dfa_size_limit(size_limit)
        .build()?;
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .size_limit(size_limit)
        .dfa_size_limit(size_limit)
        .build()
}

/// Returns the literal text if `pattern` can only match that exact string.
#[must_use]
pub fn exact_literal(pattern: &str) -> Option<String> {
    if let Some(caps) = QUOTED_LITERAL.as_ref().and_then(|re| re.captures(pattern)) {
        let inner = caps.get(1).map_or("", |m| m.as_str());
        if !inner.contains(r"\E") {
            return Some(inner.to_string());
        }
    }
    (regex::escape(pattern) == pattern).then(|| pattern.to_string())
}

/// Probes regular expressions under a wall-clock budget.
#[derive(Debug, Clone, Copy)]
pub struct RegexGuard {
    budget: Duration,
    size_limit: usize,
}

impl Default for RegexGuard {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_BUDGET)
    }
}

impl RegexGuard {
    /// Creates a guard with the given budget and the default size limit.
    #[must_use]
    pub const fn new(budget: Duration) -> Self {
        Self {
            budget,
            size_limit: DEFAULT_SIZE_LIMIT,
        }
    }

    /// Overrides the compiled program size limit.
    #[must_use]
    pub const fn with_size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Probe budget.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Compiled program size limit.
    #[must_use]
    pub const fn size_limit(&self) -> usize {
        self.size_limit
    }

    /// Checks that `pattern` is valid and cheap enough to evaluate.
    ///
    /// `property` names the condition for error reporting.
    ///
    /// # Errors
    ///
    /// - [`Error::BadSearchProperty`] if the pattern does not parse
    /// - [`Error::Timeout`] if construction plus the probe match overruns the
    ///   budget or the compiled program is too large
    pub fn probe(&self, property: &str, pattern: &str) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let owned = pattern.to_string();
        let size_limit = self.size_limit;

        std::thread::spawn(move || {
            let outcome = build_matcher(&owned, size_limit).map(|re| re.is_match(PROBE_TEXT));
            // Receiver is gone after a timeout; nothing to report then.
            let _ = tx.send(outcome);
        });

        match rx.recv_timeout(self.budget) {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(regex::Error::CompiledTooBig(limit))) => {
                metrics::counter!("metarepo_regex_rejected_total", "reason" => "too_big")
                    .increment(1);
                tracing::debug!(property, limit, "Regex program exceeds size limit");
                Err(self.timeout())
            },
            Ok(Err(e)) => {
                metrics::counter!("metarepo_regex_rejected_total", "reason" => "syntax")
                    .increment(1);
                Err(Error::BadSearchProperty {
                    property: property.to_string(),
                    reason: format!("invalid regular expression: {e}"),
                })
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {
                metrics::counter!("metarepo_regex_rejected_total", "reason" => "timeout")
                    .increment(1);
                tracing::debug!(property, "Regex probe timed out, worker will finish in background");
                Err(self.timeout())
            },
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::BadSearchProperty {
                property: property.to_string(),
                reason: "regular expression probe aborted".to_string(),
            }),
        }
    }

    /// Builds the matcher for evaluation, using this guard's size limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadSearchProperty`] if the pattern does not build.
    pub fn matcher(&self, property: &str, pattern: &str) -> Result<Regex> {
        build_matcher(pattern, self.size_limit).map_err(|e| Error::BadSearchProperty {
            property: property.to_string(),
            reason: format!("invalid regular expression: {e}"),
        })
    }

    fn timeout(&self) -> Error {
        Error::Timeout {
            operation: "regex_probe".to_string(),
            budget_ms: u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_probe_text_length() {
        assert_eq!(PROBE_TEXT.len(), 60);
    }

    #[test]
    fn test_benign_pattern_passes() {
        let guard = RegexGuard::default();
        assert!(guard.probe("name", "^ABC.*").is_ok());
        assert!(guard.probe("name", "(a+)+$").is_ok());
    }

    #[test]
    fn test_nested_counted_repetition_times_out() {
        let guard = RegexGuard::default();
        let started = Instant::now();
        let err = guard.probe("name", "((a{100}){100}){100}").unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() <= DEFAULT_PROBE_BUDGET + Duration::from_millis(250));
    }

    #[test]
    fn test_syntax_error_is_bad_search_property() {
        let err = RegexGuard::default().probe("name", "(unclosed").unwrap_err();
        assert!(matches!(err, Error::BadSearchProperty { .. }));
    }

    #[test]
    fn test_matcher_is_full_match() {
        let re = RegexGuard::default().matcher("name", "An+").unwrap();
        assert!(re.is_match("Ann"));
        assert!(!re.is_match("Anne"));
    }

    #[test]
    fn test_exact_literal_detection() {
        assert_eq!(exact_literal("Ann"), Some("Ann".to_string()));
        assert_eq!(exact_literal(r"\Qa.b*\E"), Some("a.b*".to_string()));
        assert_eq!(exact_literal("A.*"), None);
        assert_eq!(exact_literal(r"\Qa\Eb\E"), None);
    }
}
