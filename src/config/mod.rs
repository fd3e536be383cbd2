//! Configuration management.
//!
//! A [`RepositoryConfig`] is built from defaults, optionally a TOML file, then
//! `METAREPO_*` environment variables, in that order:
//!
//! ```toml
//! repository_name = "local"
//! query_timeout_ms = 10000
//!
//! [backend]
//! kind = "sqlite"
//! path = "/var/lib/metarepo/repo.db"
//!
//! [logging]
//! format = "json"
//! filter = "metarepo=debug"
//! ```
//!
//! | Variable | Field |
//! |----------|-------|
//! | `METAREPO_REPOSITORY_NAME` | `repository_name` |
//! | `METAREPO_METADATA_COLLECTION_ID` | `metadata_collection_id` |
//! | `METAREPO_BACKEND` | backend kind (`sqlite` or `document`) |
//! | `METAREPO_SQLITE_PATH` | `SQLite` database path |
//! | `METAREPO_REGEX_PROBE_BUDGET_MS` | `regex_probe_budget_ms` |
//! | `METAREPO_QUERY_TIMEOUT_MS` | `query_timeout_ms` |
//! | `METAREPO_MAX_TRAVERSAL_DEPTH` | `max_traversal_depth` |
//! | `METAREPO_MAX_PAGE_SIZE` | `max_page_size` |
//! | `METAREPO_DEFAULT_PAGE_SIZE` | `default_page_size` |

use crate::deadline::Deadline;
use crate::paging::Pager;
use crate::regex_guard::RegexGuard;
use crate::storage::BackendContext;
use crate::types::TypeRegistry;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Which store backs the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Relational backend; in memory when `path` is `None`.
    Sqlite {
        /// Database file.
        path: Option<PathBuf>,
    },
    /// In-process bitemporal document store.
    Document,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Sqlite { path: None }
    }
}

impl BackendKind {
    /// Parses a backend name, keeping `path` for `sqlite`.
    #[must_use]
    pub fn parse(name: &str, path: Option<PathBuf>) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "sqlite" | "relational" => Some(Self::Sqlite { path }),
            "document" | "datalog" => Some(Self::Document),
            _ => None,
        }
    }
}

/// Logging settings as read from the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// `EnvFilter` directive used when neither `METAREPO_LOG` nor `RUST_LOG` is set.
    pub filter: Option<String>,
}

/// Main configuration for a repository.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Name used in errors and logs.
    pub repository_name: String,
    /// Metadata collection that owns locally written instances.
    pub metadata_collection_id: String,
    /// Backend selection.
    pub backend: BackendKind,
    /// Wall-clock budget of the regex probe.
    pub regex_probe_budget_ms: u64,
    /// Wall-clock budget of a search or traversal.
    pub query_timeout_ms: u64,
    /// Depth cap for unbounded neighborhood searches and path searches.
    pub max_traversal_depth: usize,
    /// Largest page a caller may request.
    pub max_page_size: usize,
    /// Page size used when the caller asks for 0.
    pub default_page_size: usize,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Repository name.
    pub repository_name: Option<String>,
    /// Metadata collection id.
    pub metadata_collection_id: Option<String>,
    /// Backend section.
    pub backend: Option<ConfigFileBackend>,
    /// Regex probe budget.
    pub regex_probe_budget_ms: Option<u64>,
    /// Query timeout.
    pub query_timeout_ms: Option<u64>,
    /// Traversal depth cap.
    pub max_traversal_depth: Option<usize>,
    /// Maximum page size.
    pub max_page_size: Option<usize>,
    /// Default page size.
    pub default_page_size: Option<usize>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

/// Backend section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileBackend {
    /// `sqlite` or `document`.
    pub kind: Option<String>,
    /// `SQLite` database path.
    pub path: Option<String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            repository_name: "metarepo".to_string(),
            metadata_collection_id: uuid::Uuid::new_v4().to_string(),
            backend: BackendKind::default(),
            regex_probe_budget_ms: 500,
            query_timeout_ms: 30_000,
            max_traversal_depth: 40,
            max_page_size: 1_000,
            default_page_size: 100,
            logging: LoggingSettings::default(),
        }
    }
}

impl RepositoryConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the file cannot be read or
    /// parsed, or names an unknown backend.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidParameter(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let file: ConfigFile = toml::from_str(&contents).map_err(|e| {
            Error::InvalidParameter(format!("cannot parse config file {}: {e}", path.display()))
        })?;
        Self::from_config_file(file)
    }

    /// Converts a parsed [`ConfigFile`] over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an unknown backend kind.
    pub fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(name) = file.repository_name {
            config.repository_name = name;
        }
        if let Some(id) = file.metadata_collection_id {
            config.metadata_collection_id = id;
        }
        if let Some(backend) = file.backend {
            let path = backend.path.map(PathBuf::from);
            config.backend = match backend.kind {
                Some(kind) => BackendKind::parse(&kind, path).ok_or_else(|| {
                    Error::InvalidParameter(format!("unknown backend kind '{kind}'"))
                })?,
                None => BackendKind::Sqlite { path },
            };
        }
        if let Some(v) = file.regex_probe_budget_ms {
            config.regex_probe_budget_ms = v;
        }
        if let Some(v) = file.query_timeout_ms {
            config.query_timeout_ms = v;
        }
        if let Some(v) = file.max_traversal_depth {
            config.max_traversal_depth = v;
        }
        if let Some(v) = file.max_page_size {
            config.max_page_size = v;
        }
        if let Some(v) = file.default_page_size {
            config.default_page_size = v;
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        Ok(config)
    }

    /// Applies `METAREPO_*` environment variables.
    #[must_use]
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any variable source.
    ///
    /// Values that do not parse are ignored with a warning.
    #[must_use]
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(name) = string("METAREPO_REPOSITORY_NAME") {
            self.repository_name = name;
        }
        if let Some(id) = string("METAREPO_METADATA_COLLECTION_ID") {
            self.metadata_collection_id = id;
        }
        let path = string("METAREPO_SQLITE_PATH").map(PathBuf::from);
        if let Some(kind) = string("METAREPO_BACKEND") {
            let path = path.or_else(|| match &self.backend {
                BackendKind::Sqlite { path } => path.clone(),
                BackendKind::Document => None,
            });
            match BackendKind::parse(&kind, path) {
                Some(backend) => self.backend = backend,
                None => tracing::warn!(value = %kind, "Ignoring unknown METAREPO_BACKEND"),
            }
        } else if let Some(path) = path
            && let BackendKind::Sqlite { path: current } = &mut self.backend
        {
            *current = Some(path);
        }

        if let Some(v) = parse_env(&string, "METAREPO_REGEX_PROBE_BUDGET_MS") {
            self.regex_probe_budget_ms = v;
        }
        if let Some(v) = parse_env(&string, "METAREPO_QUERY_TIMEOUT_MS") {
            self.query_timeout_ms = v;
        }
        if let Some(v) = parse_env(&string, "METAREPO_MAX_TRAVERSAL_DEPTH") {
            self.max_traversal_depth = v;
        }
        if let Some(v) = parse_env(&string, "METAREPO_MAX_PAGE_SIZE") {
            self.max_page_size = v;
        }
        if let Some(v) = parse_env(&string, "METAREPO_DEFAULT_PAGE_SIZE") {
            self.default_page_size = v;
        }

        self
    }

    /// Sets the backend.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the repository name.
    #[must_use]
    pub fn with_repository_name(mut self, name: impl Into<String>) -> Self {
        self.repository_name = name.into();
        self
    }

    /// Sets the query timeout.
    #[must_use]
    pub const fn with_query_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.query_timeout_ms = timeout_ms;
        self
    }

    /// Sets the regex probe budget.
    #[must_use]
    pub const fn with_regex_probe_budget_ms(mut self, budget_ms: u64) -> Self {
        self.regex_probe_budget_ms = budget_ms;
        self
    }

    /// Regex guard with the configured probe budget.
    #[must_use]
    pub const fn regex_guard(&self) -> RegexGuard {
        RegexGuard::new(Duration::from_millis(self.regex_probe_budget_ms))
    }

    /// Deadline starting now with the configured query timeout.
    #[must_use]
    pub fn query_deadline(&self) -> Deadline {
        Deadline::after(Duration::from_millis(self.query_timeout_ms))
    }

    /// Pager with the configured page sizes.
    #[must_use]
    pub fn pager(&self) -> Pager {
        Pager::new(self.max_page_size, self.default_page_size)
    }

    /// Backend context for this configuration.
    #[must_use]
    pub fn backend_context(&self, types: Arc<TypeRegistry>) -> BackendContext {
        BackendContext::new(
            self.repository_name.clone(),
            self.metadata_collection_id.clone(),
            types,
            self.regex_guard(),
        )
    }
}

fn parse_env<T: std::str::FromStr>(
    string: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = string(key)?;
    let parsed = raw.parse().ok();
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "Ignoring unparsable configuration override");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::default();
        assert_eq!(config.repository_name, "metarepo");
        assert_eq!(config.regex_probe_budget_ms, 500);
        assert_eq!(config.query_timeout_ms, 30_000);
        assert_eq!(config.max_traversal_depth, 40);
        assert_eq!(config.backend, BackendKind::Sqlite { path: None });
        assert_ne!(
            config.metadata_collection_id,
            RepositoryConfig::default().metadata_collection_id
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
repository_name = "cohort-a"
max_page_size = 50

[backend]
kind = "document"

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = RepositoryConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.repository_name, "cohort-a");
        assert_eq!(config.max_page_size, 50);
        assert_eq!(config.backend, BackendKind::Document);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
        assert_eq!(config.default_page_size, 100);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let file: ConfigFile = toml::from_str("[backend]\nkind = \"mongo\"").unwrap();
        assert!(matches!(
            RepositoryConfig::from_config_file(file),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = RepositoryConfig::load_from_file(Path::new("/nonexistent/metarepo.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("METAREPO_REPOSITORY_NAME", "from-env"),
            ("METAREPO_SQLITE_PATH", "/tmp/repo.db"),
            ("METAREPO_QUERY_TIMEOUT_MS", "250"),
            ("METAREPO_MAX_TRAVERSAL_DEPTH", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = RepositoryConfig::default()
            .apply_overrides(|key| vars.get(key).map(ToString::to_string));
        assert_eq!(config.repository_name, "from-env");
        assert_eq!(config.query_timeout_ms, 250);
        assert_eq!(config.max_traversal_depth, 40);
        assert_eq!(
            config.backend,
            BackendKind::Sqlite {
                path: Some(PathBuf::from("/tmp/repo.db"))
            }
        );
    }

    #[test]
    fn test_backend_override_switches_kind() {
        let config = RepositoryConfig::default()
            .apply_overrides(|key| (key == "METAREPO_BACKEND").then(|| "document".to_string()));
        assert_eq!(config.backend, BackendKind::Document);
    }
}
