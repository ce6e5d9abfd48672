//! Datasource definitions and where they come from.
//!
//! The pool resolves a logical connection name to credentials and a connect
//! string through a [`ConnectionRegistry`]. On a resolution miss the pool asks
//! the registry to reload once before giving up, so definitions added to
//! external storage are picked up without a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SqlSessionError;
use crate::lock::relock;

/// One registered datasource: everything needed to open a physical session
/// under a logical name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSourceDefinition {
    /// Logical connection name; matching is case-insensitive.
    pub name: String,
    /// Physical datasource identifier (DSN or equivalent).
    pub datasource: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Full connect string; when absent one is assembled from the fields
    /// above.
    #[serde(default)]
    pub connect_string: Option<String>,
    /// Statements executed right after the session opens.
    #[serde(default)]
    pub post_connect: Vec<String>,
}

impl DataSourceDefinition {
    /// The connect string handed to the driver, with `${VAR}` environment
    /// placeholders expanded.
    #[must_use]
    pub fn effective_connect_string(&self) -> String {
        match &self.connect_string {
            Some(explicit) => expand_env_placeholders(explicit),
            None => {
                let mut cs = format!("DSN={};UID={}", self.datasource, self.username);
                if !self.password.is_empty() {
                    cs.push_str(";PWD=");
                    cs.push_str(&self.password);
                }
                expand_env_placeholders(&cs)
            }
        }
    }
}

/// Replace `${NAME}` with the value of environment variable `NAME`.
/// Unset variables are left in place so the failure surfaces in the driver's
/// connect diagnostics rather than as an empty credential.
#[must_use]
pub fn expand_env_placeholders(input: &str) -> String {
    static PLACEHOLDER: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    });
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_owned())
    })
    .into_owned()
}

/// Source of datasource definitions.
pub trait ConnectionRegistry: Send + Sync {
    /// Re-read definitions from backing storage. `reset` discards the current
    /// set first. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns `SqlSessionError::ConfigError` when backing storage cannot be
    /// read or parsed.
    fn load_definitions(&self, reset: bool) -> Result<bool, SqlSessionError>;

    /// Look up a definition by logical name (case-insensitive).
    fn resolve(&self, name: &str) -> Option<DataSourceDefinition>;
}

/// Registry held entirely in memory; definitions are registered by the
/// embedding application.
#[derive(Default)]
pub struct MemoryRegistry {
    defs: Mutex<HashMap<String, DataSourceDefinition>>,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, def: DataSourceDefinition) {
        relock(&self.defs).insert(def.name.to_ascii_lowercase(), def);
    }

    pub fn remove(&self, name: &str) {
        relock(&self.defs).remove(&name.to_ascii_lowercase());
    }
}

impl ConnectionRegistry for MemoryRegistry {
    fn load_definitions(&self, _reset: bool) -> Result<bool, SqlSessionError> {
        // Nothing external to reload.
        Ok(false)
    }

    fn resolve(&self, name: &str) -> Option<DataSourceDefinition> {
        relock(&self.defs).get(&name.to_ascii_lowercase()).cloned()
    }
}

/// Registry backed by a JSON file holding an array of definitions.
/// Reloadable at runtime, which is what makes hot reconfiguration work.
pub struct FileRegistry {
    path: PathBuf,
    defs: Mutex<HashMap<String, DataSourceDefinition>>,
}

impl FileRegistry {
    /// Open a registry over `path` and load it once.
    ///
    /// # Errors
    ///
    /// Returns `SqlSessionError::ConfigError` if the file cannot be read or
    /// parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqlSessionError> {
        let registry = Self {
            path: path.as_ref().to_path_buf(),
            defs: Mutex::new(HashMap::new()),
        };
        registry.load_definitions(true)?;
        Ok(registry)
    }
}

impl ConnectionRegistry for FileRegistry {
    fn load_definitions(&self, reset: bool) -> Result<bool, SqlSessionError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            SqlSessionError::ConfigError(format!(
                "cannot read datasource registry {}: {e}",
                self.path.display()
            ))
        })?;
        let parsed: Vec<DataSourceDefinition> = serde_json::from_str(&raw).map_err(|e| {
            SqlSessionError::ConfigError(format!(
                "malformed datasource registry {}: {e}",
                self.path.display()
            ))
        })?;

        let mut defs = relock(&self.defs);
        let before = defs.clone();
        if reset {
            defs.clear();
        }
        for def in parsed {
            defs.insert(def.name.to_ascii_lowercase(), def);
        }
        Ok(*defs != before)
    }

    fn resolve(&self, name: &str) -> Option<DataSourceDefinition> {
        relock(&self.defs).get(&name.to_ascii_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn def(name: &str) -> DataSourceDefinition {
        DataSourceDefinition {
            name: name.into(),
            datasource: format!("{name}-dsn"),
            username: "app".into(),
            password: "secret".into(),
            connect_string: None,
            post_connect: Vec::new(),
        }
    }

    #[test]
    fn memory_registry_is_case_insensitive() {
        let reg = MemoryRegistry::new();
        reg.register(def("Accounting"));
        assert!(reg.resolve("ACCOUNTING").is_some());
        assert!(reg.resolve("accounting").is_some());
        assert!(reg.resolve("other").is_none());
    }

    #[test]
    fn connect_string_assembled_when_absent() {
        let d = def("a");
        assert_eq!(d.effective_connect_string(), "DSN=a-dsn;UID=app;PWD=secret");
    }

    #[test]
    fn env_placeholders_expand() {
        let path = std::env::var("PATH").unwrap_or_default();
        let expanded = expand_env_placeholders("P=${PATH};X=${SQL_SESSIONS_NO_SUCH_VAR}");
        assert_eq!(expanded, format!("P={path};X=${{SQL_SESSIONS_NO_SUCH_VAR}}"));
    }

    #[test]
    fn file_registry_reloads_new_definitions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name":"first","datasource":"d1","username":"u","password":"p"}}]"#
        )
        .unwrap();
        file.flush().unwrap();

        let reg = FileRegistry::open(file.path()).unwrap();
        assert!(reg.resolve("first").is_some());
        assert!(reg.resolve("second").is_none());

        // Rewrite the backing file and reload.
        let mut handle = std::fs::File::create(file.path()).unwrap();
        write!(
            handle,
            r#"[{{"name":"first","datasource":"d1","username":"u","password":"p"}},
               {{"name":"second","datasource":"d2","username":"u","password":"p"}}]"#
        )
        .unwrap();
        handle.flush().unwrap();

        assert!(reg.load_definitions(false).unwrap());
        assert!(reg.resolve("second").is_some());
    }
}
