//! In-memory test doubles.
//!
//! [`ScriptedDriver`] implements the full driver contract against scripted
//! result sets, so pool, transaction, and statement behavior can be exercised
//! without a backend. Available to downstream crates through the `test-utils`
//! feature.

mod driver;

pub use driver::{
    Script, ScriptedDriver, ScriptedSession, ScriptedStmt, col_bytes, col_date, col_int,
    col_numeric, col_text, col_time, col_timestamp, col_wide,
};

use std::sync::Arc;

use crate::registry::{DataSourceDefinition, MemoryRegistry};

/// A memory registry preloaded with plain definitions for each name.
#[must_use]
pub fn registry_with(names: &[&str]) -> Arc<MemoryRegistry> {
    let registry = MemoryRegistry::new();
    for name in names {
        registry.register(DataSourceDefinition {
            name: (*name).to_owned(),
            datasource: format!("{name}-dsn"),
            username: "tester".into(),
            password: String::new(),
            connect_string: None,
            post_connect: Vec::new(),
        });
    }
    Arc::new(registry)
}
