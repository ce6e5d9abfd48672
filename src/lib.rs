//! Synchronous connection pooling and bound-statement execution over a
//! call-level database driver.
//!
//! The crate is organized around four pieces:
//!
//! - [`driver::Driver`]: the opaque call-level contract a backend implements.
//! - [`pool::Pool`]: a name-keyed pool of [`connection::Connection`]s with
//!   bounded waiting at capacity and idle aging.
//! - [`statement::Statement`]: the executor driving a statement handle
//!   through prepare/bind/execute/fetch, including piecewise transfer of
//!   oversized values.
//! - [`registry::ConnectionRegistry`]: where logical connection names resolve
//!   to connect strings, reloadable at runtime.
//!
//! Datasource definitions can live in memory or in a JSON file:
//!
//! ```rust
//! use sql_sessions::registry::{ConnectionRegistry, DataSourceDefinition, MemoryRegistry};
//!
//! let registry = MemoryRegistry::new();
//! registry.register(DataSourceDefinition {
//!     name: "accounting".into(),
//!     datasource: "ACCT".into(),
//!     username: "app".into(),
//!     password: "${ACCT_PASSWORD}".into(),
//!     connect_string: None,
//!     post_connect: vec!["SET NOCOUNT ON".into()],
//! });
//! assert!(registry.resolve("Accounting").is_some());
//! ```

pub mod connection;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod lock;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod statement;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod values;

pub use connection::{Connection, Transaction};
pub use dialect::{DialectCapabilities, GenericDialect};
pub use driver::{Driver, DriverError, LengthPolicy, SessionCapabilities};
pub use error::SqlSessionError;
pub use lock::{ManualMutex, RawLock, RecursiveGuard, RecursiveLock};
pub use logging::{LogContext, LogLevel, LogSink, TracingSink};
pub use pool::{Lease, MIN_POOL_CONNECTIONS, Pool, PoolConfig};
pub use registry::{ConnectionRegistry, DataSourceDefinition, FileRegistry, MemoryRegistry};
pub use statement::{Statement, StatementConfig};
pub use values::{NativeType, ParamDirection, RebindMap, SqlType, SqlValue};

/// Common imports for embedding applications.
pub mod prelude {
    pub use crate::connection::Connection;
    pub use crate::error::SqlSessionError;
    pub use crate::pool::{Lease, Pool, PoolConfig};
    pub use crate::registry::{ConnectionRegistry, DataSourceDefinition, MemoryRegistry};
    pub use crate::statement::{Statement, StatementConfig};
    pub use crate::values::{SqlType, SqlValue};
}
