use thiserror::Error;

use crate::driver::DriverError;

#[derive(Debug, Error)]
pub enum SqlSessionError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Maximum connections reached after {attempts} attempts")]
    MaxConnectionsReached { attempts: u32 },

    #[error("No datasource definition found for '{0}'")]
    UnknownDataSource(String),

    #[error("Parameter binding error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Feature not supported by driver: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlSessionError {
    /// Wrap a driver failure in an execution error carrying a context prefix
    /// plus the concatenated diagnostic records.
    pub(crate) fn execution(context: &str, err: &DriverError) -> Self {
        SqlSessionError::ExecutionError(format!("{context}: {err}"))
    }
}
