//! RAII lease over a pooled connection.

use std::ops::Deref;
use std::sync::Arc;

use crate::connection::Connection;
use crate::driver::Driver;
use crate::error::SqlSessionError;
use crate::pool::Pool;

/// A connection checked out of a [`Pool`], returned on drop.
///
/// A lease can also wrap an externally managed connection, in which case drop
/// does nothing; this lets statement code treat both identically.
pub struct Lease<'p, D: Driver> {
    pool: Option<&'p Pool<D>>,
    conn: Arc<Connection<D>>,
    returned: bool,
}

impl<'p, D: Driver> Lease<'p, D> {
    pub(crate) fn pooled(pool: &'p Pool<D>, conn: Arc<Connection<D>>) -> Self {
        Self {
            pool: Some(pool),
            conn,
            returned: false,
        }
    }

    /// Wrap a connection the caller owns; the pool never sees it back.
    #[must_use]
    pub fn external(conn: Arc<Connection<D>>) -> Self {
        Self {
            pool: None,
            conn,
            returned: false,
        }
    }

    /// Shared handle to the underlying connection.
    #[must_use]
    pub fn connection(&self) -> Arc<Connection<D>> {
        Arc::clone(&self.conn)
    }

    /// Return the connection now, surfacing any pool error the silent drop
    /// path would swallow.
    ///
    /// # Errors
    ///
    /// `PoolClosed` if the pool shut down while the lease was out.
    pub fn release(mut self) -> Result<(), SqlSessionError> {
        self.returned = true;
        match self.pool {
            Some(pool) => pool.release_connection(Arc::clone(&self.conn)),
            None => Ok(()),
        }
    }
}

impl<D: Driver> std::fmt::Debug for Lease<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("connection", &self.conn.name())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl<D: Driver> Deref for Lease<'_, D> {
    type Target = Connection<D>;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<D: Driver> Drop for Lease<'_, D> {
    fn drop(&mut self) {
        if !self.returned {
            if let Some(pool) = self.pool {
                let _ = pool.release_connection(Arc::clone(&self.conn));
            }
        }
    }
}
