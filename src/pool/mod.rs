//! Name-keyed connection pool.
//!
//! The pool owns every [`Connection`] it creates (the all-list) and keeps the
//! idle ones in per-name deques (the free-list). Leases reuse the most
//! recently returned connection; cleanup ages connections out from the other
//! end of the deque. At capacity a lease first triggers an aggressive cleanup,
//! then waits in bounded one-second slices for a return before giving up.

mod config;
mod lease;

pub use config::{MIN_POOL_CONNECTIONS, PoolConfig};
pub use lease::Lease;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::connection::Connection;
use crate::dialect::{DialectCapabilities, GenericDialect};
use crate::driver::Driver;
use crate::error::SqlSessionError;
use crate::lock::relock;
use crate::logging::LogContext;
use crate::registry::ConnectionRegistry;
use crate::values::{NativeType, RebindMap, SqlType};

struct PoolInner<D: Driver> {
    open: bool,
    max_connections: usize,
    /// Open connections across all names, leased or free.
    open_count: usize,
    /// Every connection the pool ever created and has not discarded.
    all: HashMap<String, Vec<Arc<Connection<D>>>>,
    /// Idle connections: returned at the back, aged out from the front.
    free: HashMap<String, VecDeque<Arc<Connection<D>>>>,
    default_param_rebinds: RebindMap,
    default_column_rebinds: RebindMap,
}

/// Pool of connections keyed by case-insensitive datasource name.
pub struct Pool<D: Driver> {
    driver: Arc<D>,
    dialect: Arc<dyn DialectCapabilities>,
    registry: Arc<dyn ConnectionRegistry>,
    config: PoolConfig,
    inner: Mutex<PoolInner<D>>,
    returned: Condvar,
    log: Mutex<LogContext>,
}

impl<D: Driver> Pool<D> {
    #[must_use]
    pub fn new(driver: Arc<D>, registry: Arc<dyn ConnectionRegistry>, config: PoolConfig) -> Self {
        let max_connections = config.max_connections.max(MIN_POOL_CONNECTIONS);
        Self {
            driver,
            dialect: Arc::new(GenericDialect::new()),
            registry,
            config,
            inner: Mutex::new(PoolInner {
                open: true,
                max_connections,
                open_count: 0,
                all: HashMap::new(),
                free: HashMap::new(),
                default_param_rebinds: RebindMap::new(),
                default_column_rebinds: RebindMap::new(),
            }),
            returned: Condvar::new(),
            log: Mutex::new(LogContext::default()),
        }
    }

    /// Replace the default standard-conforming dialect.
    #[must_use]
    pub fn with_dialect(mut self, dialect: Arc<dyn DialectCapabilities>) -> Self {
        self.dialect = dialect;
        self
    }

    // ----- leasing --------------------------------------------------------

    /// Lease a connection for `name`, opening one if the pool is under
    /// capacity.
    ///
    /// At capacity the call makes one aggressive cleanup pass and then waits
    /// in `retry_wait` slices (cut short by returns) up to `retry_attempts`
    /// times before failing.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after [`Pool::close_all`], `MaxConnectionsReached` when
    /// the wait budget is exhausted, `UnknownDataSource`/`ConnectionError`
    /// when a fresh connection cannot be opened.
    pub fn lease(&self, name: &str) -> Result<Lease<'_, D>, SqlSessionError> {
        let key = name.to_ascii_lowercase();
        let total_attempts = self.config.retry_attempts.saturating_add(2);
        let mut attempt: u32 = 0;
        let mut inner = relock(&self.inner);
        loop {
            if !inner.open {
                return Err(SqlSessionError::PoolClosed);
            }

            // Reuse the most recently returned connection for this name.
            if let Some(conn) = inner.free.get_mut(&key).and_then(VecDeque::pop_back) {
                drop(inner);
                if conn.is_open() {
                    return Ok(Lease::pooled(self, conn));
                }
                // Stale. Reopen in place so the identity (and its rebind
                // tables) survives.
                let _ = conn.close();
                match conn.open_from_registry(self.registry.as_ref()) {
                    Ok(()) => {
                        conn.set_last_action_time();
                        return Ok(Lease::pooled(self, conn));
                    }
                    Err(e) => {
                        tracing::warn!(name = %key, error = %e, "discarding connection that failed to reopen");
                        inner = relock(&self.inner);
                        Self::forget(&mut inner, &key, &conn);
                        // Does not consume an attempt; scan the next free one.
                        continue;
                    }
                }
            }

            if inner.open_count < inner.max_connections {
                let defaults = (
                    inner.default_param_rebinds.clone(),
                    inner.default_column_rebinds.clone(),
                );
                let conn = Arc::new(Connection::new(
                    Arc::clone(&self.driver),
                    Arc::clone(&self.dialect),
                    &key,
                ));
                conn.register_log_context(relock(&self.log).clone());
                // Count it before connecting so concurrent leases cannot
                // overshoot the capacity while the connect is in flight.
                inner.all.entry(key.clone()).or_default().push(Arc::clone(&conn));
                inner.open_count += 1;
                drop(inner);

                let opened = conn
                    .open_from_registry(self.registry.as_ref())
                    .and_then(|()| conn.apply_default_rebinds(&defaults.0, &defaults.1));
                match opened {
                    Ok(()) => return Ok(Lease::pooled(self, conn)),
                    Err(e) => {
                        let mut inner = relock(&self.inner);
                        Self::forget(&mut inner, &key, &conn);
                        drop(inner);
                        self.returned.notify_one();
                        return Err(e);
                    }
                }
            }

            // At capacity.
            attempt += 1;
            if attempt >= total_attempts {
                return Err(SqlSessionError::MaxConnectionsReached {
                    attempts: total_attempts,
                });
            }
            if attempt == 1 {
                drop(inner);
                self.cleanup(true);
                inner = relock(&self.inner);
            } else {
                let (guard, _) = self
                    .returned
                    .wait_timeout(inner, self.config.retry_wait)
                    .unwrap_or_else(PoisonError::into_inner);
                inner = guard;
            }
        }
    }

    /// Put a leased connection back on the free-list and wake one waiter.
    pub(crate) fn release_connection(
        &self,
        conn: Arc<Connection<D>>,
    ) -> Result<(), SqlSessionError> {
        let key = conn.name().to_ascii_lowercase();
        {
            let mut inner = relock(&self.inner);
            if !inner.open {
                return Err(SqlSessionError::PoolClosed);
            }
            conn.set_last_action_time();
            inner.free.entry(key).or_default().push_back(conn);
        }
        self.returned.notify_one();
        Ok(())
    }

    /// Drop `conn` from both indexes and the open count.
    fn forget(inner: &mut PoolInner<D>, key: &str, conn: &Arc<Connection<D>>) {
        if let Some(list) = inner.all.get_mut(key) {
            list.retain(|c| !Arc::ptr_eq(c, conn));
            if list.is_empty() {
                inner.all.remove(key);
            }
        }
        if let Some(queue) = inner.free.get_mut(key) {
            queue.retain(|c| !Arc::ptr_eq(c, conn));
            if queue.is_empty() {
                inner.free.remove(key);
            }
        }
        inner.open_count = inner.open_count.saturating_sub(1);
    }

    // ----- maintenance ----------------------------------------------------

    /// Close idle connections. Routine mode (`aggressive == false`) only
    /// closes those idle past the configured threshold; aggressive mode
    /// reclaims every free connection regardless of age.
    pub fn cleanup(&self, aggressive: bool) {
        let victims = {
            let mut inner = relock(&self.inner);
            let threshold = self.config.idle_threshold;
            let PoolInner {
                all,
                free,
                open_count,
                ..
            } = &mut *inner;
            let mut victims = Vec::new();
            for (key, queue) in free.iter_mut() {
                // The front holds the longest-idle connection; stop at the
                // first one still inside the threshold.
                while let Some(front) = queue.front() {
                    if !aggressive && !front.past_waiting_time(threshold) {
                        break;
                    }
                    if let Some(conn) = queue.pop_front() {
                        if let Some(list) = all.get_mut(key) {
                            list.retain(|c| !Arc::ptr_eq(c, &conn));
                        }
                        *open_count = open_count.saturating_sub(1);
                        victims.push(conn);
                    }
                }
            }
            free.retain(|_, q| !q.is_empty());
            all.retain(|_, l| !l.is_empty());
            victims
        };

        let reclaimed = victims.len();
        for conn in victims {
            if let Err(e) = conn.close() {
                tracing::warn!(error = %e, "error while closing idle connection");
            }
        }
        if reclaimed > 0 {
            tracing::debug!(reclaimed, aggressive, "pool cleanup closed idle connections");
            self.returned.notify_all();
        }
    }

    /// Close every connection and refuse further leases. Safe to call more
    /// than once.
    pub fn close_all(&self) {
        let victims: Vec<Arc<Connection<D>>> = {
            let mut inner = relock(&self.inner);
            inner.open = false;
            inner.free.clear();
            inner.open_count = 0;
            inner.all.drain().flat_map(|(_, list)| list).collect()
        };
        for conn in victims {
            let _ = conn.close();
        }
        self.returned.notify_all();
    }

    // ----- configuration --------------------------------------------------

    /// Resize the pool. Values under [`MIN_POOL_CONNECTIONS`] are ignored.
    pub fn set_max_connections(&self, max: usize) {
        if max < MIN_POOL_CONNECTIONS {
            tracing::warn!(requested = max, floor = MIN_POOL_CONNECTIONS, "pool resize below floor ignored");
            return;
        }
        relock(&self.inner).max_connections = max;
        self.returned.notify_all();
    }

    #[must_use]
    pub fn max_connections(&self) -> usize {
        relock(&self.inner).max_connections
    }

    /// Open connections across all names, leased and free.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        relock(&self.inner).open_count
    }

    /// Idle connections currently available for `name`.
    #[must_use]
    pub fn free_connections(&self, name: &str) -> usize {
        relock(&self.inner)
            .free
            .get(&name.to_ascii_lowercase())
            .map_or(0, VecDeque::len)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        relock(&self.inner).open
    }

    /// Default native type for parameters of `from` on every future
    /// connection.
    pub fn set_default_parameter_rebind(&self, from: SqlType, to: NativeType) {
        relock(&self.inner).default_param_rebinds.insert(from, to);
    }

    /// Default native target type for result columns of `from` on every
    /// future connection.
    pub fn set_default_column_rebind(&self, from: SqlType, to: NativeType) {
        relock(&self.inner).default_column_rebinds.insert(from, to);
    }

    /// Install an injected log sink on the pool and every existing
    /// connection.
    pub fn register_log_context(&self, ctx: LogContext) {
        *relock(&self.log) = ctx.clone();
        let inner = relock(&self.inner);
        for list in inner.all.values() {
            for conn in list {
                conn.register_log_context(ctx.clone());
            }
        }
    }

    /// Routine idle threshold, exposed for callers driving cleanup on a
    /// timer.
    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        self.config.idle_threshold
    }
}

impl<D: Driver> Drop for Pool<D> {
    fn drop(&mut self) {
        self.close_all();
    }
}
