//! One pooled database connection and its transaction stack.
//!
//! A [`Connection`] owns a physical driver session, the rebind tables applied
//! to statements opened against it, and a stack of logical transactions. Only
//! the outermost transaction touches the physical commit/rollback; nested
//! levels are expressed as savepoints through the dialect.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::dialect::DialectCapabilities;
use crate::driver::{Driver, LengthPolicy, SessionAttr, SessionCapabilities};
use crate::error::SqlSessionError;
use crate::lock::{relock, ManualMutex, RawLock, RecursiveLock};
use crate::logging::{LogContext, LogLevel};
use crate::registry::ConnectionRegistry;
use crate::values::{NativeType, RebindMap, SqlType};

/// Statement text rewriter installed by the embedding application. Applied to
/// every statement before it reaches the driver.
pub type MacroHook = Box<dyn Fn(&str) -> String + Send>;

#[derive(Debug, Clone)]
struct TxEntry {
    id: u64,
    /// `None` marks the outermost level, which owns the physical transaction.
    savepoint: Option<String>,
}

struct ConnState<D: Driver> {
    session: Option<D::Session>,
    datasource: String,
    username: String,
    capabilities: SessionCapabilities,
    last_action: Instant,
    length_policy: LengthPolicy,
    param_rebinds: RebindMap,
    column_rebinds: RebindMap,
    macro_hook: Option<MacroHook>,
    tx_stack: Vec<TxEntry>,
    next_tx_id: u64,
    active_statements: usize,
}

/// Wrapper around one physical driver session.
///
/// All mutating access funnels through an internal mutex; longer critical
/// sections (a statement's lifetime, a transaction boundary) additionally hold
/// the connection's [`RecursiveLock`], which the same thread may re-enter.
pub struct Connection<D: Driver> {
    driver: Arc<D>,
    dialect: Arc<dyn DialectCapabilities>,
    name: String,
    lock: RecursiveLock,
    state: Mutex<ConnState<D>>,
    log: Mutex<LogContext>,
}

impl<D: Driver> Connection<D> {
    #[must_use]
    pub fn new(driver: Arc<D>, dialect: Arc<dyn DialectCapabilities>, name: &str) -> Self {
        Self {
            driver,
            dialect,
            name: name.to_owned(),
            lock: RecursiveLock::for_target(Arc::new(ManualMutex::new()) as Arc<dyn RawLock>),
            state: Mutex::new(ConnState {
                session: None,
                datasource: String::new(),
                username: String::new(),
                capabilities: SessionCapabilities::default(),
                last_action: Instant::now(),
                length_policy: LengthPolicy::default(),
                param_rebinds: RebindMap::new(),
                column_rebinds: RebindMap::new(),
                macro_hook: None,
                tx_stack: Vec::new(),
                next_tx_id: 1,
                active_statements: 0,
            }),
            log: Mutex::new(LogContext::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn datasource(&self) -> String {
        relock(&self.state).datasource.clone()
    }

    #[must_use]
    pub fn username(&self) -> String {
        relock(&self.state).username.clone()
    }

    pub(crate) fn shared_lock(&self) -> &RecursiveLock {
        &self.lock
    }

    pub(crate) fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub(crate) fn dialect(&self) -> &Arc<dyn DialectCapabilities> {
        &self.dialect
    }

    // ----- opening and closing --------------------------------------------

    /// Resolve this connection's name through `registry` and open a session.
    ///
    /// A resolution miss triggers exactly one registry reload before the name
    /// is declared unknown, so freshly added definitions are honored.
    ///
    /// # Errors
    ///
    /// `UnknownDataSource` when the name resolves nowhere even after a reload,
    /// `ConnectionError` when the driver refuses the session or a post-connect
    /// statement fails.
    pub fn open_from_registry(
        &self,
        registry: &dyn ConnectionRegistry,
    ) -> Result<(), SqlSessionError> {
        let def = match registry.resolve(&self.name) {
            Some(def) => def,
            None => {
                registry.load_definitions(true)?;
                registry
                    .resolve(&self.name)
                    .ok_or_else(|| SqlSessionError::UnknownDataSource(self.name.clone()))?
            }
        };
        self.open_with(
            &def.effective_connect_string(),
            &def.datasource,
            &def.username,
            &def.post_connect,
        )
    }

    /// Open a session from explicit connection parameters.
    ///
    /// All-or-nothing: on any failure before the post-connect statements the
    /// connection stays closed. A post-connect failure closes the session
    /// again before returning.
    ///
    /// # Errors
    ///
    /// `ConnectionError` when already open, when the driver rejects the
    /// session, or when a post-connect statement fails.
    pub fn open_with(
        &self,
        connect_string: &str,
        datasource: &str,
        username: &str,
        post_connect: &[String],
    ) -> Result<(), SqlSessionError> {
        let _held = self.lock.guard();
        if relock(&self.state).session.is_some() {
            return Err(SqlSessionError::ConnectionError(format!(
                "connection '{}' is already open",
                self.name
            )));
        }

        let mut session = self.driver.connect(connect_string).map_err(|e| {
            SqlSessionError::ConnectionError(format!("cannot open '{}': {e}", self.name))
        })?;

        // Capability discovery: an unimplemented probe degrades to defaults.
        let capabilities = match self.driver.capabilities(&session) {
            Ok(caps) => caps,
            Err(e) if e.is_not_capable() => {
                tracing::debug!(connection = %self.name, "capability probe unsupported, using defaults");
                SessionCapabilities::default()
            }
            Err(e) => {
                let _ = self.driver.disconnect(session);
                return Err(SqlSessionError::ConnectionError(format!(
                    "capability discovery on '{}' failed: {e}",
                    self.name
                )));
            }
        };

        // Sessions start in autocommit; some drivers cannot switch the
        // attribute at all, which is fine since it is also their default.
        if let Err(e) = self
            .driver
            .set_session_attr(&mut session, SessionAttr::AutoCommit(true))
        {
            if !e.is_not_capable() {
                let _ = self.driver.disconnect(session);
                return Err(SqlSessionError::ConnectionError(format!(
                    "cannot enable autocommit on '{}': {e}",
                    self.name
                )));
            }
        }

        {
            let mut st = relock(&self.state);
            st.session = Some(session);
            st.capabilities = capabilities;
            st.datasource = datasource.to_owned();
            st.username = username.to_owned();
            st.last_action = Instant::now();
        }

        for sql in post_connect {
            if let Err(e) = self.exec_simple(sql) {
                let _ = self.close();
                return Err(SqlSessionError::ConnectionError(format!(
                    "post-connect statement on '{}' failed: {e}",
                    self.name
                )));
            }
        }

        self.log_print(
            LogLevel::Debug,
            &format!("opened connection '{}' to {datasource}", self.name),
        );
        Ok(())
    }

    /// Roll back any open transaction, then free the physical session.
    /// Closing a connection that is not open is a no-op.
    ///
    /// # Errors
    ///
    /// `ConnectionError` when the driver fails to free the session.
    pub fn close(&self) -> Result<(), SqlSessionError> {
        let _held = self.lock.guard();
        let mut st = relock(&self.state);
        if !st.tx_stack.is_empty() {
            // Outstanding guards become stale; their ids are gone from the
            // stack and any later commit/rollback on them fails cleanly.
            st.tx_stack.clear();
            if let Some(session) = st.session.as_mut() {
                let _ = self.driver.rollback(session);
                let _ = self
                    .driver
                    .set_session_attr(session, SessionAttr::AutoCommit(true));
            }
        }
        if let Some(session) = st.session.take() {
            self.driver.disconnect(session).map_err(|e| {
                SqlSessionError::ConnectionError(format!(
                    "cannot close '{}': {e}",
                    self.name
                ))
            })?;
        }
        Ok(())
    }

    /// The session exists and the driver still considers it usable.
    #[must_use]
    pub fn is_open(&self) -> bool {
        relock(&self.state)
            .session
            .as_ref()
            .is_some_and(|s| self.driver.is_valid(s))
    }

    // ----- idle accounting ------------------------------------------------

    /// Record activity; the pool calls this when a lease is returned.
    pub fn set_last_action_time(&self) {
        relock(&self.state).last_action = Instant::now();
    }

    /// Whether the connection has been idle longer than `threshold`.
    #[must_use]
    pub fn past_waiting_time(&self, threshold: Duration) -> bool {
        relock(&self.state).last_action.elapsed() > threshold
    }

    // ----- rebind tables and statement text hooks -------------------------

    /// Override the native type used when binding parameters of `from`.
    ///
    /// # Errors
    ///
    /// `ConnectionError` while any statement is open on this connection; a
    /// live statement already captured the tables.
    pub fn set_parameter_rebind(
        &self,
        from: SqlType,
        to: NativeType,
    ) -> Result<(), SqlSessionError> {
        let mut st = relock(&self.state);
        Self::ensure_no_active_statements(&st.active_statements, &self.name)?;
        st.param_rebinds.insert(from, to);
        Ok(())
    }

    /// Override the native target type for result columns described as `from`.
    ///
    /// # Errors
    ///
    /// `ConnectionError` while any statement is open on this connection.
    pub fn set_column_rebind(&self, from: SqlType, to: NativeType) -> Result<(), SqlSessionError> {
        let mut st = relock(&self.state);
        Self::ensure_no_active_statements(&st.active_statements, &self.name)?;
        st.column_rebinds.insert(from, to);
        Ok(())
    }

    fn ensure_no_active_statements(active: &usize, name: &str) -> Result<(), SqlSessionError> {
        if *active > 0 {
            return Err(SqlSessionError::ConnectionError(format!(
                "rebind tables on '{name}' cannot change while a statement is open"
            )));
        }
        Ok(())
    }

    /// Merge pool-level default rebind tables in. Connection-local entries
    /// placed later win, so this runs right after the connection is created.
    pub(crate) fn apply_default_rebinds(
        &self,
        params: &RebindMap,
        columns: &RebindMap,
    ) -> Result<(), SqlSessionError> {
        let mut st = relock(&self.state);
        Self::ensure_no_active_statements(&st.active_statements, &self.name)?;
        for (from, to) in params {
            st.param_rebinds.entry(*from).or_insert(*to);
        }
        for (from, to) in columns {
            st.column_rebinds.entry(*from).or_insert(*to);
        }
        Ok(())
    }

    /// Snapshot of (parameter, column) rebind tables for a new statement.
    pub(crate) fn rebind_tables(&self) -> (RebindMap, RebindMap) {
        let st = relock(&self.state);
        (st.param_rebinds.clone(), st.column_rebinds.clone())
    }

    /// Install a statement text rewriter applied before every execution.
    pub fn set_macro_hook(&self, hook: impl Fn(&str) -> String + Send + 'static) {
        relock(&self.state).macro_hook = Some(Box::new(hook));
    }

    /// Run `sql` through the installed macro hook, if any.
    #[must_use]
    pub fn substitute_macros(&self, sql: &str) -> String {
        match &relock(&self.state).macro_hook {
            Some(hook) => hook(sql),
            None => sql.to_owned(),
        }
    }

    pub fn set_length_policy(&self, policy: LengthPolicy) {
        relock(&self.state).length_policy = policy;
    }

    #[must_use]
    pub fn length_policy(&self) -> LengthPolicy {
        relock(&self.state).length_policy
    }

    // ----- capabilities ---------------------------------------------------

    pub(crate) fn capabilities(&self) -> SessionCapabilities {
        relock(&self.state).capabilities
    }

    #[must_use]
    pub fn supports_long_data(&self) -> bool {
        relock(&self.state).capabilities.long_data
    }

    // ----- statement registration -----------------------------------------

    pub(crate) fn statement_opened(&self) {
        relock(&self.state).active_statements += 1;
    }

    pub(crate) fn statement_closed(&self) {
        let mut st = relock(&self.state);
        st.active_statements = st.active_statements.saturating_sub(1);
    }

    /// Run a driver call against the open session.
    pub(crate) fn with_session<R>(
        &self,
        f: impl FnOnce(&D, &mut D::Session) -> Result<R, SqlSessionError>,
    ) -> Result<R, SqlSessionError> {
        let mut st = relock(&self.state);
        let session = st.session.as_mut().ok_or_else(|| {
            SqlSessionError::ConnectionError(format!("connection '{}' is not open", self.name))
        })?;
        f(&self.driver, session)
    }

    /// Execute one statement with no parameters or results. Used for
    /// post-connect setup and savepoint management.
    pub(crate) fn exec_simple(&self, sql: &str) -> Result<(), SqlSessionError> {
        let mut st = relock(&self.state);
        let policy = st.length_policy;
        let session = st.session.as_mut().ok_or_else(|| {
            SqlSessionError::ConnectionError(format!("connection '{}' is not open", self.name))
        })?;
        let mut stmt = self
            .driver
            .alloc_stmt(session)
            .map_err(|e| SqlSessionError::execution("Cannot allocate statement", &e))?;
        let result = self
            .driver
            .exec_direct(&mut stmt, sql, policy)
            .map(|_| ())
            .map_err(|e| SqlSessionError::execution(&format!("Statement '{sql}' failed"), &e));
        self.driver.free_stmt(stmt);
        result
    }

    // ----- transactions ---------------------------------------------------

    /// Begin a (possibly nested) transaction.
    ///
    /// The outermost level switches the session out of autocommit; nested
    /// levels create a savepoint. The returned guard rolls back on drop unless
    /// committed.
    ///
    /// # Errors
    ///
    /// `ConnectionError` when no session is open, or the driver/savepoint call
    /// fails.
    pub fn begin(&self) -> Result<Transaction<'_, D>, SqlSessionError> {
        let _held = self.lock.guard();
        let (id, savepoint_sql) = {
            let mut st = relock(&self.state);
            if st.session.is_none() {
                return Err(SqlSessionError::ConnectionError(format!(
                    "connection '{}' is not open",
                    self.name
                )));
            }
            let id = st.next_tx_id;
            st.next_tx_id += 1;
            if st.tx_stack.is_empty() {
                let session = st.session.as_mut().ok_or_else(|| {
                    SqlSessionError::ConnectionError(format!(
                        "connection '{}' is not open",
                        self.name
                    ))
                })?;
                match self
                    .driver
                    .set_session_attr(session, SessionAttr::AutoCommit(false))
                {
                    Ok(()) => {}
                    Err(e) if e.is_not_capable() => {
                        tracing::debug!(
                            connection = %self.name,
                            "driver cannot leave autocommit, transaction is advisory"
                        );
                    }
                    Err(e) => {
                        return Err(SqlSessionError::ConnectionError(format!(
                            "cannot begin transaction on '{}': {e}",
                            self.name
                        )));
                    }
                }
                st.tx_stack.push(TxEntry {
                    id,
                    savepoint: None,
                });
                (id, None)
            } else {
                let name = format!("sp_{id}");
                let sql = self.dialect.savepoint(&name);
                st.tx_stack.push(TxEntry {
                    id,
                    savepoint: Some(name),
                });
                (id, Some(sql))
            }
        };
        if let Some(sql) = savepoint_sql {
            if let Err(e) = self.exec_simple(&sql) {
                relock(&self.state).tx_stack.retain(|t| t.id != id);
                return Err(e);
            }
        }
        Ok(Transaction {
            conn: self,
            id,
            finished: false,
        })
    }

    /// Number of open transaction levels.
    #[must_use]
    pub fn transaction_depth(&self) -> usize {
        relock(&self.state).tx_stack.len()
    }

    fn commit_by_id(&self, id: u64) -> Result<(), SqlSessionError> {
        let _held = self.lock.guard();
        let entry = {
            let mut st = relock(&self.state);
            match st.tx_stack.last() {
                Some(top) if top.id == id => {}
                Some(_) => {
                    return Err(SqlSessionError::ExecutionError(
                        "only the innermost transaction may commit".into(),
                    ));
                }
                None => {
                    return Err(SqlSessionError::ExecutionError(
                        "transaction is no longer active".into(),
                    ));
                }
            }
            let entry = st
                .tx_stack
                .pop()
                .ok_or_else(|| SqlSessionError::Other("transaction stack underflow".into()))?;
            if entry.savepoint.is_none() {
                let session = st.session.as_mut().ok_or_else(|| {
                    SqlSessionError::ConnectionError(format!(
                        "connection '{}' is not open",
                        self.name
                    ))
                })?;
                self.driver
                    .commit(session)
                    .map_err(|e| SqlSessionError::execution("Commit failed", &e))?;
                let _ = self
                    .driver
                    .set_session_attr(session, SessionAttr::AutoCommit(true));
                return Ok(());
            }
            entry
        };
        if let Some(name) = &entry.savepoint {
            self.exec_simple(&self.dialect.release_savepoint(name))?;
        }
        Ok(())
    }

    fn rollback_by_id(&self, id: u64) -> Result<(), SqlSessionError> {
        let _held = self.lock.guard();
        let entry = {
            let mut st = relock(&self.state);
            let Some(index) = st.tx_stack.iter().position(|t| t.id == id) else {
                return Err(SqlSessionError::ExecutionError(
                    "transaction is no longer active".into(),
                ));
            };
            let entry = st.tx_stack[index].clone();
            // Levels opened above this one are swept away by the rollback;
            // their guards find their ids gone and fail without side effects.
            st.tx_stack.truncate(index);
            if entry.savepoint.is_none() {
                let session = st.session.as_mut().ok_or_else(|| {
                    SqlSessionError::ConnectionError(format!(
                        "connection '{}' is not open",
                        self.name
                    ))
                })?;
                self.driver
                    .rollback(session)
                    .map_err(|e| SqlSessionError::execution("Rollback failed", &e))?;
                let _ = self
                    .driver
                    .set_session_attr(session, SessionAttr::AutoCommit(true));
                return Ok(());
            }
            entry
        };
        if let Some(name) = &entry.savepoint {
            self.exec_simple(&self.dialect.rollback_to_savepoint(name))?;
        }
        Ok(())
    }

    // ----- logging --------------------------------------------------------

    /// Attach an injected log sink; usually inherited from the pool.
    pub fn register_log_context(&self, ctx: LogContext) {
        *relock(&self.log) = ctx;
    }

    #[must_use]
    pub fn will_log(&self, level: LogLevel) -> bool {
        relock(&self.log).will_log(level)
    }

    pub fn log_print(&self, level: LogLevel, line: &str) {
        relock(&self.log).log_print(level, line);
    }
}

impl<D: Driver> Drop for Connection<D> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// RAII guard for one transaction level.
///
/// Dropping the guard without committing rolls the level back, together with
/// any levels opened (and not yet resolved) above it.
#[must_use = "dropping a transaction rolls it back"]
pub struct Transaction<'c, D: Driver> {
    conn: &'c Connection<D>,
    id: u64,
    finished: bool,
}

impl<D: Driver> Transaction<'_, D> {
    /// Commit this level. Only the innermost open level may commit.
    ///
    /// # Errors
    ///
    /// `ExecutionError` when this level is not innermost or was invalidated by
    /// an outer rollback; driver failures pass through.
    pub fn commit(mut self) -> Result<(), SqlSessionError> {
        self.finished = true;
        self.conn.commit_by_id(self.id)
    }

    /// Roll this level back, invalidating any open levels above it.
    ///
    /// # Errors
    ///
    /// `ExecutionError` when the level was already resolved; driver failures
    /// pass through.
    pub fn rollback(mut self) -> Result<(), SqlSessionError> {
        self.finished = true;
        self.conn.rollback_by_id(self.id)
    }
}

impl<D: Driver> Drop for Transaction<'_, D> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.rollback_by_id(self.id);
        }
    }
}
