//! Bound-statement execution.
//!
//! A [`Statement`] drives one driver statement handle through its life:
//! allocate, prepare or direct-execute, bind parameters, bind result columns,
//! fetch, close. It holds its connection's recursive lock for its whole
//! lifetime, so transaction calls interleaved on the same thread still work
//! while other threads wait.

mod columns;
mod params;
mod stream;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::connection::Connection;
use crate::dialect::DialectCapabilities;
use crate::driver::{Concurrency, Driver, ExecOutcome, FetchOutcome, StmtAttr};
use crate::error::SqlSessionError;
use crate::lock::RecursiveGuard;
use crate::values::{ParamDirection, RebindMap, SqlValue};

pub use columns::Column;

/// Per-statement tunables.
#[derive(Debug, Clone)]
pub struct StatementConfig {
    /// Fetch at most this many rows; 0 means unlimited.
    pub max_rows: u64,
    /// Character and binary columns declared wider than this (or with unknown
    /// width) are retrieved piecewise instead of bound.
    pub max_column_length: usize,
    /// Chunk size for piecewise parameter feeding.
    pub buffer_size: usize,
    pub concurrency: Concurrency,
    /// Ask the driver to skip escape-sequence scanning.
    pub no_scan: bool,
}

impl Default for StatementConfig {
    fn default() -> Self {
        Self {
            max_rows: 0,
            max_column_length: 32_768,
            buffer_size: 4_096,
            concurrency: Concurrency::ReadOnly,
            no_scan: false,
        }
    }
}

impl StatementConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = max_rows;
        self
    }

    #[must_use]
    pub fn with_max_column_length(mut self, len: usize) -> Self {
        self.max_column_length = len;
        self
    }

    #[must_use]
    pub fn with_buffer_size(mut self, len: usize) -> Self {
        self.buffer_size = len.max(1);
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_no_scan(mut self, no_scan: bool) -> Self {
        self.no_scan = no_scan;
        self
    }
}

/// One positional parameter and its binding options.
#[derive(Debug, Clone, Default)]
pub(crate) struct Parameter {
    pub value: SqlValue,
    pub direction: ParamDirection,
    pub name: Option<String>,
    /// Supply the value piecewise after execute reports it wants data.
    pub at_exec: bool,
    /// Declared size override; defaults to the value's own size.
    pub max_size: Option<usize>,
}

/// Executor over one driver statement handle.
pub struct Statement<'c, D: Driver> {
    conn: &'c Connection<D>,
    driver: Arc<D>,
    dialect: Arc<dyn DialectCapabilities>,
    config: StatementConfig,
    stmt: Option<D::Stmt>,
    _held: RecursiveGuard<'c>,
    prepared: bool,
    params_bound: bool,
    is_select: bool,
    no_more_rows: bool,
    rows_fetched: u64,
    row_count: i64,
    cursor: Option<String>,
    /// First result column retrieved piecewise; 0 when every column is bound.
    first_at_exec: u16,
    params: BTreeMap<u16, Parameter>,
    columns: BTreeMap<u16, Column>,
    /// Lowercased column name to 1-based position.
    column_positions: HashMap<String, u16>,
    param_rebinds: RebindMap,
    column_rebinds: RebindMap,
}

impl<'c, D: Driver> Statement<'c, D> {
    #[must_use]
    pub fn new(conn: &'c Connection<D>) -> Self {
        Self::with_config(conn, StatementConfig::default())
    }

    #[must_use]
    pub fn with_config(conn: &'c Connection<D>, config: StatementConfig) -> Self {
        let held = conn.shared_lock().guard();
        conn.statement_opened();
        Self {
            conn,
            driver: Arc::clone(conn.driver()),
            dialect: Arc::clone(conn.dialect()),
            config,
            stmt: None,
            _held: held,
            prepared: false,
            params_bound: false,
            is_select: false,
            no_more_rows: false,
            rows_fetched: 0,
            row_count: -1,
            cursor: None,
            first_at_exec: 0,
            params: BTreeMap::new(),
            columns: BTreeMap::new(),
            column_positions: HashMap::new(),
            param_rebinds: RebindMap::new(),
            column_rebinds: RebindMap::new(),
        }
    }

    pub(crate) fn stmt_handle(stmt: &mut Option<D::Stmt>) -> Result<&mut D::Stmt, SqlSessionError> {
        stmt.as_mut()
            .ok_or_else(|| SqlSessionError::ExecutionError("statement is not open".into()))
    }

    // ----- lifecycle ------------------------------------------------------

    /// Allocate the driver handle and apply statement attributes. Captures
    /// the connection's rebind tables as of this moment.
    ///
    /// # Errors
    ///
    /// `ExecutionError` when already open or the driver refuses an attribute
    /// it claims to support.
    pub fn open(&mut self) -> Result<(), SqlSessionError> {
        if self.stmt.is_some() {
            return Err(SqlSessionError::ExecutionError(
                "statement is already open".into(),
            ));
        }
        let mut stmt = self.conn.with_session(|driver, session| {
            driver
                .alloc_stmt(session)
                .map_err(|e| SqlSessionError::execution("Cannot allocate statement", &e))
        })?;

        let mut attrs = vec![
            StmtAttr::ForwardOnlyCursor,
            StmtAttr::Concurrency(self.config.concurrency),
        ];
        if self.config.no_scan {
            attrs.push(StmtAttr::NoScan(true));
        }
        if self.config.max_rows > 0 {
            attrs.push(StmtAttr::MaxRows(self.config.max_rows));
        }
        for attr in attrs {
            if let Err(e) = self.driver.set_stmt_attr(&mut stmt, attr) {
                if e.is_not_capable() {
                    tracing::trace!(?attr, "statement attribute unsupported, skipped");
                } else {
                    self.driver.free_stmt(stmt);
                    return Err(SqlSessionError::execution(
                        "Cannot set statement attribute",
                        &e,
                    ));
                }
            }
        }

        let (param_rebinds, column_rebinds) = self.conn.rebind_tables();
        self.param_rebinds = param_rebinds;
        self.column_rebinds = column_rebinds;
        self.stmt = Some(stmt);
        Ok(())
    }

    fn ensure_open(&mut self) -> Result<(), SqlSessionError> {
        if self.stmt.is_none() {
            self.open()?;
        }
        Ok(())
    }

    /// Close, logging rather than returning any teardown diagnostics.
    pub fn close(&mut self) {
        if let Err(e) = self.close_with_errors() {
            tracing::debug!(error = %e, "statement close reported an error");
        }
    }

    /// Close the cursor and free the handle. Bound columns die with the
    /// handle; parameters survive so the statement can be reopened and
    /// re-executed.
    ///
    /// # Errors
    ///
    /// `ExecutionError` for cursor-close failures other than the
    /// cursor-already-at-end condition, which is expected and swallowed.
    pub fn close_with_errors(&mut self) -> Result<(), SqlSessionError> {
        let Some(mut stmt) = self.stmt.take() else {
            return Ok(());
        };
        let result = match self.driver.close_cursor(&mut stmt) {
            Ok(()) => Ok(()),
            Err(e) if e.is_cursor_at_end() || e.is_not_capable() => Ok(()),
            Err(e) => Err(SqlSessionError::execution("Cannot close cursor", &e)),
        };
        self.driver.free_stmt(stmt);
        self.columns.clear();
        self.column_positions.clear();
        self.prepared = false;
        self.params_bound = false;
        self.is_select = false;
        self.no_more_rows = false;
        self.rows_fetched = 0;
        self.row_count = -1;
        self.cursor = None;
        self.first_at_exec = 0;
        result
    }

    /// Close and reopen, keeping parameters. Ready for another prepare or
    /// direct execution.
    ///
    /// # Errors
    ///
    /// Propagates close and open failures.
    pub fn reset(&mut self) -> Result<(), SqlSessionError> {
        self.close_with_errors()?;
        self.open()
    }

    /// Best-effort cancellation of an in-flight execution.
    ///
    /// # Errors
    ///
    /// `ExecutionError` when the driver rejects the cancel.
    pub fn cancel(&mut self) -> Result<(), SqlSessionError> {
        let stmt = Self::stmt_handle(&mut self.stmt)?;
        self.driver
            .cancel(stmt)
            .map_err(|e| SqlSessionError::execution("Cannot cancel statement", &e))
    }

    // ----- parameters -----------------------------------------------------

    /// Set the value for the 1-based `position`; position 0 is the procedure
    /// return slot.
    pub fn set_parameter(&mut self, position: u16, value: impl Into<SqlValue>) {
        self.params.entry(position).or_default().value = value.into();
        self.params_bound = false;
    }

    pub fn set_parameter_direction(&mut self, position: u16, direction: ParamDirection) {
        self.params.entry(position).or_default().direction = direction;
        self.params_bound = false;
    }

    pub fn set_parameter_name(&mut self, position: u16, name: &str) {
        self.params.entry(position).or_default().name = Some(name.to_owned());
    }

    /// Mark `position` for piecewise supply at execution time.
    pub fn set_parameter_at_exec(&mut self, position: u16, at_exec: bool) {
        self.params.entry(position).or_default().at_exec = at_exec;
        self.params_bound = false;
    }

    /// Override the declared size for `position`.
    pub fn set_parameter_max_size(&mut self, position: u16, size: usize) {
        self.params.entry(position).or_default().max_size = Some(size);
        self.params_bound = false;
    }

    #[must_use]
    pub fn parameter(&self, position: u16) -> Option<&SqlValue> {
        self.params.get(&position).map(|p| &p.value)
    }

    pub fn clear_parameters(&mut self) {
        self.params.clear();
        self.params_bound = false;
    }

    // ----- execution ------------------------------------------------------

    fn prepare_text(&mut self, sql: &str) -> Result<String, SqlSessionError> {
        let substituted = self.conn.substitute_macros(sql);
        // Trailing whitespace confuses at least one backend's parser.
        let text = substituted.trim_end().to_owned();
        if text.is_empty() {
            return Err(SqlSessionError::ConfigError("empty statement text".into()));
        }
        // Byte-wise so a multi-byte character straddling the prefix cannot
        // make the slice panic.
        self.is_select =
            text.len() >= 6 && text.as_bytes()[..6].eq_ignore_ascii_case(b"select");
        Ok(text)
    }

    fn reset_cursor_state(&mut self) {
        self.no_more_rows = false;
        self.rows_fetched = 0;
        self.row_count = -1;
    }

    /// Execute `sql` directly, binding any set parameters first. Result
    /// columns, if any, are described and bound afterwards.
    ///
    /// # Errors
    ///
    /// `ConfigError` for empty text, `ParameterError`/`ExecutionError` for
    /// binding and execution failures.
    pub fn do_sql_statement(&mut self, sql: &str) -> Result<(), SqlSessionError> {
        self.ensure_open()?;
        self.reset_cursor_state();
        let text = self.prepare_text(sql)?;
        self.bind_parameters()?;
        let policy = self.conn.length_policy();
        let driver = Arc::clone(&self.driver);
        let outcome = {
            let stmt = Self::stmt_handle(&mut self.stmt)?;
            driver.exec_direct(stmt, &text, policy)
        }
        .map_err(|e| SqlSessionError::execution(&format!("Statement '{text}' failed"), &e))?;
        if outcome == ExecOutcome::NeedData {
            self.feed_at_exec_params()?;
        }
        self.after_execute()
    }

    /// Prepare `sql` for later execution.
    ///
    /// # Errors
    ///
    /// `ConfigError` for empty text, `ExecutionError` when the driver rejects
    /// the text.
    pub fn do_sql_prepare(&mut self, sql: &str) -> Result<(), SqlSessionError> {
        self.ensure_open()?;
        let text = self.prepare_text(sql)?;
        let policy = self.conn.length_policy();
        let driver = Arc::clone(&self.driver);
        {
            let stmt = Self::stmt_handle(&mut self.stmt)?;
            driver.prepare(stmt, &text, policy)
        }
        .map_err(|e| SqlSessionError::execution(&format!("Cannot prepare '{text}'"), &e))?;
        self.prepared = true;
        self.params_bound = false;
        Ok(())
    }

    /// Execute the prepared statement with the current parameter values.
    /// May be called repeatedly; parameters changed since the last execution
    /// are rebound.
    ///
    /// # Errors
    ///
    /// `ExecutionError` when nothing is prepared or execution fails.
    pub fn do_sql_execute(&mut self) -> Result<(), SqlSessionError> {
        if !self.prepared {
            return Err(SqlSessionError::ExecutionError(
                "no prepared statement to execute".into(),
            ));
        }
        self.reset_cursor_state();
        self.bind_parameters()?;
        let driver = Arc::clone(&self.driver);
        let outcome = {
            let stmt = Self::stmt_handle(&mut self.stmt)?;
            driver.execute(stmt)
        }
        .map_err(|e| SqlSessionError::execution("Execute failed", &e))?;
        if outcome == ExecOutcome::NeedData {
            self.feed_at_exec_params()?;
        }
        self.after_execute()
    }

    /// Invoke a stored procedure through the dialect's call syntax. Output
    /// and input/output parameter values are harvested into the parameter
    /// set; with `has_return` the return value lands in position 0.
    ///
    /// # Errors
    ///
    /// As for [`Statement::do_sql_statement`], plus failures reading output
    /// parameters back.
    pub fn do_sql_call(&mut self, procedure: &str, has_return: bool) -> Result<(), SqlSessionError> {
        if has_return {
            self.params.entry(0).or_default().direction = ParamDirection::Output;
            self.params_bound = false;
        }
        let arg_count = self.params.keys().filter(|p| **p >= 1).count();
        let sql = self.dialect.call_syntax(procedure, arg_count, has_return);
        self.do_sql_statement(&sql)?;
        self.harvest_output_parameters()
    }

    fn harvest_output_parameters(&mut self) -> Result<(), SqlSessionError> {
        let positions: Vec<u16> = self
            .params
            .iter()
            .filter(|(_, p)| !matches!(p.direction, ParamDirection::Input))
            .map(|(pos, _)| *pos)
            .collect();
        let driver = Arc::clone(&self.driver);
        for position in positions {
            let value = {
                let stmt = Self::stmt_handle(&mut self.stmt)?;
                driver.output_value(stmt, position)
            }
            .map_err(|e| SqlSessionError::execution("Cannot read output parameter", &e))?;
            if let Some(param) = self.params.get_mut(&position) {
                param.value = value;
            }
        }
        Ok(())
    }

    fn after_execute(&mut self) -> Result<(), SqlSessionError> {
        let driver = Arc::clone(&self.driver);
        let count = {
            let stmt = Self::stmt_handle(&mut self.stmt)?;
            match driver.num_result_cols(stmt) {
                Ok(count) => count,
                Err(e) if e.is_not_capable() => 0,
                Err(e) => {
                    return Err(SqlSessionError::execution("Cannot count result columns", &e));
                }
            }
        };
        if count > 0 {
            self.bind_result_columns(count)?;
        }
        // Row count and cursor name are advisory; not every backend has them.
        let stmt = Self::stmt_handle(&mut self.stmt)?;
        self.row_count = driver.row_count(stmt).unwrap_or(-1);
        self.cursor = driver.cursor_name(stmt).ok();
        Ok(())
    }

    // ----- fetching -------------------------------------------------------

    /// Advance to the next row. Returns `false` past the last row, past the
    /// configured row limit, or when the statement produced no result set;
    /// calling again after the end stays `false`.
    ///
    /// # Errors
    ///
    /// `ExecutionError` when the fetch or a piecewise column read fails.
    pub fn get_record(&mut self) -> Result<bool, SqlSessionError> {
        if !self.is_select || self.no_more_rows {
            return Ok(false);
        }
        if self.config.max_rows > 0 && self.rows_fetched >= self.config.max_rows {
            self.no_more_rows = true;
            return Ok(false);
        }
        for column in self.columns.values_mut() {
            column.value = SqlValue::Null;
        }
        let driver = Arc::clone(&self.driver);
        let outcome = {
            let stmt = Self::stmt_handle(&mut self.stmt)?;
            driver.fetch(stmt)
        }
        .map_err(|e| SqlSessionError::execution("Fetch failed", &e))?;
        match outcome {
            FetchOutcome::NoData => {
                self.no_more_rows = true;
                Ok(false)
            }
            FetchOutcome::Row => {
                self.read_bound_columns()?;
                self.retrieve_at_exec_columns()?;
                self.rows_fetched += 1;
                Ok(true)
            }
        }
    }

    // ----- results --------------------------------------------------------

    /// Value of the 1-based result column, for the current row.
    #[must_use]
    pub fn column(&self, position: u16) -> Option<&SqlValue> {
        self.columns.get(&position).map(|c| &c.value)
    }

    /// Value of a result column by name (case-insensitive).
    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&SqlValue> {
        self.column_positions
            .get(&name.to_ascii_lowercase())
            .and_then(|pos| self.column(*pos))
    }

    #[must_use]
    pub fn column_name(&self, position: u16) -> Option<&str> {
        self.columns.get(&position).map(|c| c.name.as_str())
    }

    #[must_use]
    pub fn column_count(&self) -> u16 {
        self.columns.len() as u16
    }

    /// NULL check that degrades to `true` for positions outside the result
    /// set.
    #[must_use]
    pub fn is_null(&self, position: u16) -> bool {
        self.column(position).is_none_or(SqlValue::is_null)
    }

    /// Rows affected by the last execution; -1 when the driver cannot tell.
    #[must_use]
    pub fn rows_affected(&self) -> i64 {
        self.row_count
    }

    #[must_use]
    pub fn cursor_name(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Whether the last executed text was classified as a SELECT.
    #[must_use]
    pub fn is_select(&self) -> bool {
        self.is_select
    }
}

impl<D: Driver> Drop for Statement<'_, D> {
    fn drop(&mut self) {
        self.close();
        self.conn.statement_closed();
    }
}
