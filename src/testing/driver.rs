//! Scripted driver: the full call-level contract over in-memory data.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::driver::{
    ColumnBinding, ColumnDescription, Driver, DriverError, DriverResult, ExecOutcome,
    FetchOutcome, GetData, LengthPolicy, ParamBinding, SessionAttr, SessionCapabilities,
    StmtAttr, Total,
};
use crate::lock::relock;
use crate::values::{NativeType, SqlType, SqlValue};

/// Canned response for one exact statement text.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub columns: Vec<ColumnDescription>,
    pub rows: Vec<Vec<SqlValue>>,
    pub rows_affected: i64,
    /// Produce a single result row echoing the bound parameter values, with
    /// at-execution parameters replaced by whatever bytes were fed.
    pub echo_params: bool,
    /// Values reported for output parameters after execution.
    pub output_values: Vec<(u16, SqlValue)>,
}

struct DriverState {
    scripts: HashMap<String, Script>,
    connects: u32,
    fail_connects: u32,
    open_sessions: u32,
    /// Sessions from an older generation report invalid.
    generation: u64,
    capabilities: SessionCapabilities,
    cursor_names: bool,
    executed: Vec<String>,
    commits: u32,
    rollbacks: u32,
    /// Columns whose length probe reports unknown.
    length_unknown: Vec<String>,
    next_session_id: u32,
    last_policy: Option<LengthPolicy>,
}

/// Driver whose every answer is scripted up front.
#[derive(Clone)]
pub struct ScriptedDriver {
    state: Arc<Mutex<DriverState>>,
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(DriverState {
                scripts: HashMap::new(),
                connects: 0,
                fail_connects: 0,
                open_sessions: 0,
                generation: 0,
                capabilities: SessionCapabilities::default(),
                cursor_names: false,
                executed: Vec::new(),
                commits: 0,
                rollbacks: 0,
                length_unknown: Vec::new(),
                next_session_id: 1,
                last_policy: None,
            })),
        }
    }
}

impl ScriptedDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, sql: &str, script: Script) {
        relock(&self.state).scripts.insert(sql.to_owned(), script);
    }

    /// Script a SELECT returning `rows` shaped by `columns`.
    pub fn script_select(
        &self,
        sql: &str,
        columns: Vec<ColumnDescription>,
        rows: Vec<Vec<SqlValue>>,
    ) {
        let rows_affected = rows.len() as i64;
        self.script(
            sql,
            Script {
                columns,
                rows,
                rows_affected,
                ..Script::default()
            },
        );
    }

    /// Script a non-query statement reporting `rows_affected`.
    pub fn script_update(&self, sql: &str, rows_affected: i64) {
        self.script(
            sql,
            Script {
                rows_affected,
                ..Script::default()
            },
        );
    }

    /// Script a SELECT whose single row echoes the bound parameters.
    pub fn script_echo(&self, sql: &str, columns: Vec<ColumnDescription>) {
        self.script(
            sql,
            Script {
                columns,
                echo_params: true,
                rows_affected: 1,
                ..Script::default()
            },
        );
    }

    /// Make the next `n` connect calls fail.
    pub fn fail_next_connects(&self, n: u32) {
        relock(&self.state).fail_connects = n;
    }

    /// All currently open sessions start reporting invalid, as if the server
    /// dropped them.
    pub fn invalidate_sessions(&self) {
        relock(&self.state).generation += 1;
    }

    pub fn set_capabilities(&self, capabilities: SessionCapabilities) {
        relock(&self.state).capabilities = capabilities;
    }

    pub fn enable_cursor_names(&self) {
        relock(&self.state).cursor_names = true;
    }

    /// A probe against this column name reports an unknown total length.
    pub fn mark_length_unknown(&self, column_name: &str) {
        relock(&self.state).length_unknown.push(column_name.to_owned());
    }

    #[must_use]
    pub fn connect_count(&self) -> u32 {
        relock(&self.state).connects
    }

    #[must_use]
    pub fn open_session_count(&self) -> u32 {
        relock(&self.state).open_sessions
    }

    /// Every statement text executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        relock(&self.state).executed.clone()
    }

    #[must_use]
    pub fn commit_count(&self) -> u32 {
        relock(&self.state).commits
    }

    #[must_use]
    pub fn rollback_count(&self) -> u32 {
        relock(&self.state).rollbacks
    }

    /// The length policy handed to the last prepare or direct execution.
    #[must_use]
    pub fn last_length_policy(&self) -> Option<LengthPolicy> {
        relock(&self.state).last_policy
    }
}

/// Session handle carrying a generation stamp for validity checks.
#[derive(Debug)]
pub struct ScriptedSession {
    pub id: u32,
    generation: u64,
    pub autocommit: bool,
}

/// Statement handle holding the resolved script and cursor position.
pub struct ScriptedStmt {
    state: Arc<Mutex<DriverState>>,
    session_id: u32,
    sql: Option<String>,
    script: Option<Script>,
    params: HashMap<u16, (ParamBinding, SqlValue)>,
    bound_cols: HashMap<u16, ColumnBinding>,
    /// Rows to serve; built lazily so echoed at-exec data is in place.
    materialized: Option<Vec<Vec<SqlValue>>>,
    row_index: usize,
    current_row: Option<Vec<SqlValue>>,
    need_data: VecDeque<u16>,
    current_feed: Option<u16>,
    fed: HashMap<u16, Vec<u8>>,
    max_rows: u64,
    at_end: bool,
    had_result_set: bool,
}

impl ScriptedStmt {
    fn run(&mut self, sql: &str) -> DriverResult<ExecOutcome> {
        relock(&self.state).executed.push(sql.to_owned());
        let script = {
            let state = relock(&self.state);
            state.scripts.get(sql).cloned()
        };
        let script = match script {
            Some(script) => script,
            None if is_passthrough(sql) => Script::default(),
            None => {
                return Err(DriverError::general(
                    "42000",
                    format!("no script for statement: {sql}"),
                ));
            }
        };
        self.had_result_set = !script.columns.is_empty();
        self.script = Some(script);
        self.materialized = None;
        self.row_index = 0;
        self.current_row = None;
        self.at_end = false;
        self.fed.clear();
        self.current_feed = None;

        let mut pending: Vec<u16> = self
            .params
            .values()
            .filter(|(binding, _)| binding.at_exec)
            .map(|(binding, _)| binding.position)
            .collect();
        pending.sort_unstable();
        self.need_data = pending.into();
        if self.need_data.is_empty() {
            Ok(ExecOutcome::Done)
        } else {
            Ok(ExecOutcome::NeedData)
        }
    }

    fn script_ref(&self) -> DriverResult<&Script> {
        self.script
            .as_ref()
            .ok_or_else(|| DriverError::general("HY010", "no executed statement"))
    }

    fn echo_row(&self) -> Vec<SqlValue> {
        let mut positions: Vec<u16> = self.params.keys().copied().filter(|p| *p >= 1).collect();
        positions.sort_unstable();
        positions
            .iter()
            .map(|pos| {
                if let Some(bytes) = self.fed.get(pos) {
                    let (binding, _) = &self.params[pos];
                    match binding.value_type {
                        SqlType::Bytes => SqlValue::Bytes(bytes.clone()),
                        _ => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
                    }
                } else {
                    self.params[pos].1.clone()
                }
            })
            .collect()
    }

    fn rows(&mut self) -> DriverResult<&Vec<Vec<SqlValue>>> {
        if self.materialized.is_none() {
            let script = self.script_ref()?;
            let rows = if script.echo_params {
                vec![self.echo_row()]
            } else {
                script.rows.clone()
            };
            self.materialized = Some(rows);
        }
        self.materialized
            .as_ref()
            .ok_or_else(|| DriverError::general("HY010", "no executed statement"))
    }

    fn current_value(&self, position: u16) -> DriverResult<&SqlValue> {
        let row = self
            .current_row
            .as_ref()
            .ok_or_else(|| DriverError::general("24000", "no fetched row"))?;
        row.get(position as usize - 1)
            .ok_or_else(|| DriverError::general("07009", format!("no column {position}")))
    }
}

fn is_passthrough(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    ["SAVEPOINT ", "RELEASE ", "ROLLBACK", "SET ", "COMMIT"]
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}

fn truncate_text(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_owned()
}

impl Driver for ScriptedDriver {
    type Session = ScriptedSession;
    type Stmt = ScriptedStmt;

    fn connect(&self, _connect_string: &str) -> DriverResult<Self::Session> {
        let mut state = relock(&self.state);
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(DriverError::general("08001", "injected connect failure"));
        }
        state.connects += 1;
        state.open_sessions += 1;
        let id = state.next_session_id;
        state.next_session_id += 1;
        Ok(ScriptedSession {
            id,
            generation: state.generation,
            autocommit: true,
        })
    }

    fn disconnect(&self, _session: Self::Session) -> DriverResult<()> {
        let mut state = relock(&self.state);
        state.open_sessions = state.open_sessions.saturating_sub(1);
        Ok(())
    }

    fn is_valid(&self, session: &Self::Session) -> bool {
        session.generation == relock(&self.state).generation
    }

    fn set_session_attr(&self, session: &mut Self::Session, attr: SessionAttr) -> DriverResult<()> {
        match attr {
            SessionAttr::AutoCommit(on) => {
                session.autocommit = on;
                Ok(())
            }
            SessionAttr::ReadOnly(_) => Err(DriverError::not_capable("read-only sessions")),
        }
    }

    fn capabilities(&self, _session: &Self::Session) -> DriverResult<SessionCapabilities> {
        Ok(relock(&self.state).capabilities)
    }

    fn commit(&self, _session: &mut Self::Session) -> DriverResult<()> {
        relock(&self.state).commits += 1;
        Ok(())
    }

    fn rollback(&self, _session: &mut Self::Session) -> DriverResult<()> {
        relock(&self.state).rollbacks += 1;
        Ok(())
    }

    fn alloc_stmt(&self, session: &mut Self::Session) -> DriverResult<Self::Stmt> {
        Ok(ScriptedStmt {
            state: Arc::clone(&self.state),
            session_id: session.id,
            sql: None,
            script: None,
            params: HashMap::new(),
            bound_cols: HashMap::new(),
            materialized: None,
            row_index: 0,
            current_row: None,
            need_data: VecDeque::new(),
            current_feed: None,
            fed: HashMap::new(),
            max_rows: 0,
            at_end: false,
            had_result_set: false,
        })
    }

    fn free_stmt(&self, _stmt: Self::Stmt) {}

    fn set_stmt_attr(&self, stmt: &mut Self::Stmt, attr: StmtAttr) -> DriverResult<()> {
        if let StmtAttr::MaxRows(max) = attr {
            stmt.max_rows = max;
        }
        Ok(())
    }

    fn prepare(&self, stmt: &mut Self::Stmt, sql: &str, policy: LengthPolicy) -> DriverResult<()> {
        relock(&self.state).last_policy = Some(policy);
        stmt.sql = Some(sql.to_owned());
        Ok(())
    }

    fn execute(&self, stmt: &mut Self::Stmt) -> DriverResult<ExecOutcome> {
        let sql = stmt
            .sql
            .clone()
            .ok_or_else(|| DriverError::general("HY010", "nothing prepared"))?;
        stmt.run(&sql)
    }

    fn exec_direct(
        &self,
        stmt: &mut Self::Stmt,
        sql: &str,
        policy: LengthPolicy,
    ) -> DriverResult<ExecOutcome> {
        relock(&self.state).last_policy = Some(policy);
        stmt.run(sql)
    }

    fn num_result_cols(&self, stmt: &mut Self::Stmt) -> DriverResult<u16> {
        Ok(stmt.script_ref()?.columns.len() as u16)
    }

    fn describe_col(&self, stmt: &mut Self::Stmt, position: u16) -> DriverResult<ColumnDescription> {
        stmt.script_ref()?
            .columns
            .get(position as usize - 1)
            .cloned()
            .ok_or_else(|| DriverError::general("07009", format!("no column {position}")))
    }

    fn bind_param(
        &self,
        stmt: &mut Self::Stmt,
        binding: &ParamBinding,
        value: &SqlValue,
    ) -> DriverResult<()> {
        stmt.params
            .insert(binding.position, (binding.clone(), value.clone()));
        Ok(())
    }

    fn set_param_numeric(
        &self,
        stmt: &mut Self::Stmt,
        position: u16,
        _precision: u8,
        _scale: i8,
    ) -> DriverResult<()> {
        if stmt.params.contains_key(&position) {
            Ok(())
        } else {
            Err(DriverError::general(
                "07009",
                format!("parameter {position} is not bound"),
            ))
        }
    }

    fn bind_col(&self, stmt: &mut Self::Stmt, binding: &ColumnBinding) -> DriverResult<()> {
        stmt.bound_cols.insert(binding.position, binding.clone());
        Ok(())
    }

    fn set_col_numeric(
        &self,
        stmt: &mut Self::Stmt,
        position: u16,
        _precision: u8,
        _scale: i8,
    ) -> DriverResult<()> {
        if stmt.bound_cols.contains_key(&position) {
            Ok(())
        } else {
            Err(DriverError::general(
                "07009",
                format!("column {position} is not bound"),
            ))
        }
    }

    fn fetch(&self, stmt: &mut Self::Stmt) -> DriverResult<FetchOutcome> {
        if stmt.max_rows > 0 && stmt.row_index as u64 >= stmt.max_rows {
            stmt.at_end = true;
            stmt.current_row = None;
            return Ok(FetchOutcome::NoData);
        }
        let index = stmt.row_index;
        let row = stmt.rows()?.get(index).cloned();
        match row {
            Some(row) => {
                stmt.row_index += 1;
                stmt.current_row = Some(row);
                Ok(FetchOutcome::Row)
            }
            None => {
                stmt.at_end = true;
                stmt.current_row = None;
                Ok(FetchOutcome::NoData)
            }
        }
    }

    fn bound_value(&self, stmt: &mut Self::Stmt, position: u16) -> DriverResult<SqlValue> {
        let binding = stmt
            .bound_cols
            .get(&position)
            .cloned()
            .ok_or_else(|| DriverError::general("07009", format!("column {position} not bound")))?;
        let value = stmt.current_value(position)?.clone();
        // A real driver silently truncates into the bound buffer; mimic that
        // so oversized data visibly needs the piecewise path.
        Ok(match value {
            SqlValue::Text(s) if binding.buffer_len > 0 && s.len() > binding.buffer_len - 1 => {
                SqlValue::Text(truncate_text(&s, binding.buffer_len - 1))
            }
            SqlValue::Bytes(b) if b.len() > binding.buffer_len => {
                SqlValue::Bytes(b[..binding.buffer_len].to_vec())
            }
            other => other,
        })
    }

    fn get_data(
        &self,
        stmt: &mut Self::Stmt,
        position: u16,
        max_len: usize,
    ) -> DriverResult<GetData> {
        let name = stmt
            .script_ref()?
            .columns
            .get(position as usize - 1)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        if relock(&stmt.state).length_unknown.contains(&name) {
            return Ok(GetData {
                total: Total::Unknown,
                chunk: Vec::new(),
            });
        }
        let value = stmt.current_value(position)?.clone();
        if value.is_null() {
            return Ok(GetData {
                total: Total::Null,
                chunk: Vec::new(),
            });
        }
        let bytes = value.to_stream_bytes();
        let total = Total::Bytes(bytes.len());
        if max_len == 0 {
            return Ok(GetData {
                total,
                chunk: Vec::new(),
            });
        }
        let take = bytes.len().min(max_len);
        Ok(GetData {
            total,
            chunk: bytes[..take].to_vec(),
        })
    }

    fn param_data(&self, stmt: &mut Self::Stmt) -> DriverResult<Option<u16>> {
        match stmt.need_data.pop_front() {
            Some(position) => {
                stmt.current_feed = Some(position);
                Ok(Some(position))
            }
            None => {
                stmt.current_feed = None;
                Ok(None)
            }
        }
    }

    fn put_data(&self, stmt: &mut Self::Stmt, chunk: &[u8]) -> DriverResult<()> {
        let position = stmt
            .current_feed
            .ok_or_else(|| DriverError::general("HY010", "no parameter awaiting data"))?;
        stmt.fed.entry(position).or_default().extend_from_slice(chunk);
        Ok(())
    }

    fn close_cursor(&self, stmt: &mut Self::Stmt) -> DriverResult<()> {
        if stmt.had_result_set && stmt.at_end {
            // The condition several backends raise once the cursor already
            // ran off the end; callers are expected to tolerate it.
            return Err(DriverError::general("24000", "invalid cursor state"));
        }
        stmt.current_row = None;
        Ok(())
    }

    fn cancel(&self, _stmt: &mut Self::Stmt) -> DriverResult<()> {
        Ok(())
    }

    fn cursor_name(&self, stmt: &mut Self::Stmt) -> DriverResult<String> {
        if relock(&stmt.state).cursor_names {
            Ok(format!("SQL_CUR{}", stmt.session_id))
        } else {
            Err(DriverError::not_capable("cursor names"))
        }
    }

    fn row_count(&self, stmt: &mut Self::Stmt) -> DriverResult<i64> {
        Ok(stmt.script_ref()?.rows_affected)
    }

    fn output_value(&self, stmt: &mut Self::Stmt, position: u16) -> DriverResult<SqlValue> {
        stmt.script_ref()?
            .output_values
            .iter()
            .find(|(pos, _)| *pos == position)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                DriverError::general("07009", format!("no output value for parameter {position}"))
            })
    }
}

/// Integer column description.
#[must_use]
pub fn col_int(name: &str) -> ColumnDescription {
    ColumnDescription {
        name: name.to_owned(),
        native_type: NativeType::Long,
        size: 10,
        decimal_digits: 0,
        nullable: true,
    }
}

/// Narrow character column of declared `size`.
#[must_use]
pub fn col_text(name: &str, size: usize) -> ColumnDescription {
    ColumnDescription {
        name: name.to_owned(),
        native_type: NativeType::VarChar,
        size,
        decimal_digits: 0,
        nullable: true,
    }
}

/// Wide character column of declared `size`.
#[must_use]
pub fn col_wide(name: &str, size: usize) -> ColumnDescription {
    ColumnDescription {
        name: name.to_owned(),
        native_type: NativeType::WVarChar,
        size,
        decimal_digits: 0,
        nullable: true,
    }
}

/// Binary column of declared `size`.
#[must_use]
pub fn col_bytes(name: &str, size: usize) -> ColumnDescription {
    ColumnDescription {
        name: name.to_owned(),
        native_type: NativeType::Binary,
        size,
        decimal_digits: 0,
        nullable: true,
    }
}

/// Numeric column with `precision` and `scale`.
#[must_use]
pub fn col_numeric(name: &str, precision: usize, scale: i16) -> ColumnDescription {
    ColumnDescription {
        name: name.to_owned(),
        native_type: NativeType::Numeric,
        size: precision,
        decimal_digits: scale,
        nullable: true,
    }
}

/// Calendar date column.
#[must_use]
pub fn col_date(name: &str) -> ColumnDescription {
    ColumnDescription {
        name: name.to_owned(),
        native_type: NativeType::Date,
        size: 10,
        decimal_digits: 0,
        nullable: true,
    }
}

/// Time-of-day column.
#[must_use]
pub fn col_time(name: &str) -> ColumnDescription {
    ColumnDescription {
        name: name.to_owned(),
        native_type: NativeType::Time,
        size: 8,
        decimal_digits: 0,
        nullable: true,
    }
}

/// Timestamp column with fractional seconds.
#[must_use]
pub fn col_timestamp(name: &str) -> ColumnDescription {
    ColumnDescription {
        name: name.to_owned(),
        native_type: NativeType::Timestamp,
        size: 26,
        decimal_digits: 3,
        nullable: true,
    }
}
