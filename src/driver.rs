//! The call-level driver contract.
//!
//! Everything underneath the pool and the statement executor is expressed
//! through [`Driver`]: an environment-like factory handing out session and
//! statement handles, with typed bind/execute/fetch operations and piecewise
//! data transfer for oversized values. The crate never talks to a backend any
//! other way, so a fully in-memory implementation (see `testing`) can stand in
//! for a real driver.

use std::fmt;

use thiserror::Error;

use crate::values::{NativeType, ParamDirection, SqlType, SqlValue};

/// One diagnostic record as harvested from the driver after a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagRecord {
    /// Five-character SQLSTATE class/subclass.
    pub sqlstate: String,
    /// Backend-specific error number.
    pub native: i32,
    /// Human-readable message text.
    pub message: String,
}

impl fmt::Display for DiagRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({}) {}", self.sqlstate, self.native, self.message)
    }
}

/// Broad classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// An ordinary call failure; diagnostics carry the detail.
    General,
    /// The driver does not implement the requested feature (SQLSTATE classes
    /// like `HYC00`/`HY114`). Callers degrade instead of failing.
    NotCapable,
    /// A handle was used after being freed or never allocated.
    InvalidHandle,
    /// The physical session dropped out from under us.
    ConnectionLost,
}

/// Error type for all [`Driver`] operations. Carries every diagnostic record
/// the driver produced; `Display` concatenates them into one composite
/// message.
#[derive(Debug, Clone, Error)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub records: Vec<DiagRecord>,
}

impl DriverError {
    #[must_use]
    pub fn new(kind: DriverErrorKind, sqlstate: &str, native: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            records: vec![DiagRecord {
                sqlstate: sqlstate.to_owned(),
                native,
                message: message.into(),
            }],
        }
    }

    #[must_use]
    pub fn general(sqlstate: &str, message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::General, sqlstate, 0, message)
    }

    #[must_use]
    pub fn not_capable(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::NotCapable, "HYC00", 0, message)
    }

    /// True when the failure means "feature unsupported" rather than a fault.
    #[must_use]
    pub fn is_not_capable(&self) -> bool {
        self.kind == DriverErrorKind::NotCapable
    }

    /// True for the invalid-cursor-state condition some backends raise when a
    /// cursor is closed after reaching end of data.
    #[must_use]
    pub fn is_cursor_at_end(&self) -> bool {
        self.records.iter().any(|r| r.sqlstate == "24000")
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            return write!(f, "{:?}", self.kind);
        }
        let joined = self
            .records
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{joined}")
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Result of a fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A row is positioned and bound buffers are populated.
    Row,
    /// The cursor is past the last row. Not an error.
    NoData,
}

/// Result of an execute call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Done,
    /// At least one parameter was bound for at-execution supply; the caller
    /// must run the `param_data`/`put_data` feeding loop.
    NeedData,
}

/// How the statement-text length argument is computed for prepare/exec-direct.
///
/// `ExactPlusOne` exists because at least one driver build crashes on the
/// null-terminated form unless the terminator is counted in the declared
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthPolicy {
    NullTerminated,
    #[default]
    Exact,
    ExactPlusOne,
}

/// Total length reported by a zero-length `get_data` probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Total {
    Bytes(usize),
    /// The value is SQL NULL.
    Null,
    /// The driver cannot tell how long the value is. A row containing such a
    /// column cannot be retrieved safely.
    Unknown,
}

/// Payload of a `get_data` call.
#[derive(Debug, Clone)]
pub struct GetData {
    /// Bytes remaining before this read, NULL, or unknown.
    pub total: Total,
    /// Data transferred by this call; empty for a zero-length probe.
    pub chunk: Vec<u8>,
}

/// Statement-level attributes applied before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtAttr {
    ForwardOnlyCursor,
    NoScan(bool),
    MaxRows(u64),
    Concurrency(Concurrency),
}

/// Cursor concurrency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    #[default]
    ReadOnly,
    Lock,
    RowVersion,
    Values,
}

/// Session-level attributes. Setting one may legitimately fail with
/// [`DriverErrorKind::NotCapable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAttr {
    AutoCommit(bool),
    ReadOnly(bool),
}

/// Capability flags discovered right after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCapabilities {
    /// The driver supports piecewise transfer of oversized values.
    pub long_data: bool,
    /// More than one active statement may share the session.
    pub multiple_active_statements: bool,
    /// The driver extension allowing `get_data` on any column, not just those
    /// past the bound prefix.
    pub getdata_any_column: bool,
    /// The session was opened read-only.
    pub read_only: bool,
}

impl Default for SessionCapabilities {
    fn default() -> Self {
        Self {
            long_data: true,
            multiple_active_statements: false,
            getdata_any_column: false,
            read_only: false,
        }
    }
}

/// Description of one result column as declared by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub native_type: NativeType,
    /// Declared size; 0 means the backend does not know.
    pub size: usize,
    /// Scale for numeric types, fractional precision for time types.
    pub decimal_digits: i16,
    pub nullable: bool,
}

/// Everything a driver needs to bind one parameter by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
    /// 1-based position; 0 is the procedure return slot.
    pub position: u16,
    pub direction: ParamDirection,
    /// Generic type of the in-memory value.
    pub value_type: SqlType,
    /// Native type after any rebind override.
    pub param_type: NativeType,
    /// Declared size; zeroed when `at_exec` is set.
    pub size: usize,
    pub decimal_digits: i16,
    /// Value will be supplied piecewise after execute reports `NeedData`.
    /// Implementations use the position itself as the data-at-execution
    /// token, the standard sentinel technique.
    pub at_exec: bool,
}

/// A column registered for bulk fetch into a driver-managed buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    /// 1-based column position.
    pub position: u16,
    pub target_type: NativeType,
    /// Buffer capacity in bytes, terminator included. Wide character columns
    /// reserve twice the declared precision.
    pub buffer_len: usize,
}

/// The opaque call-level interface to one backend.
///
/// Handle lifetime rules mirror the C interface underneath: a `Session` is
/// produced by `connect` and consumed by `disconnect`; a `Stmt` is produced by
/// `alloc_stmt` against an open session and consumed by `free_stmt`. The
/// executor guarantees a statement never outlives its session.
pub trait Driver: Send + Sync + 'static {
    type Session: Send;
    type Stmt: Send;

    fn connect(&self, connect_string: &str) -> DriverResult<Self::Session>;
    fn disconnect(&self, session: Self::Session) -> DriverResult<()>;
    /// Cheap validity probe; false after the backing definition vanished or
    /// the server dropped the session.
    fn is_valid(&self, session: &Self::Session) -> bool;
    fn set_session_attr(&self, session: &mut Self::Session, attr: SessionAttr) -> DriverResult<()>;
    fn capabilities(&self, session: &Self::Session) -> DriverResult<SessionCapabilities>;
    fn commit(&self, session: &mut Self::Session) -> DriverResult<()>;
    fn rollback(&self, session: &mut Self::Session) -> DriverResult<()>;

    fn alloc_stmt(&self, session: &mut Self::Session) -> DriverResult<Self::Stmt>;
    /// Releases the handle. Infallible by design; drivers swallow teardown
    /// diagnostics the way the underlying free call does.
    fn free_stmt(&self, stmt: Self::Stmt);
    fn set_stmt_attr(&self, stmt: &mut Self::Stmt, attr: StmtAttr) -> DriverResult<()>;

    fn prepare(&self, stmt: &mut Self::Stmt, sql: &str, policy: LengthPolicy) -> DriverResult<()>;
    fn execute(&self, stmt: &mut Self::Stmt) -> DriverResult<ExecOutcome>;
    fn exec_direct(
        &self,
        stmt: &mut Self::Stmt,
        sql: &str,
        policy: LengthPolicy,
    ) -> DriverResult<ExecOutcome>;

    fn num_result_cols(&self, stmt: &mut Self::Stmt) -> DriverResult<u16>;
    fn describe_col(&self, stmt: &mut Self::Stmt, position: u16) -> DriverResult<ColumnDescription>;

    fn bind_param(
        &self,
        stmt: &mut Self::Stmt,
        binding: &ParamBinding,
        value: &SqlValue,
    ) -> DriverResult<()>;
    /// Second binding step for numeric parameters: set precision and scale on
    /// the parameter descriptor, then re-assert the data pointer. Skipping
    /// this silently corrupts values on at least one major backend.
    fn set_param_numeric(
        &self,
        stmt: &mut Self::Stmt,
        position: u16,
        precision: u8,
        scale: i8,
    ) -> DriverResult<()>;

    fn bind_col(&self, stmt: &mut Self::Stmt, binding: &ColumnBinding) -> DriverResult<()>;
    /// Numeric descriptor fixup for a bound column, symmetric to
    /// [`Driver::set_param_numeric`].
    fn set_col_numeric(
        &self,
        stmt: &mut Self::Stmt,
        position: u16,
        precision: u8,
        scale: i8,
    ) -> DriverResult<()>;

    fn fetch(&self, stmt: &mut Self::Stmt) -> DriverResult<FetchOutcome>;
    /// Read the value a fetch deposited in a bound column buffer.
    fn bound_value(&self, stmt: &mut Self::Stmt, position: u16) -> DriverResult<SqlValue>;
    /// Piecewise read of an unbound column. `max_len == 0` is a pure length
    /// probe and transfers nothing.
    fn get_data(&self, stmt: &mut Self::Stmt, position: u16, max_len: usize)
    -> DriverResult<GetData>;

    /// Which parameter wants data next, or `None` once execution completes.
    fn param_data(&self, stmt: &mut Self::Stmt) -> DriverResult<Option<u16>>;
    fn put_data(&self, stmt: &mut Self::Stmt, chunk: &[u8]) -> DriverResult<()>;

    fn close_cursor(&self, stmt: &mut Self::Stmt) -> DriverResult<()>;
    /// Best-effort cancellation of an in-flight statement.
    fn cancel(&self, stmt: &mut Self::Stmt) -> DriverResult<()>;
    /// Not every backend exposes a cursor name; callers treat failure as
    /// advisory.
    fn cursor_name(&self, stmt: &mut Self::Stmt) -> DriverResult<String>;
    fn row_count(&self, stmt: &mut Self::Stmt) -> DriverResult<i64>;
    /// Value of an output or input/output parameter after execution.
    fn output_value(&self, stmt: &mut Self::Stmt, position: u16) -> DriverResult<SqlValue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_message_concatenates_records() {
        let err = DriverError {
            kind: DriverErrorKind::General,
            records: vec![
                DiagRecord {
                    sqlstate: "42000".into(),
                    native: 102,
                    message: "syntax error".into(),
                },
                DiagRecord {
                    sqlstate: "01000".into(),
                    native: 0,
                    message: "statement aborted".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("42000"));
        assert!(text.contains("statement aborted"));
        assert!(text.contains("; "));
    }

    #[test]
    fn cursor_at_end_detected_by_sqlstate() {
        let err = DriverError::general("24000", "invalid cursor state");
        assert!(err.is_cursor_at_end());
        assert!(!DriverError::general("HY000", "boom").is_cursor_at_end());
    }

    #[test]
    fn not_capable_is_degradable() {
        assert!(DriverError::not_capable("no async").is_not_capable());
    }
}
