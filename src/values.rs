use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

/// Values that can be bound as statement parameters or fetched as result
/// columns.
///
/// One closed enum is shared by the parameter and column paths so helper code
/// never needs to branch on driver-specific buffer types:
/// ```rust
/// use sql_sessions::SqlValue;
///
/// let params = vec![
///     SqlValue::Int(1),
///     SqlValue::Text("alice".into()),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Signed integer value (64-bit)
    Int(i64),
    /// Unsigned integer value (64-bit)
    UInt(u64),
    /// Text/string value
    Text(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Date plus time of day
    Timestamp(NaiveDateTime),
    /// Exact decimal value
    Decimal(Decimal),
}

impl SqlValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let SqlValue::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            SqlValue::UInt(value) => Some(*value),
            SqlValue::Int(value) if *value >= 0 => Some(*value as u64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let SqlValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let SqlValue::Bytes(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        if let SqlValue::Date(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_time(&self) -> Option<NaiveTime> {
        if let SqlValue::Time(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let SqlValue::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S.%3f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            SqlValue::Decimal(value) => Some(*value),
            SqlValue::Int(value) => Some(Decimal::from(*value)),
            _ => None,
        }
    }

    /// The generic type code for this value, or `None` for NULL.
    #[must_use]
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            SqlValue::Null => None,
            SqlValue::Int(_) => Some(SqlType::Integer),
            SqlValue::UInt(_) => Some(SqlType::Unsigned),
            SqlValue::Text(_) => Some(SqlType::Text),
            SqlValue::Bytes(_) => Some(SqlType::Bytes),
            SqlValue::Date(_) => Some(SqlType::Date),
            SqlValue::Time(_) => Some(SqlType::Time),
            SqlValue::Timestamp(_) => Some(SqlType::Timestamp),
            SqlValue::Decimal(_) => Some(SqlType::Decimal),
        }
    }

    /// Declared size used when binding this value as a parameter.
    #[must_use]
    pub(crate) fn declared_size(&self) -> usize {
        match self {
            SqlValue::Null => 0,
            SqlValue::Int(_) | SqlValue::UInt(_) => 20,
            SqlValue::Text(s) => s.len(),
            SqlValue::Bytes(b) => b.len(),
            SqlValue::Date(_) => 10,
            SqlValue::Time(_) => 8,
            SqlValue::Timestamp(_) => 26,
            SqlValue::Decimal(d) => numeric_shape(d).0 as usize,
        }
    }

    /// Serialized form used when feeding this value piecewise at execution
    /// time.
    #[must_use]
    pub(crate) fn to_stream_bytes(&self) -> Vec<u8> {
        match self {
            SqlValue::Bytes(b) => b.clone(),
            SqlValue::Text(s) => s.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        }
    }

    /// Rebuild a value from bytes retrieved piecewise, using the column's
    /// generic type to pick the representation.
    pub(crate) fn from_stream_bytes(
        generic: SqlType,
        bytes: Vec<u8>,
    ) -> Result<SqlValue, std::string::FromUtf8Error> {
        match generic {
            SqlType::Bytes => Ok(SqlValue::Bytes(bytes)),
            _ => Ok(SqlValue::Text(String::from_utf8(bytes)?)),
        }
    }
}

impl Default for SqlValue {
    fn default() -> Self {
        SqlValue::Null
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::UInt(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "{v}"),
            SqlValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            SqlValue::Date(v) => write!(f, "{}", v.format("%F")),
            SqlValue::Time(v) => write!(f, "{}", v.format("%T%.f")),
            SqlValue::Timestamp(v) => write!(f, "{}", v.format("%F %T%.f")),
            SqlValue::Decimal(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<u64> for SqlValue {
    fn from(value: u64) -> Self {
        SqlValue::UInt(value)
    }
}

impl From<u32> for SqlValue {
    fn from(value: u32) -> Self {
        SqlValue::UInt(u64::from(value))
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Bytes(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl From<NaiveTime> for SqlValue {
    fn from(value: NaiveTime) -> Self {
        SqlValue::Time(value)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl From<Decimal> for SqlValue {
    fn from(value: Decimal) -> Self {
        SqlValue::Decimal(value)
    }
}

/// Precision and scale of a decimal value as a driver descriptor expects them.
#[must_use]
pub fn numeric_shape(value: &Decimal) -> (u8, i8) {
    let scale = value.scale() as i8;
    let digits = value.mantissa().unsigned_abs().to_string().len() as u8;
    (digits.max(1), scale)
}

/// Generic type codes, the caller-facing half of a rebind mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Integer,
    Unsigned,
    Text,
    Bytes,
    Date,
    Time,
    Timestamp,
    Decimal,
}

impl SqlType {
    /// The native type a value of this generic type binds as when no rebind
    /// override is present.
    #[must_use]
    pub fn default_native(self) -> NativeType {
        match self {
            SqlType::Integer => NativeType::Long,
            SqlType::Unsigned => NativeType::ULong,
            SqlType::Text => NativeType::VarChar,
            SqlType::Bytes => NativeType::Binary,
            SqlType::Date => NativeType::Date,
            SqlType::Time => NativeType::Time,
            SqlType::Timestamp => NativeType::Timestamp,
            SqlType::Decimal => NativeType::Numeric,
        }
    }
}

/// Concrete type codes as the call-level driver understands them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Long,
    ULong,
    VarChar,
    WVarChar,
    LongVarChar,
    Binary,
    LongBinary,
    Date,
    Time,
    Timestamp,
    Numeric,
}

impl NativeType {
    /// Map a driver-declared type back onto the generic in-memory
    /// representation.
    #[must_use]
    pub fn generic(self) -> SqlType {
        match self {
            NativeType::Long => SqlType::Integer,
            NativeType::ULong => SqlType::Unsigned,
            NativeType::VarChar | NativeType::WVarChar | NativeType::LongVarChar => SqlType::Text,
            NativeType::Binary | NativeType::LongBinary => SqlType::Bytes,
            NativeType::Date => SqlType::Date,
            NativeType::Time => SqlType::Time,
            NativeType::Timestamp => SqlType::Timestamp,
            NativeType::Numeric => SqlType::Decimal,
        }
    }

    #[must_use]
    pub fn is_character(self) -> bool {
        matches!(
            self,
            NativeType::VarChar | NativeType::WVarChar | NativeType::LongVarChar
        )
    }

    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(self, NativeType::Binary | NativeType::LongBinary)
    }

    #[must_use]
    pub fn is_wide(self) -> bool {
        matches!(self, NativeType::WVarChar)
    }
}

/// Direction of a bound parameter. Unset directions default to input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamDirection {
    #[default]
    Input,
    Output,
    InputOutput,
}

/// Override table forcing a generic type to bind as a different native type
/// than it naturally would. Used to route around backends that mishandle a
/// given type over the wire.
pub type RebindMap = HashMap<SqlType, NativeType>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn accessors_match_variants() {
        assert_eq!(SqlValue::Int(7).as_int(), Some(7));
        assert_eq!(SqlValue::UInt(7).as_uint(), Some(7));
        assert_eq!(SqlValue::Int(7).as_uint(), Some(7));
        assert_eq!(SqlValue::Int(-1).as_uint(), None);
        assert_eq!(SqlValue::Text("x".into()).as_text(), Some("x"));
        assert!(SqlValue::Null.is_null());
        assert_eq!(SqlValue::Null.sql_type(), None);
    }

    #[test]
    fn timestamp_parses_from_text() {
        let v = SqlValue::Text("2024-05-01 12:30:00".into());
        assert!(v.as_timestamp().is_some());
    }

    #[test]
    fn numeric_shape_counts_digits() {
        let d = Decimal::from_str("123.4500").unwrap();
        assert_eq!(numeric_shape(&d), (7, 4));
        let zero = Decimal::from_str("0").unwrap();
        assert_eq!(numeric_shape(&zero), (1, 0));
    }

    #[test]
    fn native_round_trips_to_generic() {
        assert_eq!(NativeType::WVarChar.generic(), SqlType::Text);
        assert_eq!(SqlType::Decimal.default_native(), NativeType::Numeric);
        assert!(NativeType::WVarChar.is_wide());
        assert!(!NativeType::VarChar.is_wide());
    }
}
