//! Result column description and binding.
//!
//! Columns are bound into driver-managed buffers where their declared size
//! permits. Character and binary columns that are oversized or of unknown
//! width switch to piecewise retrieval; the driver restriction that piecewise
//! reads only work past the bound prefix then forces every later column onto
//! the same path, unless the driver advertises the any-column extension.

use std::sync::Arc;

use crate::driver::{ColumnBinding, ColumnDescription, Driver};
use crate::error::SqlSessionError;
use crate::statement::Statement;
use crate::values::{NativeType, SqlValue};

/// One result column: description, effective target type, and the value for
/// the current row.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub value: SqlValue,
    pub desc: ColumnDescription,
    /// Target type after any rebind override.
    pub native: NativeType,
    /// Bound buffer capacity, terminator included.
    pub buffer_len: usize,
    /// Retrieved piecewise after each fetch instead of bound.
    pub at_exec: bool,
}

impl<D: Driver> Statement<'_, D> {
    /// Describe and bind `count` result columns.
    pub(crate) fn bind_result_columns(&mut self, count: u16) -> Result<(), SqlSessionError> {
        self.columns.clear();
        self.column_positions.clear();
        self.first_at_exec = 0;
        let driver = Arc::clone(&self.driver);
        let caps = self.conn.capabilities();

        for position in 1..=count {
            let desc = {
                let stmt = Self::stmt_handle(&mut self.stmt)?;
                driver.describe_col(stmt, position)
            }
            .map_err(|e| {
                SqlSessionError::execution(&format!("Cannot describe column {position}"), &e)
            })?;

            let generic = desc.native_type.generic();
            let native = self
                .column_rebinds
                .get(&generic)
                .copied()
                .unwrap_or(desc.native_type);

            let streamable = native.is_character() || native.is_binary();
            let oversized = desc.size == 0 || desc.size > self.config.max_column_length;
            let mut at_exec = streamable && oversized;

            if self.first_at_exec != 0 && !caps.getdata_any_column {
                // Past the bound prefix. Numerics cannot round-trip through
                // character retrieval except for shapes on the dialect's
                // allow-list.
                if native == NativeType::Numeric
                    && !self
                        .dialect
                        .numeric_allowed_after_stream(desc.size as u8, desc.decimal_digits as i8)
                {
                    return Err(SqlSessionError::ExecutionError(format!(
                        "numeric column '{}' follows a streamed column and cannot be retrieved",
                        desc.name
                    )));
                }
                at_exec = true;
            }

            if at_exec && !caps.long_data {
                return Err(SqlSessionError::Unsupported(format!(
                    "column '{}' needs piecewise retrieval but the driver cannot stream data",
                    desc.name
                )));
            }
            if at_exec && self.first_at_exec == 0 {
                self.first_at_exec = position;
            }

            // Wide characters take two bytes each plus a two-byte terminator.
            let buffer_len = if native.is_wide() {
                desc.size * 2 + 2
            } else {
                desc.size + 1
            };

            if !at_exec {
                let binding = ColumnBinding {
                    position,
                    target_type: native,
                    buffer_len,
                };
                let stmt = Self::stmt_handle(&mut self.stmt)?;
                driver.bind_col(stmt, &binding).map_err(|e| {
                    SqlSessionError::execution(&format!("Cannot bind column {position}"), &e)
                })?;
                if native == NativeType::Numeric {
                    let (precision, scale) = self
                        .dialect
                        .normalize_numeric(desc.size as u8, desc.decimal_digits as i8);
                    driver
                        .set_col_numeric(stmt, position, precision, scale)
                        .map_err(|e| {
                            SqlSessionError::execution(
                                &format!("Cannot set numeric descriptor for column {position}"),
                                &e,
                            )
                        })?;
                }
            }

            self.column_positions
                .insert(desc.name.to_ascii_lowercase(), position);
            self.columns.insert(
                position,
                Column {
                    name: desc.name.clone(),
                    value: SqlValue::Null,
                    desc,
                    native,
                    buffer_len,
                    at_exec,
                },
            );
        }
        Ok(())
    }

    /// Copy the values a fetch deposited in bound buffers into the column
    /// set.
    pub(crate) fn read_bound_columns(&mut self) -> Result<(), SqlSessionError> {
        let driver = Arc::clone(&self.driver);
        let positions: Vec<u16> = self
            .columns
            .iter()
            .filter(|(_, c)| !c.at_exec)
            .map(|(pos, _)| *pos)
            .collect();
        for position in positions {
            let value = {
                let stmt = Self::stmt_handle(&mut self.stmt)?;
                driver.bound_value(stmt, position)
            }
            .map_err(|e| {
                SqlSessionError::execution(&format!("Cannot read column {position}"), &e)
            })?;
            if let Some(column) = self.columns.get_mut(&position) {
                column.value = value;
            }
        }
        Ok(())
    }
}
