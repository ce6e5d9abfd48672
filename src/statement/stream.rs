//! Piecewise data transfer: at-execution columns and parameters.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::driver::{Driver, Total};
use crate::error::SqlSessionError;
use crate::statement::Statement;
use crate::values::{NativeType, SqlValue};

impl<D: Driver> Statement<'_, D> {
    /// Retrieve every at-execution column of the current row. A zero-length
    /// probe learns the total length first, then one sized read collects the
    /// data. A column whose length the driver cannot report aborts the row.
    pub(crate) fn retrieve_at_exec_columns(&mut self) -> Result<(), SqlSessionError> {
        if self.first_at_exec == 0 {
            return Ok(());
        }
        let driver = Arc::clone(&self.driver);
        let positions: Vec<(u16, NativeType)> = self
            .columns
            .iter()
            .filter(|(_, c)| c.at_exec)
            .map(|(pos, c)| (*pos, c.native))
            .collect();

        for (position, native) in positions {
            let probe = {
                let stmt = Self::stmt_handle(&mut self.stmt)?;
                driver.get_data(stmt, position, 0)
            }
            .map_err(|e| {
                SqlSessionError::execution(&format!("Cannot probe column {position}"), &e)
            })?;

            let value = match probe.total {
                Total::Unknown => {
                    return Err(SqlSessionError::ExecutionError(format!(
                        "length of column {position} is unknown; the row cannot be retrieved"
                    )));
                }
                Total::Null | Total::Bytes(0) => SqlValue::Null,
                Total::Bytes(total) => {
                    // Character data gets room for a terminator pair so wide
                    // drivers never truncate the final unit.
                    let request = if native.is_character() {
                        total + 2
                    } else {
                        total
                    };
                    let data = {
                        let stmt = Self::stmt_handle(&mut self.stmt)?;
                        driver.get_data(stmt, position, request)
                    }
                    .map_err(|e| {
                        SqlSessionError::execution(&format!("Cannot read column {position}"), &e)
                    })?;
                    let mut value = SqlValue::from_stream_bytes(native.generic(), data.chunk)
                        .map_err(|e| {
                            SqlSessionError::ExecutionError(format!(
                                "column {position} is not valid UTF-8: {e}"
                            ))
                        })?;
                    // Allow-listed numerics arrive as character data.
                    if native == NativeType::Numeric {
                        if let SqlValue::Text(text) = &value {
                            if let Ok(dec) = Decimal::from_str(text.trim()) {
                                value = SqlValue::Decimal(dec);
                            }
                        }
                    }
                    value
                }
            };
            if let Some(column) = self.columns.get_mut(&position) {
                column.value = value;
            }
        }
        Ok(())
    }

    /// Answer the driver's data requests after execute reported it needs
    /// parameter data, feeding each requested parameter in chunks.
    pub(crate) fn feed_at_exec_params(&mut self) -> Result<(), SqlSessionError> {
        let driver = Arc::clone(&self.driver);
        let chunk_len = self.config.buffer_size.max(1);
        loop {
            let wanted = {
                let stmt = Self::stmt_handle(&mut self.stmt)?;
                driver.param_data(stmt)
            }
            .map_err(|e| SqlSessionError::execution("Parameter feeding failed", &e))?;
            let Some(position) = wanted else {
                return Ok(());
            };
            let Some(param) = self.params.get(&position) else {
                return Err(SqlSessionError::ParameterError(format!(
                    "driver requested data for unbound parameter {position}"
                )));
            };
            let bytes = param.value.to_stream_bytes();
            if bytes.is_empty() {
                let stmt = Self::stmt_handle(&mut self.stmt)?;
                driver.put_data(stmt, &[]).map_err(|e| {
                    SqlSessionError::execution(
                        &format!("Cannot send data for parameter {position}"),
                        &e,
                    )
                })?;
                continue;
            }
            for chunk in bytes.chunks(chunk_len) {
                let stmt = Self::stmt_handle(&mut self.stmt)?;
                driver.put_data(stmt, chunk).map_err(|e| {
                    SqlSessionError::execution(
                        &format!("Cannot send data for parameter {position}"),
                        &e,
                    )
                })?;
            }
        }
    }
}
