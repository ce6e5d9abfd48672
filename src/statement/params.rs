//! Parameter binding.

use std::sync::Arc;

use crate::driver::{Driver, ParamBinding};
use crate::error::SqlSessionError;
use crate::statement::Statement;
use crate::values::{NativeType, SqlType, numeric_shape};

impl<D: Driver> Statement<'_, D> {
    /// Bind every set parameter by position. Skipped when nothing changed
    /// since the last bind; any parameter mutation re-arms it.
    pub(crate) fn bind_parameters(&mut self) -> Result<(), SqlSessionError> {
        if self.params.is_empty() || self.params_bound {
            return Ok(());
        }
        let driver = Arc::clone(&self.driver);
        let supports_long = self.conn.supports_long_data();

        for (&position, param) in &self.params {
            // NULL binds as character data; the backend casts as needed.
            let value_type = param.value.sql_type().unwrap_or(SqlType::Text);
            let native = self
                .param_rebinds
                .get(&value_type)
                .copied()
                .unwrap_or_else(|| value_type.default_native());
            let size = param.max_size.unwrap_or_else(|| param.value.declared_size());
            let (native, size) = self.dialect.fixup_parameter(native, size);

            if param.at_exec && !supports_long {
                return Err(SqlSessionError::Unsupported(format!(
                    "parameter {position} wants at-execution supply but the driver cannot stream data"
                )));
            }

            let decimal_digits = match param.value.as_decimal() {
                Some(dec) if native == NativeType::Numeric => {
                    i16::from(numeric_shape(&dec).1)
                }
                _ => 0,
            };
            let binding = ParamBinding {
                position,
                direction: param.direction,
                value_type,
                param_type: native,
                // At-execution parameters bind with no size; the position
                // itself serves as the data token during feeding.
                size: if param.at_exec { 0 } else { size },
                decimal_digits,
                at_exec: param.at_exec,
            };
            let label = param
                .name
                .clone()
                .unwrap_or_else(|| position.to_string());
            let stmt = Self::stmt_handle(&mut self.stmt)?;
            driver.bind_param(stmt, &binding, &param.value).map_err(|e| {
                SqlSessionError::ParameterError(format!("cannot bind parameter {label}: {e}"))
            })?;

            // Numeric descriptors need precision and scale set in a second
            // step or the backend silently misreads the value.
            if native == NativeType::Numeric {
                if let Some(dec) = param.value.as_decimal() {
                    let (precision, scale) = numeric_shape(&dec);
                    let (precision, scale) = self.dialect.normalize_numeric(precision, scale);
                    driver
                        .set_param_numeric(stmt, position, precision, scale)
                        .map_err(|e| {
                            SqlSessionError::ParameterError(format!(
                                "cannot set numeric descriptor for parameter {position}: {e}"
                            ))
                        })?;
                }
            }
        }
        self.params_bound = true;
        Ok(())
    }
}
