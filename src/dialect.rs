//! Per-backend capability and syntax rules consulted during binding.
//!
//! The executor stays backend-agnostic; anything vendor-shaped (size fixups,
//! numeric normalization, call syntax, savepoint spelling) comes through
//! [`DialectCapabilities`]. [`GenericDialect`] is the standard-conforming
//! default.

use crate::values::NativeType;

/// Widest precision a generic numeric descriptor can carry.
pub const MAX_NUMERIC_PRECISION: u8 = 38;

/// Capability and syntax provider for one backend family.
pub trait DialectCapabilities: Send + Sync {
    /// Final size/type fixup before a parameter bind is issued.
    fn fixup_parameter(&self, native: NativeType, size: usize) -> (NativeType, usize) {
        (native, size)
    }

    /// Clamp a declared precision/scale pair into a range the descriptor
    /// accepts.
    fn normalize_numeric(&self, precision: u8, scale: i8) -> (u8, i8) {
        let precision = precision.clamp(1, MAX_NUMERIC_PRECISION);
        let scale = scale.clamp(0, precision as i8);
        (precision, scale)
    }

    /// Textual call syntax for a function or procedure invocation with
    /// `arg_count` placeholders and an optional return slot.
    fn call_syntax(&self, procedure: &str, arg_count: usize, has_return: bool) -> String {
        let placeholders = vec!["?"; arg_count].join(",");
        if has_return {
            format!("{{?=call {procedure}({placeholders})}}")
        } else {
            format!("{{call {procedure}({placeholders})}}")
        }
    }

    fn savepoint(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    fn release_savepoint(&self, name: &str) -> String {
        format!("RELEASE SAVEPOINT {name}")
    }

    fn rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }

    /// Precision/scale pairs known to survive the manual retrieval path even
    /// though the standard binding API cannot express them there.
    fn numeric_stream_allow_list(&self) -> &[(u8, i8)] {
        &[]
    }

    fn numeric_allowed_after_stream(&self, precision: u8, scale: i8) -> bool {
        self.numeric_stream_allow_list()
            .contains(&(precision, scale))
    }
}

/// Standard-conforming dialect with a configurable numeric allow-list.
///
/// The (38, 16) entry covers the one backend shape known to decode correctly
/// past a streamed column; keeping the list as data lets other shapes be
/// added without touching binding logic.
pub struct GenericDialect {
    numeric_stream_allow: Vec<(u8, i8)>,
}

impl Default for GenericDialect {
    fn default() -> Self {
        Self {
            numeric_stream_allow: vec![(38, 16)],
        }
    }
}

impl GenericDialect {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a precision/scale pair to the streamed-numeric allow-list.
    #[must_use]
    pub fn with_numeric_stream_allowance(mut self, precision: u8, scale: i8) -> Self {
        self.numeric_stream_allow.push((precision, scale));
        self
    }
}

impl DialectCapabilities for GenericDialect {
    fn numeric_stream_allow_list(&self) -> &[(u8, i8)] {
        &self.numeric_stream_allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_syntax_shapes() {
        let d = GenericDialect::new();
        assert_eq!(d.call_syntax("audit.log", 2, false), "{call audit.log(?,?)}");
        assert_eq!(d.call_syntax("next_id", 0, true), "{?=call next_id()}");
    }

    #[test]
    fn numeric_normalization_clamps() {
        let d = GenericDialect::new();
        assert_eq!(d.normalize_numeric(0, 0), (1, 0));
        assert_eq!(d.normalize_numeric(200, 4), (38, 4));
        assert_eq!(d.normalize_numeric(10, -3), (10, 0));
        assert_eq!(d.normalize_numeric(4, 9), (4, 4));
    }

    #[test]
    fn stream_allow_list_is_data() {
        let d = GenericDialect::new().with_numeric_stream_allowance(18, 2);
        assert!(d.numeric_allowed_after_stream(38, 16));
        assert!(d.numeric_allowed_after_stream(18, 2));
        assert!(!d.numeric_allowed_after_stream(10, 0));
    }
}
