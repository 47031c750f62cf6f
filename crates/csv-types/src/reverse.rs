//! Reverse conversion: CSV cell → Value.
//!
//! An empty cell is null for every type, text included.

use magma_core::{MagmaError, Value, ValueType};
use thiserror::Error;

/// A CSV cell with the type it must be read as.
#[derive(Debug, Clone)]
pub struct CsvStringWithType<'a> {
    /// The cell text
    pub value: &'a str,
    /// The target value type
    pub value_type: ValueType,
    /// Whether the cell holds a sequence literal
    pub repeatable: bool,
}

impl<'a> CsvStringWithType<'a> {
    pub fn new(value: &'a str, value_type: ValueType) -> Self {
        Self {
            value,
            value_type,
            repeatable: false,
        }
    }

    pub fn repeatable(mut self, repeatable: bool) -> Self {
        self.repeatable = repeatable;
        self
    }

    pub fn to_value(&self) -> Result<Value, CsvParseError> {
        csv_string_to_value(self.value, self.value_type, self.repeatable)
    }
}

/// Error type for CSV parsing failures.
#[derive(Debug, Clone, Error)]
#[error("Failed to parse '{value}' as {expected_type}: {message}")]
pub struct CsvParseError {
    pub message: String,
    pub value: String,
    pub expected_type: ValueType,
}

impl From<CsvParseError> for MagmaError {
    fn from(err: CsvParseError) -> Self {
        MagmaError::conversion(err.expected_type, err.value, err.message)
    }
}

/// Parse cell text as `value_type`, as a sequence when `repeatable`.
///
/// This is the reverse of `CsvValue::from(&Value)`.
pub fn csv_string_to_value(
    value: &str,
    value_type: ValueType,
    repeatable: bool,
) -> Result<Value, CsvParseError> {
    if value.is_empty() {
        return Ok(if repeatable {
            value_type.null_sequence()
        } else {
            value_type.null_value()
        });
    }
    let parsed = if repeatable {
        value_type.parse_sequence(value)
    } else {
        value_type.parse(value)
    };
    parsed.map_err(|e| CsvParseError {
        message: match e {
            MagmaError::ValueConversion { message, .. } => message,
            other => other.to_string(),
        },
        value: value.to_string(),
        expected_type: value_type,
    })
}
