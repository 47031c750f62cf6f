//! Forward conversion: Value → CSV cell.
//!
//! Nulls become empty cells. Non-null values use their canonical literal,
//! so repeatable cells hold a sequence literal and an empty sequence is
//! written as `[]`.

use magma_core::Value;

/// Wrapper for CSV cell text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvValue(pub String);

impl CsvValue {
    /// Get the inner cell text.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Get a reference to the inner cell text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Value> for CsvValue {
    fn from(value: &Value) -> Self {
        CsvValue(value.to_literal().unwrap_or_default())
    }
}

impl From<Value> for CsvValue {
    fn from(value: Value) -> Self {
        CsvValue::from(&value)
    }
}

/// Cells of one record, in the order of `values`.
pub fn values_to_cells<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Value>,
{
    values
        .into_iter()
        .map(|v| CsvValue::from(v).into_inner())
        .collect()
}
