//! CSV conversions for magma values.
//!
//! This crate provides bidirectional conversions between magma's `Value`
//! and CSV cell text, plus the naming of attribute columns in metadata
//! sheets.
//!
//! # Modules
//!
//! - [`forward`] - Value → CSV cell
//! - [`reverse`] - CSV cell → Value
//! - [`header`] - attribute column headers (`label`, `label:fr`, `ns::label:fr`)
//!
//! # Example
//!
//! ```
//! use magma_core::ValueType;
//! use magma_csv_types::{CsvStringWithType, CsvValue};
//!
//! let cell: CsvValue = ValueType::Integer.value_of(42).unwrap().into();
//! assert_eq!(cell.as_str(), "42");
//!
//! let value = CsvStringWithType::new("42", ValueType::Integer).to_value().unwrap();
//! assert_eq!(value, ValueType::Integer.value_of(42).unwrap());
//! ```

pub mod forward;
pub mod header;
pub mod reverse;

pub use forward::{values_to_cells, CsvValue};
pub use header::AttributeHeader;
pub use reverse::{csv_string_to_value, CsvParseError, CsvStringWithType};
