//! Core types for magma.
//!
//! This crate provides the uniform logical model every backend exposes:
//!
//! - [`ValueType`] - Closed set of value types, their literals and conversions
//! - [`Value`] - Immutable typed datum, possibly null, possibly a sequence
//! - [`VariableEntity`] - Row identity (entity type + identifier)
//! - [`Variable`] / [`Category`] / [`Attribute`] - Column metadata
//! - [`ValueTable`] / [`Datasource`] - Tables of value sets and their registries
//! - [`ValueTableWriter`] - Scoped writer protocol for schema and data
//!
//! # Architecture
//!
//! ```text
//! magma-core (this crate)
//!    │
//!    ├─── csv-types           (Value <-> CSV cell text)
//!    ├─── memory-datasource   (in-memory tables, bean tables)
//!    └─── csv-datasource      (directory of CSV files)
//! ```
//!
//! # Example
//!
//! ```rust
//! use magma_core::ValueType;
//!
//! let age = ValueType::Integer.value_of(42i64).unwrap();
//! assert_eq!(age, ValueType::Integer.parse("42").unwrap());
//!
//! let text = ValueType::Text.convert(&age).unwrap();
//! assert_eq!(text.to_literal().as_deref(), Some("42"));
//!
//! let visits = ValueType::Date.parse_sequence("2024-01-05,2024-02-09").unwrap();
//! assert_eq!(visits.size(), 2);
//! ```

pub mod attribute;
pub mod convert;
pub mod datasource;
pub mod engine;
pub mod entity;
pub mod error;
pub mod literal;
pub mod locale;
pub mod source;
pub mod table;
pub mod types;
pub mod values;
pub mod variable;
pub mod view;
pub mod writer;

// Re-exports for convenience
pub use attribute::{Attribute, AttributeAware, AttributeBuilder, Attributes};
pub use datasource::{Datasource, Lifecycle, TableCache};
pub use engine::{MagmaEngine, TypeRegistry};
pub use entity::{VariableEntity, IDENTIFIER_SEPARATOR};
pub use error::{DatasourceParsingError, MagmaError, Result};
pub use literal::EMPTY_SEQUENCE_LITERAL;
pub use locale::Locale;
pub use source::{
    StaticTimestamps, Timestamps, ValueSet, ValueSource, VariableEntityProvider,
    VariableValueSource, VariableValueSourceFactory,
};
pub use table::{TableState, ValueTable, ValueTableCore};
pub use types::ValueType;
pub use values::{NativeValue, Payload, Value};
pub use variable::{Category, CategoryBuilder, Variable, VariableBuilder};
pub use view::{EvaluationContext, Evaluator, View};
pub use writer::{
    ValueSetBuffer, ValueSetWriter, ValueTableWriter, VariableWriter, WriteGuard, WriteLock,
};
