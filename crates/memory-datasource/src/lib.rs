//! In-memory datasource for magma.
//!
//! [`MemoryDatasource`] holds writable tables filled through the writer
//! protocol, and read-only tables registered by the caller such as
//! [`BeanValueTable`]s or views.
//!
//! # Visibility
//!
//! - A new table is listed once a variable writer or a value set writer
//!   of its first session closes successfully.
//! - An entity becomes visible when its value set writer closes.
//! - A value set writer that saw a failed write discards its row; the
//!   session close then reports `PartialWrite`.
//! - One writer session per table at a time (`TableLocked` otherwise).
//!
//! # Example
//!
//! ```
//! use magma_core::{Datasource, ValueTable, ValueType, Variable, VariableEntity};
//! use magma_memory_datasource::MemoryDatasource;
//!
//! let ds = MemoryDatasource::new("mem");
//! ds.initialise().unwrap();
//!
//! let age = Variable::builder("age", ValueType::Integer, "Participant").build().unwrap();
//! let participant = VariableEntity::new("Participant", "1").unwrap();
//!
//! let mut writer = ds.create_writer("people", "Participant").unwrap();
//! {
//!     let mut variables = writer.write_variables().unwrap();
//!     variables.write_variable(&age).unwrap();
//!     variables.close().unwrap();
//! }
//! {
//!     let mut row = writer.write_value_set(participant.clone()).unwrap();
//!     row.write_value(&age, ValueType::Integer.value_of(42).unwrap()).unwrap();
//!     row.close().unwrap();
//! }
//! writer.close().unwrap();
//!
//! let table = ds.value_table("people").unwrap();
//! let value_set = table.value_set(&participant).unwrap();
//! assert_eq!(table.value("age", &value_set).unwrap(), ValueType::Integer.value_of(42).unwrap());
//! ```

mod bean;
mod datasource;
mod table;
mod writer;

pub use bean::BeanValueTable;
pub use datasource::{MemoryDatasource, DATASOURCE_TYPE};
pub use table::MemoryValueTable;
pub use writer::MemoryTableWriter;
