//! CSV datasource for magma.
//!
//! A [`CsvDatasource`] reads a directory where each table is a
//! `<table>.csv` file: the identifier column(s) followed by one column per
//! variable. Repeatable variables hold sequence literals.
//!
//! Variables come from `<table>.variables.csv` (and categories from
//! `<table>.categories.csv`) when that sheet exists, otherwise from the
//! data columns, typed through [`CsvDatasourceConfig::column_types`].
//!
//! Writer sessions stage their changes and rewrite the files when the
//! session closes.
//!
//! # Example
//!
//! ```
//! use magma_core::{Datasource, ValueTable, ValueType, VariableEntity};
//! use magma_csv_datasource::{CsvDatasource, CsvDatasourceConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! std::fs::write(dir.path().join("people.csv"), "id,name\n1,Ada\n").unwrap();
//!
//! let ds = CsvDatasource::new("files", CsvDatasourceConfig::new(dir.path()));
//! ds.initialise().unwrap();
//!
//! let table = ds.value_table("people").unwrap();
//! let ada = VariableEntity::new("Participant", "1").unwrap();
//! let value_set = table.value_set(&ada).unwrap();
//! assert_eq!(
//!     table.value("name", &value_set).unwrap(),
//!     ValueType::Text.value_of("Ada").unwrap()
//! );
//! ```

mod config;
mod datasource;
mod files;
mod metadata;
mod table;
mod writer;

pub use config::CsvDatasourceConfig;
pub use datasource::{CsvDatasource, DATASOURCE_TYPE};
pub use table::{CsvValueTable, CsvVariableStrategy};
pub use writer::CsvTableWriter;
