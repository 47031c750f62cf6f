//! Magma
//!
//! Typed value tables over pluggable datasources.
//!
//! # Features
//!
//! - Configuration files (TOML or YAML) naming `memory` and `csv` datasources
//! - A [`Magma`] registry that initialises them and disposes them on shutdown
//! - [`TableCopier`] to copy a table into another datasource through the
//!   writer protocol
//!
//! The value system itself lives in `magma_core`; the backends in
//! `magma_memory_datasource` and `magma_csv_datasource`.
//!
//! # CLI Usage
//!
//! ```bash
//! # Tables of a datasource
//! magma --config magma.toml tables study
//!
//! # Variables of a table, as JSON documents
//! magma --config magma.toml variables study people
//!
//! # Values of one entity
//! magma --config magma.toml values study people 1001
//!
//! # Copy a table, optionally under another name
//! MAGMA_CONFIG=magma.toml magma copy study people scratch --as cohort
//! ```

pub mod config;
pub mod copy;
pub mod factory;

pub use config::{DatasourceEntry, DatasourceKind, MagmaConfig};
pub use copy::{CopyReport, TableCopier};
pub use factory::{CsvDatasourceFactory, DatasourceFactory, Magma, MemoryDatasourceFactory};
