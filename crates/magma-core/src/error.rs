//! Error taxonomy shared by every magma crate.
//!
//! Data-absence errors (`NoSuchValueSet`, `NoSuchVariable`, `NoSuchValueTable`),
//! data-quality errors (`ValueConversion`, `DatasourceParsing`) and caller
//! misuse (`InvalidArgument`, `Unsupported`) are kept apart so callers can
//! react to each class differently. Backend faults cross the abstraction
//! boundary as `Runtime`.

use std::fmt;

use thiserror::Error;

use crate::entity::VariableEntity;
use crate::types::ValueType;

/// Result alias used throughout magma.
pub type Result<T> = std::result::Result<T, MagmaError>;

/// Errors raised by the value system, tables, datasources and writers.
#[derive(Debug, Error)]
pub enum MagmaError {
    /// The entity is not a member of the table.
    #[error("No value set for entity {entity} in table '{table}'")]
    NoSuchValueSet {
        table: String,
        entity: VariableEntity,
    },

    /// The variable is not defined in the table.
    #[error("No variable '{variable}' in table '{table}'")]
    NoSuchVariable { table: String, variable: String },

    /// The datasource has no table with that name.
    #[error("No value table '{table}' in datasource '{datasource}'")]
    NoSuchValueTable { datasource: String, table: String },

    /// Native or serialized input rejected by a value type.
    #[error("Cannot convert '{input}' to {value_type}: {message}")]
    ValueConversion {
        value_type: ValueType,
        input: String,
        message: String,
    },

    /// Malformed backend-native data.
    #[error(transparent)]
    DatasourceParsing(#[from] DatasourceParsingError),

    /// Bad caller usage: empty names, wrong entity type, duplicate keys.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A capability-gated mutation the backend does not support.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Another writer session currently owns the table.
    #[error("Table '{table}' already has an open writer")]
    TableLocked { table: String },

    /// A value set writer failed and its row was discarded.
    #[error("Value set of {entity} in table '{table}' was rolled back: {reason}")]
    WriteRolledBack {
        table: String,
        entity: VariableEntity,
        reason: String,
    },

    /// A writer session closed with some rows discarded.
    #[error("{failed} value set(s) were not written to table '{table}'")]
    PartialWrite { table: String, failed: usize },

    /// Catch-all for unexpected backend faults.
    #[error("{message}")]
    Runtime {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl MagmaError {
    /// Create a runtime error without an underlying cause.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a backend fault.
    pub fn runtime_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Runtime {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a conversion error for `input` rejected by `value_type`.
    pub fn conversion(
        value_type: ValueType,
        input: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::ValueConversion {
            value_type,
            input: input.to_string(),
            message: message.into(),
        }
    }

    /// Error for a poisoned lock guarding `what`.
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::runtime(format!("Lock guarding {what} was poisoned"))
    }

    /// Whether this error reports absent data rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchValueSet { .. } | Self::NoSuchVariable { .. } | Self::NoSuchValueTable { .. }
        )
    }
}

impl From<std::io::Error> for MagmaError {
    fn from(err: std::io::Error) -> Self {
        Self::runtime_with(format!("I/O failure: {err}"), err)
    }
}

/// Malformed backend-native data found while building entities or variables.
///
/// `code` is a stable machine-readable key (e.g. `CsvDuplicateIdentifier`)
/// and `parameters` are its positional arguments (file name, row index...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code}: {})", .parameters.join(", "))]
pub struct DatasourceParsingError {
    pub message: String,
    pub code: String,
    pub parameters: Vec<String>,
}

impl DatasourceParsingError {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            parameters: Vec::new(),
        }
    }

    /// Append positional parameters.
    pub fn with_parameters<I, P>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: ToString,
    {
        self.parameters
            .extend(parameters.into_iter().map(|p| p.to_string()));
        self
    }
}
