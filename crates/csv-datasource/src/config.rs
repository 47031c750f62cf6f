use std::collections::BTreeMap;
use std::path::PathBuf;

use magma_core::ValueType;
use serde::{Deserialize, Serialize};

/// Configuration of a CSV datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvDatasourceConfig {
    /// Directory holding `<table>.csv` files and their metadata sheets
    pub directory: PathBuf,

    /// Entity type of tables without a variables sheet
    pub entity_type: String,

    /// Columns forming the entity identifier, joined with `-` when several
    pub id_columns: Vec<String>,

    /// CSV delimiter character (default: ',')
    pub delimiter: char,

    /// Value types of data columns for tables without a variables sheet;
    /// other columns are text
    pub column_types: BTreeMap<String, ValueType>,
}

impl Default for CsvDatasourceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            entity_type: "Participant".to_string(),
            id_columns: vec!["id".to_string()],
            delimiter: ',',
            column_types: BTreeMap::new(),
        }
    }
}

impl CsvDatasourceConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub(crate) fn delimiter_byte(&self) -> magma_core::Result<u8> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                magma_core::MagmaError::InvalidArgument(format!(
                    "CSV delimiter '{}' must be an ASCII character",
                    self.delimiter
                ))
            })
    }

    pub(crate) fn is_id_column(&self, column: &str) -> bool {
        self.id_columns.iter().any(|c| c == column)
    }
}
