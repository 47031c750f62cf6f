//! Copy a value table into another datasource.

use std::fmt;

use magma_core::{Datasource, MagmaError, Result, ValueTable};
use tracing::{debug, info, warn};

/// Outcome of a copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub table: String,
    pub variables: usize,
    pub value_sets: usize,
    pub values: usize,
    /// Value sets rolled back by the destination
    pub failed: usize,
}

impl fmt::Display for CopyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} variable(s), {} value set(s), {} value(s)",
            self.table, self.variables, self.value_sets, self.values
        )?;
        if self.failed > 0 {
            write!(f, ", {} value set(s) failed", self.failed)?;
        }
        Ok(())
    }
}

/// Writes the variables, then the value sets, of a source table through
/// the writer protocol of a destination datasource. Null values are not
/// written.
pub struct TableCopier<'a> {
    source: &'a dyn ValueTable,
    destination: &'a dyn Datasource,
    name: Option<String>,
}

impl<'a> TableCopier<'a> {
    pub fn new(source: &'a dyn ValueTable, destination: &'a dyn Datasource) -> Self {
        Self {
            source,
            destination,
            name: None,
        }
    }

    /// Write under another table name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn copy(&self) -> Result<CopyReport> {
        let table = self.name.clone().unwrap_or_else(|| self.source.name());
        let mut report = CopyReport {
            table: table.clone(),
            ..CopyReport::default()
        };
        info!(
            "Copying {}.{} to {}.{table}",
            self.source.datasource_name(),
            self.source.name(),
            self.destination.name()
        );

        let variables = self.source.variables()?;
        let mut writer = self
            .destination
            .create_writer(&table, self.source.entity_type())?;
        {
            let mut variable_writer = writer.write_variables()?;
            for variable in &variables {
                variable_writer.write_variable(variable)?;
            }
            variable_writer.close()?;
        }
        report.variables = variables.len();

        for entity in self.source.variable_entities()?.iter() {
            let value_set = self.source.value_set(entity)?;
            let mut row = writer.write_value_set(entity.clone())?;
            let mut written = 0;
            for variable in &variables {
                let value = self.source.value(variable.name(), &value_set)?;
                if value.is_null() {
                    continue;
                }
                if let Err(e) = row.write_value(variable, value) {
                    warn!("Cannot copy {}.{}: {e}", entity, variable.name());
                    break;
                }
                written += 1;
            }
            match row.close() {
                Ok(()) => {
                    report.value_sets += 1;
                    report.values += written;
                }
                Err(MagmaError::WriteRolledBack { .. }) => report.failed += 1,
                Err(e) => return Err(e),
            }
        }

        match writer.close() {
            Ok(()) => {}
            Err(MagmaError::PartialWrite { failed, .. }) => {
                debug!("Destination rolled back {failed} value set(s)");
            }
            Err(e) => return Err(e),
        }
        info!("Copied {report}");
        Ok(report)
    }
}
